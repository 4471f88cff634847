use std::{future::IntoFuture, process, str::FromStr, sync::Arc};

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{Monitor, WorkerBuilder, WorkerFactoryFn},
};
use apalis_sql::{Config as ApalisSqlConfig, postgres::PostgresStorage};
use tidecache::{
    application::{
        error::AppError,
        jobs::{JobWorkerContext, QueueTaskRunner, process_pipeline_job},
        pipeline::Pipeline,
        repos::{JobsRepo, RecordsRepo},
        runner::{LocalTaskRunner, TaskRunner, schedule},
        service::CacheService,
    },
    cache::{
        BackingStore, CacheConfig, LivenessRegistry, LockManager, MemoryStore, RootCache,
        SourceResolver, Sweeper, ViewCache,
    },
    config::{self, StoreBackend},
    domain::{keys::RootKey, types::JobType},
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, HttpState},
        resolver::{ChainResolver, FilesystemResolver, SqlResolver},
        store::PostgresStore,
        telemetry,
    },
};
use tokio::sync::Notify;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Sweep(_) => run_sweep(settings).await,
        config::Command::Recompute(args) => run_recompute(settings, &args.root_key).await,
    }
}

struct Repositories {
    http: Arc<PostgresRepositories>,
    jobs: Arc<PostgresRepositories>,
}

struct ApplicationContext {
    service: CacheService,
    pipeline: Pipeline,
    repositories: Option<Repositories>,
}

async fn init_repositories(settings: &config::Settings) -> Result<Option<Repositories>, AppError> {
    let Some(database_url) = settings.database.url.as_ref() else {
        return Ok(None);
    };

    let http_pool =
        PostgresRepositories::connect(database_url, settings.database.http_max_connections.get())
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&http_pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    let jobs_pool =
        PostgresRepositories::connect(database_url, settings.database.jobs_max_connections.get())
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Some(Repositories {
        http: Arc::new(PostgresRepositories::new(http_pool)),
        jobs: Arc::new(PostgresRepositories::new(jobs_pool)),
    }))
}

fn build_resolver(
    settings: &config::Settings,
    repositories: Option<&Repositories>,
) -> Arc<dyn SourceResolver> {
    let mut chain = ChainResolver::new().with(Arc::new(FilesystemResolver::new(
        settings.uploads.pending_directory.clone(),
        settings.discovery.directory.clone(),
    )));

    match repositories {
        Some(repositories) if !settings.resolver.queries.is_empty() => {
            let records: Arc<dyn RecordsRepo> = repositories.http.clone();
            chain = chain.with(Arc::new(SqlResolver::new(
                records,
                settings.resolver.queries.clone(),
            )));
        }
        None if !settings.resolver.queries.is_empty() => {
            warn!("resolver.queries is set but database.url is not; SQL datasets stay empty");
        }
        _ => {}
    }

    Arc::new(chain)
}

async fn build_application_context(
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let repositories = init_repositories(settings).await?;
    let cache_config: CacheConfig = settings.cache_config();

    let store: Arc<dyn BackingStore> = match (settings.store.backend, repositories.as_ref()) {
        (StoreBackend::Postgres, Some(repositories)) => {
            Arc::new(PostgresStore::new(repositories.http.pool().clone()))
        }
        (StoreBackend::Postgres, None) => {
            return Err(AppError::from(InfraError::configuration(
                "the postgres store requires database.url",
            )));
        }
        (StoreBackend::Memory, _) => Arc::new(MemoryStore::new()),
    };

    let locks = LockManager::new(store.clone(), &cache_config);
    let resolver = build_resolver(settings, repositories.as_ref());
    let roots = RootCache::new(store.clone(), locks.clone(), resolver, &cache_config);
    let views = ViewCache::new(store.clone(), locks.clone(), roots, &cache_config);
    let liveness = LivenessRegistry::new(store.clone(), locks, &cache_config);
    let sweeper = Sweeper::new(
        store,
        liveness.clone(),
        settings.uploads.pending_directory.clone(),
    );
    let pipeline = Pipeline::new(views.clone());

    // Queued stages only make sense when every worker sees the same store.
    let runner: Arc<dyn TaskRunner> = match (settings.store.backend, repositories.as_ref()) {
        (StoreBackend::Postgres, Some(repositories)) => {
            let jobs: Arc<dyn JobsRepo> = repositories.http.clone();
            Arc::new(QueueTaskRunner::new(jobs))
        }
        _ => Arc::new(LocalTaskRunner::new(pipeline.clone())),
    };

    info!(
        store = ?settings.store.backend,
        queued = settings.store.backend == StoreBackend::Postgres,
        "Cache layer initialised"
    );

    Ok(ApplicationContext {
        service: CacheService::new(views, liveness, sweeper, runner),
        pipeline,
        repositories,
    })
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;

    let sweep_service = app.service.clone();
    let sweep_handle = schedule(
        "sweeper",
        settings.cache_config().sweep_interval(),
        move || {
            let service = sweep_service.clone();
            async move {
                if let Err(err) = service.sweep().await {
                    warn!(error = %err, "scheduled sweep failed");
                }
            }
        },
    );

    let monitor_handle = match (&app.repositories, settings.store.backend) {
        (Some(repositories), StoreBackend::Postgres) => Some(spawn_job_monitor(
            repositories,
            app.pipeline.clone(),
            &settings.jobs,
        )),
        _ => None,
    };

    let http_state = HttpState {
        service: app.service.clone(),
        db: app.repositories.as_ref().map(|repos| repos.http.clone()),
    };
    let result = serve_http(&settings, http_state).await;

    sweep_handle.abort();
    let _ = sweep_handle.await;
    if let Some(handle) = monitor_handle {
        handle.abort();
        let _ = handle.await;
    }

    result
}

async fn run_sweep(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;
    let report = app.service.sweep().await?;
    let rendered = serde_json::to_string_pretty(&report)
        .map_err(|err| AppError::unexpected(format!("failed to render sweep report: {err}")))?;
    println!("{rendered}");
    Ok(())
}

async fn run_recompute(settings: config::Settings, root_key: &str) -> Result<(), AppError> {
    let root = RootKey::from_str(root_key)?;
    let app = build_application_context(&settings).await?;
    let handle = app.service.recompute_root(root).await?;
    let task_id = handle.id().to_string();

    // Local runs complete here; queued runs finish on a worker.
    let output = handle.wait().await?;
    info!(
        root = %root,
        task_id = %task_id,
        committed = output.as_ref().is_some_and(|out| out.value.is_some()),
        "Recompute finished or enqueued"
    );
    println!("{task_id}");
    Ok(())
}

fn spawn_job_monitor(
    repositories: &Repositories,
    pipeline: Pipeline,
    jobs: &config::JobsSettings,
) -> tokio::task::JoinHandle<()> {
    let storage = PostgresStorage::new_with_config(
        repositories.jobs.pool().clone(),
        ApalisSqlConfig::new(JobType::PipelineStage.as_str()),
    );
    let context = JobWorkerContext {
        pipeline,
        jobs: repositories.jobs.clone(),
    };

    let concurrency = jobs.pipeline_concurrency.get() as usize;
    let pipeline_worker = WorkerBuilder::new("pipeline-worker")
        .concurrency(concurrency)
        .data(context)
        .backend(storage)
        .build_fn(process_pipeline_job);

    let monitor = Monitor::new().register(pipeline_worker);

    tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(error = %err, "job monitor stopped");
        }
    })
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "HTTP listener bound");

    let shutdown = Arc::new(Notify::new());
    let drain = shutdown.clone();
    let mut server = tokio::spawn(
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async move { drain.notified().await })
            .into_future(),
    );

    tokio::select! {
        joined = &mut server => return flatten_server(joined),
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                warn!(error = %err, "failed to listen for shutdown signal");
            }
        }
    }

    info!(
        grace_secs = settings.server.graceful_shutdown.as_secs(),
        "Shutting down HTTP listener"
    );
    shutdown.notify_one();
    match tokio::time::timeout(settings.server.graceful_shutdown, &mut server).await {
        Ok(joined) => flatten_server(joined),
        Err(_) => {
            warn!("graceful shutdown timed out; aborting open connections");
            server.abort();
            Ok(())
        }
    }
}

fn flatten_server(
    joined: Result<Result<(), std::io::Error>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(AppError::unexpected(format!("server error: {err}"))),
        Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
    }
}
