use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::application::runner::TaskHandle;
use crate::application::table::{SortDirection, SortOrder, TablePage, TableQuery};
use crate::domain::keys::RootKey;
use crate::domain::session::SessionId;

use super::HttpState;
use super::error::ApiError;

/// Datatable query string. A negative `length` asks for every row.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ViewParams {
    pub draw: u64,
    pub start: usize,
    pub length: Option<i64>,
    pub search: Option<String>,
    pub order_column: Option<String>,
    pub order_dir: Option<SortDirection>,
}

impl From<ViewParams> for TableQuery {
    fn from(params: ViewParams) -> Self {
        let length = params
            .length
            .filter(|length| *length >= 0)
            .and_then(|length| usize::try_from(length).ok());
        let order = params
            .order_column
            .filter(|column| !column.is_empty())
            .map(|column| SortOrder {
                column,
                direction: params.order_dir.unwrap_or_default(),
            });
        TableQuery {
            draw: params.draw,
            start: params.start,
            length,
            search: params.search.filter(|search| !search.trim().is_empty()),
            order,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CheckinResponse {
    pub session: String,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
}

#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub task_id: String,
}

fn session_and_root(session: &str, root: &str) -> Result<(SessionId, RootKey), ApiError> {
    Ok((SessionId::parse(session)?, root.parse()?))
}

fn accepted(handle: &TaskHandle) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            task_id: handle.id().to_string(),
        }),
    )
        .into_response()
}

pub async fn checkin(
    State(state): State<HttpState>,
    Path(session): Path<String>,
) -> Result<Json<CheckinResponse>, ApiError> {
    let session = SessionId::parse(session)?;
    let timestamp = state.service.checkin(&session).await?;
    Ok(Json(CheckinResponse {
        session: session.to_string(),
        timestamp,
    }))
}

pub async fn view_table(
    State(state): State<HttpState>,
    Path((session, root)): Path<(String, String)>,
    Query(params): Query<ViewParams>,
) -> Result<Json<TablePage>, ApiError> {
    let (session, root) = session_and_root(&session, &root)?;
    let page = state
        .service
        .view_table(&session, root, &TableQuery::from(params))
        .await?;
    Ok(Json(page))
}

pub async fn refresh_view(
    State(state): State<HttpState>,
    Path((session, root)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let (session, root) = session_and_root(&session, &root)?;
    let handle = state.service.refresh_view(&session, root).await?;
    Ok(accepted(&handle))
}

pub async fn view_ready(
    State(state): State<HttpState>,
    Path((session, root)): Path<(String, String)>,
) -> Result<Json<ReadyResponse>, ApiError> {
    let (session, root) = session_and_root(&session, &root)?;
    let ready = state.service.is_view_ready(&session, root).await?;
    Ok(Json(ReadyResponse { ready }))
}

pub async fn recompute_root(
    State(state): State<HttpState>,
    Path(root): Path<String>,
) -> Result<Response, ApiError> {
    let root: RootKey = root.parse()?;
    let handle = state.service.recompute_root(root).await?;
    Ok(accepted(&handle))
}

pub async fn root_ready(
    State(state): State<HttpState>,
    Path(root): Path<String>,
) -> Result<Json<ReadyResponse>, ApiError> {
    let root: RootKey = root.parse()?;
    let ready = state.service.is_root_ready(root).await?;
    Ok(Json(ReadyResponse { ready }))
}
