use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::application::repos::{RecordsRepo, RepoError};
use crate::domain::keys::RootKey;

use super::{PostgresRepositories, map_sqlx_error};

#[async_trait]
impl RecordsRepo for PostgresRepositories {
    async fn fetch_rows(&self, key: RootKey, query: &str) -> Result<Vec<Value>, RepoError> {
        // Queries come from operator configuration, never from requests.
        let wrapped = format!("SELECT row_to_json(t) FROM ({query}) t");
        let rows = sqlx::query_scalar::<_, Value>(&wrapped)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        debug!(key = %key, rows = rows.len(), "Fetched dataset rows");
        Ok(rows)
    }
}
