//! Postgres implementation of the backing store.
//!
//! Rows past `expires_at` are invisible to every read and are overwritten in place
//! by the next write, so expiry needs no background reaper. Deadlines are computed
//! from the database clock, the same clock every read compares against.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use sqlx::postgres::PgPool;

use crate::cache::{BackingStore, StoreError};

use super::error::store_unavailable;

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// TTL as fractional seconds for `make_interval`; `None` never expires.
fn ttl_secs(ttl: Option<Duration>) -> Option<f64> {
    ttl.map(|ttl| ttl.as_secs_f64())
}

/// Escape `LIKE` wildcards so a prefix matches literally.
fn like_prefix(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

#[async_trait]
impl BackingStore for PostgresStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let value = sqlx::query_scalar::<_, Vec<u8>>(
            r#"
            SELECT value
              FROM cache_entries
             WHERE key = $1
               AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_unavailable)?;
        Ok(value.map(Bytes::from))
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, expires_at)
            VALUES ($1, $2, now() + make_interval(secs => $3))
            ON CONFLICT (key) DO UPDATE
               SET value = EXCLUDED.value,
                   expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(value.as_ref())
        .bind(ttl_secs(ttl))
        .execute(&self.pool)
        .await
        .map_err(store_unavailable)?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        // A conflicting row is only replaced when it has already expired.
        let result = sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, expires_at)
            VALUES ($1, $2, now() + make_interval(secs => $3))
            ON CONFLICT (key) DO UPDATE
               SET value = EXCLUDED.value,
                   expires_at = EXCLUDED.expires_at
             WHERE cache_entries.expires_at IS NOT NULL
               AND cache_entries.expires_at <= now()
            "#,
        )
        .bind(key)
        .bind(value.as_ref())
        .bind(ttl_secs(ttl))
        .execute(&self.pool)
        .await
        .map_err(store_unavailable)?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let live = sqlx::query_scalar::<_, bool>(
            r#"
            DELETE FROM cache_entries
             WHERE key = $1
            RETURNING expires_at IS NULL OR expires_at > now()
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_unavailable)?;
        Ok(live.unwrap_or(false))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1
                  FROM cache_entries
                 WHERE key = $1
                   AND (expires_at IS NULL OR expires_at > now())
            )
            "#,
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await
        .map_err(store_unavailable)
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT key
              FROM cache_entries
             WHERE key LIKE $1 ESCAPE '\'
               AND (expires_at IS NULL OR expires_at > now())
             ORDER BY key COLLATE "C"
            "#,
        )
        .bind(like_prefix(prefix))
        .fetch_all(&self.pool)
        .await
        .map_err(store_unavailable)
    }
}
