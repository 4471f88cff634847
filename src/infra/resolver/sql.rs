//! Datasets computed by configured SQL queries.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::application::repos::RecordsRepo;
use crate::cache::{ResolveError, SourceResolver};
use crate::domain::dataset::{Dataset, Row};
use crate::domain::keys::{KeyClass, RootKey};

#[derive(Clone)]
pub struct SqlResolver {
    records: Arc<dyn RecordsRepo>,
    queries: BTreeMap<RootKey, String>,
}

impl SqlResolver {
    /// Registry keys are never resolved from SQL and are dropped from `queries`.
    pub fn new(records: Arc<dyn RecordsRepo>, queries: BTreeMap<RootKey, String>) -> Self {
        let queries = queries
            .into_iter()
            .filter(|(key, _)| key.class() == KeyClass::Dataset)
            .collect();
        Self { records, queries }
    }

    pub fn defines(&self, key: RootKey) -> bool {
        self.queries.contains_key(&key)
    }
}

#[async_trait]
impl SourceResolver for SqlResolver {
    async fn resolve(&self, key: RootKey) -> Result<Vec<u8>, ResolveError> {
        let Some(query) = self.queries.get(&key) else {
            return Err(ResolveError::not_defined(key));
        };

        let rows = self
            .records
            .fetch_rows(key, query)
            .await
            .map_err(|err| ResolveError::failed(key, err.to_string()))?;

        let rows = rows
            .into_iter()
            .map(|value| match value {
                Value::Object(row) => Ok(row),
                other => Err(ResolveError::failed(
                    key,
                    format!("query returned a non-object row: {other}"),
                )),
            })
            .collect::<Result<Vec<Row>, _>>()?;

        Ok(Dataset::with_rows(key, rows).encode())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::application::repos::RepoError;

    #[derive(Default)]
    struct CannedRecords {
        rows: Vec<Value>,
        fail: bool,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RecordsRepo for CannedRecords {
        async fn fetch_rows(&self, _key: RootKey, query: &str) -> Result<Vec<Value>, RepoError> {
            self.seen.lock().expect("seen").push(query.to_string());
            if self.fail {
                return Err(RepoError::Timeout);
            }
            Ok(self.rows.clone())
        }
    }

    fn queries() -> BTreeMap<RootKey, String> {
        BTreeMap::from([
            (
                RootKey::ProcessedFiles,
                "SELECT id, filename FROM file".to_string(),
            ),
            (RootKey::Checkins, "SELECT 1".to_string()),
        ])
    }

    #[tokio::test]
    async fn rows_become_dataset_rows() {
        let records = Arc::new(CannedRecords {
            rows: vec![json!({"id": 7, "filename": "ctd.csv"})],
            ..CannedRecords::default()
        });
        let resolver = SqlResolver::new(records.clone(), queries());

        let bytes = resolver
            .resolve(RootKey::ProcessedFiles)
            .await
            .expect("resolved");
        let dataset = Dataset::decode(RootKey::ProcessedFiles, &bytes).expect("dataset");
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.rows[0]["filename"], json!("ctd.csv"));
        assert_eq!(
            records.seen.lock().expect("seen").as_slice(),
            ["SELECT id, filename FROM file"]
        );
    }

    #[tokio::test]
    async fn keys_without_queries_are_not_defined() {
        let resolver = SqlResolver::new(Arc::new(CannedRecords::default()), queries());
        assert!(!resolver.defines(RootKey::Checkins));

        for key in [RootKey::DeletedFiles, RootKey::Checkins] {
            let err = resolver.resolve(key).await.expect_err("not defined");
            assert!(matches!(err, ResolveError::NotDefined { .. }));
        }
    }

    #[tokio::test]
    async fn repository_errors_are_failures() {
        let records = Arc::new(CannedRecords {
            fail: true,
            ..CannedRecords::default()
        });
        let resolver = SqlResolver::new(records, queries());
        let err = resolver
            .resolve(RootKey::ProcessedFiles)
            .await
            .expect_err("timeout");
        assert!(matches!(err, ResolveError::Failed { .. }));
    }

    #[tokio::test]
    async fn scalar_rows_are_rejected() {
        let records = Arc::new(CannedRecords {
            rows: vec![json!(42)],
            ..CannedRecords::default()
        });
        let resolver = SqlResolver::new(records, queries());
        let err = resolver
            .resolve(RootKey::ProcessedFiles)
            .await
            .expect_err("non-object row");
        assert!(matches!(err, ResolveError::Failed { .. }));
    }
}
