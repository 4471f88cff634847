//! Source resolvers backed by the filesystem and the relational database.

mod fs;
mod sql;

pub use fs::FilesystemResolver;
pub use sql::SqlResolver;

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::{ResolveError, SourceResolver};
use crate::domain::keys::RootKey;

/// Asks each resolver in turn; the first one that knows the key answers.
#[derive(Clone, Default)]
pub struct ChainResolver {
    resolvers: Vec<Arc<dyn SourceResolver>>,
}

impl ChainResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, resolver: Arc<dyn SourceResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

#[async_trait]
impl SourceResolver for ChainResolver {
    async fn resolve(&self, key: RootKey) -> Result<Vec<u8>, ResolveError> {
        for resolver in &self.resolvers {
            match resolver.resolve(key).await {
                Err(ResolveError::NotDefined { .. }) => continue,
                other => return other,
            }
        }
        Err(ResolveError::not_defined(key))
    }
}
