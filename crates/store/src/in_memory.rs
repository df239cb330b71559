//! In-memory context store: useful for testing and dry runs.

use async_trait::async_trait;
use paperchain_core::artifact::{ArtifactKey, ArtifactKind, ContextStore};
use paperchain_core::error::StoreError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A store that keeps every artifact in a map.
///
/// Unlike [`crate::FileStore`], references are writable here so tests can
/// seed them.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    artifacts: Arc<RwLock<HashMap<ArtifactKey, String>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a reference document.
    pub async fn add_reference(&self, name: &str, content: &str) {
        self.artifacts
            .write()
            .await
            .insert(ArtifactKey::reference(name), content.to_string());
    }

    /// Number of stored artifacts.
    pub async fn len(&self) -> usize {
        self.artifacts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.artifacts.read().await.is_empty()
    }
}

#[async_trait]
impl ContextStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, key: &ArtifactKey, content: &str) -> Result<(), StoreError> {
        self.artifacts
            .write()
            .await
            .insert(key.clone(), content.to_string());
        Ok(())
    }

    async fn get(&self, key: &ArtifactKey) -> Result<Option<String>, StoreError> {
        Ok(self.artifacts.read().await.get(key).cloned())
    }

    async fn list(&self, kind: ArtifactKind) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self
            .artifacts
            .read()
            .await
            .keys()
            .filter(|k| k.kind == kind)
            .map(|k| k.name.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}
