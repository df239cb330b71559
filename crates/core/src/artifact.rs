//! Context artifacts and the store that holds them.
//!
//! Every piece of text the pipeline produces or consumes is addressed by a
//! typed [`ArtifactKey`]: a stage (or reference document) name plus the
//! kind of artifact. A stage's raw response and its converted document
//! share a name but are distinct artifacts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::StoreError;

/// The kind of a stored artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A stage's raw generated text
    Response,
    /// A stage's converted, compilable document body
    Document,
    /// The assembled payload sent for a stage (audit trail)
    Prompt,
    /// The system instructions sent for a stage (audit trail)
    SystemPrompt,
    /// The error that terminated a stage (audit trail)
    Diagnostic,
    /// External reference material (literature notes, bibliography)
    Reference,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Response => "response",
            Self::Document => "document",
            Self::Prompt => "prompt",
            Self::SystemPrompt => "system_prompt",
            Self::Diagnostic => "diagnostic",
            Self::Reference => "reference",
        }
    }
}

/// Identity of a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub name: String,
    pub kind: ArtifactKind,
}

impl ArtifactKey {
    pub fn new(name: impl Into<String>, kind: ArtifactKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn response(name: impl Into<String>) -> Self {
        Self::new(name, ArtifactKind::Response)
    }

    pub fn document(name: impl Into<String>) -> Self {
        Self::new(name, ArtifactKind::Document)
    }

    pub fn prompt(name: impl Into<String>) -> Self {
        Self::new(name, ArtifactKind::Prompt)
    }

    pub fn system_prompt(name: impl Into<String>) -> Self {
        Self::new(name, ArtifactKind::SystemPrompt)
    }

    pub fn diagnostic(name: impl Into<String>) -> Self {
        Self::new(name, ArtifactKind::Diagnostic)
    }

    pub fn reference(name: impl Into<String>) -> Self {
        Self::new(name, ArtifactKind::Reference)
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.kind.as_str())
    }
}

/// The context store: named text artifacts persisted between stages and
/// between runs.
///
/// Reads are frequent (context resolution), writes happen once per stage
/// execution and overwrite any earlier artifact under the same key.
/// Implementations: directory-backed, in-memory (for testing).
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// The backend name (e.g., "file", "memory").
    fn name(&self) -> &str;

    /// Store an artifact, replacing any previous content under the key.
    async fn put(&self, key: &ArtifactKey, content: &str) -> std::result::Result<(), StoreError>;

    /// Fetch an artifact. `Ok(None)` means it does not exist.
    async fn get(&self, key: &ArtifactKey) -> std::result::Result<Option<String>, StoreError>;

    /// Whether an artifact exists.
    async fn contains(&self, key: &ArtifactKey) -> std::result::Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Names of all artifacts of a kind, sorted.
    async fn list(&self, kind: ArtifactKind) -> std::result::Result<Vec<String>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_and_converted_keys_are_distinct() {
        let raw = ArtifactKey::response("intro");
        let doc = ArtifactKey::document("intro");
        assert_ne!(raw, doc);
        assert_eq!(raw.name, doc.name);
    }

    #[test]
    fn key_display_includes_kind() {
        assert_eq!(ArtifactKey::system_prompt("model").to_string(), "model (system_prompt)");
    }
}
