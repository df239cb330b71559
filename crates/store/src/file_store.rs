//! Directory-backed context store.
//!
//! Each artifact is a plain file in the output directory, named after the
//! stage with a suffix per kind:
//!
//! | kind            | file                          |
//! |-----------------|-------------------------------|
//! | response        | `<name>-response.md`          |
//! | document        | `<name>-texinput.tex`         |
//! | prompt          | `<name>-prompt.xml`           |
//! | system prompt   | `<name>-system-prompt.xml`    |
//! | diagnostic      | `<name>-error.txt`            |
//!
//! Reference material lives in a separate, read-only directory and is
//! addressed by its file name (e.g. `bibtex-all.bib`).
//!
//! The files are human-inspectable and editable between runs: whatever is
//! on disk when a stage starts is what it sees.

use async_trait::async_trait;
use paperchain_core::artifact::{ArtifactKey, ArtifactKind, ContextStore};
use paperchain_core::error::StoreError;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Suffixes in match order: longer suffixes first so that
/// `x-system-prompt.xml` is never read as the prompt of `x-system`.
const SUFFIXES: &[(ArtifactKind, &str)] = &[
    (ArtifactKind::SystemPrompt, "-system-prompt.xml"),
    (ArtifactKind::Prompt, "-prompt.xml"),
    (ArtifactKind::Response, "-response.md"),
    (ArtifactKind::Document, "-texinput.tex"),
    (ArtifactKind::Diagnostic, "-error.txt"),
];

/// A context store rooted in an output directory.
pub struct FileStore {
    dir: PathBuf,
    reference_dir: PathBuf,
}

impl FileStore {
    /// Create a store. Directories are created lazily on first write.
    pub fn new(dir: impl Into<PathBuf>, reference_dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let reference_dir = reference_dir.into();
        debug!(dir = %dir.display(), references = %reference_dir.display(), "File context store opened");
        Self { dir, reference_dir }
    }

    /// The output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The reference material directory.
    pub fn reference_dir(&self) -> &Path {
        &self.reference_dir
    }

    /// File path backing an artifact.
    pub fn path_for(&self, key: &ArtifactKey) -> Result<PathBuf, StoreError> {
        if key.kind == ArtifactKind::Reference {
            let relative = Path::new(&key.name);
            let escapes = key.name.is_empty()
                || relative
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_)));
            if escapes {
                return Err(StoreError::ReadFailed {
                    key: key.to_string(),
                    reason: "reference names must be relative paths inside the reference directory".into(),
                });
            }
            return Ok(self.reference_dir.join(relative));
        }

        let suffix = suffix_for(key.kind);
        Ok(self.dir.join(format!("{}{}", key.name, suffix)))
    }

    /// Split a file name into `(stage name, kind)`.
    fn classify(file_name: &str) -> Option<(&str, ArtifactKind)> {
        SUFFIXES.iter().find_map(|(kind, suffix)| {
            file_name
                .strip_suffix(suffix)
                .filter(|name| !name.is_empty())
                .map(|name| (name, *kind))
        })
    }

    async fn read_dir_names(dir: &Path) -> Result<Vec<String>, StoreError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Storage(format!(
                    "Failed to list {}: {e}",
                    dir.display()
                )));
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to list {}: {e}", dir.display())))?
        {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}

fn suffix_for(kind: ArtifactKind) -> &'static str {
    SUFFIXES
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, suffix)| *suffix)
        .unwrap_or("")
}

#[async_trait]
impl ContextStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn put(&self, key: &ArtifactKey, content: &str) -> Result<(), StoreError> {
        if key.kind == ArtifactKind::Reference {
            return Err(StoreError::ReadOnly(key.to_string()));
        }

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| StoreError::WriteFailed {
            key: key.to_string(),
            reason: format!("cannot create {}: {e}", self.dir.display()),
        })?;

        let path = self.path_for(key)?;
        tokio::fs::write(&path, content).await.map_err(|e| StoreError::WriteFailed {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        debug!(artifact = %key, path = %path.display(), bytes = content.len(), "Artifact written");
        Ok(())
    }

    async fn get(&self, key: &ArtifactKey) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::ReadFailed {
                key: key.to_string(),
                reason: format!("{}: {e}", path.display()),
            }),
        }
    }

    async fn list(&self, kind: ArtifactKind) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = if kind == ArtifactKind::Reference {
            Self::read_dir_names(&self.reference_dir).await?
        } else {
            Self::read_dir_names(&self.dir)
                .await?
                .iter()
                .filter_map(|file| {
                    Self::classify(file)
                        .filter(|(_, k)| *k == kind)
                        .map(|(name, _)| name.to_string())
                })
                .collect()
        };
        names.sort();
        Ok(names)
    }
}
