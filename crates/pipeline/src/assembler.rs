//! Context assembly: turns a stage's dependencies into one payload.
//!
//! Each context item is wrapped in a labeled delimiter pair so the model can
//! tell sources apart:
//!
//! ```text
//! --- BEGIN CONTEXT: intro ---
//! ...
//! --- END CONTEXT: intro ---
//!
//! <instructions>
//! Write the model section.
//! </instructions>
//! ```

use paperchain_core::{ArtifactKey, ArtifactKind, ContextStore, Error, Plan};
use tracing::debug;

/// One named block of context text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextItem {
    pub name: String,
    pub text: String,
}

impl ContextItem {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// Build a stage payload from its instructions and ordered context items.
///
/// With no context the instructions are returned verbatim.
pub fn assemble(instructions: &str, items: &[ContextItem]) -> String {
    if items.is_empty() {
        return instructions.to_string();
    }

    let mut payload = String::new();
    for item in items {
        payload.push_str(&format!(
            "--- BEGIN CONTEXT: {name} ---\n{text}\n--- END CONTEXT: {name} ---\n\n",
            name = item.name,
            text = item.text,
        ));
    }
    payload.push_str(&format!("<instructions>\n{instructions}\n</instructions>"));
    payload
}

/// Fetch the context items for stage `index`, in payload order: prior
/// responses in plan order, then converted documents, then reference
/// material.
///
/// Any named artifact that is absent fails with [`Error::MissingDependency`]
/// before anything is generated.
pub async fn resolve_context(
    store: &dyn ContextStore,
    plan: &Plan,
    index: usize,
) -> Result<Vec<ContextItem>, Error> {
    let Some(stage) = plan.stages().get(index) else {
        return Err(Error::Internal(format!("stage index {index} out of range")));
    };

    let mut keys: Vec<(String, ArtifactKey)> = plan
        .context_dependencies(index)
        .into_iter()
        .map(|name| (name.to_string(), ArtifactKey::response(name)))
        .collect();

    let mut documents: Vec<&String> = stage.document_context.iter().collect();
    documents.sort_by_key(|name| plan.position(name));
    documents.dedup();
    keys.extend(
        documents
            .into_iter()
            .map(|name| (format!("{name}-texinput"), ArtifactKey::document(name.as_str()))),
    );

    if stage.include_reference_material {
        let references = if stage.references.is_empty() {
            store.list(ArtifactKind::Reference).await?
        } else {
            stage.references.clone()
        };
        keys.extend(
            references
                .into_iter()
                .map(|name| (name.clone(), ArtifactKey::reference(name))),
        );
    }

    let mut items = Vec::with_capacity(keys.len());
    for (label, key) in keys {
        match store.get(&key).await? {
            Some(text) => items.push(ContextItem::new(label, text)),
            None => {
                return Err(Error::MissingDependency {
                    stage: stage.name.clone(),
                    artifact: key.to_string(),
                });
            }
        }
    }

    debug!(
        stage = %stage.name,
        items = items.len(),
        "Context resolved"
    );
    Ok(items)
}
