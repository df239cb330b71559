//! # paperchain core
//!
//! Domain types, traits, and error definitions for the paperchain
//! prompt-chaining pipeline. This crate has **no framework dependencies**:
//! it defines the model that every other crate implements against.
//!
//! ## Layout
//!
//! - [`stage`]: the generation plan (ordered stages, range selection)
//! - [`artifact`]: typed artifact keys and the [`ContextStore`] trait
//! - [`provider`]: the [`Provider`] trait over text-generation backends
//! - [`error`]: the error taxonomy shared by all crates

pub mod artifact;
pub mod error;
pub mod message;
pub mod model;
pub mod provider;
pub mod stage;

// Re-export key types at crate root for ergonomics
pub use artifact::{ArtifactKey, ArtifactKind, ContextStore};
pub use error::{Error, PlanError, ProviderError, Result, StoreError};
pub use message::{Message, Role};
pub use model::ProviderKind;
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
pub use stage::{ContextScope, Plan, RunRange, Stage, StageRef};
