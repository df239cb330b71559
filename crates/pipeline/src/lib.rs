//! # paperchain pipeline
//!
//! Drives a generation plan stage by stage: resolves each stage's context
//! from the [`ContextStore`](paperchain_core::ContextStore), assembles the
//! payload, generates through the [`GenerationClient`], stores the result,
//! and optionally converts it into a document and compiles it.
//!
//! ```text
//! Scheduler ─► assembler ─► GenerationClient ─► ContextStore
//!     │                                            │
//!     └──► DocumentConverter ─► DocumentCompiler ◄─┘
//! ```

pub mod appendix;
pub mod assembler;
pub mod client;
pub mod compiler;
pub mod converter;
pub mod scheduler;

pub use assembler::{ContextItem, assemble, resolve_context};
pub use client::{GenerationBudget, GenerationClient, GenerationRequest, GenerationResult};
pub use compiler::{CompileOutcome, DocumentCompiler, LatexCompiler};
pub use converter::{ConversionRequest, DocumentConverter};
pub use scheduler::{DocumentOutcome, Scheduler, StageOutcome, StageState};
