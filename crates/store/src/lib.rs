//! Context store backends for paperchain.
//!
//! Implements the `ContextStore` trait from `paperchain-core`:
//! - [`FileStore`]: one file per artifact under the output directory
//! - [`InMemoryStore`]: ephemeral, for tests and dry runs

pub mod file_store;
pub mod in_memory;

pub use file_store::FileStore;
pub use in_memory::InMemoryStore;
