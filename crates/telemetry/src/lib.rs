//! Cost accounting for paperchain.
//!
//! Every generation call is priced from a per-model pricing table and
//! appended to a cost ledger. The ledger survives the process as a JSONL
//! file and aggregates into per-stage totals and a grand total.

pub mod ledger;
pub mod pricing;

pub use ledger::{CallPurpose, CostLedger, CostSummary, LedgerEntry, StageCost};
pub use pricing::{ModelPricing, PricingTable};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to access ledger at {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
