//! Append-only cost ledger.
//!
//! One [`LedgerEntry`] per generation call, written as a JSON line to
//! `<output_dir>/costs.jsonl` the moment the call returns. The in-memory
//! copy is updated first and unconditionally, so a failing disk never
//! loses an entry from the run's summary; disk failures are logged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::TelemetryError;

/// What a generation call was made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPurpose {
    /// Producing a stage's raw response
    Generation,
    /// Converting one chunk of a response into document markup
    Conversion,
}

/// A single priced generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub stage: String,
    pub purpose: CallPurpose,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
}

/// The run's ledger.
pub struct CostLedger {
    run_id: String,
    path: Option<PathBuf>,
    entries: Mutex<Vec<LedgerEntry>>,
    /// Serializes appends from concurrent calls so lines never interleave
    write_lock: tokio::sync::Mutex<()>,
}

impl CostLedger {
    /// A ledger that only keeps entries in memory.
    pub fn in_memory() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            path: None,
            entries: Mutex::new(Vec::new()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// A ledger that appends to a JSONL file. Existing lines are kept;
    /// this run's entries are added after them.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        debug!(path = %path.display(), "Cost ledger opened");
        Self {
            run_id: Uuid::new_v4().to_string(),
            path: Some(path),
            entries: Mutex::new(Vec::new()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record one priced call.
    pub async fn record(
        &self,
        stage: &str,
        purpose: CallPurpose,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
        cost_usd: f64,
    ) -> LedgerEntry {
        let entry = LedgerEntry {
            timestamp: Utc::now(),
            run_id: self.run_id.clone(),
            stage: stage.to_string(),
            purpose,
            model: model.to_string(),
            input_tokens,
            output_tokens,
            cost_usd,
        };

        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry.clone());

        if let Some(path) = &self.path {
            let _guard = self.write_lock.lock().await;
            if let Err(e) = append_line(path, &entry).await {
                warn!(
                    error = %e,
                    stage = %stage,
                    cost_usd,
                    "Failed to append cost ledger entry to disk"
                );
            }
        }

        debug!(
            stage = %stage,
            model = %model,
            input_tokens,
            output_tokens,
            cost_usd,
            "Cost recorded"
        );
        entry
    }

    /// Entries recorded by this ledger instance.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Totals for the entries recorded by this instance.
    pub fn summary(&self) -> CostSummary {
        CostSummary::from_entries(&self.entries())
    }

    /// Read every entry from a ledger file, skipping corrupted lines.
    /// A missing file is an empty ledger.
    pub fn load(path: &Path) -> Result<Vec<LedgerEntry>, TelemetryError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(TelemetryError::Io {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<LedgerEntry>(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted ledger entry");
                    None
                }
            })
            .collect())
    }
}

async fn append_line(path: &Path, entry: &LedgerEntry) -> Result<(), TelemetryError> {
    let io_err = |e: std::io::Error| TelemetryError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(io_err)?;
    file.write_all(line.as_bytes()).await.map_err(io_err)?;
    file.flush().await.map_err(io_err)
}

/// Cost totals for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageCost {
    pub stage: String,
    pub calls: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub generation_cost_usd: f64,
    pub conversion_cost_usd: f64,
}

impl StageCost {
    pub fn total_cost_usd(&self) -> f64 {
        self.generation_cost_usd + self.conversion_cost_usd
    }
}

/// Aggregated ledger: per-stage rows in first-seen order plus grand totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub stages: Vec<StageCost>,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
}

impl CostSummary {
    pub fn from_entries(entries: &[LedgerEntry]) -> Self {
        let mut summary = Self::default();

        for entry in entries {
            let idx = match summary.stages.iter().position(|s| s.stage == entry.stage) {
                Some(i) => i,
                None => {
                    summary.stages.push(StageCost {
                        stage: entry.stage.clone(),
                        calls: 0,
                        input_tokens: 0,
                        output_tokens: 0,
                        generation_cost_usd: 0.0,
                        conversion_cost_usd: 0.0,
                    });
                    summary.stages.len() - 1
                }
            };

            let row = &mut summary.stages[idx];
            row.calls += 1;
            row.input_tokens += entry.input_tokens as u64;
            row.output_tokens += entry.output_tokens as u64;
            match entry.purpose {
                CallPurpose::Generation => row.generation_cost_usd += entry.cost_usd,
                CallPurpose::Conversion => row.conversion_cost_usd += entry.cost_usd,
            }

            summary.total_input_tokens += entry.input_tokens as u64;
            summary.total_output_tokens += entry.output_tokens as u64;
            summary.total_cost_usd += entry.cost_usd;
        }

        summary
    }

    /// Plain-text report, one row per stage and a grand total.
    pub fn render_table(&self) -> String {
        let width = self
            .stages
            .iter()
            .map(|s| s.stage.len())
            .max()
            .unwrap_or(0)
            .max("Grand Total".len());

        let mut out = format!(
            "{:<width$}  {:>5}  {:>10}  {:>10}  {:>11}  {:>11}  {:>11}\n",
            "Stage", "Calls", "Input", "Output", "Generation", "Conversion", "Total"
        );
        for s in &self.stages {
            out.push_str(&format!(
                "{:<width$}  {:>5}  {:>10}  {:>10}  {:>11.6}  {:>11.6}  {:>11.6}\n",
                s.stage,
                s.calls,
                s.input_tokens,
                s.output_tokens,
                s.generation_cost_usd,
                s.conversion_cost_usd,
                s.total_cost_usd()
            ));
        }
        out.push_str(&format!(
            "{:<width$}  {:>5}  {:>10}  {:>10}  {:>11}  {:>11}  {:>11.6}\n",
            "Grand Total",
            self.stages.iter().map(|s| s.calls).sum::<u32>(),
            self.total_input_tokens,
            self.total_output_tokens,
            "",
            "",
            self.total_cost_usd
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[tokio::test]
    async fn in_memory_ledger_records_entries() {
        let ledger = CostLedger::in_memory();
        ledger.record("intro", CallPurpose::Generation, "o1", 100, 50, 0.0045).await;
        ledger.record("intro", CallPurpose::Conversion, "haiku", 40, 40, 0.0002).await;

        let entries = ledger.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.run_id == ledger.run_id()));
        assert!(ledger.path().is_none());
    }

    #[tokio::test]
    async fn file_ledger_appends_jsonl() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("costs.jsonl");

        let first = CostLedger::with_file(&path);
        first.record("intro", CallPurpose::Generation, "o1", 100, 50, 0.0045).await;
        let second = CostLedger::with_file(&path);
        second.record("body", CallPurpose::Generation, "o1", 200, 80, 0.0078).await;

        let loaded = CostLedger::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].stage, "intro");
        assert_eq!(loaded[1].stage, "body");
        assert_ne!(loaded[0].run_id, loaded[1].run_id);
    }

    #[tokio::test]
    async fn unwritable_path_keeps_in_memory_entry() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be makes every append fail.
        let path = dir.path().join("costs.jsonl");
        std::fs::create_dir_all(&path).unwrap();

        let ledger = CostLedger::with_file(&path);
        ledger.record("intro", CallPurpose::Generation, "o1", 10, 10, 0.00075).await;
        assert_eq!(ledger.entries().len(), 1);
        assert!((ledger.summary().total_cost_usd - 0.00075).abs() < 1e-12);
    }

    #[test]
    fn load_missing_file_is_empty() {
        let loaded = CostLedger::load(Path::new("/nonexistent/costs.jsonl")).unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn load_skips_corrupted_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("costs.jsonl");
        let ledger = CostLedger::with_file(&path);
        ledger.record("intro", CallPurpose::Generation, "o1", 1, 1, 0.0).await;
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();

        assert_eq!(CostLedger::load(&path).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn summary_groups_by_stage_in_first_seen_order() {
        let ledger = CostLedger::in_memory();
        ledger.record("intro", CallPurpose::Generation, "o1", 100, 10, 0.5).await;
        ledger.record("body", CallPurpose::Generation, "o1", 200, 20, 1.0).await;
        ledger.record("intro", CallPurpose::Conversion, "haiku", 30, 30, 0.25).await;

        let summary = ledger.summary();
        assert_eq!(summary.stages.len(), 2);
        assert_eq!(summary.stages[0].stage, "intro");
        assert_eq!(summary.stages[0].calls, 2);
        assert!((summary.stages[0].total_cost_usd() - 0.75).abs() < 1e-12);
        assert_eq!(summary.total_input_tokens, 330);
        assert!((summary.total_cost_usd - 1.75).abs() < 1e-12);
    }

    #[tokio::test]
    async fn rendered_table_has_grand_total() {
        let ledger = CostLedger::in_memory();
        ledger.record("intro", CallPurpose::Generation, "o1", 100, 10, 0.5).await;
        let table = ledger.summary().render_table();
        assert!(table.contains("intro"));
        assert!(table.contains("Grand Total"));
        assert!(table.contains("0.500000"));
    }
}
