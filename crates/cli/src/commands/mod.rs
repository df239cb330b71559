pub mod appendix;
pub mod convert;
pub mod run;
pub mod usage;

use paperchain_config::{AppConfig, PipelineSettings};
use paperchain_pipeline::{GenerationClient, LatexCompiler, Scheduler};
use paperchain_providers::build_from_config;
use paperchain_store::FileStore;
use paperchain_telemetry::CostLedger;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

/// Cost ledger file, inside the output directory.
pub const LEDGER_FILE: &str = "costs.jsonl";

/// Wire a scheduler to the configured providers, the output directory and
/// the LaTeX toolchain.
pub fn build_scheduler(
    config: &AppConfig,
    settings: PipelineSettings,
    stream: bool,
) -> Result<(Scheduler, Arc<CostLedger>), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.output_dir)?;

    let ledger = Arc::new(CostLedger::with_file(config.output_dir.join(LEDGER_FILE)));
    let mut client = GenerationClient::new(build_from_config(config), config.catalog(), ledger.clone())
        .with_timeout(Duration::from_secs(config.request_timeout_secs));
    if stream {
        client = client.with_observer(Arc::new(|text: &str| {
            let mut stderr = std::io::stderr();
            let _ = stderr.write_all(text.as_bytes());
            let _ = stderr.flush();
        }));
    }

    let bibliography = settings
        .conversion
        .bibliography
        .as_ref()
        .map(|name| config.reference_dir.join(name))
        .filter(|path| path.exists());
    let compiler = LatexCompiler::from_config(&config.latex, config.output_dir.clone(), bibliography.as_deref())?;
    let store = FileStore::new(config.output_dir.clone(), config.reference_dir.clone());

    let scheduler = Scheduler::new(Arc::new(store), Arc::new(client), Arc::new(compiler), settings);
    Ok((scheduler, ledger))
}
