//! `paperchain convert`: Convert and compile a generated stage again.

use paperchain_config::{AppConfig, load_plan};
use std::path::Path;

pub async fn run(
    config: &AppConfig,
    plan_path: &Path,
    stage: &str,
    model: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let loaded = load_plan(plan_path, &config.catalog())?;
    let (scheduler, ledger) = super::build_scheduler(config, loaded.settings, false)?;

    let outcome = scheduler.convert_stage(&loaded.plan, stage, model).await?;
    let cost = ledger.summary().total_cost_usd;

    match outcome.document {
        Some(doc) if doc.compiled => {
            println!("✅ {stage}: compiled with {} (cost ${cost:.6})", doc.model);
            if let Some(path) = doc.artifact_path {
                println!("   {}", path.display());
            }
            Ok(())
        }
        _ => Err(format!(
            "{stage}: document did not compile (cost ${cost:.6}); see {stage}-error.txt and {stage}-latex-compile.log"
        )
        .into()),
    }
}
