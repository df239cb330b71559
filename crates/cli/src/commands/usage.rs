//! CLI commands for cost tracking: ledger totals, prices and estimates.

use paperchain_config::AppConfig;
use paperchain_telemetry::{CostLedger, CostSummary, ModelPricing, PricingTable};

use super::LEDGER_FILE;

const COSTS_REPORT_FILE: &str = "all-costs.txt";

/// Aggregate the ledger into per-stage totals and write the report.
pub fn costs(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let ledger_path = config.output_dir.join(LEDGER_FILE);
    let entries = CostLedger::load(&ledger_path)?;
    if entries.is_empty() {
        println!("No costs recorded in {}.", ledger_path.display());
        return Ok(());
    }

    let summary = CostSummary::from_entries(&entries);
    let report = summary.render_table();
    let report_path = config.output_dir.join(COSTS_REPORT_FILE);
    std::fs::write(&report_path, &report)?;

    println!("📊 Costs ({} calls)", entries.len());
    println!("─────────────────────────────────────");
    print!("{report}");
    println!();
    println!("  Report written to {}", report_path.display());
    Ok(())
}

/// Built-in prices with the configured catalog on top.
fn pricing_table(config: &AppConfig) -> PricingTable {
    let mut table = PricingTable::with_defaults();
    for (_, spec) in config.catalog().iter() {
        table.set(spec.id.clone(), ModelPricing::new(spec.input_per_m, spec.output_per_m));
    }
    table
}

/// List the model catalog with prices.
pub fn pricing(config: &AppConfig) {
    let catalog = config.catalog();

    println!("💰 Model Pricing (per 1M tokens)");
    println!("──────────────────────────────────────────────────────────────────────────");
    println!(
        "{:<10} {:<30} {:<10} {:>8} {:>8} {:>10} {:>10}",
        "Alias", "Model", "Provider", "Max out", "Thinking", "Input", "Output"
    );

    for (alias, spec) in catalog.iter() {
        println!(
            "{:<10} {:<30} {:<10} {:>8} {:>8} ${:>8.3} ${:>8.3}",
            alias,
            spec.id,
            spec.provider.as_str(),
            spec.max_output_tokens,
            spec.max_thinking_tokens,
            spec.input_per_m,
            spec.output_per_m
        );
    }

    println!();
    println!("  {} models in the catalog", catalog.len());
}

/// Estimate cost for a given model and token counts.
pub fn estimate(config: &AppConfig, model: &str, input_tokens: u32, output_tokens: u32) {
    let id = config
        .catalog()
        .resolve(model)
        .map(|spec| spec.id.clone())
        .unwrap_or_else(|| model.to_string());
    let table = pricing_table(config);

    if table.get(&id).is_none() {
        println!("⚠ Model '{model}' not found in pricing table.");
        println!("  Use `paperchain pricing` to see available models.");
        return;
    }

    let cost = table.compute_cost(&id, input_tokens, output_tokens);
    println!("💵 Cost estimate for {id}");
    println!("   Input tokens:  {input_tokens}");
    println!("   Output tokens: {output_tokens}");
    println!("   Estimated cost: ${cost:.6}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> AppConfig {
        AppConfig {
            output_dir: dir.path().to_path_buf(),
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn costs_writes_the_report() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let ledger = CostLedger::with_file(dir.path().join(LEDGER_FILE));
        ledger.record(
            "intro",
            paperchain_telemetry::CallPurpose::Generation,
            "claude-3-7-sonnet-20250219",
            1000,
            500,
            0.0105,
        )
        .await;

        costs(&config).unwrap();

        let report = std::fs::read_to_string(dir.path().join(COSTS_REPORT_FILE)).unwrap();
        assert!(report.contains("intro"));
        assert!(report.contains("Grand Total"));
    }

    #[test]
    fn empty_ledger_writes_nothing() {
        let dir = TempDir::new().unwrap();
        costs(&config_in(&dir)).unwrap();
        assert!(!dir.path().join(COSTS_REPORT_FILE).exists());
    }

    #[test]
    fn catalog_prices_override_defaults() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        let mut spec = config.catalog().resolve("haiku").unwrap().clone();
        spec.input_per_m = 2.0;
        config.models.insert("haiku", spec);

        let table = pricing_table(&config);
        let pricing = table.get("claude-3-5-haiku-20241022").unwrap();
        assert_eq!(pricing.input_per_m, 2.0);
    }
}
