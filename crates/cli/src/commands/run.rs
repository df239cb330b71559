//! `paperchain run`: Generate a paper from a plan.

use paperchain_config::{AppConfig, load_plan};
use paperchain_core::{RunRange, StageRef};
use paperchain_pipeline::{StageOutcome, StageState};
use std::path::Path;

/// Command-line overrides of the plan's run settings.
#[derive(Debug, Default)]
pub struct RunOptions {
    pub from: Option<StageRef>,
    pub to: Option<StageRef>,
    pub continue_on_failure: bool,
    pub stream: bool,
}

pub async fn run(
    config: &AppConfig,
    plan_path: &Path,
    options: RunOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let loaded = load_plan(plan_path, &config.catalog())?;
    let mut settings = loaded.settings;
    settings.continue_on_failure |= options.continue_on_failure;
    let range = override_range(&settings.run_range, options.from, options.to);

    let (scheduler, ledger) = super::build_scheduler(config, settings, options.stream)?;
    let outcomes = scheduler.run(&loaded.plan, &range).await?;

    println!();
    print!("{}", render_outcomes(&outcomes));
    println!();
    print!("{}", ledger.summary().render_table());
    println!();
    println!("  Artifacts: {}", config.output_dir.display());

    let failed = outcomes
        .iter()
        .filter(|o| o.state() == StageState::Failed)
        .count();
    if failed > 0 {
        return Err(format!("{failed} stage(s) failed; see the *-error.txt files").into());
    }
    Ok(())
}

/// Flags replace the corresponding bound of the plan's range.
fn override_range(plan_range: &RunRange, from: Option<StageRef>, to: Option<StageRef>) -> RunRange {
    RunRange {
        start: from.or_else(|| plan_range.start.clone()),
        end: to.or_else(|| plan_range.end.clone()),
    }
}

fn document_status(outcome: &StageOutcome) -> String {
    match &outcome.document {
        None => "-".into(),
        Some(doc) if doc.compiled => format!("compiled ({}, attempt {})", doc.model, doc.attempts),
        Some(doc) => format!("not compiled after {} attempt(s)", doc.attempts),
    }
}

fn render_outcomes(outcomes: &[StageOutcome]) -> String {
    let width = outcomes
        .iter()
        .map(|o| o.stage.len())
        .max()
        .unwrap_or(0)
        .max("Stage".len());

    let mut out = format!("{:<width$}  {:<8}  Document\n", "Stage", "State");
    for outcome in outcomes {
        out.push_str(&format!(
            "{:<width$}  {:<8}  {}\n",
            outcome.stage,
            outcome.state().to_string(),
            document_status(outcome)
        ));
        if let Some(error) = &outcome.error {
            out.push_str(&format!("{:<width$}    ↳ {error}\n", ""));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_only_their_bound() {
        let plan_range = RunRange {
            start: Some(StageRef::Index(2)),
            end: Some(StageRef::Name("conclusion".into())),
        };

        let range = override_range(&plan_range, None, Some(StageRef::Index(4)));
        assert_eq!(range.start, Some(StageRef::Index(2)));
        assert_eq!(range.end, Some(StageRef::Index(4)));

        let range = override_range(&plan_range, None, None);
        assert_eq!(range, plan_range);
    }
}
