//! paperchain CLI: the main entry point.
//!
//! Commands:
//! - `run`: Generate a paper by running the stages of a plan
//! - `convert`: Re-run document conversion for a generated stage
//! - `costs`: Aggregate the cost ledger
//! - `pricing`: List model prices from the catalog
//! - `estimate`: Price a hypothetical call
//! - `appendix`: Render the prompt-listing appendix

use clap::{Parser, Subcommand};
use paperchain_config::AppConfig;
use paperchain_core::StageRef;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod commands;

/// File the run log is written to, inside the output directory.
const RUN_LOG_FILE: &str = "paper_generation.log";

#[derive(Parser)]
#[command(
    name = "paperchain",
    about = "paperchain — write an academic paper through a chain of LLM prompts",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.paperchain/config.toml)
    #[arg(short, long, global = true, env = "PAPERCHAIN_CONFIG")]
    config: Option<PathBuf>,

    /// Override the output directory
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log to the console as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the stages of a plan
    Run {
        /// Plan file (TOML)
        #[arg(short, long)]
        plan: PathBuf,

        /// First stage to run (1-based number or name)
        #[arg(long)]
        from: Option<StageRef>,

        /// Last stage to run (1-based number or name)
        #[arg(long)]
        to: Option<StageRef>,

        /// Keep running stages that do not depend on a failed one
        #[arg(long)]
        continue_on_failure: bool,

        /// Print response text as it streams in
        #[arg(long)]
        stream: bool,
    },

    /// Convert and compile an already generated stage again
    Convert {
        /// Plan file (TOML)
        #[arg(short, long)]
        plan: PathBuf,

        /// Stage whose stored response is converted
        #[arg(short, long)]
        stage: String,

        /// Conversion model (skips the fallback retry)
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Aggregate the cost ledger into per-stage totals
    Costs,

    /// List model prices (per 1M tokens)
    Pricing,

    /// Estimate the cost of a call
    Estimate {
        /// Model alias or id
        #[arg(short, long)]
        model: String,

        /// Input tokens
        #[arg(short, long)]
        input: u32,

        /// Output tokens
        #[arg(short = 'O', long)]
        output: u32,
    },

    /// Render the prompt listing as a LaTeX appendix
    Appendix {
        /// Plan file (TOML)
        #[arg(short, long)]
        plan: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_with_env(path)?,
        None => AppConfig::load()?,
    };
    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }

    let log_file = match cli.command {
        Commands::Run { .. } => Some(config.output_dir.join(RUN_LOG_FILE)),
        _ => None,
    };
    init_tracing(cli.verbose, cli.json_logs, log_file.as_deref())?;

    match cli.command {
        Commands::Run {
            plan,
            from,
            to,
            continue_on_failure,
            stream,
        } => {
            let options = commands::run::RunOptions {
                from,
                to,
                continue_on_failure,
                stream,
            };
            commands::run::run(&config, &plan, options).await?
        }
        Commands::Convert { plan, stage, model } => {
            commands::convert::run(&config, &plan, &stage, model.as_deref()).await?
        }
        Commands::Costs => commands::usage::costs(&config)?,
        Commands::Pricing => commands::usage::pricing(&config),
        Commands::Estimate {
            model,
            input,
            output,
        } => commands::usage::estimate(&config, &model, input, output),
        Commands::Appendix { plan } => commands::appendix::run(&config, &plan)?,
    }

    Ok(())
}

/// Console logging, plus a plain-text copy in `log_file` when given.
fn init_tracing(
    verbose: bool,
    json: bool,
    log_file: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let (console, console_json) = if json {
        (None, Some(tracing_subscriber::fmt::layer().json().with_target(false)))
    } else {
        (Some(tracing_subscriber::fmt::layer().with_target(false)), None)
    };

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(console_json)
        .with(file_layer)
        .init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_range() {
        let cli = Cli::try_parse_from([
            "paperchain",
            "run",
            "--plan",
            "paper.toml",
            "--from",
            "3",
            "--to",
            "conclusion",
            "--continue-on-failure",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                plan,
                from,
                to,
                continue_on_failure,
                stream,
            } => {
                assert_eq!(plan, PathBuf::from("paper.toml"));
                assert_eq!(from, Some(StageRef::Index(3)));
                assert_eq!(to, Some(StageRef::Name("conclusion".into())));
                assert!(continue_on_failure);
                assert!(!stream);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from(["paperchain", "costs", "--output-dir", "out", "-v"]).unwrap();
        assert!(matches!(cli.command, Commands::Costs));
        assert_eq!(cli.output_dir, Some(PathBuf::from("out")));
        assert!(cli.verbose);
    }

    #[test]
    fn convert_requires_a_stage() {
        assert!(Cli::try_parse_from(["paperchain", "convert", "--plan", "paper.toml"]).is_err());

        let cli = Cli::try_parse_from([
            "paperchain", "convert", "--plan", "paper.toml", "--stage", "results", "--model", "sonnet",
        ])
        .unwrap();
        match cli.command {
            Commands::Convert { stage, model, .. } => {
                assert_eq!(stage, "results");
                assert_eq!(model.as_deref(), Some("sonnet"));
            }
            _ => panic!("expected convert"),
        }
    }

    #[test]
    fn estimate_takes_token_counts() {
        let cli = Cli::try_parse_from([
            "paperchain", "estimate", "--model", "haiku", "--input", "1000", "--output", "500",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Estimate { input: 1000, output: 500, .. }
        ));
    }
}
