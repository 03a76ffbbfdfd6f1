use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use banking_pipeline::app::ports::TierStore;
use banking_pipeline::app::run_pipeline_use_case::PipelineRunner;
use banking_pipeline::config::Settings;
use banking_pipeline::domain::Batch;
use banking_pipeline::infra::local_tier_store::LocalTierStore;
use banking_pipeline::infra::secret_manager_client::secret_store_from_config;
use banking_pipeline::logging::{init_logging, LogContext};
use banking_pipeline::observability::metrics;
use banking_pipeline::pipeline::processing::transform::TieredTransformer;
use banking_pipeline::security::{KeyProvider, PiiProtector};

#[derive(Parser)]
#[command(name = "banking_pipeline")]
#[command(about = "Banking transaction pipeline: quality gate, PII protection, silver and gold tiers")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to $BANKING_SETTINGS_FILE, then config/settings.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one raw batch through quarantine, silver and gold
    Run {
        /// Raw CSV batch; relative names are also looked up under paths.raw
        #[arg(long)]
        input: PathBuf,
        /// Execution date of the batch (YYYY-MM-DD), defaults to today
        #[arg(long)]
        execution_date: Option<NaiveDate>,
    },
    /// Recompute gold partitions from a persisted silver file
    RebuildGold {
        #[arg(long)]
        silver: PathBuf,
    },
    /// Decrypt one PAN token with the configured key chain
    RevealPan { token: String },
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref())?;
    let _guard = init_logging(&settings.paths.logs);
    let prometheus = match metrics::init() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("{}", e);
            None
        }
    };

    let result = execute(cli.command, &settings);

    if let Some(handle) = &prometheus {
        let path = settings.paths.logs.join("metrics.prom");
        if let Err(e) = metrics::write_snapshot(handle, &path) {
            warn!(path = %path.display(), error = %e, "Failed to write metrics snapshot");
        }
    }
    result
}

fn execute(command: Commands, settings: &Settings) -> Result<()> {
    let log = LogContext::new(&settings.processing.app_name);
    let protector = Arc::new(build_protector(settings, &log));
    let store: Arc<dyn TierStore> = Arc::new(LocalTierStore::from_paths(&settings.paths));

    match command {
        Commands::Run {
            input,
            execution_date,
        } => {
            let execution_date = execution_date.unwrap_or_else(|| Local::now().date_naive());
            let input = resolve_input(&input, &settings.paths.raw);
            println!("🚀 Running pipeline for {} ({})", input.display(), execution_date);

            let batch = Batch::from_csv_path(&input, execution_date)
                .with_context(|| format!("failed to read batch {}", input.display()))?;
            let mut runner = PipelineRunner::from_settings(settings, store, protector, log)?;
            let outcome = runner.run(&batch);
            runner.close();

            match outcome {
                Ok(summary) => {
                    info!(run_id = %summary.run_id, "Run finished");
                    println!("✅ Pipeline completed");
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                    Ok(())
                }
                Err(e) => {
                    let stage = e.failed_stage().map(|s| s.as_str()).unwrap_or("pipeline");
                    error!(stage, error = %e, "Pipeline run aborted");
                    println!("❌ Pipeline aborted in {} stage: {}", stage, e);
                    Err(e.into())
                }
            }
        }
        Commands::RebuildGold { silver } => {
            println!("🔨 Rebuilding gold from {}", silver.display());
            let mut transformer = TieredTransformer::from_settings(settings, store, protector, &log)?;
            let outcome = transformer.rebuild_gold(&silver);
            transformer.close();

            let gold = outcome?;
            println!(
                "✅ {} aggregates across {} partitions",
                gold.aggregates.len(),
                gold.partitions.len()
            );
            for partition in &gold.partitions {
                println!("   - {}", partition.display());
            }
            Ok(())
        }
        Commands::RevealPan { token } => {
            warn!(key_fingerprint = %protector.key_fingerprint(), "PAN reveal requested");
            let pan = protector.decrypt(&token)?;
            println!("{}", pan);
            Ok(())
        }
    }
}

fn build_protector(settings: &Settings, log: &LogContext) -> PiiProtector {
    let secret_store = secret_store_from_config(settings.security.secret_store.as_ref());
    let keys = KeyProvider::from_settings(&settings.security, None, secret_store, log);
    PiiProtector::new(&keys, log)
}

fn resolve_input(input: &Path, raw_dir: &Path) -> PathBuf {
    if input.is_relative() && !input.exists() {
        let candidate = raw_dir.join(input);
        if candidate.exists() {
            return candidate;
        }
    }
    input.to_path_buf()
}
