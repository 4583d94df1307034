//! Redrive CLI
//!
//! Locates the failures of a partially failed map-state workflow run,
//! removes the failed reaches from the working subset and starts a new
//! execution of the same state machine over what is left.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{error, info};

use redrive::prelude::*;

/// Redrive a partially failed workflow run over the reaches that succeeded.
#[derive(Parser, Debug)]
#[command(name = "redrive", about, disable_version_flag = true)]
struct Cli {
    /// Directory holding the datasets the failed run launched with
    #[arg(short = 'd', long, env = "REDRIVE_INPUT_DIR", default_value = "/mnt/data/input")]
    input_dir: PathBuf,

    /// Venue prefix, e.g. confluence-dev1
    #[arg(short = 'p', long, env = "REDRIVE_PREFIX", default_value = "confluence-dev1")]
    prefix: String,

    /// 4-digit version number of the next execution, e.g. 0001
    #[arg(short = 'v', long, env = "REDRIVE_VERSION")]
    version: Option<String>,

    /// Run type of the next execution (constrained, unconstrained)
    #[arg(short = 'r', long, env = "REDRIVE_RUN_TYPE", default_value = "constrained")]
    run_type: RunType,

    /// Tolerated failure percentage of the next execution
    #[arg(short = 't', long, env = "REDRIVE_TOLERATED", default_value_t = 0)]
    tolerated: u8,

    /// The failed run used the expanded reach list
    #[arg(short = 'e', long)]
    expanded: bool,

    /// Write the failure report and subset without starting an execution
    #[arg(long)]
    report_only: bool,

    /// Upload reduced copies of every dataset in the family
    #[arg(short = 'f', long)]
    rewrite_datasets: bool,

    /// Base name of the working subset file
    #[arg(short = 's', long, env = "REDRIVE_SUBSET_FILE")]
    subset_file: Option<String>,

    /// Refine an existing subset object instead of the full input
    #[arg(long, env = "REDRIVE_EXISTING_SUBSET")]
    existing_subset: Option<String>,

    /// Directory the object store buckets live under
    #[arg(long, env = "REDRIVE_STORE_ROOT", default_value = "/mnt/data/buckets")]
    store_root: PathBuf,

    /// Endpoint of the orchestration service
    #[arg(long, env = "REDRIVE_STATES_ENDPOINT", default_value = "http://localhost:8083")]
    states_endpoint: String,

    /// Maximum marker downloads in flight
    #[arg(long, env = "REDRIVE_WORKERS", default_value_t = 8)]
    workers: usize,

    /// Per-call timeout in milliseconds
    #[arg(long, env = "REDRIVE_TIMEOUT_MS", default_value_t = 30_000)]
    timeout_ms: u64,

    /// Log level used when RUST_LOG is unset
    #[arg(long, env = "REDRIVE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format (pretty, json)
    #[arg(long, env = "REDRIVE_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,
}

impl Cli {
    fn config(&self) -> anyhow::Result<RedriveConfig> {
        let version = match (&self.version, self.report_only) {
            (Some(version), _) => version.clone(),
            (None, true) => String::new(),
            (None, false) => bail!("--version is required unless --report-only is set"),
        };

        let mut config = RedriveConfig::new(&self.input_dir, &self.prefix)
            .with_expanded(self.expanded)
            .with_report_only(self.report_only)
            .with_rewrite_datasets(self.rewrite_datasets)
            .with_worker_limit(self.workers)
            .with_request_timeout_ms(self.timeout_ms)
            .with_dispatch(DispatchParams::new(version, self.run_type, self.tolerated));
        if let Some(name) = &self.subset_file {
            config = config.with_subset_file(name);
        }
        if let Some(key) = &self.existing_subset {
            config = config.with_existing_subset(key);
        }

        config.validate()?;
        Ok(config)
    }

    fn log_arguments(&self) {
        info!(input_dir = %self.input_dir.display(), "Input directory");
        info!(prefix = %self.prefix, "Prefix");
        info!(version = self.version.as_deref().unwrap_or("-"), "Version");
        info!(run_type = %self.run_type, "Run type");
        info!(tolerated = self.tolerated, "Tolerated failure percentage");
        info!(expanded = self.expanded, "Expanded");
        info!(report_only = self.report_only, "Report only");
        info!(rewrite_datasets = self.rewrite_datasets, "Rewrite datasets");
        if let Some(key) = &self.existing_subset {
            info!(existing_subset = %key, "Refining subset");
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config()?;
    let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(&cli.store_root));
    let orchestrator: Arc<dyn Orchestrator> = Arc::new(StatesHttpClient::new(&cli.states_endpoint));

    let outcome = RedrivePipeline::new(config, store, orchestrator)?
        .run()
        .await
        .context("redrive attempt failed")?;

    let summary = serde_json::to_string_pretty(&outcome.to_dict())?;
    println!("{summary}");
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let tracing = TracingConfig::default()
        .with_level(&cli.log_level)
        .with_format(cli.log_format);
    if let Err(e) = init_tracing(&tracing) {
        eprintln!("redrive: {e}");
        std::process::exit(2);
    }
    cli.log_arguments();

    if let Err(e) = run(cli).await {
        error!(error = %format_args!("{e:#}"), "Redrive failed");
        std::process::exit(1);
    }
}
