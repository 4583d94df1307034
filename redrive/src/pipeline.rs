//! One redrive attempt, end to end.
//!
//! The pipeline runs the components in order:
//! locate failures, resolve identifiers, reconcile the working subset,
//! then (unless report-only) correlate the execution and dispatch.

use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::RedriveConfig;
use crate::core::RunContext;
use crate::correlate::ExecutionCorrelator;
use crate::dataset::DatasetStore;
use crate::dispatch::{Dispatched, ExecutionArn, RedriveDispatcher};
use crate::errors::Result;
use crate::failures::{FailureLocator, FailureReport, IdentifierResolver};
use crate::observability::{SpanTimer, StepTimings};
use crate::ports::{ObjectStore, Orchestrator};
use crate::reconcile::{Reconciler, Reconciliation, SubsetSource};

/// What one attempt did.
#[derive(Debug, Clone)]
pub struct RedriveOutcome {
    /// Identity of the attempt.
    pub run: RunContext,
    /// Failures attributed to identifiers.
    pub report: FailureReport,
    /// The persisted subset and related artifacts.
    pub reconciliation: Reconciliation,
    /// The execution the failures came from, if correlation ran.
    pub execution: Option<ExecutionArn>,
    /// The started execution, if dispatch ran.
    pub dispatched: Option<Dispatched>,
    /// Per-step durations.
    pub timings: StepTimings,
}

impl RedriveOutcome {
    /// Summary for printing or structured logging.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        let mut summary = serde_json::json!({
            "run_token": self.run.token.to_string(),
            "artifact_prefix": self.run.artifact_prefix(),
            "report": self.report.to_dict(),
            "report_key": self.reconciliation.subset.report_key(),
            "subset_file": self.reconciliation.subset.file_name(),
            "subset_size": self.reconciliation.subset.len(),
            "removed": self.reconciliation.removed.len(),
            "rewritten": self.reconciliation.rewritten,
            "timings": self.timings,
        });

        if let Some(execution) = &self.execution {
            summary["failed_execution"] = serde_json::json!(execution.as_str());
        }
        if let Some(dispatched) = &self.dispatched {
            summary["started"] = serde_json::json!({
                "execution_arn": dispatched.execution.execution_arn,
                "run_name": dispatched.execution.run_name,
                "start_time": dispatched.execution.start_time.to_rfc3339(),
                "cleanup": dispatched.cleanup,
            });
        }
        summary
    }
}

/// Runs redrive attempts against injected ports.
pub struct RedrivePipeline {
    config: RedriveConfig,
    store: Arc<dyn ObjectStore>,
    orchestrator: Arc<dyn Orchestrator>,
    datasets: Arc<DatasetStore>,
}

impl RedrivePipeline {
    /// Creates a pipeline reading datasets from the configured input directory.
    pub fn new(
        config: RedriveConfig,
        store: Arc<dyn ObjectStore>,
        orchestrator: Arc<dyn Orchestrator>,
    ) -> Result<Self> {
        config.validate()?;
        let datasets = Arc::new(DatasetStore::new(&config.input_dir));
        Ok(Self {
            config,
            store,
            orchestrator,
            datasets,
        })
    }

    /// Replaces the dataset store.
    #[must_use]
    pub fn with_dataset_store(mut self, datasets: Arc<DatasetStore>) -> Self {
        self.datasets = datasets;
        self
    }

    /// The configuration this pipeline runs with.
    #[must_use]
    pub fn config(&self) -> &RedriveConfig {
        &self.config
    }

    /// Runs one attempt with a fresh run token.
    pub async fn run(&self) -> Result<RedriveOutcome> {
        self.run_with(RunContext::new()).await
    }

    /// Runs one attempt under the given run identity.
    pub async fn run_with(&self, run: RunContext) -> Result<RedriveOutcome> {
        let span = info_span!("redrive", run = %run.token, prefix = %self.config.prefix);
        async move {
            let timer = SpanTimer::start("redrive");
            let result = self.execute(run).await;
            let elapsed_ms = timer.elapsed_ms();
            match &result {
                Ok(outcome) => info!(
                    elapsed_ms,
                    steps_ms = outcome.timings.total_ms(),
                    "Elapsed time"
                ),
                Err(e) => error!(
                    elapsed_ms,
                    error = %e,
                    kind = e.kind(),
                    "Redrive failed"
                ),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, run: RunContext) -> Result<RedriveOutcome> {
        let config = &self.config;
        let policy = config.call_policy();
        let map_bucket = config.map_bucket();
        let json_bucket = config.json_bucket();
        let mut timings = StepTimings::new();

        info!(
            input_dir = %config.input_dir.display(),
            expanded = config.expanded,
            report_only = config.report_only,
            version = %config.dispatch.version,
            run_type = %config.dispatch.run_type,
            tolerated = config.dispatch.tolerated_failure_percentage,
            "Starting redrive"
        );

        let timer = SpanTimer::start("locate");
        let failures = FailureLocator::new(Arc::clone(&self.store), map_bucket.clone(), policy.clone())
            .with_failure_term(config.failure_term.clone())
            .with_worker_limit(config.worker_limit)
            .locate_failures()
            .await?;
        timings.record(timer);
        let count: usize = failures.values().map(Vec::len).sum();
        info!(failures = count, "Located {count} failures");
        if count == 0 {
            warn!(bucket = %map_bucket, "No failure markers found; the subset keeps every reach");
        }

        let timer = SpanTimer::start("resolve");
        let report = IdentifierResolver::new(Arc::clone(&self.datasets), config.module_table())
            .resolve_all(&failures)
            .await?;
        timings.record(timer);

        let timer = SpanTimer::start("reconcile");
        let reconciliation = Reconciler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.datasets),
            json_bucket,
            policy.clone(),
        )
        .with_datasets(config.module_table(), config.dataset_family())
        .with_subset_file(config.subset_file.clone())
        .with_rewrite_datasets(config.rewrite_datasets)
        .reconcile(&report, SubsetSource::from(config.existing_subset.as_deref()), &run)
        .await?;
        timings.record(timer);

        if config.report_only {
            info!(
                subset = %reconciliation.subset.file_name(),
                "Report-only run, not starting a new execution"
            );
            return Ok(RedriveOutcome {
                run,
                report,
                reconciliation,
                execution: None,
                dispatched: None,
                timings,
            });
        }

        let timer = SpanTimer::start("correlate");
        let execution = ExecutionCorrelator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.orchestrator),
            map_bucket.clone(),
            policy.clone(),
        )
        .with_manifest_term(config.manifest_term.clone())
        .with_worker_limit(config.worker_limit)
        .locate_execution()
        .await?;
        timings.record(timer);
        info!(execution_arn = %execution, "Located execution ARN");

        let timer = SpanTimer::start("dispatch");
        let dispatched = RedriveDispatcher::new(
            Arc::clone(&self.orchestrator),
            Arc::clone(&self.store),
            map_bucket,
            policy,
        )
        .dispatch(&execution, &reconciliation.subset, &config.dispatch, &run)
        .await?;
        timings.record(timer);

        Ok(RedriveOutcome {
            run,
            report,
            reconciliation,
            execution: Some(execution),
            dispatched: Some(dispatched),
            timings,
        })
    }
}
