//! Step timing for a redrive attempt.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Simple span timing helper.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: &'static str,
}

impl SpanTimer {
    /// Starts timing the named step.
    #[must_use]
    pub fn start(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the step name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Finishes the step, logs and returns its duration.
    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        tracing::debug!(
            step = self.name,
            duration_ms = elapsed.as_secs_f64() * 1000.0,
            "Step finished"
        );
        elapsed
    }
}

/// Durations of each step of an attempt, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepTimings {
    steps: BTreeMap<String, f64>,
}

impl StepTimings {
    /// Creates empty timings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a finished step.
    pub fn record(&mut self, timer: SpanTimer) {
        let name = timer.name();
        let elapsed = timer.finish();
        self.steps
            .insert(name.to_string(), elapsed.as_secs_f64() * 1000.0);
    }

    /// Duration of a step, if it ran.
    #[must_use]
    pub fn get(&self, step: &str) -> Option<f64> {
        self.steps.get(step).copied()
    }

    /// Sum of every recorded step.
    #[must_use]
    pub fn total_ms(&self) -> f64 {
        self.steps.values().sum()
    }
}
