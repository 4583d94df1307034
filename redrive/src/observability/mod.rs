//! Observability utilities.

mod subscriber;
mod timer;

pub use subscriber::{init_tracing, LogFormat, TracingConfig};
pub use timer::{SpanTimer, StepTimings};
