//! Core domain model types for redrive.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Workflow module names
//! - Reach identifiers
//! - Run identity and artifact naming

mod identifier;
mod module;
mod run;

pub use identifier::ReachId;
pub use module::Module;
pub use run::{RunContext, RunToken};
