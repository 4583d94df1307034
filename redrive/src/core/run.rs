//! Run identity for a single redrive attempt.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Run-unique suffix used to name every artifact an attempt produces.
///
/// Six decimal digits, used for collision avoidance between attempts and
/// not for anything security related.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunToken(u32);

impl RunToken {
    /// Smallest generated token.
    pub const MIN: u32 = 100_000;
    /// Largest generated token.
    pub const MAX: u32 = 999_999;

    /// Generates a fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        Self(rand::thread_rng().gen_range(Self::MIN..=Self::MAX))
    }

    /// Wraps a fixed token value.
    #[must_use]
    pub const fn from_value(value: u32) -> Self {
        Self(value)
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for RunToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one redrive attempt.
///
/// Created once when the attempt starts and handed by reference to every
/// component that names an artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    /// The run-unique token.
    pub token: RunToken,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    /// Creates a run context with a generated token and the current time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: RunToken::generate(),
            started_at: Utc::now(),
        }
    }

    /// Creates a run context from fixed parts.
    #[must_use]
    pub fn with_parts(token: RunToken, started_at: DateTime<Utc>) -> Self {
        Self { token, started_at }
    }

    /// Key prefix that groups every artifact uploaded by this attempt.
    #[must_use]
    pub fn artifact_prefix(&self) -> String {
        format!(
            "{}_redrive_{}",
            self.started_at.format("%Y%m%dT%H%M%S"),
            self.token
        )
    }

    /// Appends the run token to a file name, before its extension.
    #[must_use]
    pub fn unique_name(&self, file_name: &str) -> String {
        match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{}.{ext}", self.token),
            _ => format!("{file_name}_{}", self.token),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_run() -> RunContext {
        let started = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        RunContext::with_parts(RunToken::from_value(123_456), started)
    }

    #[test]
    fn test_generated_token_has_six_digits() {
        for _ in 0..50 {
            let token = RunToken::generate();
            assert_eq!(token.to_string().len(), 6);
        }
    }

    #[test]
    fn test_artifact_prefix_format() {
        assert_eq!(fixed_run().artifact_prefix(), "20240309T140507_redrive_123456");
    }

    #[test]
    fn test_unique_name_inserts_token_before_extension() {
        let run = fixed_run();
        assert_eq!(run.unique_name("reaches_of_interest.json"), "reaches_of_interest_123456.json");
        assert_eq!(run.unique_name("subset"), "subset_123456");
    }
}
