//! Workflow module names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::RedriveError;

/// A named stage of the workflow whose map state fans out over a dataset.
///
/// Map-result objects are keyed `<module>/...`, so the lowercase name
/// returned by [`Module::as_str`] is also the first key segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    /// Input extraction.
    Input,
    /// Pre-diagnostic filtering.
    Prediagnostics,
    /// HiVDI flow law inversion (sets).
    Hivdi,
    /// MetroMan flow law inversion (sets).
    Metroman,
    /// MOMMA flow law inversion.
    Momma,
    /// neoBAM flow law inversion.
    Neobam,
    /// SAD flow law inversion.
    Sad,
    /// SIC4DVar flow law inversion (sets).
    Sic4dvar,
    /// Mean optimization integrator (basin).
    Moi,
    /// Offline discharge products.
    Offline,
    /// Validation against gauges.
    Validation,
    /// Fault-injection module used to exercise redrives.
    RandomFail,
}

impl Module {
    /// Every module, in workflow order.
    pub const ALL: [Self; 12] = [
        Self::Input,
        Self::Prediagnostics,
        Self::Hivdi,
        Self::Metroman,
        Self::Momma,
        Self::Neobam,
        Self::Sad,
        Self::Sic4dvar,
        Self::Moi,
        Self::Offline,
        Self::Validation,
        Self::RandomFail,
    ];

    /// Returns the lowercase module name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Prediagnostics => "prediagnostics",
            Self::Hivdi => "hivdi",
            Self::Metroman => "metroman",
            Self::Momma => "momma",
            Self::Neobam => "neobam",
            Self::Sad => "sad",
            Self::Sic4dvar => "sic4dvar",
            Self::Moi => "moi",
            Self::Offline => "offline",
            Self::Validation => "validation",
            Self::RandomFail => "random_fail",
        }
    }

    /// Extracts the module from a map-result object key.
    pub fn from_key(key: &str) -> Result<Self, RedriveError> {
        let segment = key.split('/').next().unwrap_or_default();
        segment.parse()
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Module {
    type Err = RedriveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|module| module.as_str() == s)
            .ok_or_else(|| RedriveError::UnknownModule(s.to_string()))
    }
}
