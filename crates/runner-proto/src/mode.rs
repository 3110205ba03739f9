//! Run modes recognized by the runner.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution profile for a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Unscripted play; no scenario required.
    Freestyle,
    /// Scenario-driven run following scripted steps.
    Instructed,
    /// Stress profile with tightened duration and capture limits.
    Breaker,
}

/// Result of parsing a mode string, remembering whether a legacy alias was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedMode {
    pub mode: RunMode,
    /// True when the input was the deprecated `c1` alias.
    pub deprecated_alias: bool,
}

/// Error returned for a mode string outside the recognized set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown run mode '{value}', expected one of: freestyle, instructed, breaker")]
pub struct UnknownModeError {
    pub value: String,
}

impl RunMode {
    pub const ALL: [RunMode; 3] = [RunMode::Freestyle, RunMode::Instructed, RunMode::Breaker];

    /// Parses a mode name, case-insensitively.
    ///
    /// `c1` is accepted as a deprecated synonym for `freestyle`.
    pub fn parse(value: &str) -> Result<ParsedMode, UnknownModeError> {
        let normalized = value.trim().to_ascii_lowercase();
        let (mode, deprecated_alias) = match normalized.as_str() {
            "freestyle" => (RunMode::Freestyle, false),
            "instructed" => (RunMode::Instructed, false),
            "breaker" => (RunMode::Breaker, false),
            "c1" => (RunMode::Freestyle, true),
            _ => {
                return Err(UnknownModeError {
                    value: value.to_string(),
                });
            }
        };
        Ok(ParsedMode {
            mode,
            deprecated_alias,
        })
    }

    /// Returns the wire name of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Freestyle => "freestyle",
            RunMode::Instructed => "instructed",
            RunMode::Breaker => "breaker",
        }
    }

    /// Modes that cannot run without a resolved scenario.
    pub fn requires_scenario(self) -> bool {
        matches!(self, RunMode::Instructed | RunMode::Breaker)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_modes_case_insensitively() {
        assert_eq!(RunMode::parse("Breaker").unwrap().mode, RunMode::Breaker);
        assert_eq!(RunMode::parse(" instructed ").unwrap().mode, RunMode::Instructed);
        assert!(!RunMode::parse("freestyle").unwrap().deprecated_alias);
    }

    #[test]
    fn c1_is_a_deprecated_freestyle_alias() {
        let parsed = RunMode::parse("c1").unwrap();
        assert_eq!(parsed.mode, RunMode::Freestyle);
        assert!(parsed.deprecated_alias);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let err = RunMode::parse("human").unwrap_err();
        assert_eq!(err.value, "human");
        assert!(err.to_string().contains("freestyle, instructed, breaker"));
    }

    #[test]
    fn only_scripted_modes_require_a_scenario() {
        assert!(!RunMode::Freestyle.requires_scenario());
        assert!(RunMode::Instructed.requires_scenario());
        assert!(RunMode::Breaker.requires_scenario());
    }
}
