//! Reconciliation policy.
//!
//! Maps a mode and a diff to a decision. The policy is a pure function and cannot
//! fail; aborting is a decision, not an error.
//!
//! | mode        | identical diff | non-identical diff       |
//! |-------------|----------------|--------------------------|
//! | dry-run     | `Report`       | `Report`                 |
//! | safe        | `Proceed`      | `Abort(Mismatch)`        |
//! | interactive | `Proceed`      | `Prompt`                 |
//! | force       | `Proceed`      | `Proceed`                |

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::diff::StateDiff;

/// How a mismatch between device and desired state is handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcileMode {
    /// Report the diff, never touch the device
    DryRun,
    /// Only proceed when the device already matches
    #[default]
    Safe,
    /// Ask before deploying over a mismatch
    Interactive,
    /// Deploy regardless of the device state
    Force,
}

impl fmt::Display for ReconcileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReconcileMode::DryRun => "dry-run",
            ReconcileMode::Safe => "safe",
            ReconcileMode::Interactive => "interactive",
            ReconcileMode::Force => "force",
        };
        f.write_str(name)
    }
}

/// Why reconciliation stopped without deploying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AbortReason {
    /// Safe mode found differences
    Mismatch,
    /// The operator declined the prompt
    Cancelled,
}

impl AbortReason {
    /// Operator-facing explanation, including how to escalate.
    pub fn message(self) -> &'static str {
        match self {
            AbortReason::Mismatch => {
                "Device state does not match the desired configuration. \
                 Re-run with --mode interactive to confirm the changes, \
                 or --mode force to deploy unconditionally."
            }
            AbortReason::Cancelled => "Deployment cancelled by user.",
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Decision {
    Report,
    Proceed,
    Prompt,
    Abort(AbortReason),
}

/// Decide what to do with `diff` under `mode`.
pub fn decide(mode: ReconcileMode, diff: &StateDiff) -> Decision {
    match mode {
        ReconcileMode::DryRun => Decision::Report,
        ReconcileMode::Force => Decision::Proceed,
        ReconcileMode::Safe if diff.identical => Decision::Proceed,
        ReconcileMode::Safe => Decision::Abort(AbortReason::Mismatch),
        ReconcileMode::Interactive if diff.identical => Decision::Proceed,
        ReconcileMode::Interactive => Decision::Prompt,
    }
}

/// Source of operator answers for `Decision::Prompt`.
pub trait Confirm {
    /// Ask whether to deploy over `diff`, returning the raw answer.
    fn ask(&mut self, diff: &StateDiff) -> String;
}

/// Fixed answer, used for `--yes` and in tests.
#[derive(Debug, Clone)]
pub struct FixedAnswer(pub String);

impl FixedAnswer {
    pub fn yes() -> Self {
        FixedAnswer("yes".to_string())
    }

    pub fn no() -> Self {
        FixedAnswer("no".to_string())
    }
}

impl Confirm for FixedAnswer {
    fn ask(&mut self, _diff: &StateDiff) -> String {
        self.0.clone()
    }
}

/// Only `y` and `yes` (any case, surrounding whitespace ignored) are affirmative.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Resolve a `Prompt` by asking `confirm`. Other decisions pass through unchanged.
pub fn resolve_prompt(decision: Decision, diff: &StateDiff, confirm: &mut dyn Confirm) -> Decision {
    match decision {
        Decision::Prompt if is_affirmative(&confirm.ask(diff)) => Decision::Proceed,
        Decision::Prompt => Decision::Abort(AbortReason::Cancelled),
        other => other,
    }
}
