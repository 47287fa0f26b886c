//! How a run of the target ended.

use std::fmt;

use ladder_core::{CanaryMismatch, Fault, Invocation};

/// Terminal result of an emulated process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every frame returned to its caller.
    Returned,
    /// Control reached a win oracle.
    Exploited(Invocation),
    /// A canary check failed.
    Aborted(CanaryMismatch),
    /// The emulated process faulted.
    Crashed(Fault),
}

/// Outcome without its payload, for comparing runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Normal,
    Exploited,
    Aborted,
    Crashed,
}

impl Outcome {
    pub fn classification(&self) -> Classification {
        match self {
            Outcome::Returned => Classification::Normal,
            Outcome::Exploited(_) => Classification::Exploited,
            Outcome::Aborted(_) => Classification::Aborted,
            Outcome::Crashed(_) => Classification::Crashed,
        }
    }

    pub fn is_exploited(&self) -> bool {
        matches!(self, Outcome::Exploited(_))
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Classification::Normal => "normal",
            Classification::Exploited => "exploited",
            Classification::Aborted => "aborted",
            Classification::Crashed => "crashed",
        };
        f.write_str(name)
    }
}
