//! Errors surfaced by the target runtime.
//!
//! Emulated crashes and canary aborts are not errors: they are
//! [`Outcome`](crate::Outcome)s. These are the failures of the harness
//! around the emulated process.

use std::io;

use thiserror::Error;

use crate::state::{Event, TargetState};

#[derive(Debug, Error)]
pub enum TargetError {
    /// Wrong argument count or an unparsable option.
    #[error("malformed invocation: {0}")]
    MalformedInvocation(String),

    /// A command token the tier does not know.
    #[error("unrecognized command `{0}`")]
    UnrecognizedCommand(String),

    /// An event that is not legal in the current state.
    #[error("illegal transition: {event:?} in state {from:?}")]
    InvalidTransition { from: TargetState, event: Event },

    /// Bad value in the environment.
    #[error("configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, TargetError>;
