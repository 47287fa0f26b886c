//! Runtime for the stack ladder targets.
//!
//! [`tier`] holds the static description of each level, [`target`] runs
//! one emulated process for a tier, and [`session`] feeds it commands. The
//! binaries in `ladder-cli` are thin wrappers around [`Session`] and
//! [`ChallengeTarget`].

pub mod config;
pub mod console;
pub mod error;
pub mod input;
pub mod outcome;
pub mod session;
pub mod shell;
pub mod state;
pub mod target;
pub mod tier;

pub use config::RuntimeConfig;
pub use console::Console;
pub use error::{Result, TargetError};
pub use input::PayloadEncoding;
pub use outcome::{Classification, Outcome};
pub use session::{Command, Request, Session};
pub use shell::ShellHandOff;
pub use state::{Event, TargetState};
pub use target::ChallengeTarget;
pub use tier::{Tier, LADDER, TIER1, TIER2, TIER3};
