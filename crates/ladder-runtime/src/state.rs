//! Tier state machine.
//!
//! ```text
//!   Idle ─launch─▶ AwaitingInput ─leak─▶ Leaking ─done─▶ AwaitingInput
//!                       │                   └─crash─▶ Crashed
//!                       ├─overflow─▶ Overflowed ─check─▶ CanaryCheck ─fail─▶ Aborted
//!                       │                 │                   │
//!                       │                 └──────┬────────────┘
//!                       │                        ├─exploit─▶ Exploited
//!                       │                        ├─return──▶ Returned
//!                       │                        └─crash───▶ Crashed
//!                       └─input closed─▶ Returned
//! ```
//!
//! `CanaryCheck` loops on itself while enclosing protected frames unwind.
//! Anything not in the table is an error.

use log::debug;

use crate::error::{Result, TargetError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetState {
    Idle,
    AwaitingInput,
    Leaking,
    Overflowed,
    CanaryCheck,
    Exploited,
    Aborted,
    Returned,
    Crashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Launch,
    Leak,
    LeakDone,
    Overflow,
    CheckCanary,
    CanaryFailed,
    Exploit,
    Return,
    Crash,
    InputClosed,
}

impl TargetState {
    /// Apply `event`, returning the next state.
    pub fn on(self, event: Event) -> Result<TargetState> {
        use Event as E;
        use TargetState as S;
        let next = match (self, event) {
            (S::Idle, E::Launch) => S::AwaitingInput,
            (S::AwaitingInput, E::Leak) => S::Leaking,
            (S::Leaking, E::LeakDone) => S::AwaitingInput,
            (S::Leaking, E::Crash) => S::Crashed,
            (S::AwaitingInput, E::Overflow) => S::Overflowed,
            (S::AwaitingInput, E::InputClosed) => S::Returned,
            (S::Overflowed | S::CanaryCheck, E::CheckCanary) => S::CanaryCheck,
            (S::CanaryCheck, E::CanaryFailed) => S::Aborted,
            (S::Overflowed | S::CanaryCheck, E::Exploit) => S::Exploited,
            (S::Overflowed | S::CanaryCheck, E::Return) => S::Returned,
            (S::Overflowed | S::CanaryCheck, E::Crash) => S::Crashed,
            (from, event) => return Err(TargetError::InvalidTransition { from, event }),
        };
        debug!("{self:?} --{event:?}--> {next:?}");
        Ok(next)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TargetState::Exploited | TargetState::Aborted | TargetState::Returned | TargetState::Crashed
        )
    }
}
