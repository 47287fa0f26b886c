//! Stack ladder: graduated memory-safety challenge targets.
//!
//! Three tiers of a deliberately vulnerable program, each running inside an
//! emulated x86-64 process:
//!
//! - Tier 1 (`level1`): unchecked copy into a 64-byte buffer, no protections
//! - Tier 2 (`level2`): stack canary, with a format-string leak to read it
//! - Tier 3 (`level3`): canary, NX stack and randomized stack/libc, with a
//!   disclosure routine and a `pop rdi; pop rsi; pop rdx; ret` gadget
//!
//! The process model lives in [`model`], the tiers and their command loop in
//! [`runtime`].
//!
//! ```
//! use ladder::{play, Outcome, Request, TIER1};
//!
//! let (outcome, out) = play(&TIER1, 0, Request::new("overflow", Some(b"hi".to_vec())), b"").unwrap();
//! assert_eq!(outcome, Outcome::Returned);
//! assert!(String::from_utf8_lossy(&out).contains("Data copied: hi\n"));
//! ```

pub use ladder_core as model;
pub use ladder_runtime as runtime;

pub use ladder_core::{Fault, Invocation, Registers, Trigger};
pub use ladder_runtime::{
    ChallengeTarget, Classification, Outcome, PayloadEncoding, Request, Session, TargetError,
    TargetState, Tier, LADDER, TIER1, TIER2, TIER3,
};

/// Run one session against an in-memory console.
///
/// `first` is the command-line request, `input` the lines that follow it.
/// Returns the outcome and everything the target printed.
pub fn play(
    tier: &'static Tier,
    seed: u64,
    first: Request,
    input: &[u8],
) -> ladder_runtime::Result<(Outcome, Vec<u8>)> {
    let target = ChallengeTarget::new(tier, seed, Vec::new());
    let mut session = Session::new(target, input, PayloadEncoding::Escaped);
    let outcome = session.run(first)?;
    Ok((outcome, session.into_target().into_output()))
}
