//! Protection profiles.
//!
//! A profile is the build-time hardening of one tier. It is a `const` in
//! the tier table and never changes while a target runs.

use std::fmt;

/// Relocation read-only level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relro {
    None,
    Partial,
    Full,
}

impl fmt::Display for Relro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Relro::None => "None",
            Relro::Partial => "Partial",
            Relro::Full => "Full",
        };
        f.write_str(s)
    }
}

/// Hardening applied to a challenge binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtectionProfile {
    /// Stack protector: a canary sits between each frame's buffer and its
    /// saved control data, checked before return.
    pub canary: bool,
    /// Stack pages are executable (no NX).
    pub stack_executable: bool,
    /// Stack and shared library bases are randomized per process.
    pub aslr: bool,
    /// Program image is position independent (randomized with ASLR).
    pub pie: bool,
    /// Relocation read-only level.
    pub relro: Relro,
    /// Frames keep a saved frame pointer (`push rbp; mov rbp, rsp`).
    pub frame_pointer: bool,
}

impl ProtectionProfile {
    /// Tier 1: nothing enabled, frame pointer omitted.
    pub const UNPROTECTED: ProtectionProfile = ProtectionProfile {
        canary: false,
        stack_executable: true,
        aslr: false,
        pie: false,
        relro: Relro::None,
        frame_pointer: false,
    };

    /// Tier 2: stack canary only.
    pub const CANARY: ProtectionProfile = ProtectionProfile {
        canary: true,
        stack_executable: true,
        aslr: false,
        pie: false,
        relro: Relro::Partial,
        frame_pointer: true,
    };

    /// Tier 3: canary, NX stack, randomized stack and libc (no PIE).
    pub const HARDENED: ProtectionProfile = ProtectionProfile {
        canary: true,
        stack_executable: false,
        aslr: true,
        pie: false,
        relro: Relro::Partial,
        frame_pointer: true,
    };

    /// Whether the stack is non-executable.
    pub fn nx(&self) -> bool {
        !self.stack_executable
    }

    /// `checksec`-style summary, one line per mitigation.
    pub fn checksec_lines(&self) -> Vec<String> {
        let yes_no = |b: bool| if b { "YES" } else { "NO" };
        let nx = if self.nx() {
            "YES (stack is non-executable)"
        } else {
            "NO (stack is executable)"
        };
        let pie = match (self.pie, self.aslr) {
            (true, _) => "YES",
            (false, true) => "NO (partial ASLR)",
            (false, false) => "NO",
        };
        vec![
            format!("Stack Canaries: {}", yes_no(self.canary)),
            format!("NX (DEP): {}", nx),
            format!("PIE: {}", pie),
            format!("RELRO: {}", self.relro),
        ]
    }
}
