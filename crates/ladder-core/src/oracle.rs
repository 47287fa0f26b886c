//! Win oracles.
//!
//! Every tier contains a function no legitimate path calls. Control
//! reaching its entry means the control-flow hijack worked. The oracle
//! prints its banner and, for oracles that grant a shell, hands the
//! process over to an interactive shell.

use std::io::{self, Write};

use crate::cpu::Registers;

/// A function whose entry is the success condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WinOracle {
    /// Lines printed on entry, each followed by a newline.
    pub banner: &'static [&'static str],
    /// Whether the oracle goes on to spawn a shell.
    pub shell: bool,
}

impl WinOracle {
    pub fn write_banner<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        for line in self.banner {
            writeln!(out, "{line}")?;
        }
        out.flush()
    }
}

/// How control reached the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The overwritten return address pointed straight at the oracle.
    HijackedReturn,
    /// The oracle was the last link of a return chain.
    GadgetChain { hops: usize },
}

/// A reached oracle, with the register state at entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub oracle: &'static str,
    pub trigger: Trigger,
    pub shell: bool,
    pub registers: Registers,
}
