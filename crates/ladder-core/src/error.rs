//! Faults raised by the emulated process.

use thiserror::Error;

/// A fault that ends the emulated process the way a signal ends a native one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Access to an address outside every mapped region.
    #[error("segmentation fault at 0x{addr:x}")]
    Segmentation { addr: u64 },

    /// Write into a mapped but read-only region.
    #[error("write to read-only memory at 0x{addr:x}")]
    ReadOnly { addr: u64 },

    /// Instruction fetch from a mapped region without execute permission.
    #[error("NX violation: instruction fetch from 0x{addr:x}")]
    NxViolation { addr: u64 },

    /// Control reached executable stack memory. Injected code is not emulated.
    #[error("control reached injected code at 0x{addr:x}")]
    InjectedCode { addr: u64 },

    /// Control entered a modeled routine somewhere other than a valid entry.
    #[error("control entered {symbol}+0x{offset:x} (0x{addr:x}), not an instruction boundary")]
    MisalignedEntry { addr: u64, symbol: &'static str, offset: u64 },

    /// Control reached code whose behavior the model does not describe.
    #[error("control reached unmodeled code at 0x{addr:x}")]
    UnmodeledCode { addr: u64 },

    /// The chain kept returning into gadgets past the hop limit.
    #[error("control transfer did not settle after {hops} hops")]
    RunawayChain { hops: usize },
}

impl Fault {
    /// The faulting address, when there is one.
    pub fn addr(&self) -> Option<u64> {
        match *self {
            Fault::Segmentation { addr }
            | Fault::ReadOnly { addr }
            | Fault::NxViolation { addr }
            | Fault::InjectedCode { addr }
            | Fault::MisalignedEntry { addr, .. }
            | Fault::UnmodeledCode { addr } => Some(addr),
            Fault::RunawayChain { .. } => None,
        }
    }
}
