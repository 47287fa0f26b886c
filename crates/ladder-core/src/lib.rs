//! Emulated x86-64 process model for the stack ladder.
//!
//! Every challenge tier runs inside this model instead of on real memory:
//! a program image, a libc mapping, an input arena and a downward-growing
//! stack, all little-endian with 8-byte slots (System V x86-64). The pieces
//! compose bottom-up:
//!
//! - [`profile`]: per-tier protection configuration (canary, NX, ASLR, RELRO)
//! - [`image`]: symbol tables and the per-process address space
//! - [`memory`]: mapped regions with permissions
//! - [`frame`]: stack frames, the unchecked copy and the canary check
//! - [`format`]: printf-compatible formatter used as the leak primitive
//! - [`gadget`]: the gadget surface contract and its x86-64 encoding
//! - [`oracle`]: win oracles and how they were reached
//! - [`cpu`]: control transfer after a (possibly hijacked) return

pub mod cpu;
pub mod error;
pub mod format;
pub mod frame;
pub mod gadget;
pub mod image;
pub mod memory;
pub mod oracle;
pub mod profile;

pub use cpu::{Cpu, Landing, Registers};
pub use error::Fault;
pub use format::{ArgumentSource, LeakEvent};
pub use frame::{CanaryMismatch, Epilogue, FrameLayout, StackFrame};
pub use gadget::{GadgetOp, GadgetSurface, Reg};
pub use image::{AddressSpace, LoadedImage, Role, Symbol};
pub use memory::{Memory, Perms, Region};
pub use oracle::{Invocation, Trigger, WinOracle};
pub use profile::{ProtectionProfile, Relro};
