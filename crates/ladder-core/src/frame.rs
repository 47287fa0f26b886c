//! Stack frames and the vulnerable copy.
//!
//! Frames follow x86-64 System V with the stack growing down. `call`
//! pushes the return address, the prologue optionally pushes `rbp`, the
//! stack protector places the canary directly below that, then the local
//! buffer, then scalar locals. In ascending address order an overflow of
//! the buffer therefore reaches:
//!
//! ```text
//!   buffer[0..cap] | canary? | saved rbp? | return address | caller frame ...
//! ```
//!
//! `rsp` after the prologue is rounded down to 16 bytes. Nothing sits
//! between the buffer and the canary: the ladder depends on that adjacency.

use log::trace;
use rand::Rng;
use thiserror::Error;

use crate::error::Fault;
use crate::memory::Memory;
use crate::profile::ProtectionProfile;

/// Size of one stack slot.
pub const SLOT: u64 = 8;

/// Locals declared by a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    /// Capacity of the fixed-size byte buffer.
    pub buffer: usize,
    /// Number of 8-byte scalar locals stored below the buffer.
    pub scalars: usize,
}

impl FrameLayout {
    pub const fn new(buffer: usize, scalars: usize) -> Self {
        FrameLayout { buffer, scalars }
    }
}

/// Register state at a `call` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    /// `rsp` before the return address is pushed. 16-byte aligned.
    pub rsp: u64,
    pub rbp: u64,
    pub return_address: u64,
}

/// The canary check failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("stack smashing detected in {function}: canary 0x{expected:016x} overwritten with 0x{found:016x}")]
pub struct CanaryMismatch {
    pub function: &'static str,
    pub expected: u64,
    pub found: u64,
}

/// Result of running a function epilogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Epilogue {
    /// `ret` is about to jump to `rip` with the given stack state.
    Return { rip: u64, rsp: u64, rbp: u64 },
    /// `__stack_chk_fail`.
    Smashed(CanaryMismatch),
}

/// A live frame in emulated stack memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub function: &'static str,
    pub return_slot: u64,
    pub saved_fp_slot: Option<u64>,
    pub canary_slot: Option<u64>,
    pub buffer: u64,
    pub capacity: usize,
    /// Lowest scalar local.
    pub locals: u64,
    /// `rsp` after the prologue.
    pub rsp: u64,
    /// `rbp` while the function runs.
    pub rbp: u64,
    /// The legitimate return address pushed by `call`.
    pub return_address: u64,
    caller_rbp: u64,
}

/// Draw a per-process canary. The low byte is always zero so string
/// functions stop at it.
pub fn draw_canary<R: Rng + ?Sized>(rng: &mut R) -> u64 {
    rng.gen::<u64>() & !0xff
}

impl StackFrame {
    /// Emulate `call` followed by the prologue of `function`.
    pub fn enter(
        mem: &mut Memory,
        function: &'static str,
        layout: FrameLayout,
        profile: &ProtectionProfile,
        call: CallSite,
        canary: u64,
    ) -> Result<Self, Fault> {
        debug_assert_eq!(call.rsp & 0xf, 0, "misaligned call into {function}");

        let return_slot = call.rsp - SLOT;
        mem.write_u64(return_slot, call.return_address)?;

        let mut cursor = return_slot;
        let mut rbp = call.rbp;
        let saved_fp_slot = if profile.frame_pointer {
            cursor -= SLOT;
            mem.write_u64(cursor, call.rbp)?;
            rbp = cursor;
            Some(cursor)
        } else {
            None
        };
        let canary_slot = if profile.canary {
            cursor -= SLOT;
            mem.write_u64(cursor, canary)?;
            Some(cursor)
        } else {
            None
        };

        let buffer = cursor - layout.buffer as u64;
        let locals = buffer - SLOT * layout.scalars as u64;
        let rsp = locals & !0xf;

        trace!(
            "enter {function}: ret@0x{return_slot:x} buf@0x{buffer:x}[{}] rsp=0x{rsp:x}",
            layout.buffer
        );

        Ok(StackFrame {
            function,
            return_slot,
            saved_fp_slot,
            canary_slot,
            buffer,
            capacity: layout.buffer,
            locals,
            rsp,
            rbp,
            return_address: call.return_address,
            caller_rbp: call.rbp,
        })
    }

    /// Address of scalar local `index`.
    pub fn local_slot(&self, index: usize) -> u64 {
        self.locals + SLOT * index as u64
    }

    /// Distance from the buffer start to the return address slot.
    pub fn return_offset(&self) -> u64 {
        self.return_slot - self.buffer
    }

    /// Call site for a callee of this frame returning to `return_address`.
    pub fn call_site(&self, return_address: u64) -> CallSite {
        CallSite {
            rsp: self.rsp,
            rbp: self.rbp,
            return_address,
        }
    }

    /// The vulnerable primitive: copy all of `payload` into the buffer.
    ///
    /// There is no length check and no terminator. Bytes past the capacity
    /// land on whatever sits above the buffer. The only failure is running
    /// off the top of the stack mapping.
    pub fn copy_unchecked(&self, mem: &mut Memory, payload: &[u8]) -> Result<(), Fault> {
        if payload.len() > self.capacity {
            trace!(
                "{}: {} bytes into a {}-byte buffer",
                self.function,
                payload.len(),
                self.capacity
            );
        }
        mem.write_bytes(self.buffer, payload)
    }

    /// Run the epilogue: canary check (if any), `leave`, read the return
    /// address.
    pub fn leave(&self, mem: &Memory, canary: u64) -> Result<Epilogue, Fault> {
        if let Some(slot) = self.canary_slot {
            let found = mem.read_u64(slot)?;
            if found != canary {
                return Ok(Epilogue::Smashed(CanaryMismatch {
                    function: self.function,
                    expected: canary,
                    found,
                }));
            }
        }
        let rbp = match self.saved_fp_slot {
            Some(slot) => mem.read_u64(slot)?,
            None => self.caller_rbp,
        };
        let rip = mem.read_u64(self.return_slot)?;
        Ok(Epilogue::Return {
            rip,
            rsp: self.return_slot + SLOT,
            rbp,
        })
    }
}
