//! Control transfer after `ret`.
//!
//! Once an epilogue has read a return address, [`Cpu::transfer`] decides
//! where control lands. Only a handful of destinations are modeled:
//!
//! - the legitimate return site, which ends the transfer;
//! - the entry of a win oracle;
//! - a decoy, which prints and returns;
//! - the gadget surface, at its normal entry or any boundary of its
//!   alternate-entry sequence, which pops and returns.
//!
//! Decoys and gadgets end in `ret`, so the loop continues with the next
//! qword on the stack until one of the terminal cases is reached. Anything
//! else is a fault.

use log::{debug, trace};

use crate::error::Fault;
use crate::gadget::{GadgetOp, GadgetSurface, Reg};
use crate::image::{LoadedImage, Role};
use crate::memory::Memory;
use crate::oracle::{Invocation, Trigger};

/// Upper bound on chained returns before the transfer is abandoned.
pub const MAX_HOPS: usize = 256;

/// The architectural registers the model tracks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    pub rip: u64,
    pub rsp: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
}

impl Registers {
    fn set(&mut self, reg: Reg, value: u64) {
        match reg {
            Reg::Rdi => self.rdi = value,
            Reg::Rsi => self.rsi = value,
            Reg::Rdx => self.rdx = value,
        }
    }
}

/// Where a transfer ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Landing {
    /// Control came back to the legitimate return site.
    Returned,
    /// Control reached a win oracle.
    Oracle(Invocation),
}

/// Executor for post-return control flow.
#[derive(Debug, Clone, Default)]
pub struct Cpu {
    pub regs: Registers,
    /// Bytes the emulated code printed while running.
    pub output: Vec<u8>,
}

impl Cpu {
    pub fn new(regs: Registers) -> Self {
        Cpu { regs, output: Vec::new() }
    }

    /// Drain the output produced so far.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    /// Follow control from `regs.rip` until it returns to `expected`,
    /// reaches an oracle, or faults.
    pub fn transfer(
        &mut self,
        mem: &mut Memory,
        image: &LoadedImage,
        expected: u64,
    ) -> Result<Landing, Fault> {
        for hop in 0..MAX_HOPS {
            let rip = self.regs.rip;
            if rip == expected {
                trace!("hop {hop}: back at return site 0x{rip:x}");
                return Ok(Landing::Returned);
            }

            let perms = mem.perms_at(rip).ok_or(Fault::Segmentation { addr: rip })?;
            if !perms.exec {
                return Err(Fault::NxViolation { addr: rip });
            }

            let Some(hit) = image.resolve(rip) else {
                if perms.write {
                    return Err(Fault::InjectedCode { addr: rip });
                }
                return Err(Fault::UnmodeledCode { addr: rip });
            };
            trace!("hop {hop}: 0x{rip:x} = {}+0x{:x}", hit.symbol.name, hit.offset);

            let misaligned = || Fault::MisalignedEntry {
                addr: rip,
                symbol: hit.symbol.name,
                offset: hit.offset,
            };

            match hit.symbol.role {
                Role::Oracle(oracle) if hit.offset == 0 => {
                    let trigger = if hop == 0 {
                        Trigger::HijackedReturn
                    } else {
                        Trigger::GadgetChain { hops: hop }
                    };
                    debug!("oracle {} reached ({trigger:?})", hit.symbol.name);
                    return Ok(Landing::Oracle(Invocation {
                        oracle: hit.symbol.name,
                        trigger,
                        shell: oracle.shell,
                        registers: self.regs,
                    }));
                }
                Role::Decoy(message) if hit.offset == 0 => {
                    self.output.extend_from_slice(message.as_bytes());
                    self.ret(mem)?;
                }
                Role::Gadget(surface) if hit.offset == 0 => {
                    self.call_gadget_function(mem, &surface)?;
                }
                Role::Gadget(surface) => {
                    let ops = surface.sequence_at(hit.offset).ok_or_else(misaligned)?;
                    self.run(mem, ops)?;
                }
                Role::Oracle(_) | Role::Decoy(_) => return Err(misaligned()),
                Role::Code | Role::Data => return Err(Fault::UnmodeledCode { addr: rip }),
            }
        }
        Err(Fault::RunawayChain { hops: MAX_HOPS })
    }

    /// Normal entry: prologue, the diagnostic line, then the embedded
    /// sequence runs against the function's own frame.
    fn call_gadget_function(&mut self, mem: &mut Memory, surface: &GadgetSurface) -> Result<(), Fault> {
        self.regs.rsp -= 8;
        mem.write_u64(self.regs.rsp, self.regs.rbp)?;
        self.regs.rbp = self.regs.rsp;
        self.regs.rsp -= surface.frame_size;
        let line = format!("Gadget called with: {:x}, {:x}\n", self.regs.rdi, self.regs.rsi);
        self.output.extend_from_slice(line.as_bytes());
        self.run(mem, surface.ops)
    }

    fn run(&mut self, mem: &Memory, ops: &[GadgetOp]) -> Result<(), Fault> {
        for op in ops {
            match *op {
                GadgetOp::Pop(reg) => {
                    let value = self.pop(mem)?;
                    trace!("pop {reg:?} = 0x{value:x}");
                    self.regs.set(reg, value);
                }
                GadgetOp::Ret => self.ret(mem)?,
            }
        }
        Ok(())
    }

    fn pop(&mut self, mem: &Memory) -> Result<u64, Fault> {
        let value = mem.read_u64(self.regs.rsp)?;
        self.regs.rsp += 8;
        Ok(value)
    }

    fn ret(&mut self, mem: &Memory) -> Result<(), Fault> {
        self.regs.rip = self.pop(mem)?;
        Ok(())
    }
}
