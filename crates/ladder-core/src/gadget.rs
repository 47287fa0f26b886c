//! The gadget surface.
//!
//! With a non-executable stack the payload cannot carry code, so the hard
//! tier ships a function whose body, entered at an alternate offset, is a
//! short `pop`/`ret` sequence. Each `pop` takes the next qword from the
//! corrupted stack, `ret` continues with the qword after that, so several
//! entries chain.
//!
//! Execution follows the contract in [`GadgetSurface::ops`]. The x86-64
//! encoding of the same sequence is mapped into the emulated image and
//! decoded only to print listings and to check that the two agree; the
//! model does not execute machine code.

use iced_x86::{Decoder, DecoderOptions, Formatter, Instruction, IntelFormatter, Mnemonic, Register};
use thiserror::Error;

/// Registers a gadget can load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    Rdi,
    Rsi,
    Rdx,
}

/// One step of a gadget sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GadgetOp {
    /// Load the qword at `rsp` into the register, `rsp += 8`.
    Pop(Reg),
    /// Continue at the qword at `rsp`, `rsp += 8`.
    Ret,
}

impl GadgetOp {
    /// Single-byte x86-64 encoding.
    pub const fn encoding(self) -> u8 {
        match self {
            GadgetOp::Pop(Reg::Rdi) => 0x5f,
            GadgetOp::Pop(Reg::Rsi) => 0x5e,
            GadgetOp::Pop(Reg::Rdx) => 0x5a,
            GadgetOp::Ret => 0xc3,
        }
    }
}

/// The encoding contained an instruction outside the gadget vocabulary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unsupported instruction `{text}` at 0x{ip:x}")]
pub struct UnsupportedInstruction {
    pub ip: u64,
    pub text: String,
}

/// Contract of a function usable as a gadget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GadgetSurface {
    /// Offset of the sequence from the function start.
    pub alternate_entry: u64,
    /// The sequence, ending in `ret`.
    pub ops: &'static [GadgetOp],
    /// Bytes of locals the normal prologue reserves below saved `rbp`.
    pub frame_size: u64,
}

impl GadgetSurface {
    /// `pop rdi; pop rsi; pop rdx; ret`.
    pub const POP_RDI_RSI_RDX: &'static [GadgetOp] = &[
        GadgetOp::Pop(Reg::Rdi),
        GadgetOp::Pop(Reg::Rsi),
        GadgetOp::Pop(Reg::Rdx),
        GadgetOp::Ret,
    ];

    /// Machine encoding of the sequence.
    pub fn encoding(&self) -> Vec<u8> {
        self.ops.iter().map(|op| op.encoding()).collect()
    }

    /// The ops that run when control enters at `offset` from the function
    /// start, or `None` if `offset` is not an instruction boundary of the
    /// sequence.
    pub fn sequence_at(&self, offset: u64) -> Option<&'static [GadgetOp]> {
        let index = offset.checked_sub(self.alternate_entry)? as usize;
        self.ops.get(index..).filter(|rest| !rest.is_empty())
    }

    /// Disassemble the encoding placed at `address`, Intel syntax.
    pub fn disassemble(&self, address: u64) -> Vec<(u64, String)> {
        disassemble(&self.encoding(), address)
    }

    /// Single-line listing, e.g. `pop rdi ; pop rsi ; pop rdx ; ret`.
    pub fn listing(&self, address: u64) -> String {
        self.disassemble(address)
            .into_iter()
            .map(|(_, text)| text)
            .collect::<Vec<_>>()
            .join(" ; ")
    }
}

/// Disassemble x86-64 `bytes` loaded at `address`.
pub fn disassemble(bytes: &[u8], address: u64) -> Vec<(u64, String)> {
    let mut decoder = Decoder::with_ip(64, bytes, address, DecoderOptions::NONE);
    let mut formatter = IntelFormatter::new();
    let mut instr = Instruction::default();
    let mut lines = Vec::new();
    while decoder.can_decode() {
        decoder.decode_out(&mut instr);
        let mut text = String::new();
        formatter.format(&instr, &mut text);
        lines.push((instr.ip(), text));
    }
    lines
}

/// Recover the gadget contract from an encoding.
pub fn decode_contract(bytes: &[u8], address: u64) -> Result<Vec<GadgetOp>, UnsupportedInstruction> {
    let mut decoder = Decoder::with_ip(64, bytes, address, DecoderOptions::NONE);
    let mut formatter = IntelFormatter::new();
    let mut instr = Instruction::default();
    let mut ops = Vec::new();
    while decoder.can_decode() {
        decoder.decode_out(&mut instr);
        let op = match (instr.mnemonic(), instr.op0_register()) {
            (Mnemonic::Pop, Register::RDI) => Some(GadgetOp::Pop(Reg::Rdi)),
            (Mnemonic::Pop, Register::RSI) => Some(GadgetOp::Pop(Reg::Rsi)),
            (Mnemonic::Pop, Register::RDX) => Some(GadgetOp::Pop(Reg::Rdx)),
            (Mnemonic::Ret, _) if instr.op_count() == 0 => Some(GadgetOp::Ret),
            _ => None,
        };
        match op {
            Some(op) => ops.push(op),
            None => {
                let mut text = String::new();
                formatter.format(&instr, &mut text);
                return Err(UnsupportedInstruction { ip: instr.ip(), text });
            }
        }
    }
    Ok(ops)
}
