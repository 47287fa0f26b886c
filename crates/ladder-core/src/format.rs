//! printf-compatible formatter used as the leak primitive.
//!
//! The target forwards attacker input as the *format* of a variadic call
//! and passes no arguments. Every conversion still fetches "its" argument
//! from where the System V ABI would have put it: `rsi, rdx, rcx, r8, r9`
//! for the first five, then consecutive qwords starting at the caller's
//! `rsp`. Whatever the registers and the stack hold at that point is what
//! gets printed.
//!
//! Supported: `%[n$][-+ #0][width|*][.prec|.*][hh|h|l|ll|q|j|z|t|L]conv`
//! with `d i u x X o c s p n %`. `%n` consumes an argument and writes
//! nothing. Unknown conversions are copied to the output verbatim.

use crate::error::Fault;
use crate::memory::Memory;

/// Cap on field widths and precisions.
pub const MAX_FIELD: usize = 1 << 16;

/// Number of argument registers after the format (`rsi..r9`).
pub const REGISTER_ARGS: usize = 5;

/// Where the formatter fetches its arguments from.
#[derive(Debug, Clone, Copy)]
pub struct ArgumentSource<'a> {
    /// `rsi, rdx, rcx, r8, r9` at the time of the call.
    pub registers: [u64; REGISTER_ARGS],
    /// `rsp` of the function that made the call.
    pub rsp: u64,
    pub memory: &'a Memory,
}

impl ArgumentSource<'_> {
    /// Fetch variadic argument `index` (1-based, counted after the format).
    pub fn fetch(&self, index: usize) -> Result<u64, Fault> {
        debug_assert!(index >= 1);
        if index <= REGISTER_ARGS {
            Ok(self.registers[index - 1])
        } else {
            let slot = (index - REGISTER_ARGS - 1) as u64;
            let addr = self.rsp.wrapping_add(slot.wrapping_mul(8));
            self.memory.read_u64(addr)
        }
    }
}

/// One leak command: what was asked for and what came out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakEvent {
    pub format: Vec<u8>,
    pub emitted: Vec<u8>,
}

/// Run `format` against `args` and record the event.
pub fn leak(format: &[u8], args: &ArgumentSource<'_>) -> Result<LeakEvent, Fault> {
    let emitted = render(format, args)?;
    Ok(LeakEvent {
        format: format.to_vec(),
        emitted,
    })
}

#[derive(Debug, Default, Clone, Copy)]
struct Flags {
    left: bool,
    plus: bool,
    space: bool,
    alt: bool,
    zero: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Length {
    Char,
    Short,
    #[default]
    Int,
    Long,
}

impl Length {
    fn bits(self) -> u32 {
        match self {
            Length::Char => 8,
            Length::Short => 16,
            Length::Int => 32,
            Length::Long => 64,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Spec {
    flags: Flags,
    width: Option<usize>,
    precision: Option<usize>,
    length: Length,
}

fn scan_number(fmt: &[u8], mut i: usize) -> (usize, usize) {
    let mut n: usize = 0;
    while let Some(d) = fmt.get(i).filter(|b| b.is_ascii_digit()) {
        n = n.saturating_mul(10).saturating_add((d - b'0') as usize);
        i += 1;
    }
    (n, i)
}

/// Format `fmt` with no supplied arguments.
pub fn render(fmt: &[u8], args: &ArgumentSource<'_>) -> Result<Vec<u8>, Fault> {
    let mut out = Vec::with_capacity(fmt.len());
    let mut next_arg = 1usize;
    let mut i = 0;

    while i < fmt.len() {
        if fmt[i] != b'%' {
            out.push(fmt[i]);
            i += 1;
            continue;
        }
        let start = i;
        i += 1;

        // %n$
        let mut position = None;
        let (n, end) = scan_number(fmt, i);
        if end > i && fmt.get(end) == Some(&b'$') && n >= 1 {
            position = Some(n);
            i = end + 1;
        }

        let mut spec = Spec::default();
        while let Some(&b) = fmt.get(i) {
            match b {
                b'-' => spec.flags.left = true,
                b'+' => spec.flags.plus = true,
                b' ' => spec.flags.space = true,
                b'#' => spec.flags.alt = true,
                b'0' => spec.flags.zero = true,
                _ => break,
            }
            i += 1;
        }

        if fmt.get(i) == Some(&b'*') {
            let w = args.fetch(next_arg)? as u32 as i32;
            next_arg += 1;
            if w < 0 {
                spec.flags.left = true;
            }
            spec.width = Some((w.unsigned_abs() as usize).min(MAX_FIELD));
            i += 1;
        } else {
            let (w, end) = scan_number(fmt, i);
            if end > i {
                spec.width = Some(w.min(MAX_FIELD));
                i = end;
            }
        }

        if fmt.get(i) == Some(&b'.') {
            i += 1;
            if fmt.get(i) == Some(&b'*') {
                let p = args.fetch(next_arg)? as u32 as i32;
                next_arg += 1;
                spec.precision = (p >= 0).then(|| (p as usize).min(MAX_FIELD));
                i += 1;
            } else {
                let (p, end) = scan_number(fmt, i);
                spec.precision = Some(p.min(MAX_FIELD));
                i = end;
            }
        }

        match (fmt.get(i), fmt.get(i + 1)) {
            (Some(b'h'), Some(b'h')) => {
                spec.length = Length::Char;
                i += 2;
            }
            (Some(b'l'), Some(b'l')) => {
                spec.length = Length::Long;
                i += 2;
            }
            (Some(b'h'), _) => {
                spec.length = Length::Short;
                i += 1;
            }
            (Some(b'l' | b'q' | b'j' | b'z' | b't' | b'L'), _) => {
                spec.length = Length::Long;
                i += 1;
            }
            _ => {}
        }

        let Some(&conv) = fmt.get(i) else {
            out.extend_from_slice(&fmt[start..]);
            break;
        };
        i += 1;

        if conv == b'%' {
            out.push(b'%');
            continue;
        }
        if !matches!(conv, b'd' | b'i' | b'u' | b'x' | b'X' | b'o' | b'c' | b's' | b'p' | b'n') {
            out.extend_from_slice(&fmt[start..i]);
            continue;
        }

        let raw = match position {
            Some(p) => args.fetch(p)?,
            None => {
                let v = args.fetch(next_arg)?;
                next_arg += 1;
                v
            }
        };

        match conv {
            b'n' => {}
            b'c' => pad(&mut out, b"", &[raw as u8], spec.width, spec.flags.left, false),
            b's' => {
                let text = if raw == 0 {
                    b"(null)".to_vec()
                } else {
                    args.memory.read_c_string(raw, spec.precision)?
                };
                pad(&mut out, b"", &text, spec.width, spec.flags.left, false);
            }
            b'p' => {
                if raw == 0 {
                    pad(&mut out, b"", b"(nil)", spec.width, spec.flags.left, false);
                } else {
                    let p = Spec {
                        flags: Flags { alt: true, ..spec.flags },
                        length: Length::Long,
                        ..spec
                    };
                    render_int(&mut out, &p, raw, b'x');
                }
            }
            _ => render_int(&mut out, &spec, raw, conv),
        }
    }

    Ok(out)
}

fn sign_extend(value: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

fn render_int(out: &mut Vec<u8>, spec: &Spec, raw: u64, conv: u8) {
    let bits = spec.length.bits();
    let truncated = if bits == 64 { raw } else { raw & ((1u64 << bits) - 1) };
    let signed = matches!(conv, b'd' | b'i');
    let (negative, magnitude) = if signed {
        let v = sign_extend(truncated, bits);
        (v < 0, v.unsigned_abs())
    } else {
        (false, truncated)
    };

    let mut digits = match conv {
        b'x' => format!("{:x}", magnitude),
        b'X' => format!("{:X}", magnitude),
        b'o' => format!("{:o}", magnitude),
        _ => magnitude.to_string(),
    }
    .into_bytes();

    if let Some(p) = spec.precision {
        if p == 0 && magnitude == 0 {
            digits.clear();
        }
        if digits.len() < p {
            let mut padded = vec![b'0'; p - digits.len()];
            padded.extend_from_slice(&digits);
            digits = padded;
        }
    }

    let mut prefix: Vec<u8> = Vec::new();
    if signed {
        if negative {
            prefix.push(b'-');
        } else if spec.flags.plus {
            prefix.push(b'+');
        } else if spec.flags.space {
            prefix.push(b' ');
        }
    }
    if spec.flags.alt {
        match conv {
            b'x' if magnitude != 0 => prefix.extend_from_slice(b"0x"),
            b'X' if magnitude != 0 => prefix.extend_from_slice(b"0X"),
            b'o' if digits.first() != Some(&b'0') => digits.insert(0, b'0'),
            _ => {}
        }
    }

    let zero = spec.flags.zero && !spec.flags.left && spec.precision.is_none();
    pad(out, &prefix, &digits, spec.width, spec.flags.left, zero);
}

fn pad(out: &mut Vec<u8>, prefix: &[u8], body: &[u8], width: Option<usize>, left: bool, zero: bool) {
    let fill = width.unwrap_or(0).saturating_sub(prefix.len() + body.len());
    if left {
        out.extend_from_slice(prefix);
        out.extend_from_slice(body);
        out.resize(out.len() + fill, b' ');
    } else if zero {
        out.extend_from_slice(prefix);
        out.resize(out.len() + fill, b'0');
        out.extend_from_slice(body);
    } else {
        out.resize(out.len() + fill, b' ');
        out.extend_from_slice(prefix);
        out.extend_from_slice(body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Perms, Region};

    const RSP: u64 = 0x7ffe_0000;

    fn memory() -> Memory {
        let mut mem = Memory::new();
        mem.map(Region::zeroed("stack", RSP - 0x1000, 0x2000, Perms::RW));
        mem.write_u64(RSP, 0xdead_beef_cafe_f00d).unwrap();
        mem.write_u64(RSP + 8, 0x1122_3344_5566_7700).unwrap();
        mem.write_u64(RSP + 16, RSP + 0x100).unwrap();
        mem.write_bytes(RSP + 0x100, b"secret\0").unwrap();
        mem
    }

    fn run(fmt: &str) -> Result<String, Fault> {
        let mem = memory();
        let args = ArgumentSource {
            registers: [0x7fff_f7fa_2803, 0, 0x7fff_f7e9_b887, 7, 0xffff_ffff_ffff_fff6],
            rsp: RSP,
            memory: &mem,
        };
        render(fmt.as_bytes(), &args).map(|v| String::from_utf8_lossy(&v).into_owned())
    }

    #[test]
    fn test_sequential_registers_then_stack() {
        assert_eq!(
            run("%lx.%lx.%lx.%lx.%lx.%lx.%lx.").unwrap(),
            "7ffff7fa2803.0.7ffff7e9b887.7.fffffffffffffff6.deadbeefcafef00d.1122334455667700."
        );
    }

    #[test]
    fn test_repeated_lx_is_bounded_hex_disclosure() {
        let out = run(&"%lx.".repeat(8)).unwrap();
        let fields: Vec<&str> = out.split('.').collect();
        assert_eq!(fields.len(), 9);
        assert!(fields[..8]
            .iter()
            .all(|f| !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))));
        assert_eq!(fields[8], "");
    }

    #[test]
    fn test_positional_argument() {
        assert_eq!(run("%7$lx").unwrap(), "1122334455667700");
        assert_eq!(run("%6$p %1$p").unwrap(), "0xdeadbeefcafef00d 0x7ffff7fa2803");
    }

    #[test]
    fn test_length_modifiers_truncate() {
        assert_eq!(run("%6$x").unwrap(), "cafef00d");
        assert_eq!(run("%6$hx").unwrap(), "f00d");
        assert_eq!(run("%6$hhx").unwrap(), "d");
        assert_eq!(run("%5$d").unwrap(), "-10");
        assert_eq!(run("%5$ld").unwrap(), "-10");
        assert_eq!(run("%5$u").unwrap(), "4294967286");
    }

    #[test]
    fn test_flags_width_precision() {
        assert_eq!(run("%4$08x").unwrap(), "00000007");
        assert_eq!(run("%4$-4d|").unwrap(), "7   |");
        assert_eq!(run("%4$+d").unwrap(), "+7");
        assert_eq!(run("%4$#x").unwrap(), "0x7");
        assert_eq!(run("%4$#o").unwrap(), "07");
        assert_eq!(run("%4$.3d").unwrap(), "007");
        assert_eq!(run("%2$.0d|").unwrap(), "|");
    }

    #[test]
    fn test_star_width_consumes_an_argument() {
        let mem = memory();
        let args = ArgumentSource { registers: [6, 42, (-4i32) as u32 as u64, 7, 0], rsp: RSP, memory: &mem };
        assert_eq!(render(b"%*d|", &args).unwrap(), b"    42|".to_vec());
        let args = ArgumentSource { registers: [(-4i32) as u32 as u64, 7, 0, 0, 0], rsp: RSP, memory: &mem };
        assert_eq!(render(b"%*d|", &args).unwrap(), b"7   |".to_vec());
    }

    #[test]
    fn test_pointer_and_nil() {
        assert_eq!(run("%2$p").unwrap(), "(nil)");
        assert_eq!(run("%3$p").unwrap(), "0x7ffff7e9b887");
    }

    #[test]
    fn test_string_conversion_reads_memory() {
        assert_eq!(run("%8$s").unwrap(), "secret");
        assert_eq!(run("%8$.3s").unwrap(), "sec");
        assert_eq!(run("%2$s").unwrap(), "(null)");
    }

    #[test]
    fn test_string_from_bad_pointer_faults() {
        let err = run("%6$s").unwrap_err();
        assert_eq!(err, Fault::Segmentation { addr: 0xdead_beef_cafe_f00d });
    }

    #[test]
    fn test_reading_past_the_stack_faults() {
        // 0x1000 bytes above RSP are mapped, slot 512 is the first unmapped one
        assert!(run("%517$lx").is_ok());
        assert_eq!(run("%518$lx").unwrap_err(), Fault::Segmentation { addr: RSP + 0x1000 });
    }

    #[test]
    fn test_n_writes_nothing() {
        let mem = memory();
        let before = mem.read_bytes(RSP, 24).unwrap();
        let args = ArgumentSource { registers: [RSP; 5], rsp: RSP, memory: &mem };
        assert_eq!(render(b"AB%n%hn%1$lln", &args).unwrap(), b"AB".to_vec());
        assert_eq!(mem.read_bytes(RSP, 24).unwrap(), before);
    }

    #[test]
    fn test_literals_and_unknown_conversions() {
        assert_eq!(run("100%%").unwrap(), "100%");
        assert_eq!(run("%y%").unwrap(), "%y%");
        assert_eq!(run("plain").unwrap(), "plain");
    }

    #[test]
    fn test_char_conversion() {
        assert_eq!(run("%4$c").unwrap(), "\u{7}");
    }

    #[test]
    fn test_char_width_pads_on_the_flagged_side() {
        let mem = memory();
        let args = ArgumentSource { registers: [b'Z' as u64, 0, 0, 0, 0], rsp: RSP, memory: &mem };
        assert_eq!(render(b"[%5c]", &args).unwrap(), b"[    Z]".to_vec());
        assert_eq!(render(b"[%-5c]", &args).unwrap(), b"[Z    ]".to_vec());
        assert_eq!(render(b"[%1$c]", &args).unwrap(), b"[Z]".to_vec());
    }

    #[test]
    fn test_leak_event_records_format() {
        let mem = memory();
        let args = ArgumentSource { registers: [1, 2, 3, 4, 5], rsp: RSP, memory: &mem };
        let event = leak(b"%lx", &args).unwrap();
        assert_eq!(event.format, b"%lx".to_vec());
        assert_eq!(event.emitted, b"1".to_vec());
    }
}
