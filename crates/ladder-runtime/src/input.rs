//! Payload decoding and line input.
//!
//! Payloads mostly contain raw addresses, which are awkward to type. By
//! default `\xNN` decodes to the byte `NN` and `\\` to a single backslash;
//! every other byte, including a lone backslash, is taken as is.

use std::io::{self, BufRead};

/// How payload text maps to bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PayloadEncoding {
    #[default]
    Escaped,
    Raw,
}

impl PayloadEncoding {
    pub fn decode(self, bytes: &[u8]) -> Vec<u8> {
        match self {
            PayloadEncoding::Escaped => decode_escapes(bytes),
            PayloadEncoding::Raw => bytes.to_vec(),
        }
    }
}

fn hex_value(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

pub fn decode_escapes(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] == b'\\' {
            match input.get(i + 1) {
                Some(b'\\') => {
                    out.push(b'\\');
                    i += 2;
                    continue;
                }
                Some(b'x') => {
                    let hi = input.get(i + 2).copied().and_then(hex_value);
                    let lo = input.get(i + 3).copied().and_then(hex_value);
                    if let (Some(hi), Some(lo)) = (hi, lo) {
                        out.push(hi << 4 | lo);
                        i += 4;
                        continue;
                    }
                }
                _ => {}
            }
        }
        out.push(input[i]);
        i += 1;
    }
    out
}

/// Read one line without its trailing `\n` or `\r\n`. `None` at end of
/// input.
pub fn read_line<R: BufRead + ?Sized>(input: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    if input.read_until(b'\n', &mut line)? == 0 {
        return Ok(None);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
    Ok(Some(line))
}
