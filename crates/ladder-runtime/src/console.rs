//! Unbuffered target output.
//!
//! The targets disable stdio buffering, so every write reaches the reader
//! before the next prompt blocks. The console also remembers how many
//! bytes the last write produced: `printf` leaves that count in `r8`, and
//! the leak primitive reads it back.

use std::io::{self, Write};

#[derive(Debug)]
pub struct Console<W: Write> {
    out: W,
    last_write: usize,
}

impl<W: Write> Console<W> {
    pub fn new(out: W) -> Self {
        Console { out, last_write: 0 }
    }

    pub fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(bytes)?;
        self.out.flush()?;
        self.last_write = bytes.len();
        Ok(())
    }

    pub fn print(&mut self, text: &str) -> io::Result<()> {
        self.write(text.as_bytes())
    }

    /// Length of the most recent write.
    pub fn last_write(&self) -> usize {
        self.last_write
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
