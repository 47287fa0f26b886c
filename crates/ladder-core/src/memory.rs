//! Mapped memory of the emulated process.
//!
//! A [`Memory`] is a list of non-overlapping [`Region`]s. Writable regions
//! are dense byte vectors; read-only regions read as a fill byte except for
//! a few patched spans (the gadget encoding, `"/bin/sh"`), which keeps a
//! 2 MiB libc mapping from costing 2 MiB.

use log::trace;

use crate::error::Fault;

/// Page permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Perms {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
}

impl Perms {
    pub const RX: Perms = Perms { read: true, write: false, exec: true };
    pub const RW: Perms = Perms { read: true, write: true, exec: false };
    pub const RWX: Perms = Perms { read: true, write: true, exec: true };
}

/// One mapping.
#[derive(Debug, Clone)]
pub struct Region {
    pub name: &'static str,
    pub base: u64,
    pub size: u64,
    pub perms: Perms,
    bytes: Vec<u8>,
    fill: u8,
    patches: Vec<(u64, Vec<u8>)>,
}

impl Region {
    /// Zero-initialized writable region.
    pub fn zeroed(name: &'static str, base: u64, size: u64, perms: Perms) -> Self {
        Region {
            name,
            base,
            size,
            perms,
            bytes: vec![0; size as usize],
            fill: 0,
            patches: Vec::new(),
        }
    }

    /// Writable region initialized from `data`, rounded up to whole pages.
    pub fn with_data(name: &'static str, base: u64, data: &[u8], perms: Perms) -> Self {
        let size = ((data.len() as u64) + 0xfff) & !0xfff;
        let mut region = Region::zeroed(name, base, size.max(0x1000), perms);
        region.bytes[..data.len()].copy_from_slice(data);
        region
    }

    /// Sparse region reading as `fill` outside the patched spans.
    pub fn sparse(name: &'static str, base: u64, size: u64, perms: Perms, fill: u8) -> Self {
        Region {
            name,
            base,
            size,
            perms,
            bytes: Vec::new(),
            fill,
            patches: Vec::new(),
        }
    }

    /// Overlay `data` at `offset` (sparse regions only read patches).
    pub fn patch(mut self, offset: u64, data: &[u8]) -> Self {
        self.patches.push((offset, data.to_vec()));
        self
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr - self.base < self.size
    }

    fn read_byte(&self, addr: u64) -> u8 {
        let off = addr - self.base;
        if let Some(b) = self.bytes.get(off as usize) {
            return *b;
        }
        for (start, data) in &self.patches {
            if off >= *start && off < start + data.len() as u64 {
                return data[(off - start) as usize];
            }
        }
        self.fill
    }
}

/// The mapped address space of one emulated process.
#[derive(Debug, Clone, Default)]
pub struct Memory {
    regions: Vec<Region>,
}

impl Memory {
    pub fn new() -> Self {
        Memory { regions: Vec::new() }
    }

    /// Add a mapping. Mappings must not overlap.
    pub fn map(&mut self, region: Region) {
        debug_assert!(
            !self
                .regions
                .iter()
                .any(|r| r.contains(region.base) || region.contains(r.base)),
            "overlapping mapping {}",
            region.name
        );
        self.regions.push(region);
    }

    pub fn region_at(&self, addr: u64) -> Option<&Region> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    fn region_at_mut(&mut self, addr: u64) -> Option<&mut Region> {
        self.regions.iter_mut().find(|r| r.contains(addr))
    }

    pub fn perms_at(&self, addr: u64) -> Option<Perms> {
        self.region_at(addr).map(|r| r.perms)
    }

    pub fn read_u8(&self, addr: u64) -> Result<u8, Fault> {
        match self.region_at(addr) {
            Some(r) if r.perms.read => Ok(r.read_byte(addr)),
            _ => Err(Fault::Segmentation { addr }),
        }
    }

    pub fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>, Fault> {
        (0..len as u64)
            .map(|i| self.read_u8(addr.wrapping_add(i)))
            .collect()
    }

    pub fn read_u64(&self, addr: u64) -> Result<u64, Fault> {
        let mut raw = [0u8; 8];
        for (i, b) in raw.iter_mut().enumerate() {
            *b = self.read_u8(addr.wrapping_add(i as u64))?;
        }
        Ok(u64::from_le_bytes(raw))
    }

    /// Read a NUL-terminated string, at most `limit` bytes when given.
    pub fn read_c_string(&self, addr: u64, limit: Option<usize>) -> Result<Vec<u8>, Fault> {
        let mut out = Vec::new();
        let mut cursor = addr;
        while limit.map_or(true, |l| out.len() < l) {
            let b = self.read_u8(cursor)?;
            if b == 0 {
                break;
            }
            out.push(b);
            cursor = cursor.wrapping_add(1);
        }
        Ok(out)
    }

    /// Store bytes one at a time. Bytes written before a fault stay written,
    /// the same as a `rep movsb` that runs off the end of a mapping.
    pub fn write_bytes(&mut self, addr: u64, data: &[u8]) -> Result<(), Fault> {
        trace!("write {} bytes at 0x{:x}", data.len(), addr);
        for (i, &b) in data.iter().enumerate() {
            let at = addr.wrapping_add(i as u64);
            let region = self
                .region_at_mut(at)
                .ok_or(Fault::Segmentation { addr: at })?;
            if !region.perms.write {
                return Err(Fault::ReadOnly { addr: at });
            }
            let off = (at - region.base) as usize;
            if off >= region.bytes.len() {
                let fill = region.fill;
                region.bytes.resize(off + 1, fill);
            }
            region.bytes[off] = b;
        }
        Ok(())
    }

    pub fn write_u64(&mut self, addr: u64, value: u64) -> Result<(), Fault> {
        self.write_bytes(addr, &value.to_le_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Memory {
        let mut mem = Memory::new();
        mem.map(Region::zeroed("stack", 0x7000, 0x1000, Perms::RW));
        mem.map(Region::sparse("text", 0x40_0000, 0x4000, Perms::RX, 0xcc).patch(0x10, b"\x5f\xc3"));
        mem
    }

    #[test]
    fn test_u64_little_endian() {
        let mut mem = sample();
        mem.write_u64(0x7100, 0x1122_3344_5566_7788).unwrap();
        assert_eq!(mem.read_u8(0x7100).unwrap(), 0x88);
        assert_eq!(mem.read_u64(0x7100).unwrap(), 0x1122_3344_5566_7788);
    }

    #[test]
    fn test_sparse_reads_fill_and_patches() {
        let mem = sample();
        assert_eq!(mem.read_u8(0x40_0000).unwrap(), 0xcc);
        assert_eq!(mem.read_bytes(0x40_0010, 2).unwrap(), vec![0x5f, 0xc3]);
    }

    #[test]
    fn test_write_past_top_faults_after_partial_write() {
        let mut mem = sample();
        let err = mem.write_bytes(0x7ffe, b"ABCD").unwrap_err();
        assert_eq!(err, Fault::Segmentation { addr: 0x8000 });
        assert_eq!(mem.read_bytes(0x7ffe, 2).unwrap(), b"AB".to_vec());
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let mut mem = sample();
        assert_eq!(
            mem.write_u64(0x40_0000, 0).unwrap_err(),
            Fault::ReadOnly { addr: 0x40_0000 }
        );
    }

    #[test]
    fn test_c_string() {
        let mut mem = sample();
        mem.write_bytes(0x7200, b"hello\0world").unwrap();
        assert_eq!(mem.read_c_string(0x7200, None).unwrap(), b"hello".to_vec());
        assert_eq!(mem.read_c_string(0x7200, Some(3)).unwrap(), b"hel".to_vec());
        assert!(mem.read_c_string(0x1234, None).is_err());
    }
}
