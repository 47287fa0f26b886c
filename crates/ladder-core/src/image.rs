//! Program images and the per-process address space.
//!
//! Each tier describes its binary as a static symbol table (offsets from
//! the image base). At launch an [`AddressSpace`] fixes where the image,
//! libc and the stack live for the lifetime of the process; with ASLR the
//! libc base and the stack top are drawn from the process RNG.

use rand::Rng;

use crate::gadget::GadgetSurface;
use crate::oracle::WinOracle;
use crate::profile::ProtectionProfile;

/// Load address of a non-PIE image.
pub const IMAGE_BASE: u64 = 0x40_0000;
/// Mapped size of the image (headers, .text, .rodata, .data).
pub const IMAGE_SIZE: u64 = 0x4000;
/// Load address region used for PIE images.
pub const PIE_BASE: u64 = 0x5555_5555_4000;
/// Input arena, relative to the image base (first heap chunk after brk).
pub const ARENA_OFFSET: u64 = 0x52a0;

/// Libc base with ASLR disabled.
pub const LIBC_FIXED_BASE: u64 = 0x7fff_f7d8_7000;
/// Lowest randomized libc base.
pub const LIBC_RANDOM_BASE: u64 = 0x7f00_0000_0000;
/// Mapped size of libc.
pub const LIBC_SIZE: u64 = 0x22_0000;

/// Stack top with ASLR disabled.
pub const STACK_FIXED_TOP: u64 = 0x7fff_ffff_f000;
/// Lowest randomized stack top.
pub const STACK_RANDOM_TOP: u64 = 0x7ffc_0000_0000;
/// Mapped size of the stack.
pub const STACK_SIZE: u64 = 0x2_1000;

/// Offset of the instruction after `call main` in `__libc_start_call_main`.
pub const LIBC_START_RETURN: u64 = 0x29d90;
/// Offset of `_IO_2_1_stdout_` in libc.
pub const LIBC_STDOUT: u64 = 0x21a780;
/// Offset of `write` in libc.
pub const LIBC_WRITE: u64 = 0x114870;
/// Offset of the `"/bin/sh"` string in libc.
pub const LIBC_BIN_SH: u64 = 0x1d8678;

/// What a symbol does when control lands on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Ordinary code the model does not execute after a hijack.
    Code,
    /// Data object.
    Data,
    /// Win oracle: reaching its entry is the success condition.
    Oracle(WinOracle),
    /// Prints a message and returns to the next value on the stack.
    Decoy(&'static str),
    /// Function with an alternate-entry gadget sequence.
    Gadget(GadgetSurface),
}

/// A symbol in a static image description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    pub name: &'static str,
    /// Offset from the module base.
    pub offset: u64,
    pub size: u64,
    pub role: Role,
}

impl Symbol {
    pub const fn code(name: &'static str, offset: u64, size: u64) -> Self {
        Symbol { name, offset, size, role: Role::Code }
    }

    pub const fn with_role(name: &'static str, offset: u64, size: u64, role: Role) -> Self {
        Symbol { name, offset, size, role }
    }

    fn contains(&self, rel: u64) -> bool {
        rel >= self.offset && rel < self.offset + self.size
    }
}

/// The subset of libc the ladder binaries touch.
pub static LIBC_SYMBOLS: &[Symbol] = &[
    Symbol::code("__libc_start_call_main", 0x29d10, 0xb0),
    Symbol::code("system", 0x50d70, 0x2d),
    Symbol::code("printf", 0x606f0, 0xc8),
    Symbol::code("puts", 0x80e50, 0x1f0),
    Symbol::code("write", LIBC_WRITE, 0x99),
    Symbol::with_role("/bin/sh", LIBC_BIN_SH, 8, Role::Data),
    Symbol::with_role("_IO_2_1_stdout_", LIBC_STDOUT, 0xe0, Role::Data),
];

/// Which mapping a resolved address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    Image,
    Libc,
}

/// Base addresses of one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpace {
    pub image_base: u64,
    pub libc_base: u64,
    pub stack_top: u64,
}

impl AddressSpace {
    /// Layout with every randomization disabled.
    pub fn fixed() -> Self {
        AddressSpace {
            image_base: IMAGE_BASE,
            libc_base: LIBC_FIXED_BASE,
            stack_top: STACK_FIXED_TOP,
        }
    }

    /// Draw a layout for `profile`.
    ///
    /// Randomness is always consumed in the same order (libc, stack, image)
    /// so a seeded RNG reproduces the same layout.
    pub fn randomize<R: Rng + ?Sized>(profile: &ProtectionProfile, rng: &mut R) -> Self {
        let libc_pages: u64 = rng.gen::<u64>() & 0xf_ffff;
        let stack_pages: u64 = rng.gen::<u64>() & 0x3_ffff;
        let image_pages: u64 = rng.gen::<u64>() & 0xffff;

        let mut space = AddressSpace::fixed();
        if profile.aslr {
            space.libc_base = LIBC_RANDOM_BASE + (libc_pages << 12);
            space.stack_top = STACK_RANDOM_TOP + (stack_pages << 12);
            if profile.pie {
                space.image_base = PIE_BASE + (image_pages << 12);
            }
        }
        space
    }

    /// Lowest mapped stack address.
    pub fn stack_base(&self) -> u64 {
        self.stack_top - STACK_SIZE
    }

    /// Start of the input arena.
    pub fn arena(&self) -> u64 {
        self.image_base + ARENA_OFFSET
    }

    /// Address `main` returns to.
    pub fn libc_start_return(&self) -> u64 {
        self.libc_base + LIBC_START_RETURN
    }
}

/// A symbol resolved against a loaded address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub symbol: &'static Symbol,
    pub module: Module,
    /// Offset of the address from the symbol start.
    pub offset: u64,
}

/// An image symbol table loaded at a concrete address space.
#[derive(Debug, Clone, Copy)]
pub struct LoadedImage {
    pub space: AddressSpace,
    symbols: &'static [Symbol],
}

impl LoadedImage {
    pub fn new(space: AddressSpace, symbols: &'static [Symbol]) -> Self {
        LoadedImage { space, symbols }
    }

    pub fn symbols(&self) -> &'static [Symbol] {
        self.symbols
    }

    /// Runtime address of a symbol, image first, then libc.
    pub fn address_of(&self, name: &str) -> Option<u64> {
        if let Some(sym) = self.symbols.iter().find(|s| s.name == name) {
            return Some(self.space.image_base + sym.offset);
        }
        LIBC_SYMBOLS
            .iter()
            .find(|s| s.name == name)
            .map(|s| self.space.libc_base + s.offset)
    }

    /// Find the image symbol called `name`.
    pub fn symbol(&self, name: &str) -> Option<&'static Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    /// Map an address back to the symbol containing it.
    pub fn resolve(&self, addr: u64) -> Option<Resolved> {
        let space = &self.space;
        let (module, table, base) = if (space.image_base..space.image_base + IMAGE_SIZE).contains(&addr) {
            (Module::Image, self.symbols, space.image_base)
        } else if (space.libc_base..space.libc_base + LIBC_SIZE).contains(&addr) {
            (Module::Libc, LIBC_SYMBOLS, space.libc_base)
        } else {
            return None;
        };
        let rel = addr - base;
        table.iter().find(|s| s.contains(rel)).map(|symbol| Resolved {
            symbol,
            module,
            offset: rel - symbol.offset,
        })
    }
}
