//! The three ladder tiers.
//!
//! A tier is static data: a protection profile, the image symbol table, the
//! frames that are live while a command runs, and the output each command
//! produces. [`ChallengeTarget`](crate::ChallengeTarget) interprets it.
//!
//! Offsets are those of a non-PIE x86-64 build; return sites are the
//! instruction after the corresponding `call`.

use ladder_core::frame::FrameLayout;
use ladder_core::gadget::GadgetSurface;
use ladder_core::image::{Role, Symbol, LIBC_START_RETURN};
use ladder_core::oracle::WinOracle;
use ladder_core::profile::ProtectionProfile;

/// What a scalar local holds when its frame is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Local {
    /// `argc`.
    Argc,
    /// Pointer to the `argv` array.
    Argv,
    /// Pointer to the input in the heap arena.
    Input,
    /// Pointer to the frame's own buffer.
    Buffer,
}

/// Where a routine returns to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnSite {
    /// Offset from the image base.
    Image(u64),
    /// Offset from the libc base.
    Libc(u64),
}

/// A function frame on the path to the vulnerable code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Routine {
    pub function: &'static str,
    pub layout: FrameLayout,
    /// Contents of the scalar locals, lowest address first.
    pub locals: &'static [Local],
    pub returns_to: ReturnSite,
    /// Printed by the caller once this routine has returned normally.
    pub after_return: &'static str,
}

/// A bounded copy of the command line into the enclosing frame's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Staging {
    pub offset: usize,
    pub limit: usize,
}

/// Output around the unchecked copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowStyle {
    /// Prints the buffer and oracle addresses, then echoes the copy.
    Teaching { oracle: &'static str },
    /// Prints a fixed confirmation.
    Quiet,
    /// Prints a section header, then echoes the copy.
    Reporting,
}

/// Output of the leak command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeakStyle {
    /// `Debug: <formatted>`.
    Debug,
    /// Disclosure block, formatted string, stack dump.
    Disclosure {
        oracles: &'static [&'static str],
        gadget: &'static str,
        dump: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeakCommand {
    pub routine: Routine,
    pub style: LeakStyle,
    pub staging: Option<Staging>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverflowCommand {
    pub routine: Routine,
    pub style: OverflowStyle,
    pub staging: Option<Staging>,
}

/// Startup banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub title: &'static str,
    /// List the protection profile after the title.
    pub protections: bool,
    pub plan: &'static [&'static str],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tier {
    pub id: u8,
    pub name: &'static str,
    pub program: &'static str,
    pub profile: ProtectionProfile,
    pub symbols: &'static [Symbol],
    pub header: Header,
    /// Usage text; `{prog}` is replaced with the program name.
    pub usage: &'static str,
    pub usage_after_header: bool,
    pub argc: u64,
    /// Frames live for the whole command, outermost first.
    pub frames: &'static [Routine],
    pub leak: Option<LeakCommand>,
    pub overflow: OverflowCommand,
    pub unknown_command: &'static str,
}

impl Tier {
    pub fn by_id(id: u8) -> Option<&'static Tier> {
        LADDER.iter().copied().find(|t| t.id == id)
    }

    /// Whether the tier takes `<command> [payload]` rather than a single input.
    pub fn is_staged(&self) -> bool {
        self.leak.is_some()
    }

    pub fn usage_text(&self, prog: &str) -> String {
        self.usage.replace("{prog}", prog)
    }

    pub fn header_text(&self) -> String {
        let mut text = String::from(self.header.title);
        if self.header.protections {
            text.push_str("This binary has multiple protections enabled:\n");
            for line in self.profile.checksec_lines() {
                text.push_str(&format!("  - {line}\n"));
            }
            text.push('\n');
        }
        if !self.header.plan.is_empty() {
            text.push_str("You will need to:\n");
            for (i, step) in self.header.plan.iter().enumerate() {
                text.push_str(&format!("  {}. {step}\n", i + 1));
            }
            text.push('\n');
        }
        text
    }

    pub fn oracles(&self) -> impl Iterator<Item = &'static Symbol> {
        self.symbols
            .iter()
            .filter(|s| matches!(s.role, Role::Oracle(_)))
    }
}

pub static LADDER: [&Tier; 3] = [&TIER1, &TIER2, &TIER3];

const MAIN_RETURNS: ReturnSite = ReturnSite::Libc(LIBC_START_RETURN);

// ─── Tier 1: no protections ─────────────────────────────────────

const T1_WIN: u64 = 0x1176;
const T1_MAIN: u64 = 0x121f;

static TIER1_SYMBOLS: [Symbol; 4] = [
    Symbol::code("_start", 0x1090, 0x26),
    Symbol::with_role(
        "win_function",
        T1_WIN,
        0x2b,
        Role::Oracle(WinOracle {
            banner: &["", "*** SUCCESS! You've exploited the vulnerability! ***"],
            shell: true,
        }),
    ),
    Symbol::code("vulnerable_function", 0x11a1, 0x7e),
    Symbol::code("main", T1_MAIN, 0x8c),
];

static TIER1_FRAMES: [Routine; 1] = [Routine {
    function: "main",
    layout: FrameLayout::new(0, 2),
    locals: &[Local::Argc, Local::Argv],
    returns_to: MAIN_RETURNS,
    after_return: "",
}];

pub static TIER1: Tier = Tier {
    id: 1,
    name: "easy",
    program: "level1",
    profile: ProtectionProfile::UNPROTECTED,
    symbols: &TIER1_SYMBOLS,
    header: Header {
        title: "=== Stack Buffer Overflow - Easy ===\n\n",
        protections: false,
        plan: &[],
    },
    usage: "Usage: {prog} <input>\n",
    usage_after_header: false,
    argc: 2,
    frames: &TIER1_FRAMES,
    leak: None,
    overflow: OverflowCommand {
        routine: Routine {
            function: "vulnerable_function",
            layout: FrameLayout::new(64, 1),
            locals: &[Local::Input],
            returns_to: ReturnSite::Image(T1_MAIN + 0x5d),
            after_return: "\nReturned normally.\n",
        },
        style: OverflowStyle::Teaching { oracle: "win_function" },
        staging: None,
    },
    unknown_command: "",
};

// ─── Tier 2: canary + format-string leak ────────────────────────

const T2_MAIN: u64 = 0x12c8;

static TIER2_SYMBOLS: [Symbol; 6] = [
    Symbol::code("_start", 0x10b0, 0x26),
    Symbol::with_role(
        "admin_shell",
        0x1196,
        0x2b,
        Role::Oracle(WinOracle {
            banner: &["", "*** ADMIN ACCESS! Canary bypassed! ***"],
            shell: true,
        }),
    ),
    Symbol::with_role("normal_user", 0x11c1, 0x1a, Role::Decoy("Normal user access\n")),
    Symbol::code("format_leak", 0x11db, 0x5e),
    Symbol::code("buffer_overflow", 0x1239, 0x8f),
    Symbol::code("main", T2_MAIN, 0x13a),
];

static TIER2_FRAMES: [Routine; 1] = [Routine {
    function: "main",
    layout: FrameLayout::new(0, 2),
    locals: &[Local::Argc, Local::Argv],
    returns_to: MAIN_RETURNS,
    after_return: "",
}];

pub static TIER2: Tier = Tier {
    id: 2,
    name: "medium",
    program: "level2",
    profile: ProtectionProfile::CANARY,
    symbols: &TIER2_SYMBOLS,
    header: Header {
        title: "=== Stack Buffer Overflow - Medium ===\n\n",
        protections: false,
        plan: &[],
    },
    usage: "Usage: {prog} <mode> [data]\nModes: leak <fmt> | overflow <data>\n",
    usage_after_header: false,
    argc: 3,
    frames: &TIER2_FRAMES,
    leak: Some(LeakCommand {
        routine: Routine {
            function: "format_leak",
            layout: FrameLayout::new(0, 1),
            locals: &[Local::Input],
            returns_to: ReturnSite::Image(T2_MAIN + 0xe2),
            after_return: "",
        },
        style: LeakStyle::Debug,
        staging: None,
    }),
    overflow: OverflowCommand {
        routine: Routine {
            function: "buffer_overflow",
            layout: FrameLayout::new(64, 1),
            locals: &[Local::Input],
            returns_to: ReturnSite::Image(T2_MAIN + 0x118),
            after_return: "",
        },
        style: OverflowStyle::Quiet,
        staging: None,
    },
    unknown_command: "Invalid arguments\n",
};

// ─── Tier 3: canary + NX + partial ASLR ─────────────────────────

const T3_PROCESS_COMMAND: u64 = 0x1524;
const T3_MAIN: u64 = 0x1674;

/// Alternate entry of `gadget_function`.
pub const T3_GADGET_ENTRY: u64 = 0x3c;

static TIER3_SYMBOLS: [Symbol; 8] = [
    Symbol::code("_start", 0x1100, 0x26),
    Symbol::with_role(
        "print_flag",
        0x11f6,
        0x2e,
        Role::Oracle(WinOracle {
            banner: &[
                "",
                "*** Flag captured! ***",
                "*** You successfully exploited a hardened binary! ***",
            ],
            shell: false,
        }),
    ),
    Symbol::with_role(
        "give_shell",
        0x1224,
        0x25,
        Role::Oracle(WinOracle {
            banner: &["*** Spawning shell... ***"],
            shell: true,
        }),
    ),
    Symbol::code("leak_info", 0x1249, 0x1c0),
    Symbol::code("vulnerable_copy", 0x1409, 0xd8),
    Symbol::with_role(
        "gadget_function",
        0x14e1,
        0x43,
        Role::Gadget(GadgetSurface {
            alternate_entry: T3_GADGET_ENTRY,
            ops: GadgetSurface::POP_RDI_RSI_RDX,
            frame_size: 0x10,
        }),
    ),
    Symbol::code("process_command", T3_PROCESS_COMMAND, 0x150),
    Symbol::code("main", T3_MAIN, 0x180),
];

static TIER3_FRAMES: [Routine; 2] = [
    Routine {
        function: "main",
        layout: FrameLayout::new(0, 2),
        locals: &[Local::Argc, Local::Argv],
        returns_to: MAIN_RETURNS,
        after_return: "",
    },
    // `input[256]` and `payload[512]` share one block of locals.
    Routine {
        function: "process_command",
        layout: FrameLayout::new(768, 1),
        locals: &[Local::Argv],
        returns_to: ReturnSite::Image(T3_MAIN + 0x15f),
        after_return: "\nProgram exiting normally.\n",
    },
];

pub static TIER3: Tier = Tier {
    id: 3,
    name: "hard",
    program: "level3",
    profile: ProtectionProfile::HARDENED,
    symbols: &TIER3_SYMBOLS,
    header: Header {
        title: "=== Level 3: Hard Buffer Overflow Challenge ===\n",
        protections: true,
        plan: &[
            "Leak stack canary value",
            "Leak addresses to defeat ASLR",
            "Build a ROP chain (stack is non-executable)",
            "Preserve the canary in your exploit",
        ],
    },
    usage: "Usage: {prog} <command>\nCommands:\n  leak     - Leak memory information\n  overflow - Trigger buffer overflow\n",
    usage_after_header: true,
    argc: 2,
    frames: &TIER3_FRAMES,
    leak: Some(LeakCommand {
        routine: Routine {
            function: "leak_info",
            layout: FrameLayout::new(64, 3),
            locals: &[Local::Buffer, Local::Buffer, Local::Input],
            returns_to: ReturnSite::Image(T3_PROCESS_COMMAND + 0x8a),
            after_return: "",
        },
        style: LeakStyle::Disclosure {
            oracles: &["print_flag", "give_shell"],
            gadget: "gadget_function",
            dump: 16,
        },
        staging: Some(Staging { offset: 512, limit: 255 }),
    }),
    overflow: OverflowCommand {
        routine: Routine {
            function: "vulnerable_copy",
            layout: FrameLayout::new(128, 2),
            locals: &[Local::Input, Local::Buffer],
            returns_to: ReturnSite::Image(T3_PROCESS_COMMAND + 0x12e),
            after_return: "",
        },
        style: OverflowStyle::Reporting,
        staging: Some(Staging { offset: 0, limit: 511 }),
    },
    unknown_command: "Unknown command\n",
};
