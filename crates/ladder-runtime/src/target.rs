//! A running challenge target.
//!
//! One [`ChallengeTarget`] is one emulated process. Its seed fixes the
//! canary and the address space for its whole lifetime, so values leaked by
//! one command stay valid for the next. Each command boots a fresh view of
//! memory (image, libc, heap arena holding the input, stack with the live
//! frames), runs the tier's routine on it and, for the overflow, unwinds
//! the frames from the innermost outwards.

use std::io::{self, Write};

use ladder_core::cpu::{Cpu, Landing, Registers};
use ladder_core::format::{self, ArgumentSource, REGISTER_ARGS};
use ladder_core::frame::{draw_canary, CallSite, Epilogue, StackFrame, SLOT};
use ladder_core::image::{
    AddressSpace, LoadedImage, Role, IMAGE_SIZE, LIBC_BIN_SH, LIBC_SIZE, LIBC_STDOUT, LIBC_WRITE,
    STACK_SIZE,
};
use ladder_core::memory::{Memory, Perms, Region};
use ladder_core::{Fault, Invocation};
use log::{debug, info};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::console::Console;
use crate::error::{Result, TargetError};
use crate::outcome::Outcome;
use crate::state::{Event, TargetState};
use crate::tier::{LeakCommand, LeakStyle, Local, OverflowCommand, OverflowStyle, ReturnSite, Routine, Staging, Tier};

/// `rsp` at `call main`, below the stack top.
const MAIN_CALL_DEPTH: u64 = 0x1000;
/// The `argv` array, below the stack top.
const ARGV_DEPTH: u64 = 0x100;
/// The `argv[0]` string, below the stack top.
const ARGV0_DEPTH: u64 = 0x40;

/// Why a command stopped early.
enum Halt {
    Fault(Fault),
    Error(TargetError),
}

impl From<Fault> for Halt {
    fn from(fault: Fault) -> Self {
        Halt::Fault(fault)
    }
}

impl From<TargetError> for Halt {
    fn from(err: TargetError) -> Self {
        Halt::Error(err)
    }
}

impl From<io::Error> for Halt {
    fn from(err: io::Error) -> Self {
        Halt::Error(err.into())
    }
}

type Step<T> = std::result::Result<T, Halt>;

/// Memory and live frames for one command.
struct Process {
    mem: Memory,
    frames: Vec<(StackFrame, &'static Routine)>,
}

impl Process {
    /// Copy at most `limit` bytes of the command line, NUL-terminated, into
    /// the buffer of the frame enclosing the command routine.
    fn stage(&mut self, staging: Option<Staging>, line: &[u8]) -> std::result::Result<(), Fault> {
        let (Some(staging), Some((enclosing, _))) = (staging, self.frames.iter().rev().nth(1)) else {
            return Ok(());
        };
        let at = enclosing.buffer + staging.offset as u64;
        let mut bytes = line[..line.len().min(staging.limit)].to_vec();
        bytes.push(0);
        self.mem.write_bytes(at, &bytes)
    }
}

pub struct ChallengeTarget<W: Write> {
    tier: &'static Tier,
    seed: u64,
    canary: u64,
    image: LoadedImage,
    state: TargetState,
    console: Console<W>,
}

impl<W: Write> ChallengeTarget<W> {
    /// Create the process for `tier`. Draws the canary, then the layout.
    pub fn new(tier: &'static Tier, seed: u64, out: W) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let canary = draw_canary(&mut rng);
        let space = AddressSpace::randomize(&tier.profile, &mut rng);
        info!(
            "{}: seed 0x{seed:x}, libc 0x{:x}, stack top 0x{:x}",
            tier.program, space.libc_base, space.stack_top
        );
        ChallengeTarget {
            tier,
            seed,
            canary,
            image: LoadedImage::new(space, tier.symbols),
            state: TargetState::Idle,
            console: Console::new(out),
        }
    }

    pub fn tier(&self) -> &'static Tier {
        self.tier
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// The process canary. Only meaningful when the profile enables it.
    pub fn canary(&self) -> u64 {
        self.canary
    }

    pub fn image(&self) -> &LoadedImage {
        &self.image
    }

    pub fn state(&self) -> TargetState {
        self.state
    }

    pub fn output(&self) -> &W {
        self.console.get_ref()
    }

    pub fn into_output(self) -> W {
        self.console.into_inner()
    }

    /// Print the startup banner and start accepting input.
    pub fn launch(&mut self) -> Result<()> {
        self.state = self.state.on(Event::Launch)?;
        let header = self.tier.header_text();
        self.console.print(&header)?;
        Ok(())
    }

    /// Run the leak command. `Some` only when the leak crashed the process.
    pub fn leak(&mut self, input: &[u8]) -> Result<Option<Outcome>> {
        let tier = self.tier;
        let Some(command) = tier.leak.as_ref() else {
            return Err(TargetError::UnrecognizedCommand("leak".to_string()));
        };
        self.state = self.state.on(Event::Leak)?;
        match self.run_leak(command, input) {
            Ok(()) => {
                self.state = self.state.on(Event::LeakDone)?;
                Ok(None)
            }
            Err(Halt::Fault(fault)) => self.crash(fault).map(Some),
            Err(Halt::Error(err)) => Err(err),
        }
    }

    /// Run the overflow command to a terminal outcome.
    pub fn overflow(&mut self, payload: &[u8]) -> Result<Outcome> {
        self.state = self.state.on(Event::Overflow)?;
        let tier = self.tier;
        let command = &tier.overflow;
        match self.run_overflow(command, payload) {
            Ok(outcome) => Ok(outcome),
            Err(Halt::Fault(fault)) => self.crash(fault),
            Err(Halt::Error(err)) => Err(err),
        }
    }

    /// Input closed: the dispatcher frames return normally.
    pub fn finish(&mut self) -> Result<Outcome> {
        self.state = self.state.on(Event::InputClosed)?;
        for routine in self.tier.frames.iter().rev() {
            if !routine.after_return.is_empty() {
                self.console.print(routine.after_return)?;
            }
        }
        info!("{}: returned", self.tier.program);
        Ok(Outcome::Returned)
    }

    /// Print an input prompt.
    pub fn prompt(&mut self, text: &str) -> Result<()> {
        self.console.print(text)?;
        Ok(())
    }

    /// Report an unknown command token. The state does not change.
    pub fn unrecognized(&mut self, token: &str) -> Result<()> {
        debug!("unrecognized command {token:?}");
        self.console.print(self.tier.unknown_command)?;
        Ok(())
    }

    // ─── Commands ───────────────────────────────────────────────

    fn run_leak(&mut self, command: &'static LeakCommand, input: &[u8]) -> Step<()> {
        let (mut process, frame) = self.boot(input, &command.routine)?;
        process.stage(command.staging, input)?;

        match command.style {
            LeakStyle::Debug => {
                self.console.print("Debug: ")?;
                self.printf(&process.mem, frame.rsp, input)?;
                self.console.print("\n")?;
            }
            LeakStyle::Disclosure { oracles, gadget, dump } => {
                self.console.print("\n=== Information Disclosure ===\n")?;
                self.console.print(&format!("Stack address: 0x{:x}\n", frame.buffer))?;
                for name in oracles {
                    if let Some(addr) = self.image.address_of(name) {
                        self.console.print(&format!("{name}() address: 0x{addr:x}\n"))?;
                    }
                }
                if let Some(sym) = self.image.symbol(gadget) {
                    let base = self.image.space.image_base + sym.offset;
                    self.console.print(&format!("{gadget}() address: 0x{base:x}\n"))?;
                    if let Role::Gadget(surface) = sym.role {
                        let entry = base + surface.alternate_entry;
                        self.console.print(&format!(
                            "Gadget at {gadget}+0x{:x} (0x{entry:x}): {}\n",
                            surface.alternate_entry,
                            surface.listing(entry)
                        ))?;
                    }
                }
                for (label, name) in [("system()", "system"), ("Libc printf()", "printf")] {
                    if let Some(addr) = self.image.address_of(name) {
                        self.console.print(&format!("{label} address: 0x{addr:x}\n"))?;
                    }
                }

                self.console.print("Custom format: ")?;
                self.printf(&process.mem, frame.rsp, input)?;
                self.console.print("\n")?;

                self.console.print(&format!("\nStack dump (first {dump} values):\n"))?;
                for i in 0..dump {
                    let value = process.mem.read_u64(frame.buffer + SLOT * i as u64)?;
                    self.console.print(&format!("stack[{i}] = 0x{value:x}\n"))?;
                }
            }
        }
        Ok(())
    }

    fn run_overflow(&mut self, command: &'static OverflowCommand, payload: &[u8]) -> Step<Outcome> {
        let (mut process, frame) = self.boot(payload, &command.routine)?;
        process.stage(command.staging, payload)?;

        match command.style {
            OverflowStyle::Teaching { oracle } => {
                let target = self.image.address_of(oracle).unwrap_or_default();
                self.console.print(&format!("Buffer at: 0x{:x}\n", frame.buffer))?;
                self.console.print(&format!("{oracle} at: 0x{target:x}\n"))?;
            }
            OverflowStyle::Reporting => self.console.print("\n=== Vulnerable Function ===\n")?,
            OverflowStyle::Quiet => {}
        }

        frame.copy_unchecked(&mut process.mem, payload)?;

        match command.style {
            OverflowStyle::Teaching { .. } => {
                let mut line = b"Data copied: ".to_vec();
                line.extend(process.mem.read_bytes(frame.buffer, payload.len())?);
                line.push(b'\n');
                self.console.write(&line)?;
            }
            OverflowStyle::Reporting => {
                let mut line = b"Data copied successfully\nBuffer contents: ".to_vec();
                line.extend(process.mem.read_bytes(frame.buffer, payload.len())?);
                line.push(b'\n');
                self.console.write(&line)?;
            }
            OverflowStyle::Quiet => self.console.print("Data copied\n")?,
        }

        self.unwind(&mut process)
    }

    // ─── Process model ──────────────────────────────────────────

    fn return_address(&self, site: ReturnSite) -> u64 {
        let space = &self.image.space;
        match site {
            ReturnSite::Image(offset) => space.image_base + offset,
            ReturnSite::Libc(offset) => space.libc_base + offset,
        }
    }

    /// Map memory and build the frames down to `command`, which is
    /// returned alongside.
    fn boot(
        &self,
        input: &[u8],
        command: &'static Routine,
    ) -> std::result::Result<(Process, StackFrame), Fault> {
        let space = self.image.space;
        let mut mem = Memory::new();

        let mut text = Region::sparse("image", space.image_base, IMAGE_SIZE, Perms::RX, 0);
        for sym in self.tier.symbols {
            if let Role::Gadget(surface) = sym.role {
                text = text.patch(sym.offset + surface.alternate_entry, &surface.encoding());
            }
        }
        mem.map(text);

        let heap = space.arena() & !0xfff;
        let mut arena = vec![0u8; (space.arena() - heap) as usize];
        arena.extend_from_slice(input);
        arena.push(0);
        mem.map(Region::with_data("heap", heap, &arena, Perms::RW));

        mem.map(
            Region::sparse("libc", space.libc_base, LIBC_SIZE, Perms::RX, 0)
                .patch(LIBC_BIN_SH, b"/bin/sh\0"),
        );

        let stack_perms = if self.tier.profile.stack_executable {
            Perms::RWX
        } else {
            Perms::RW
        };
        mem.map(Region::zeroed("stack", space.stack_base(), STACK_SIZE, stack_perms));

        let argv0 = space.stack_top - ARGV0_DEPTH;
        mem.write_bytes(argv0, format!("./{}\0", self.tier.program).as_bytes())?;
        let argv = space.stack_top - ARGV_DEPTH;
        mem.write_u64(argv, argv0)?;
        mem.write_u64(argv + SLOT, 0)?;

        let mut frames: Vec<(StackFrame, &'static Routine)> = Vec::new();
        for routine in self.tier.frames {
            let frame = self.enter(&mut mem, routine, frames.last().map(|(f, _)| f), argv)?;
            frames.push((frame, routine));
        }
        let top = self.enter(&mut mem, command, frames.last().map(|(f, _)| f), argv)?;
        frames.push((top.clone(), command));
        Ok((Process { mem, frames }, top))
    }

    /// `call` into `routine` from `caller` (from libc when `None`), then
    /// fill its scalar locals.
    fn enter(
        &self,
        mem: &mut Memory,
        routine: &'static Routine,
        caller: Option<&StackFrame>,
        argv: u64,
    ) -> std::result::Result<StackFrame, Fault> {
        let space = &self.image.space;
        let return_address = self.return_address(routine.returns_to);
        let call = match caller {
            Some(caller) => caller.call_site(return_address),
            None => CallSite {
                rsp: space.stack_top - MAIN_CALL_DEPTH,
                rbp: 0,
                return_address,
            },
        };
        let frame = StackFrame::enter(
            mem,
            routine.function,
            routine.layout,
            &self.tier.profile,
            call,
            self.canary,
        )?;
        for (i, local) in routine.locals.iter().enumerate() {
            let value = match local {
                Local::Argc => self.tier.argc,
                Local::Argv => argv,
                Local::Input => space.arena(),
                Local::Buffer => frame.buffer,
            };
            mem.write_u64(frame.local_slot(i), value)?;
        }
        Ok(frame)
    }

    /// Registers left behind by the last output call.
    fn residue(&self) -> [u64; REGISTER_ARGS] {
        let libc = self.image.space.libc_base;
        [
            libc + LIBC_STDOUT + 0x83,
            0,
            libc + LIBC_WRITE + 0x14,
            self.console.last_write() as u64,
            0,
        ]
    }

    /// `printf(fmt)` issued by the frame whose `rsp` is given.
    fn printf(&mut self, mem: &Memory, rsp: u64, fmt: &[u8]) -> Step<()> {
        let args = ArgumentSource {
            registers: self.residue(),
            rsp,
            memory: mem,
        };
        let event = format::leak(fmt, &args)?;
        debug!(
            "leak {:?}: {} bytes",
            String::from_utf8_lossy(&event.format),
            event.emitted.len()
        );
        self.console.write(&event.emitted)?;
        Ok(())
    }

    /// Return from each live frame, innermost first.
    fn unwind(&mut self, process: &mut Process) -> Step<Outcome> {
        while let Some((frame, routine)) = process.frames.pop() {
            if frame.canary_slot.is_some() {
                self.state = self.state.on(Event::CheckCanary)?;
            }
            let (rip, rsp, rbp) = match frame.leave(&process.mem, self.canary)? {
                Epilogue::Return { rip, rsp, rbp } => (rip, rsp, rbp),
                Epilogue::Smashed(mismatch) => {
                    info!("{}: {mismatch}", self.tier.program);
                    self.state = self.state.on(Event::CanaryFailed)?;
                    return Ok(Outcome::Aborted(mismatch));
                }
            };

            let residue = self.residue();
            let mut cpu = Cpu::new(Registers {
                rip,
                rsp,
                rbp,
                rdi: 1,
                rsi: residue[0],
                rdx: residue[1],
            });
            let landing = cpu.transfer(&mut process.mem, &self.image, frame.return_address);
            let printed = cpu.take_output();
            if !printed.is_empty() {
                self.console.write(&printed)?;
            }

            match landing? {
                Landing::Oracle(invocation) => return Ok(self.exploited(invocation)?),
                Landing::Returned if !routine.after_return.is_empty() => {
                    self.console.print(routine.after_return)?;
                }
                Landing::Returned => {}
            }
        }
        self.state = self.state.on(Event::Return)?;
        info!("{}: returned", self.tier.program);
        Ok(Outcome::Returned)
    }

    fn exploited(&mut self, invocation: Invocation) -> Result<Outcome> {
        if let Some(Role::Oracle(oracle)) = self.image.symbol(invocation.oracle).map(|s| s.role) {
            let mut banner = Vec::new();
            oracle.write_banner(&mut banner)?;
            self.console.write(&banner)?;
        }
        self.state = self.state.on(Event::Exploit)?;
        info!(
            "{}: {} reached ({:?})",
            self.tier.program, invocation.oracle, invocation.trigger
        );
        Ok(Outcome::Exploited(invocation))
    }

    fn crash(&mut self, fault: Fault) -> Result<Outcome> {
        info!("{}: {fault}", self.tier.program);
        self.state = self.state.on(Event::Crash)?;
        Ok(Outcome::Crashed(fault))
    }
}
