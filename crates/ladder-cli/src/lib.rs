//! Shared plumbing for the `level1`, `level2` and `level3` binaries.
//!
//! Argument parsing, payload decoding, and the mapping from an
//! [`Outcome`] to what the process does on exit.

use std::ffi::{OsStr, OsString};
use std::io::{self, Read};

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use ladder_runtime::config::parse_seed;
use ladder_runtime::{
    ChallengeTarget, Outcome, PayloadEncoding, Request, RuntimeConfig, Session, TargetError, Tier,
};
use log::{debug, info};

/// Exit status after an emulated fault (128 + SIGSEGV).
pub const SEGFAULT_EXIT: i32 = 139;

/// `level1 [--seed HEX] [--raw] <input>`
#[derive(Parser, Debug)]
#[command(version, about = "Stack ladder tier 1: unprotected stack buffer overflow")]
pub struct DirectArgs {
    /// Process seed (hex, random if not specified)
    #[arg(long)]
    pub seed: Option<String>,
    /// Take the input literally instead of decoding \xNN escapes
    #[arg(long)]
    pub raw: bool,
    /// Input copied into the vulnerable buffer (`-` reads stdin)
    #[arg(allow_hyphen_values = true)]
    pub input: OsString,
}

/// `levelN [--seed HEX] [--raw] <command> [payload]`
#[derive(Parser, Debug)]
#[command(version, about = "Stack ladder target: leak, then overflow")]
pub struct StagedArgs {
    /// Process seed (hex, random if not specified)
    #[arg(long)]
    pub seed: Option<String>,
    /// Take payloads literally instead of decoding \xNN escapes
    #[arg(long)]
    pub raw: bool,
    /// `leak` or `overflow`
    pub command: String,
    /// Format string or overflow payload (`-` reads stdin, prompted if absent)
    #[arg(allow_hyphen_values = true)]
    pub payload: Option<OsString>,
}

/// Install `env_logger` on stderr. `RUST_LOG` overrides the `warn` default.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .init();
}

/// Parse arguments, or print the tier's usage text and exit 1.
pub fn parse_or_usage<T: Parser>(tier: &Tier) -> T {
    match T::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            debug!("{}", TargetError::MalformedInvocation(e.to_string().trim_end().to_string()));
            let prog = std::env::args_os()
                .next()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|| tier.program.to_string());
            if tier.usage_after_header {
                print!("{}", tier.header_text());
            }
            print!("{}", tier.usage_text(&prog));
            std::process::exit(1);
        }
    }
}

pub fn encoding(raw: bool) -> PayloadEncoding {
    if raw {
        PayloadEncoding::Raw
    } else {
        PayloadEncoding::Escaped
    }
}

#[cfg(unix)]
fn os_bytes(arg: &OsStr) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    arg.as_bytes().to_vec()
}

#[cfg(not(unix))]
fn os_bytes(arg: &OsStr) -> Vec<u8> {
    arg.to_string_lossy().into_owned().into_bytes()
}

/// Payload bytes for an argument. `-` reads stdin to the end, undecoded.
pub fn read_payload(arg: &OsStr, encoding: PayloadEncoding) -> anyhow::Result<Vec<u8>> {
    if arg == "-" {
        let mut bytes = Vec::new();
        io::stdin()
            .lock()
            .read_to_end(&mut bytes)
            .context("reading payload from stdin")?;
        return Ok(bytes);
    }
    Ok(encoding.decode(&os_bytes(arg)))
}

/// Environment configuration with the command-line seed applied.
pub fn load_config(seed: Option<&str>) -> anyhow::Result<RuntimeConfig> {
    let mut config = RuntimeConfig::from_env()?;
    config.override_seed(seed.map(parse_seed).transpose()?);
    Ok(config)
}

/// Turn the outcome into the process exit.
///
/// Returns the exit code for outcomes that exit normally. A canary abort
/// raises SIGABRT and a successful shell hand-off never returns.
pub fn conclude(outcome: Outcome, config: &RuntimeConfig) -> anyhow::Result<i32> {
    info!("outcome: {}", outcome.classification());
    match outcome {
        Outcome::Returned => Ok(0),
        Outcome::Exploited(invocation) => {
            if invocation.shell {
                config.shell.hand_off().context("shell hand-off failed")?;
            }
            Ok(0)
        }
        Outcome::Aborted(mismatch) => {
            debug!("{mismatch}");
            eprintln!("*** stack smashing detected ***: terminated");
            std::process::abort()
        }
        Outcome::Crashed(fault) => {
            debug!("{fault}");
            eprintln!("Segmentation fault");
            Ok(SEGFAULT_EXIT)
        }
    }
}

/// Run a tier that takes a single input.
pub fn run_direct(tier: &'static Tier, args: DirectArgs) -> anyhow::Result<i32> {
    let config = load_config(args.seed.as_deref())?;
    let payload = read_payload(&args.input, encoding(args.raw))?;
    let mut target = ChallengeTarget::new(tier, config.resolve_seed(), io::stdout());
    target.launch()?;
    let outcome = target.overflow(&payload)?;
    conclude(outcome, &config)
}

/// Run a tier that takes `<command> [payload]` and then a session.
pub fn run_staged(tier: &'static Tier, args: StagedArgs) -> anyhow::Result<i32> {
    let config = load_config(args.seed.as_deref())?;
    let encoding = encoding(args.raw);
    let payload = args
        .payload
        .as_deref()
        .map(|p| read_payload(p, encoding))
        .transpose()?;
    let target = ChallengeTarget::new(tier, config.resolve_seed(), io::stdout());
    let mut session = Session::new(target, io::stdin().lock(), encoding);
    let outcome = session.run(Request::new(args.command, payload))?;
    conclude(outcome, &config)
}

/// Exit with the result of a run.
pub fn exit_with(result: anyhow::Result<i32>) -> ! {
    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
