//! Command session for the staged tiers.
//!
//! The first request comes from the command line. A leak leaves the
//! process waiting for input, so further `<command> [payload]` lines are
//! read after a `> ` prompt until an overflow ends the process or the input
//! closes. A command without a payload prompts for it on its own line.

use std::io::{BufRead, Write};
use std::str::FromStr;

use log::debug;

use crate::error::{Result, TargetError};
use crate::input::{read_line, PayloadEncoding};
use crate::outcome::Outcome;
use crate::target::ChallengeTarget;

pub const SESSION_PROMPT: &str = "> ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Leak,
    Overflow,
}

impl Command {
    /// Prompt shown when the payload is read from input.
    pub fn prompt(self) -> &'static str {
        match self {
            Command::Leak => "Enter format string for additional leak: ",
            Command::Overflow => "Enter payload: ",
        }
    }
}

impl FromStr for Command {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "leak" => Ok(Command::Leak),
            "overflow" => Ok(Command::Overflow),
            other => Err(TargetError::UnrecognizedCommand(other.to_string())),
        }
    }
}

/// A command token with its payload, already decoded to bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: String,
    pub payload: Option<Vec<u8>>,
}

impl Request {
    pub fn new(command: impl Into<String>, payload: Option<Vec<u8>>) -> Self {
        Request {
            command: command.into(),
            payload,
        }
    }

    /// Split `<command> [payload]` at the first space. `None` for a blank
    /// line.
    pub fn parse_line(line: &[u8], encoding: PayloadEncoding) -> Option<Request> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let (token, payload) = match line.iter().position(|&b| b == b' ') {
            Some(at) => (&line[..at], Some(encoding.decode(&line[at + 1..]))),
            None => (line, None),
        };
        let token = String::from_utf8_lossy(token).trim().to_string();
        if token.is_empty() {
            return None;
        }
        Some(Request::new(token, payload))
    }
}

pub struct Session<W: Write, R: BufRead> {
    target: ChallengeTarget<W>,
    input: R,
    encoding: PayloadEncoding,
}

impl<W: Write, R: BufRead> Session<W, R> {
    pub fn new(target: ChallengeTarget<W>, input: R, encoding: PayloadEncoding) -> Self {
        Session {
            target,
            input,
            encoding,
        }
    }

    pub fn target(&self) -> &ChallengeTarget<W> {
        &self.target
    }

    pub fn into_target(self) -> ChallengeTarget<W> {
        self.target
    }

    /// Launch the target and serve requests until it reaches a terminal
    /// outcome.
    pub fn run(&mut self, first: Request) -> Result<Outcome> {
        self.target.launch()?;
        let mut pending = Some(first);
        loop {
            let request = match pending.take() {
                Some(request) => request,
                None => match self.next_request()? {
                    Some(request) => request,
                    None => return self.target.finish(),
                },
            };
            debug!("request {:?}", request.command);

            let command = match request.command.parse::<Command>() {
                Ok(Command::Leak) if !self.target.tier().is_staged() => None,
                Ok(command) => Some(command),
                Err(_) => None,
            };
            let Some(command) = command else {
                self.target.unrecognized(&request.command)?;
                continue;
            };

            let payload = match request.payload {
                Some(payload) => payload,
                None => match self.prompt_line(command.prompt())? {
                    Some(line) => self.encoding.decode(&line),
                    None => return self.target.finish(),
                },
            };

            match command {
                Command::Leak => {
                    if let Some(outcome) = self.target.leak(&payload)? {
                        return Ok(outcome);
                    }
                }
                Command::Overflow => return self.target.overflow(&payload),
            }
        }
    }

    /// Next non-blank command line, `None` when input closes.
    fn next_request(&mut self) -> Result<Option<Request>> {
        loop {
            let Some(line) = self.prompt_line(SESSION_PROMPT)? else {
                return Ok(None);
            };
            if let Some(request) = Request::parse_line(&line, self.encoding) {
                return Ok(Some(request));
            }
        }
    }

    fn prompt_line(&mut self, prompt: &str) -> Result<Option<Vec<u8>>> {
        self.target.prompt(prompt)?;
        Ok(read_line(&mut self.input)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::{TIER2, TIER3};

    fn session<'a>(tier: &'static crate::tier::Tier, input: &'a [u8]) -> Session<Vec<u8>, &'a [u8]> {
        Session::new(ChallengeTarget::new(tier, 0x1234, Vec::new()), input, PayloadEncoding::Escaped)
    }

    fn output(s: Session<Vec<u8>, &[u8]>) -> String {
        String::from_utf8_lossy(&s.into_target().into_output()).into_owned()
    }

    #[test]
    fn test_parse_command() {
        assert_eq!("leak".parse::<Command>().unwrap(), Command::Leak);
        assert!(matches!("shell".parse::<Command>(), Err(TargetError::UnrecognizedCommand(_))));
    }

    #[test]
    fn test_parse_line() {
        let r = Request::parse_line(b"overflow AA\\x41 B", PayloadEncoding::Escaped).unwrap();
        assert_eq!(r.command, "overflow");
        assert_eq!(r.payload, Some(b"AAA B".to_vec()));
        assert_eq!(Request::parse_line(b"leak", PayloadEncoding::Raw).unwrap().payload, None);
        assert!(Request::parse_line(b"   ", PayloadEncoding::Raw).is_none());
        assert!(Request::parse_line(b"", PayloadEncoding::Raw).is_none());
    }

    #[test]
    fn test_leak_then_input_closes() {
        let mut s = session(&TIER3, b"");
        let outcome = s.run(Request::new("leak", Some(b"%p".to_vec()))).unwrap();
        assert_eq!(outcome, Outcome::Returned);
        let out = output(s);
        assert!(out.contains("Custom format: 0x"));
        assert!(out.ends_with("> \nProgram exiting normally.\n"));
    }

    #[test]
    fn test_prompts_for_missing_payload() {
        let mut s = session(&TIER2, b"%lx.%lx\n");
        s.run(Request::new("leak", None)).unwrap();
        let out = output(s);
        assert!(out.contains("Enter format string for additional leak: Debug: "));
    }

    #[test]
    fn test_prompted_payload_drops_crlf() {
        let mut s = session(&TIER3, b"hi\r\n");
        assert_eq!(s.run(Request::new("overflow", None)).unwrap(), Outcome::Returned);
        let out = output(s);
        assert!(out.contains("Enter payload: \n=== Vulnerable Function ===\n"));
        assert!(out.contains("Buffer contents: hi\n"));
    }

    #[test]
    fn test_unknown_command_keeps_waiting() {
        let mut s = session(&TIER3, b"\nbogus\noverflow hi\n");
        let outcome = s.run(Request::new("nope", None)).unwrap();
        assert_eq!(outcome, Outcome::Returned);
        let out = output(s);
        assert_eq!(out.matches("Unknown command\n").count(), 2);
        assert!(out.contains("Buffer contents: hi\n"));
    }

    #[test]
    fn test_second_command_uses_same_canary() {
        let mut s = session(&TIER2, b"leak %7$lx\n");
        s.run(Request::new("leak", Some(b"%7$lx".to_vec()))).unwrap();
        let canary = s.target().canary();
        let out = output(s);
        assert_eq!(out.matches(&format!("Debug: {canary:x}\n")).count(), 2);
    }
}
