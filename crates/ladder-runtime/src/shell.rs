//! Shell hand-off for oracles that spawn a shell.
//!
//! On Unix the target process image is replaced with the shell (`exec`),
//! so nothing after a successful hand-off runs.

use std::io;
use std::path::PathBuf;
use std::process::Command;

use log::info;

pub const DEFAULT_SHELL: &str = "/bin/sh";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellHandOff {
    /// Replace the process with this shell.
    Exec(PathBuf),
    /// Stop after the banner.
    Disabled,
}

impl ShellHandOff {
    /// Interpret a `LADDER_SHELL` value.
    pub fn from_setting(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("none") => ShellHandOff::Disabled,
            Some(path) if !path.is_empty() => ShellHandOff::Exec(PathBuf::from(path)),
            _ => ShellHandOff::Exec(PathBuf::from(DEFAULT_SHELL)),
        }
    }

    /// Hand the process over. Returns only when the hand-off is disabled
    /// or the shell could not be started.
    pub fn hand_off(&self) -> io::Result<()> {
        let path = match self {
            ShellHandOff::Disabled => return Ok(()),
            ShellHandOff::Exec(path) => path,
        };
        info!("handing off to {}", path.display());
        exec(Command::new(path))
    }
}

#[cfg(unix)]
fn exec(mut command: Command) -> io::Result<()> {
    use std::os::unix::process::CommandExt;
    Err(command.exec())
}

#[cfg(not(unix))]
fn exec(mut command: Command) -> io::Result<()> {
    let status = command.status()?;
    std::process::exit(status.code().unwrap_or(0));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setting() {
        assert_eq!(ShellHandOff::from_setting(Some("none")), ShellHandOff::Disabled);
        assert_eq!(
            ShellHandOff::from_setting(Some("/bin/bash")),
            ShellHandOff::Exec(PathBuf::from("/bin/bash"))
        );
        assert_eq!(
            ShellHandOff::from_setting(Some("")),
            ShellHandOff::Exec(PathBuf::from(DEFAULT_SHELL))
        );
    }

    #[test]
    fn test_disabled_returns() {
        assert!(ShellHandOff::Disabled.hand_off().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_shell_reports_error() {
        let err = ShellHandOff::Exec(PathBuf::from("/nonexistent/ladder-shell")).hand_off();
        assert!(err.is_err());
    }
}
