//! Runtime configuration.
//!
//! Protection profiles are fixed per tier at build time. What can be set at
//! run time is the process seed and where the shell hand-off goes:
//!
//! - `LADDER_SEED`: hex seed for the process RNG (`--seed` overrides it)
//! - `LADDER_SHELL`: shell for the hand-off, default `/bin/sh`, `none` to
//!   exit after the banner instead

use std::env;

use log::debug;
use rand::Rng;

use crate::error::{Result, TargetError};
use crate::shell::ShellHandOff;

pub const SEED_VAR: &str = "LADDER_SEED";
pub const SHELL_VAR: &str = "LADDER_SHELL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub seed: Option<u64>,
    pub shell: ShellHandOff,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            seed: None,
            shell: ShellHandOff::from_setting(None),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let seed = match lookup(SEED_VAR).filter(|s| !s.trim().is_empty()) {
            Some(text) => Some(parse_seed(&text)?),
            None => None,
        };
        let shell = ShellHandOff::from_setting(lookup(SHELL_VAR).as_deref());
        let config = RuntimeConfig { seed, shell };
        debug!("config: {config:?}");
        Ok(config)
    }

    /// A seed given on the command line wins over the environment.
    pub fn override_seed(&mut self, seed: Option<u64>) {
        if seed.is_some() {
            self.seed = seed;
        }
    }

    /// The configured seed, or a fresh random one.
    pub fn resolve_seed(&self) -> u64 {
        self.seed.unwrap_or_else(|| rand::thread_rng().gen())
    }
}

/// Parse a hex seed, with or without a `0x` prefix.
pub fn parse_seed(text: &str) -> Result<u64> {
    let digits = text.trim().trim_start_matches("0x");
    u64::from_str_radix(digits, 16)
        .map_err(|_| TargetError::Config(format!("invalid hex seed '{}'", text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_seed() {
        assert_eq!(parse_seed("0xdeadbeef").unwrap(), 0xdead_beef);
        assert_eq!(parse_seed("42").unwrap(), 0x42);
        assert!(matches!(parse_seed("zz"), Err(TargetError::Config(_))));
    }

    #[test]
    fn test_from_lookup() {
        let config = RuntimeConfig::from_lookup(|key| match key {
            SEED_VAR => Some("0x10".to_string()),
            SHELL_VAR => Some("none".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.seed, Some(0x10));
        assert_eq!(config.shell, ShellHandOff::Disabled);
    }

    #[test]
    fn test_defaults_and_override() {
        let mut config = RuntimeConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.seed, None);
        assert_eq!(config.shell, ShellHandOff::Exec(PathBuf::from("/bin/sh")));
        config.override_seed(None);
        assert_eq!(config.seed, None);
        config.override_seed(Some(7));
        assert_eq!(config.resolve_seed(), 7);
    }

    #[test]
    fn test_bad_seed_in_env() {
        let err = RuntimeConfig::from_lookup(|key| (key == SEED_VAR).then(|| "nope".to_string()));
        assert!(err.is_err());
    }
}
