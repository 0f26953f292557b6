use std::env;
use std::path::PathBuf;

use serde_derive::{Deserialize, Serialize};

use crate::{Error, ErrorKind, Result};

pub const MAX_ROUNDS_ENV: &str = "NEGOTIATE_MAX_ROUNDS";
pub const CCACHE_DIR_ENV: &str = "NEGOTIATE_CCACHE_DIR";

pub const DEFAULT_MAX_ROUNDS: u32 = 16;
pub const DEFAULT_CCACHE_PREFIX: &str = "krb5cc_negotiate_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiateConfig {
    /// Steps a context may take before the handshake is abandoned.
    pub max_rounds: u32,
    /// Directory for delegated credential caches. Defaults to the system temp dir.
    pub ccache_dir: Option<PathBuf>,
    pub ccache_prefix: String,
}

impl Default for NegotiateConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            ccache_dir: None,
            ccache_prefix: DEFAULT_CCACHE_PREFIX.to_owned(),
        }
    }
}

impl NegotiateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_ccache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ccache_dir = Some(dir.into());
        self
    }

    /// Defaults overridden by `NEGOTIATE_MAX_ROUNDS` and `NEGOTIATE_CCACHE_DIR`.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|name| env::var(name).ok())
    }

    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(max_rounds) = lookup(MAX_ROUNDS_ENV) {
            config.max_rounds = max_rounds.trim().parse().map_err(|err| {
                Error::new(
                    ErrorKind::InvalidParameter,
                    format!("{} is not a number: {:?} ({})", MAX_ROUNDS_ENV, max_rounds, err),
                )
            })?;
        }

        if config.max_rounds == 0 {
            return Err(Error::new(
                ErrorKind::InvalidParameter,
                format!("{} must be at least 1", MAX_ROUNDS_ENV),
            ));
        }

        if let Some(dir) = lookup(CCACHE_DIR_ENV).filter(|dir| !dir.is_empty()) {
            config.ccache_dir = Some(PathBuf::from(dir));
        }

        debug!(?config, "Negotiate configuration loaded from environment");

        Ok(config)
    }

    pub fn ccache_dir(&self) -> PathBuf {
        self.ccache_dir.clone().unwrap_or_else(env::temp_dir)
    }
}
