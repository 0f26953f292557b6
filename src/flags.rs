use std::fmt;

use bitflags::bitflags;

use crate::{Error, ErrorKind};

bitflags! {
    /// Negotiation options requested by a context and reported back once it
    /// is established. Bit values match the GSSAPI `GSS_C_*_FLAG` constants so
    /// they pass to a native mechanism unchanged.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ContextFlags: u32 {
        const DELEGATE = 1;
        const MUTUAL_AUTH = 2;
        const REPLAY_DETECT = 4;
        const SEQUENCE_DETECT = 8;
        const CONFIDENTIALITY = 16;
        const INTEGRITY = 32;
        const ANONYMOUS = 64;
        const PROTECTION_READY = 128;
        /// Protocol transition: the context may be exported to another process.
        const TRANSFER = 256;
    }
}

impl Default for ContextFlags {
    fn default() -> Self {
        ContextFlags::MUTUAL_AUTH | ContextFlags::SEQUENCE_DETECT
    }
}

/// Protection applied by `wrap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtectionLevel {
    /// Sign only.
    #[default]
    Integrity = 0,
    /// Sign and seal.
    Confidentiality = 1,
}

impl ProtectionLevel {
    pub fn is_confidential(self) -> bool {
        self == ProtectionLevel::Confidentiality
    }
}

impl TryFrom<u8> for ProtectionLevel {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ProtectionLevel::Integrity),
            1 => Ok(ProtectionLevel::Confidentiality),
            _ => Err(Error::new(
                ErrorKind::InvalidParameter,
                format!("invalid protection level: {}", value),
            )),
        }
    }
}

impl fmt::Display for ProtectionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtectionLevel::Integrity => write!(f, "integrity"),
            ProtectionLevel::Confidentiality => write!(f, "confidentiality"),
        }
    }
}
