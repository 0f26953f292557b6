#![doc = include_str!("../README.md")]

#[macro_use]
extern crate tracing;

mod basic;
mod builders;
mod config;
mod context;
mod engine;
mod error;
mod flags;
mod mechanism;
mod principal;
mod secret;

#[cfg(feature = "gssapi")]
pub mod gssapi;
#[cfg(feature = "__test-loopback")]
pub mod loopback;
pub mod token;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

pub use crate::basic::{BasicAuthValidator, InitialCredentials, PasswordVerdict, TicketClient};
pub use crate::builders::{ClientBuilder, ServerBuilder};
pub use crate::config::NegotiateConfig;
pub use crate::context::{AuthContext, ContextState, Role};
pub use crate::error::{krb5, Error, ErrorCategory, ErrorKind, GssStatus, Result};
pub use crate::flags::{ContextFlags, ProtectionLevel};
pub use crate::mechanism::{ContextInfo, CredentialUse, Identity, SecurityMechanism, StepOutput, Unwrapped};
pub use crate::principal::{qualify_principal, KeyMaterial, NameKind, PrincipalResolver, ServiceName};
pub use crate::secret::Secret;

/// Successful outcome of a negotiation step.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AuthStatus {
    /// More tokens must be exchanged.
    Continue,
    /// The context is established.
    Complete,
}

/// Integer form of a step outcome, for callers that speak the
/// `-1 / 0 / 1` convention.
#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive)]
pub enum ResultCode {
    Error = -1,
    Continue = 0,
    Complete = 1,
}

impl ResultCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::from_i32(code)
    }
}

impl From<AuthStatus> for ResultCode {
    fn from(status: AuthStatus) -> Self {
        match status {
            AuthStatus::Continue => ResultCode::Continue,
            AuthStatus::Complete => ResultCode::Complete,
        }
    }
}

impl From<&Result<AuthStatus>> for ResultCode {
    fn from(result: &Result<AuthStatus>) -> Self {
        match result {
            Ok(status) => (*status).into(),
            Err(_) => ResultCode::Error,
        }
    }
}
