use std::path::Path;

use crate::{ContextFlags, Result, ServiceName};

/// Allowed credential usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialUse {
    /// Accept contexts (server).
    Inbound,
    /// Initiate contexts (client).
    Outbound,
}

/// Identity a credential is acquired for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity<'a> {
    User(&'a str),
    Service(&'a ServiceName),
}

/// Result of advancing a mechanism context by one leg.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StepOutput {
    pub complete: bool,
    pub token: Option<Vec<u8>>,
}

impl StepOutput {
    pub fn continue_with(token: Vec<u8>) -> Self {
        Self {
            complete: false,
            token: Some(token),
        }
    }

    pub fn complete(token: Option<Vec<u8>>) -> Self {
        Self { complete: true, token }
    }
}

/// Names and flags of an established mechanism context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextInfo {
    /// The initiator's principal.
    pub source_name: String,
    /// The acceptor's principal.
    pub target_name: String,
    pub flags: ContextFlags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unwrapped {
    pub data: Vec<u8>,
    /// Whether the message was sealed, if the mechanism reports it.
    pub confidential: Option<bool>,
}

/// The security library an [`AuthContext`](crate::AuthContext) drives.
///
/// Implementations translate their native failures into [`Error`](crate::Error)
/// values carrying a [`GssStatus`](crate::GssStatus).
pub trait SecurityMechanism {
    type Credential;
    type Context;

    fn name(&self) -> &str;

    /// `None` selects the default credential: the ticket cache for
    /// [`CredentialUse::Outbound`], the default keytab for [`CredentialUse::Inbound`].
    fn acquire_credential(&self, identity: Option<Identity<'_>>, usage: CredentialUse) -> Result<Self::Credential>;

    fn new_initiator(
        &self,
        credential: Option<Self::Credential>,
        target: &ServiceName,
        flags: ContextFlags,
    ) -> Result<Self::Context>;

    /// Without a credential the acceptor accepts any service it holds keys for.
    fn new_acceptor(&self, credential: Option<Self::Credential>) -> Result<Self::Context>;

    /// Consumes one inbound token. The initiator's first call has no input.
    fn step(&self, context: &mut Self::Context, input: Option<&[u8]>) -> Result<StepOutput>;

    fn inquire(&self, context: &mut Self::Context) -> Result<ContextInfo>;

    /// Removes the credential the initiator delegated, if any.
    fn take_delegated_credential(&self, context: &mut Self::Context) -> Option<Self::Credential>;

    /// Writes `credential` into an already created cache file at `path`.
    fn store_credential(&self, credential: &Self::Credential, path: &Path) -> Result<()>;

    fn wrap(&self, context: &mut Self::Context, confidential: bool, message: &[u8]) -> Result<Vec<u8>>;

    fn unwrap(&self, context: &mut Self::Context, message: &[u8]) -> Result<Unwrapped>;
}
