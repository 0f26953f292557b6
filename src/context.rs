use std::path::PathBuf;
use std::{fmt, fs, io};

use crate::{
    ClientBuilder, ContextFlags, Error, ErrorKind, NegotiateConfig, Result, SecurityMechanism, ServerBuilder,
    ServiceName,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

/// Lifecycle of an [`AuthContext`]. States only move forward:
/// `Created -> Negotiating -> (Established | Failed)`, and `Destroyed` is
/// reachable from any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextState {
    Created,
    Negotiating,
    Established,
    Failed,
    Destroyed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EstablishedNames {
    pub(crate) user_name: String,
    pub(crate) target_name: Option<String>,
    pub(crate) flags: ContextFlags,
}

/// One side of one authentication exchange.
///
/// The context owns the mechanism context, the delegated credential and the
/// delegated credential cache file. [`AuthContext::destroy`] releases them;
/// after that every operation fails with [`ErrorKind::ContextDestroyed`].
pub struct AuthContext<M: SecurityMechanism> {
    pub(crate) mechanism: M,
    pub(crate) role: Role,
    pub(crate) state: ContextState,
    pub(crate) service: Option<ServiceName>,
    pub(crate) client_principal: Option<String>,
    pub(crate) flags: ContextFlags,
    pub(crate) explicit_credential: bool,
    pub(crate) inner: Option<M::Context>,
    pub(crate) established: Option<EstablishedNames>,
    pub(crate) delegated: Option<M::Credential>,
    pub(crate) ccache: Option<PathBuf>,
    pub(crate) response: Option<Vec<u8>>,
    pub(crate) confidentiality_used: Option<bool>,
    pub(crate) rounds: u32,
    pub(crate) config: NegotiateConfig,
}

pub(crate) struct ContextParts<M: SecurityMechanism> {
    pub(crate) mechanism: M,
    pub(crate) role: Role,
    pub(crate) service: Option<ServiceName>,
    pub(crate) client_principal: Option<String>,
    pub(crate) flags: ContextFlags,
    pub(crate) explicit_credential: bool,
    pub(crate) inner: M::Context,
    pub(crate) config: NegotiateConfig,
}

impl<M: SecurityMechanism> AuthContext<M> {
    /// Starts building a client context for `service` (`type@host` or `type/host[@REALM]`).
    pub fn client(mechanism: M, service: impl Into<String>) -> ClientBuilder<M> {
        ClientBuilder::new(mechanism, service)
    }

    pub fn server(mechanism: M) -> ServerBuilder<M> {
        ServerBuilder::new(mechanism)
    }

    pub(crate) fn from_parts(parts: ContextParts<M>) -> Self {
        Self {
            mechanism: parts.mechanism,
            role: parts.role,
            state: ContextState::Created,
            service: parts.service,
            client_principal: parts.client_principal,
            flags: parts.flags,
            explicit_credential: parts.explicit_credential,
            inner: Some(parts.inner),
            established: None,
            delegated: None,
            ccache: None,
            response: None,
            confidentiality_used: None,
            rounds: 0,
            config: parts.config,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == ContextState::Established
    }

    pub fn service(&self) -> Option<&ServiceName> {
        self.service.as_ref()
    }

    pub fn client_principal(&self) -> Option<&str> {
        self.client_principal.as_deref()
    }

    /// Flags requested at creation.
    pub fn flags(&self) -> ContextFlags {
        self.flags
    }

    pub fn mechanism(&self) -> &M {
        &self.mechanism
    }

    /// Steps taken so far.
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Releases the mechanism context, the delegated credential and the
    /// delegated credential cache file.
    #[instrument(level = "debug", ret, fields(state = ?self.state), skip(self))]
    pub fn destroy(&mut self) -> Result<()> {
        if self.state == ContextState::Destroyed {
            return Err(Error::new(
                ErrorKind::ContextDestroyed,
                "the context has already been destroyed",
            ));
        }

        self.state = ContextState::Destroyed;
        self.inner = None;
        self.delegated = None;
        self.established = None;
        self.response = None;

        self.remove_ccache()
    }

    pub(crate) fn ensure_usable(&self) -> Result<()> {
        if self.state == ContextState::Destroyed {
            Err(Error::new(ErrorKind::ContextDestroyed, "the context has been destroyed"))
        } else {
            Ok(())
        }
    }

    pub(crate) fn ensure_role(&self, role: Role) -> Result<()> {
        self.ensure_usable()?;

        if self.role != role {
            return Err(Error::new(
                ErrorKind::WrongRole,
                format!("{:?} operation called on a {:?} context", role, self.role),
            ));
        }

        Ok(())
    }

    pub(crate) fn ensure_established(&self) -> Result<&EstablishedNames> {
        self.ensure_usable()?;

        match (&self.state, &self.established) {
            (ContextState::Established, Some(established)) => Ok(established),
            (state, _) => Err(Error::new(
                ErrorKind::InvalidState,
                format!("the context is not established: {:?}", state),
            )),
        }
    }

    pub(crate) fn remove_ccache(&mut self) -> Result<()> {
        if let Some(path) = self.ccache.take() {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed delegated credential cache"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    warn!(path = %path.display(), "Delegated credential cache was already removed")
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(())
    }
}

impl<M: SecurityMechanism> Drop for AuthContext<M> {
    fn drop(&mut self) {
        if self.state == ContextState::Destroyed {
            return;
        }

        warn!(role = ?self.role, state = ?self.state, "Authentication context dropped without destroy");

        if let Err(err) = self.remove_ccache() {
            error!(%err, "Failed to remove delegated credential cache");
        }
    }
}

impl<M: SecurityMechanism> fmt::Debug for AuthContext<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("mechanism", &self.mechanism.name())
            .field("role", &self.role)
            .field("state", &self.state)
            .field("service", &self.service)
            .field("client_principal", &self.client_principal)
            .field("flags", &self.flags)
            .field("rounds", &self.rounds)
            .field("ccache", &self.ccache)
            .finish_non_exhaustive()
    }
}
