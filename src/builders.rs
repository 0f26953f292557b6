use crate::context::ContextParts;
use crate::{
    AuthContext, ContextFlags, CredentialUse, Identity, NegotiateConfig, Result, Role, SecurityMechanism, ServiceName,
};

/// Creates a client [`AuthContext`].
pub struct ClientBuilder<M: SecurityMechanism> {
    mechanism: M,
    service: String,
    client_principal: Option<String>,
    flags: ContextFlags,
    credential: Option<M::Credential>,
    config: NegotiateConfig,
}

impl<M: SecurityMechanism> ClientBuilder<M> {
    pub fn new(mechanism: M, service: impl Into<String>) -> Self {
        Self {
            mechanism,
            service: service.into(),
            client_principal: None,
            flags: ContextFlags::default(),
            credential: None,
            config: NegotiateConfig::default(),
        }
    }

    /// Authenticate as `principal` instead of the default ticket cache identity.
    pub fn with_client_principal(mut self, principal: impl Into<String>) -> Self {
        self.client_principal = Some(principal.into());
        self
    }

    pub fn with_flags(mut self, flags: ContextFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Act on behalf of the user who delegated `credential` to this service.
    pub fn with_delegated_credential(mut self, credential: M::Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_config(mut self, config: NegotiateConfig) -> Self {
        self.config = config;
        self
    }

    #[instrument(level = "debug", skip(self), fields(service = %self.service, flags = ?self.flags))]
    pub fn build(self) -> Result<AuthContext<M>> {
        let service = ServiceName::parse(&self.service)?;

        let credential = match (self.credential, &self.client_principal) {
            (Some(credential), _) => Some(credential),
            (None, Some(principal)) => Some(
                self.mechanism
                    .acquire_credential(Some(Identity::User(principal)), CredentialUse::Outbound)?,
            ),
            (None, None) => None,
        };
        let explicit_credential = credential.is_some();

        let inner = self.mechanism.new_initiator(credential, &service, self.flags)?;

        debug!(mechanism = self.mechanism.name(), explicit_credential, "Client context created");

        Ok(AuthContext::from_parts(ContextParts {
            mechanism: self.mechanism,
            role: Role::Client,
            service: Some(service),
            client_principal: self.client_principal,
            flags: self.flags,
            explicit_credential,
            inner,
            config: self.config,
        }))
    }
}

/// Creates a server [`AuthContext`].
pub struct ServerBuilder<M: SecurityMechanism> {
    mechanism: M,
    service: Option<String>,
    config: NegotiateConfig,
}

impl<M: SecurityMechanism> ServerBuilder<M> {
    pub fn new(mechanism: M) -> Self {
        Self {
            mechanism,
            service: None,
            config: NegotiateConfig::default(),
        }
    }

    /// Accept only for `service`. Without it (or with an empty name) the
    /// server accepts for any service in its default key material and
    /// reports which one through `target_name`.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_config(mut self, config: NegotiateConfig) -> Self {
        self.config = config;
        self
    }

    #[instrument(level = "debug", skip(self), fields(service = ?self.service))]
    pub fn build(self) -> Result<AuthContext<M>> {
        let service = match self.service.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Some(ServiceName::parse(name)?),
            _ => None,
        };

        let credential = match &service {
            Some(name) => Some(
                self.mechanism
                    .acquire_credential(Some(Identity::Service(name)), CredentialUse::Inbound)?,
            ),
            None => None,
        };
        let explicit_credential = credential.is_some();

        let inner = self.mechanism.new_acceptor(credential)?;

        debug!(mechanism = self.mechanism.name(), explicit_credential, "Server context created");

        Ok(AuthContext::from_parts(ContextParts {
            mechanism: self.mechanism,
            role: Role::Server,
            service,
            client_principal: None,
            flags: ContextFlags::empty(),
            explicit_credential,
            inner,
            config: self.config,
        }))
    }
}
