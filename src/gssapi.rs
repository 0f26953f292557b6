//! Kerberos 5 through the system GSS-API library.
//!
//! Credentials come from the default ticket cache and keytab of the host,
//! as configured by `KRB5CCNAME` and `KRB5_KTNAME`. [`GssapiTicketClient`]
//! validates passwords against the same realm.

use std::path::Path;
use std::time::Duration;

use libgssapi::context::{ClientCtx, CtxFlags, SecurityContext, ServerCtx};
use libgssapi::credential::{Cred, CredUsage};
use libgssapi::name::Name;
use libgssapi::oid::{OidSet, GSS_MECH_KRB5, GSS_NT_HOSTBASED_SERVICE, GSS_NT_KRB5_PRINCIPAL};

use crate::{
    ContextFlags, ContextInfo, CredentialUse, Error, ErrorKind, GssStatus, Identity, NameKind, Result, Secret,
    SecurityMechanism, ServiceName, StepOutput, TicketClient, Unwrapped,
};

impl From<libgssapi::error::Error> for Error {
    fn from(err: libgssapi::error::Error) -> Self {
        Error::gss(err.major.bits(), err.minor, err.to_string())
    }
}

pub struct GssapiCredential {
    cred: Cred,
    usage: CredentialUse,
}

impl GssapiCredential {
    pub fn usage(&self) -> CredentialUse {
        self.usage
    }
}

pub enum GssapiContext {
    Initiator(ClientCtx),
    Acceptor(ServerCtx),
}

#[derive(Debug, Clone, Default)]
pub struct GssapiMechanism {
    time_req: Option<Duration>,
}

impl GssapiMechanism {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requested lifetime of acquired credentials.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.time_req = Some(lifetime);
        self
    }

    fn import_name(&self, identity: Identity<'_>) -> Result<Name> {
        let name = match identity {
            Identity::User(user) => Name::new(user.as_bytes(), Some(&GSS_NT_KRB5_PRINCIPAL))?,
            Identity::Service(service) => service_name(service)?,
        };

        Ok(name.canonicalize(Some(&GSS_MECH_KRB5))?)
    }
}

fn krb5_mechanisms() -> Result<OidSet> {
    let mut mechs = OidSet::new()?;
    mechs.add(&GSS_MECH_KRB5)?;

    Ok(mechs)
}

fn service_name(service: &ServiceName) -> Result<Name> {
    let name_type = match service.kind() {
        NameKind::HostBased => &GSS_NT_HOSTBASED_SERVICE,
        NameKind::Principal => &GSS_NT_KRB5_PRINCIPAL,
    };

    Ok(Name::new(service.as_str().as_bytes(), Some(name_type))?)
}

fn to_ctx_flags(flags: ContextFlags) -> CtxFlags {
    CtxFlags::from_bits_truncate(flags.bits())
}

fn from_ctx_flags(flags: CtxFlags) -> ContextFlags {
    ContextFlags::from_bits_truncate(flags.bits())
}

impl SecurityMechanism for GssapiMechanism {
    type Credential = GssapiCredential;
    type Context = GssapiContext;

    fn name(&self) -> &str {
        "gssapi"
    }

    #[instrument(level = "debug", skip(self))]
    fn acquire_credential(&self, identity: Option<Identity<'_>>, usage: CredentialUse) -> Result<GssapiCredential> {
        let mechs = krb5_mechanisms()?;
        let name = identity.map(|identity| self.import_name(identity)).transpose()?;
        let cred_usage = match usage {
            CredentialUse::Inbound => CredUsage::Accept,
            CredentialUse::Outbound => CredUsage::Initiate,
        };

        let cred = Cred::acquire(name.as_ref(), self.time_req, cred_usage, Some(&mechs))?;

        Ok(GssapiCredential { cred, usage })
    }

    fn new_initiator(
        &self,
        credential: Option<GssapiCredential>,
        target: &ServiceName,
        flags: ContextFlags,
    ) -> Result<GssapiContext> {
        if let Some(credential) = &credential {
            if credential.usage != CredentialUse::Outbound {
                return Err(Error::gss(GssStatus::NO_CRED, 0, "the credential cannot initiate contexts"));
            }
        }

        let target = service_name(target)?.canonicalize(Some(&GSS_MECH_KRB5))?;

        Ok(GssapiContext::Initiator(ClientCtx::new(
            credential.map(|credential| credential.cred),
            target,
            to_ctx_flags(flags),
            Some(&GSS_MECH_KRB5),
        )))
    }

    /// Without a credential the acceptor takes any service key in the keytab.
    fn new_acceptor(&self, credential: Option<GssapiCredential>) -> Result<GssapiContext> {
        let cred = match credential {
            Some(GssapiCredential {
                cred,
                usage: CredentialUse::Inbound,
            }) => Some(cred),
            Some(_) => return Err(Error::gss(GssStatus::NO_CRED, 0, "the credential cannot accept contexts")),
            None => None,
        };

        Ok(GssapiContext::Acceptor(ServerCtx::new(cred)))
    }

    fn step(&self, context: &mut GssapiContext, input: Option<&[u8]>) -> Result<StepOutput> {
        let (token, complete) = match context {
            GssapiContext::Initiator(ctx) => {
                let token = ctx.step(input, None)?;
                (token, ctx.is_complete())
            }
            GssapiContext::Acceptor(ctx) => {
                let input = input.ok_or_else(|| {
                    Error::gss(GssStatus::DEFECTIVE_TOKEN, 0, "the acceptor needs a token from the initiator")
                })?;
                let token = ctx.step(input)?;
                (token, ctx.is_complete())
            }
        };

        Ok(StepOutput {
            complete,
            token: token.map(|buf| buf.to_vec()),
        })
    }

    fn inquire(&self, context: &mut GssapiContext) -> Result<ContextInfo> {
        let (source_name, target_name, flags) = match context {
            GssapiContext::Initiator(ctx) => (ctx.source_name()?, ctx.target_name()?, ctx.flags()?),
            GssapiContext::Acceptor(ctx) => (ctx.source_name()?, ctx.target_name()?, ctx.flags()?),
        };

        Ok(ContextInfo {
            source_name: source_name.to_string(),
            target_name: target_name.to_string(),
            flags: from_ctx_flags(flags),
        })
    }

    fn take_delegated_credential(&self, context: &mut GssapiContext) -> Option<GssapiCredential> {
        match context {
            GssapiContext::Acceptor(ctx) => ctx.take_delegated_cred().map(|cred| GssapiCredential {
                cred,
                usage: CredentialUse::Outbound,
            }),
            GssapiContext::Initiator(_) => None,
        }
    }

    #[instrument(level = "debug", skip(self, credential))]
    fn store_credential(&self, credential: &GssapiCredential, path: &Path) -> Result<()> {
        credential.cred.store(
            &ccache_name(path),
            true,
            false,
            CredUsage::Initiate,
            Some(&GSS_MECH_KRB5),
        )?;

        Ok(())
    }

    fn wrap(&self, context: &mut GssapiContext, confidential: bool, message: &[u8]) -> Result<Vec<u8>> {
        let wrapped = match context {
            GssapiContext::Initiator(ctx) => ctx.wrap(confidential, message)?,
            GssapiContext::Acceptor(ctx) => ctx.wrap(confidential, message)?,
        };

        Ok(wrapped.to_vec())
    }

    /// The bindings drop the per-message `conf_state`, so whether the
    /// message was sealed is reported as unknown.
    fn unwrap(&self, context: &mut GssapiContext, message: &[u8]) -> Result<Unwrapped> {
        let data = match context {
            GssapiContext::Initiator(ctx) => ctx.unwrap(message)?,
            GssapiContext::Acceptor(ctx) => ctx.unwrap(message)?,
        };

        Ok(Unwrapped {
            data: data.to_vec(),
            confidential: None,
        })
    }
}

fn ccache_name(path: &Path) -> String {
    format!("FILE:{}", path.display())
}

/// Checks passwords by logging in to the host's realm and initiating a
/// context to the service with the resulting ticket.
#[derive(Debug, Clone, Default)]
pub struct GssapiTicketClient {
    time_req: Option<Duration>,
}

impl GssapiTicketClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.time_req = Some(lifetime);
        self
    }
}

impl TicketClient for GssapiTicketClient {
    type Credentials = GssapiCredential;

    #[instrument(level = "debug", skip(self, password))]
    fn initial_credentials(&self, principal: &str, password: &Secret<String>) -> Result<GssapiCredential> {
        let mechs = krb5_mechanisms()?;
        let name = Name::new(principal.as_bytes(), Some(&GSS_NT_KRB5_PRINCIPAL))?;

        let cred = Cred::acquire_with_password(
            Some(&name),
            password.expose(),
            self.time_req,
            CredUsage::Initiate,
            Some(&mechs),
        )?;

        Ok(GssapiCredential {
            cred,
            usage: CredentialUse::Outbound,
        })
    }

    /// `service` is a full Kerberos principal, `service/host@REALM`.
    #[instrument(level = "debug", skip(self, credentials))]
    fn service_ticket(&self, credentials: GssapiCredential, service: &str) -> Result<()> {
        let target = Name::new(service.as_bytes(), Some(&GSS_NT_KRB5_PRINCIPAL))?;
        let target = target.canonicalize(Some(&GSS_MECH_KRB5))?;

        let mut ctx = ClientCtx::new(Some(credentials.cred), target, CtxFlags::empty(), Some(&GSS_MECH_KRB5));
        ctx.step(None, None)?;

        Ok(())
    }

    fn change_password(
        &self,
        _principal: &str,
        _old_password: &Secret<String>,
        _new_password: &Secret<String>,
    ) -> Result<()> {
        Err(Error::new(
            ErrorKind::UnsupportedFunction,
            "password changes are not available through the system GSS-API library",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_flags_match_gss_bits() {
        let flags = ContextFlags::MUTUAL_AUTH | ContextFlags::DELEGATE | ContextFlags::CONFIDENTIALITY;
        let ctx_flags = to_ctx_flags(flags);

        assert!(ctx_flags.contains(CtxFlags::GSS_C_MUTUAL_FLAG));
        assert!(ctx_flags.contains(CtxFlags::GSS_C_DELEG_FLAG));
        assert!(ctx_flags.contains(CtxFlags::GSS_C_CONF_FLAG));
        assert_eq!(from_ctx_flags(ctx_flags), flags);
    }

    #[test]
    fn implicit_acceptor_needs_no_keytab_lookup() {
        let mechanism = GssapiMechanism::new();
        let mut context = mechanism.new_acceptor(None).unwrap();

        assert!(matches!(context, GssapiContext::Acceptor(_)));
        assert!(mechanism.take_delegated_credential(&mut context).is_none());
    }

    #[test]
    fn delegated_cache_is_a_file_ccache() {
        let path = Path::new("/tmp/krb5cc_negotiate_0123");

        assert_eq!(ccache_name(path), "FILE:/tmp/krb5cc_negotiate_0123");
    }

    #[test]
    fn password_change_is_unsupported() {
        let err = GssapiTicketClient::new()
            .change_password("alice@EXAMPLE.COM", &Secret::from("old"), &Secret::from("new"))
            .unwrap_err();

        assert_eq!(err.error_type, ErrorKind::UnsupportedFunction);
    }
}
