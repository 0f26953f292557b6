use std::fs::{self, OpenOptions};

use uuid::Uuid;

use crate::context::EstablishedNames;
use crate::{
    token, AuthContext, AuthStatus, ContextFlags, ContextState, Error, ErrorKind, ProtectionLevel, Result, Role,
    SecurityMechanism, StepOutput, Unwrapped,
};

impl<M: SecurityMechanism> AuthContext<M> {
    /// Feeds the server's base64 token to a client context. The first call
    /// passes an empty string.
    #[instrument(level = "debug", ret, fields(state = ?self.state), skip(self, challenge))]
    pub fn client_step(&mut self, challenge: &str) -> Result<AuthStatus> {
        self.ensure_role(Role::Client)?;
        self.ensure_can_step()?;

        let input = token::decode(challenge).map_err(|err| self.fail(err))?;

        self.advance(input)
    }

    /// Feeds the client's base64 token to a server context. The token must not be empty.
    #[instrument(level = "debug", ret, fields(state = ?self.state), skip(self, challenge))]
    pub fn server_step(&mut self, challenge: &str) -> Result<AuthStatus> {
        self.ensure_role(Role::Server)?;
        self.ensure_can_step()?;

        let input = token::decode(challenge).map_err(|err| self.fail(err))?;

        self.advance(input)
    }

    /// [`client_step`](Self::client_step) or [`server_step`](Self::server_step), by role.
    pub fn step(&mut self, challenge: &str) -> Result<AuthStatus> {
        match self.role {
            Role::Client => self.client_step(challenge),
            Role::Server => self.server_step(challenge),
        }
    }

    /// Binary form of [`step`](Self::step).
    #[instrument(level = "debug", ret, fields(state = ?self.state, role = ?self.role), skip(self, input))]
    pub fn step_raw(&mut self, input: &[u8]) -> Result<AuthStatus> {
        self.ensure_usable()?;
        self.ensure_can_step()?;

        self.advance(input.to_vec())
    }

    /// Takes the pending outbound token as base64.
    pub fn response(&mut self) -> Result<String> {
        self.response_raw().map(|token| token::encode(&token))
    }

    pub fn response_raw(&mut self) -> Result<Vec<u8>> {
        self.ensure_usable()?;

        self.response
            .take()
            .ok_or_else(|| Error::new(ErrorKind::NoPendingToken, "no response token is pending"))
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    /// The authenticated client principal (`user@REALM`). On a client context
    /// this is the local identity that was authenticated.
    pub fn user_name(&self) -> Result<&str> {
        Ok(&self.ensure_established()?.user_name)
    }

    /// The service identity the server accepted for. `None` when the server
    /// was created for an explicit service, and always on a client.
    pub fn target_name(&self) -> Result<Option<&str>> {
        Ok(self.ensure_established()?.target_name.as_deref())
    }

    /// Flags the mechanism actually provides.
    pub fn negotiated_flags(&self) -> Result<ContextFlags> {
        Ok(self.ensure_established()?.flags)
    }

    pub fn has_delegated_credential(&self) -> Result<bool> {
        self.ensure_established()?;

        Ok(self.delegated.is_some())
    }

    /// Writes the delegated credential to a new uniquely named cache file.
    ///
    /// A second call replaces the cache written by the first one.
    #[instrument(level = "debug", ret, fields(state = ?self.state), skip(self))]
    pub fn store_delegated_credential(&mut self) -> Result<()> {
        self.ensure_established()?;

        if self.delegated.is_none() {
            return Err(Error::new(
                ErrorKind::NoDelegatedCredential,
                "the client did not delegate a credential",
            ));
        }

        self.remove_ccache()?;

        let dir = self.config.ccache_dir();
        fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{}{}", self.config.ccache_prefix, Uuid::new_v4().simple()));

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;

            options.mode(0o600);
        }
        options.open(&path)?;

        let stored = match &self.delegated {
            Some(credential) => self.mechanism.store_credential(credential, &path),
            None => Err(Error::new(ErrorKind::InternalError, "delegated credential disappeared")),
        };

        if let Err(err) = stored {
            if let Err(remove_err) = fs::remove_file(&path) {
                warn!(path = %path.display(), %remove_err, "Failed to remove incomplete credential cache");
            }

            return Err(err);
        }

        debug!(path = %path.display(), "Stored delegated credential");

        self.ccache = Some(path);

        Ok(())
    }

    /// Name of the cache written by [`store_delegated_credential`](Self::store_delegated_credential),
    /// in `FILE:<path>` form.
    pub fn cache_name(&self) -> Result<String> {
        self.ensure_established()?;

        self.ccache
            .as_ref()
            .map(|path| format!("FILE:{}", path.display()))
            .ok_or_else(|| Error::new(ErrorKind::InvalidState, "no delegated credential has been stored"))
    }

    /// Moves the delegated credential out, e.g. to build a client context
    /// that acts on the user's behalf.
    pub fn take_delegated_credential(&mut self) -> Result<M::Credential> {
        self.ensure_established()?;

        self.delegated.take().ok_or_else(|| {
            Error::new(
                ErrorKind::NoDelegatedCredential,
                "the client did not delegate a credential",
            )
        })
    }

    /// Protects base64 `data`; the protected token is retrieved with [`response`](Self::response).
    #[instrument(level = "debug", ret, fields(state = ?self.state), skip(self, data))]
    pub fn wrap(&mut self, data: &str, level: ProtectionLevel) -> Result<()> {
        self.ensure_established()?;

        let data = token::decode(data)?;
        let wrapped = self.wrap_raw(&data, level)?;

        self.response = Some(wrapped);

        Ok(())
    }

    pub fn wrap_raw(&mut self, data: &[u8], level: ProtectionLevel) -> Result<Vec<u8>> {
        self.ensure_established()?;

        let inner = self.inner.as_mut().ok_or_else(missing_mechanism_context)?;

        self.mechanism.wrap(inner, level.is_confidential(), data)
    }

    /// Removes protection from a base64 token; the payload is retrieved with [`response`](Self::response).
    #[instrument(level = "debug", ret, fields(state = ?self.state), skip(self, message))]
    pub fn unwrap(&mut self, message: &str) -> Result<()> {
        self.ensure_established()?;

        let message = token::decode(message)?;
        let data = self.unwrap_raw(&message)?;

        self.response = Some(data);

        Ok(())
    }

    pub fn unwrap_raw(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        self.ensure_established()?;

        if message.is_empty() {
            return Err(Error::new(ErrorKind::InvalidToken, "protected message is empty"));
        }

        let inner = self.inner.as_mut().ok_or_else(missing_mechanism_context)?;
        let Unwrapped { data, confidential } = self.mechanism.unwrap(inner, message)?;

        trace!(len = data.len(), ?confidential, "Message unwrapped");

        self.confidentiality_used = confidential;

        Ok(data)
    }

    /// Whether the last successfully unwrapped message was sealed. `None` when
    /// nothing was unwrapped yet or the mechanism cannot tell.
    pub fn confidentiality_used(&self) -> Option<bool> {
        self.confidentiality_used
    }

    fn ensure_can_step(&self) -> Result<()> {
        match self.state {
            ContextState::Created | ContextState::Negotiating => Ok(()),
            ContextState::Destroyed => Err(Error::new(ErrorKind::ContextDestroyed, "the context has been destroyed")),
            state => Err(Error::new(
                ErrorKind::InvalidState,
                format!("no further steps are allowed on a context in the {:?} state", state),
            )),
        }
    }

    fn advance(&mut self, input: Vec<u8>) -> Result<AuthStatus> {
        if input.is_empty() && self.role == Role::Server {
            return Err(self.fail(Error::new(
                ErrorKind::InvalidToken,
                "No challenge parameter in request from client",
            )));
        }

        self.response = None;
        self.rounds += 1;

        if self.rounds > self.config.max_rounds {
            return Err(self.fail(Error::new(
                ErrorKind::OutOfSequence,
                format!("negotiation did not complete within {} rounds", self.config.max_rounds),
            )));
        }

        self.state = ContextState::Negotiating;

        trace!(round = self.rounds, input_len = input.len(), "Stepping mechanism");

        let input = if input.is_empty() { None } else { Some(input.as_slice()) };
        let output = match self.inner.as_mut() {
            Some(inner) => self.mechanism.step(inner, input),
            None => Err(missing_mechanism_context()),
        };

        match output {
            Ok(StepOutput { complete, token }) => {
                trace!(complete, token_len = token.as_ref().map(Vec::len), "Mechanism step finished");

                self.response = token;

                if complete {
                    self.establish()?;

                    Ok(AuthStatus::Complete)
                } else {
                    Ok(AuthStatus::Continue)
                }
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn establish(&mut self) -> Result<()> {
        let info = match self.inner.as_mut() {
            Some(inner) => self.mechanism.inquire(inner),
            None => Err(missing_mechanism_context()),
        };
        let info = info.map_err(|err| self.fail(err))?;

        let target_name = match self.role {
            Role::Server if !self.explicit_credential => Some(info.target_name),
            _ => None,
        };

        if self.role == Role::Server && info.flags.contains(ContextFlags::DELEGATE) {
            self.delegated = match self.inner.as_mut() {
                Some(inner) => self.mechanism.take_delegated_credential(inner),
                None => None,
            };
        }

        debug!(
            user_name = %info.source_name,
            ?target_name,
            flags = ?info.flags,
            delegated = self.delegated.is_some(),
            "Context established"
        );

        self.established = Some(EstablishedNames {
            user_name: info.source_name,
            target_name,
            flags: info.flags,
        });
        self.state = ContextState::Established;

        Ok(())
    }

    /// Moves the context to `Failed`. Callers run the role and state checks first.
    fn fail(&mut self, err: Error) -> Error {
        error!(role = ?self.role, error = %err, "Negotiation failed");

        self.state = ContextState::Failed;
        self.response = None;

        err
    }
}

fn missing_mechanism_context() -> Error {
    Error::new(ErrorKind::InternalError, "the mechanism context is missing")
}
