use time::OffsetDateTime;

use crate::principal::qualify_principal;
use crate::{Error, ErrorCategory, ErrorKind, Result, Secret, ServiceName};

/// Initial (ticket-granting) credentials obtained with a password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialCredentials {
    pub principal: String,
    pub expires_at: OffsetDateTime,
}

/// Realm service used for password-based flows.
pub trait TicketClient {
    /// Whatever the realm hands back for a successful password login.
    type Credentials;

    fn initial_credentials(&self, principal: &str, password: &Secret<String>) -> Result<Self::Credentials>;

    /// Fails with [`ErrorKind::TargetUnknown`] when the realm has no such service.
    fn service_ticket(&self, credentials: Self::Credentials, service: &str) -> Result<()>;

    fn change_password(&self, principal: &str, old_password: &Secret<String>, new_password: &Secret<String>)
        -> Result<()>;
}

impl<T: TicketClient + ?Sized> TicketClient for &T {
    type Credentials = T::Credentials;

    fn initial_credentials(&self, principal: &str, password: &Secret<String>) -> Result<T::Credentials> {
        (**self).initial_credentials(principal, password)
    }

    fn service_ticket(&self, credentials: T::Credentials, service: &str) -> Result<()> {
        (**self).service_ticket(credentials, service)
    }

    fn change_password(
        &self,
        principal: &str,
        old_password: &Secret<String>,
        new_password: &Secret<String>,
    ) -> Result<()> {
        (**self).change_password(principal, old_password, new_password)
    }
}

/// Outcome of a password check that reached the realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PasswordVerdict {
    Accepted,
    Rejected,
    PasswordExpired,
}

impl PasswordVerdict {
    /// Sorts a realm failure into a verdict, or hands it back when it is not one.
    fn from_error(err: Error) -> Result<Self> {
        match err.error_type {
            ErrorKind::PasswordExpired => Ok(PasswordVerdict::PasswordExpired),
            _ if err.category() == ErrorCategory::BasicAuth => Ok(PasswordVerdict::Rejected),
            _ => Err(err),
        }
    }
}

/// Validates user passwords by acquiring tickets from the realm.
#[derive(Debug, Clone)]
pub struct BasicAuthValidator<T> {
    client: T,
}

impl<T: TicketClient> BasicAuthValidator<T> {
    pub fn new(client: T) -> Self {
        Self { client }
    }

    /// Obtains initial credentials for `user` (qualified with `default_realm`
    /// when it has no realm) and then a ticket for `service`.
    ///
    /// `Err` means no verdict could be reached: the realm was unreachable or
    /// the service is unknown.
    #[instrument(level = "debug", ret, skip(self, password))]
    pub fn verify_password(
        &self,
        user: &str,
        password: impl Into<Secret<String>>,
        service: &str,
        default_realm: &str,
    ) -> Result<PasswordVerdict> {
        let password = password.into();

        if user.is_empty() {
            return Err(Error::new(ErrorKind::InvalidParameter, "user name is empty"));
        }

        let service = ServiceName::parse(service)?.to_principal(default_realm);
        let principal = qualify_principal(user, default_realm);

        let credentials = match self.client.initial_credentials(&principal, &password) {
            Ok(credentials) => credentials,
            Err(err) => {
                debug!(%principal, error = %err, "Initial credentials were not issued");

                return PasswordVerdict::from_error(err);
            }
        };

        drop(password);

        match self.client.service_ticket(credentials, &service) {
            Ok(()) => Ok(PasswordVerdict::Accepted),
            Err(err) => {
                debug!(%principal, %service, error = %err, "Service ticket was not issued");

                PasswordVerdict::from_error(err)
            }
        }
    }

    /// `true` only when the password is accepted and a ticket for `service` is issued.
    pub fn check_password(
        &self,
        user: &str,
        password: impl Into<Secret<String>>,
        service: &str,
        default_realm: &str,
    ) -> Result<bool> {
        Ok(self.verify_password(user, password, service, default_realm)? == PasswordVerdict::Accepted)
    }

    /// Changes the password of `user` through the realm's password service.
    #[instrument(level = "debug", ret, skip(self, old_password, new_password))]
    pub fn change_password(
        &self,
        user: &str,
        old_password: impl Into<Secret<String>>,
        new_password: impl Into<Secret<String>>,
    ) -> Result<bool> {
        let old_password = old_password.into();
        let new_password = new_password.into();

        if user.is_empty() {
            return Err(Error::new(ErrorKind::InvalidParameter, "user name is empty"));
        }

        if new_password.is_empty() {
            return Err(Error::new(ErrorKind::InvalidParameter, "new password is empty"));
        }

        match self.client.change_password(user, &old_password, &new_password) {
            Ok(()) => Ok(true),
            Err(err) => {
                debug!(user, error = %err, "Password change refused");

                PasswordVerdict::from_error(err).map(|_| false)
            }
        }
    }
}
