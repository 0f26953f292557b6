//! An in-process realm that issues and checks its own tokens.
//!
//! [`LoopbackRealm`] stands in for a KDC, a keytab and a ticket cache at
//! once: it implements [`TicketClient`], [`KeyMaterial`] and, through
//! [`LoopbackMechanism`], [`SecurityMechanism`](crate::SecurityMechanism).
//! Tokens are authenticated with HMAC-SHA256 so that tampering, replays,
//! clock skew and target mismatches behave like they do against a real
//! Kerberos deployment. It is a test double and provides no real security.

mod crypto;
mod mechanism;
mod messages;

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use time::{Duration, OffsetDateTime};

use self::crypto::{KEY_LEN, NONCE_LEN};
use self::messages::CredentialCache;
pub use self::mechanism::{LoopbackContext, LoopbackCredential, LoopbackMechanism};
use crate::principal::qualify_principal;
use crate::{krb5, Error, GssStatus, InitialCredentials, KeyMaterial, Result, Secret, TicketClient};

/// Largest accepted difference between the initiator's and acceptor's clocks.
pub const MAX_CLOCK_SKEW: i64 = 300;

pub const TICKET_LIFETIME: Duration = Duration::hours(10);

struct UserEntry {
    password: Secret<String>,
    password_expired: bool,
}

#[derive(Default)]
struct RealmState {
    users: HashMap<String, UserEntry>,
    services: Vec<String>,
    default_principal: Option<String>,
    offline: bool,
    extra_legs: u32,
    clock_offset: i64,
    replay_cache: HashSet<[u8; NONCE_LEN]>,
}

/// Shared realm handle; clones refer to the same realm.
#[derive(Clone)]
pub struct LoopbackRealm {
    name: Arc<str>,
    secret: Arc<Secret<[u8; KEY_LEN]>>,
    state: Arc<RwLock<RealmState>>,
}

impl LoopbackRealm {
    /// Realm names are upper-cased.
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name.to_ascii_uppercase()),
            secret: Arc::new(Secret::new(crypto::random_bytes())),
            state: Arc::new(RwLock::new(RealmState::default())),
        }
    }

    pub fn with_user(self, user: &str, password: &str) -> Self {
        let principal = self.qualify(user);

        self.write_state().users.insert(
            principal,
            UserEntry {
                password: Secret::from(password),
                password_expired: false,
            },
        );

        self
    }

    /// Registers a service principal (`type/host`) and places its key in the keytab.
    pub fn with_service(self, service: &str) -> Self {
        let principal = self.qualify(service);

        {
            let mut state = self.write_state();
            if !state.services.contains(&principal) {
                state.services.push(principal);
            }
        }

        self
    }

    /// The identity found in the "ticket cache" when no client principal is given.
    pub fn with_default_principal(self, user: &str) -> Self {
        let principal = self.qualify(user);
        self.write_state().default_principal = Some(principal);

        self
    }

    /// Acceptors demand this many extra legs before completing a mutually
    /// authenticated context.
    pub fn with_extra_legs(self, legs: u32) -> Self {
        self.write_state().extra_legs = legs;

        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mechanism(&self) -> LoopbackMechanism {
        LoopbackMechanism::new(self.clone())
    }

    pub fn set_offline(&self, offline: bool) {
        self.write_state().offline = offline;
    }

    pub fn expire_password(&self, user: &str) {
        let principal = self.qualify(user);

        if let Some(entry) = self.write_state().users.get_mut(&principal) {
            entry.password_expired = true;
        }
    }

    /// Shifts the clock initiators stamp their requests with.
    pub fn set_clock_offset(&self, seconds: i64) {
        self.write_state().clock_offset = seconds;
    }

    /// Reads the principal stored in a delegated credential cache.
    pub fn read_credential_cache(&self, path: impl AsRef<Path>) -> Result<LoopbackCredential> {
        let principal = CredentialCache::read(File::open(path)?)?;

        Ok(LoopbackCredential::delegated(principal))
    }

    pub fn qualify(&self, principal: &str) -> String {
        qualify_principal(principal, &self.name)
    }

    fn service_key(&self, principal: &str) -> Result<[u8; KEY_LEN]> {
        crypto::derive_key(self.secret.expose(), "service-key", principal.as_bytes())
    }

    fn read_state(&self) -> RwLockReadGuard<'_, RealmState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, RealmState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.read_state().offline {
            return Err(Error::gss(
                GssStatus::FAILURE,
                krb5::KDC_UNREACH,
                format!("Cannot contact any KDC for realm '{}'", self.name),
            ));
        }

        Ok(())
    }

    fn has_service(&self, principal: &str) -> bool {
        self.read_state().services.iter().any(|service| service == principal)
    }

    fn has_user(&self, principal: &str) -> bool {
        self.read_state().users.contains_key(principal)
    }

    fn check_password(&self, principal: &str, password: &Secret<String>, allow_expired: bool) -> Result<()> {
        let state = self.read_state();

        let entry = state.users.get(principal).ok_or_else(|| {
            Error::gss(
                GssStatus::FAILURE,
                krb5::KDC_ERR_C_PRINCIPAL_UNKNOWN,
                format!("Client '{}' not found in Kerberos database", principal),
            )
        })?;

        if entry.password != *password {
            return Err(Error::gss(
                GssStatus::FAILURE,
                krb5::KDC_ERR_PREAUTH_FAILED,
                "Preauthentication failed",
            ));
        }

        if entry.password_expired && !allow_expired {
            return Err(Error::gss(
                GssStatus::FAILURE,
                krb5::KDC_ERR_KEY_EXP,
                "Password has expired",
            ));
        }

        Ok(())
    }

    /// Records a request nonce; `false` when it was seen before.
    fn remember_nonce(&self, nonce: [u8; NONCE_LEN]) -> bool {
        self.write_state().replay_cache.insert(nonce)
    }
}

impl TicketClient for LoopbackRealm {
    type Credentials = InitialCredentials;

    #[instrument(level = "debug", skip(self, password))]
    fn initial_credentials(&self, principal: &str, password: &Secret<String>) -> Result<InitialCredentials> {
        self.ensure_reachable()?;

        let principal = self.qualify(principal);
        self.check_password(&principal, password, false)?;

        Ok(InitialCredentials {
            principal,
            expires_at: self.now() + TICKET_LIFETIME,
        })
    }

    #[instrument(level = "debug", skip(self))]
    fn service_ticket(&self, credentials: InitialCredentials, service: &str) -> Result<()> {
        self.ensure_reachable()?;

        if credentials.expires_at <= self.now() {
            return Err(Error::gss(
                GssStatus::CREDENTIALS_EXPIRED,
                0,
                "Ticket expired",
            ));
        }

        if !self.has_service(service) {
            return Err(Error::gss(
                GssStatus::FAILURE,
                krb5::KDC_ERR_S_PRINCIPAL_UNKNOWN,
                format!("Server '{}' not found in Kerberos database", service),
            ));
        }

        Ok(())
    }

    #[instrument(level = "debug", skip(self, old_password, new_password))]
    fn change_password(
        &self,
        principal: &str,
        old_password: &Secret<String>,
        new_password: &Secret<String>,
    ) -> Result<()> {
        self.ensure_reachable()?;

        let principal = self.qualify(principal);
        self.check_password(&principal, old_password, true)?;

        if let Some(entry) = self.write_state().users.get_mut(&principal) {
            entry.password = new_password.clone();
            entry.password_expired = false;
        }

        Ok(())
    }
}

impl KeyMaterial for LoopbackRealm {
    fn principals(&self) -> Result<Vec<String>> {
        Ok(self.read_state().services.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn realm() -> LoopbackRealm {
        LoopbackRealm::new("example.com")
            .with_user("alice", "secret")
            .with_service("HTTP/www.example.com")
    }

    #[test]
    fn realm_name_is_upper_case() {
        assert_eq!(realm().name(), "EXAMPLE.COM");
        assert_eq!(realm().qualify("bob"), "bob@EXAMPLE.COM");
    }

    #[test]
    fn issues_initial_credentials_for_valid_password() {
        let credentials = realm().initial_credentials("alice", &Secret::from("secret")).unwrap();

        assert_eq!(credentials.principal, "alice@EXAMPLE.COM");
        assert!(credentials.expires_at > OffsetDateTime::now_utc());
    }

    #[test]
    fn rejects_unknown_users_and_wrong_passwords() {
        let realm = realm();

        assert_eq!(
            realm.initial_credentials("mallory", &Secret::from("secret")).unwrap_err().error_type,
            ErrorKind::LogonDenied
        );
        assert_eq!(
            realm.initial_credentials("alice", &Secret::from("guess")).unwrap_err().error_type,
            ErrorKind::LogonDenied
        );
    }

    #[test]
    fn expired_password_can_still_be_changed() {
        let realm = realm();
        realm.expire_password("alice");

        assert_eq!(
            realm.initial_credentials("alice", &Secret::from("secret")).unwrap_err().error_type,
            ErrorKind::PasswordExpired
        );

        realm
            .change_password("alice", &Secret::from("secret"), &Secret::from("fresh"))
            .unwrap();

        assert!(realm.initial_credentials("alice", &Secret::from("fresh")).is_ok());
    }

    #[test]
    fn offline_realm_is_unreachable() {
        let realm = realm();
        realm.set_offline(true);

        let err = realm.initial_credentials("alice", &Secret::from("secret")).unwrap_err();

        assert_eq!(err.error_type, ErrorKind::NoAuthenticatingAuthority);
        assert_eq!(err.status.map(|status| status.minor), Some(krb5::KDC_UNREACH));
    }

    #[test]
    fn keytab_lists_registered_services() {
        let realm = realm().with_service("host/www.example.com").with_service("HTTP/www.example.com");

        assert_eq!(
            realm.principals().unwrap(),
            ["HTTP/www.example.com@EXAMPLE.COM", "host/www.example.com@EXAMPLE.COM"]
        );
    }

    #[test]
    fn replayed_nonces_are_detected() {
        let realm = realm();

        assert!(realm.remember_nonce([1; NONCE_LEN]));
        assert!(!realm.remember_nonce([1; NONCE_LEN]));
    }
}
