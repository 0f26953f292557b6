use std::fmt;

use crate::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameKind {
    /// `service@host`
    HostBased,
    /// `service/host[@REALM]` or `user[@REALM]`
    Principal,
}

/// Name of the service a context authenticates to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceName {
    name: String,
    kind: NameKind,
}

impl ServiceName {
    pub fn parse(name: &str) -> Result<Self> {
        let name = name.trim();

        if name.is_empty() {
            return Err(Error::new(ErrorKind::TargetUnknown, "service name is empty"));
        }

        let kind = if name.contains('/') {
            NameKind::Principal
        } else if let Some((service, host)) = name.split_once('@') {
            if service.is_empty() || host.is_empty() || host.contains('@') {
                return Err(Error::new(
                    ErrorKind::TargetUnknown,
                    format!("malformed host-based service name: {}", name),
                ));
            }

            NameKind::HostBased
        } else {
            NameKind::Principal
        };

        if kind == NameKind::Principal && (name.starts_with('@') || name.ends_with('@') || name.starts_with('/')) {
            return Err(Error::new(
                ErrorKind::TargetUnknown,
                format!("malformed principal name: {}", name),
            ));
        }

        Ok(Self {
            name: name.to_owned(),
            kind,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NameKind {
        self.kind
    }

    /// Kerberos form of the name: `service/host@REALM`.
    ///
    /// `realm` is used only when the name does not carry one.
    pub fn to_principal(&self, realm: &str) -> String {
        match self.kind {
            NameKind::HostBased => {
                let (service, host) = self.name.split_once('@').unwrap_or((&self.name, ""));

                format!("{}/{}@{}", service, host.to_ascii_lowercase(), realm)
            }
            NameKind::Principal => qualify_principal(&self.name, realm),
        }
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Appends `@realm` to a principal that has no realm of its own.
pub fn qualify_principal(principal: &str, realm: &str) -> String {
    if principal.contains('@') || realm.is_empty() {
        principal.to_owned()
    } else {
        format!("{}@{}", principal, realm)
    }
}

/// Local key material of a service host (a keytab).
pub trait KeyMaterial {
    /// Principals that have keys available, in storage order.
    fn principals(&self) -> Result<Vec<String>>;
}

impl<T: KeyMaterial + ?Sized> KeyMaterial for &T {
    fn principals(&self) -> Result<Vec<String>> {
        (**self).principals()
    }
}

/// Resolves service principals against local key material.
#[derive(Debug, Clone)]
pub struct PrincipalResolver<K> {
    key_material: K,
}

impl<K: KeyMaterial> PrincipalResolver<K> {
    pub fn new(key_material: K) -> Self {
        Self { key_material }
    }

    /// Returns the first principal of the form `service_type/hostname@REALM`.
    #[instrument(level = "debug", ret, skip(self))]
    pub fn server_principal_details(&self, service_type: &str, hostname: &str) -> Result<String> {
        if service_type.is_empty() || hostname.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidParameter,
                "service type and hostname must not be empty",
            ));
        }

        let prefix = format!("{}/{}@", service_type, hostname);
        let principals = self.key_material.principals()?;

        trace!(entries = principals.len(), "Scanning key material");

        principals
            .into_iter()
            .find(|principal| principal.starts_with(&prefix))
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::TargetUnknown,
                    format!("Principal not found in keytab: {}", prefix),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedKeytab(Vec<&'static str>);

    impl KeyMaterial for FixedKeytab {
        fn principals(&self) -> Result<Vec<String>> {
            Ok(self.0.iter().map(|p| p.to_string()).collect())
        }
    }

    #[test]
    fn parses_host_based_names() {
        let name = ServiceName::parse("HTTP@Host.Example.com").unwrap();

        assert_eq!(name.kind(), NameKind::HostBased);
        assert_eq!(name.to_principal("EXAMPLE.COM"), "HTTP/host.example.com@EXAMPLE.COM");
    }

    #[test]
    fn parses_principal_names() {
        let name = ServiceName::parse("HTTP/host.example.com").unwrap();
        assert_eq!(name.kind(), NameKind::Principal);
        assert_eq!(name.to_principal("EXAMPLE.COM"), "HTTP/host.example.com@EXAMPLE.COM");

        let name = ServiceName::parse("HTTP/host.example.com@OTHER.ORG").unwrap();
        assert_eq!(name.to_principal("EXAMPLE.COM"), "HTTP/host.example.com@OTHER.ORG");
    }

    #[test]
    fn rejects_malformed_names() {
        for name in ["", "   ", "@host", "HTTP@", "a@b@c", "/host", "user@"] {
            let err = ServiceName::parse(name).unwrap_err();
            assert_eq!(err.error_type, ErrorKind::TargetUnknown, "{:?}", name);
        }
    }

    #[test]
    fn qualifies_bare_principals() {
        assert_eq!(qualify_principal("alice", "EXAMPLE.COM"), "alice@EXAMPLE.COM");
        assert_eq!(qualify_principal("alice@OTHER.ORG", "EXAMPLE.COM"), "alice@OTHER.ORG");
        assert_eq!(qualify_principal("alice", ""), "alice");
    }

    #[test]
    fn resolves_first_matching_keytab_entry() {
        let resolver = PrincipalResolver::new(FixedKeytab(vec![
            "host/other.example.com@EXAMPLE.COM",
            "HTTP/www.example.com@EXAMPLE.COM",
            "HTTP/www.example.com@BACKUP.ORG",
        ]));

        assert_eq!(
            resolver.server_principal_details("HTTP", "www.example.com").unwrap(),
            "HTTP/www.example.com@EXAMPLE.COM"
        );
    }

    #[test]
    fn prefix_does_not_match_longer_hostnames() {
        let resolver = PrincipalResolver::new(FixedKeytab(vec!["HTTP/www.example.com.evil@EXAMPLE.COM"]));
        let err = resolver.server_principal_details("HTTP", "www.example.com").unwrap_err();

        assert_eq!(err.error_type, ErrorKind::TargetUnknown);
        assert_eq!(err.category(), crate::ErrorCategory::Configuration);
    }
}
