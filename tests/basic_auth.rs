mod common;

use gss_negotiate::{BasicAuthValidator, ErrorKind, PasswordVerdict, PrincipalResolver};

use crate::common::{realm, SERVICE, SERVICE_PRINCIPAL};

#[test]
fn accepts_only_the_right_password() {
    let validator = BasicAuthValidator::new(realm());

    assert!(validator.check_password("alice", "secret", SERVICE, "EXAMPLE.COM").unwrap());
    assert!(validator
        .check_password("alice@EXAMPLE.COM", "secret", "HTTP/www.example.com", "EXAMPLE.COM")
        .unwrap());
    assert!(!validator.check_password("alice", "Secret", SERVICE, "EXAMPLE.COM").unwrap());
    assert!(!validator.check_password("mallory", "secret", SERVICE, "EXAMPLE.COM").unwrap());
}

#[test]
fn unknown_service_is_not_a_verdict() {
    let validator = BasicAuthValidator::new(realm());

    let err = validator
        .check_password("alice", "secret", "HTTP@nowhere.example.com", "EXAMPLE.COM")
        .unwrap_err();

    assert_eq!(err.error_type, ErrorKind::TargetUnknown);
}

#[test]
fn unreachable_realm_is_not_a_verdict() {
    let realm = realm();
    let validator = BasicAuthValidator::new(&realm);

    realm.set_offline(true);

    let err = validator.check_password("alice", "secret", SERVICE, "EXAMPLE.COM").unwrap_err();
    assert_eq!(err.error_type, ErrorKind::NoAuthenticatingAuthority);

    realm.set_offline(false);
    assert!(validator.check_password("alice", "secret", SERVICE, "EXAMPLE.COM").unwrap());
}

#[test]
fn expired_password_must_be_changed() {
    let realm = realm();
    let validator = BasicAuthValidator::new(&realm);

    realm.expire_password("bob");

    assert_eq!(
        validator.verify_password("bob", "hunter2", SERVICE, "EXAMPLE.COM").unwrap(),
        PasswordVerdict::PasswordExpired
    );
    assert!(!validator.check_password("bob", "hunter2", SERVICE, "EXAMPLE.COM").unwrap());

    assert!(!validator.change_password("bob", "wrong", "correct horse").unwrap());
    assert!(validator.change_password("bob", "hunter2", "correct horse").unwrap());

    assert!(validator.check_password("bob", "correct horse", SERVICE, "EXAMPLE.COM").unwrap());
    assert!(!validator.check_password("bob", "hunter2", SERVICE, "EXAMPLE.COM").unwrap());
}

#[test]
fn password_change_needs_arguments() {
    let validator = BasicAuthValidator::new(realm());

    assert_eq!(
        validator.change_password("", "secret", "new").unwrap_err().error_type,
        ErrorKind::InvalidParameter
    );
    assert_eq!(
        validator.change_password("alice", "secret", "").unwrap_err().error_type,
        ErrorKind::InvalidParameter
    );
}

#[test]
fn resolves_service_principals_from_the_realm_keytab() {
    let realm = realm();
    let resolver = PrincipalResolver::new(&realm);

    assert_eq!(
        resolver.server_principal_details("HTTP", "www.example.com").unwrap(),
        SERVICE_PRINCIPAL
    );
    assert_eq!(
        resolver.server_principal_details("host", "www.example.com").unwrap(),
        "host/www.example.com@EXAMPLE.COM"
    );
    assert_eq!(
        resolver
            .server_principal_details("HTTP", "mail.example.com")
            .unwrap_err()
            .error_type,
        ErrorKind::TargetUnknown
    );
    assert_eq!(
        resolver.server_principal_details("", "www.example.com").unwrap_err().error_type,
        ErrorKind::InvalidParameter
    );
}
