mod common;

use std::path::Path;

use gss_negotiate::loopback::LoopbackMechanism;
use gss_negotiate::token::{self, authorization_value, challenge_value, parse_negotiate_header};
use gss_negotiate::{
    AuthContext, AuthStatus, ContextFlags, ContextState, ErrorCategory, ErrorKind, NegotiateConfig, ProtectionLevel,
    ResultCode,
};
use proptest::prelude::*;
use static_assertions::assert_impl_all;

use crate::common::{negotiate, realm, scratch_dir, SERVICE};

assert_impl_all!(AuthContext<LoopbackMechanism>: Send);

fn established_pair() -> (AuthContext<LoopbackMechanism>, AuthContext<LoopbackMechanism>) {
    let realm = realm();
    let mut client = AuthContext::client(realm.mechanism(), SERVICE).build().unwrap();
    let mut server = AuthContext::server(realm.mechanism()).with_service(SERVICE).build().unwrap();

    assert_eq!(negotiate(&mut client, &mut server).unwrap(), AuthStatus::Complete);

    (client, server)
}

#[test]
fn mutual_handshake_over_headers() {
    let realm = realm();
    let mut client = AuthContext::client(realm.mechanism(), SERVICE).build().unwrap();
    let mut server = AuthContext::server(realm.mechanism()).with_service(SERVICE).build().unwrap();

    // Unauthenticated request: the server answers with a bare challenge.
    let www_authenticate = challenge_value(None);
    let challenge = parse_negotiate_header(&www_authenticate).unwrap().unwrap_or_default();

    let status = client.client_step(challenge).unwrap();
    assert_eq!(ResultCode::from(status), ResultCode::Continue);

    let authorization = authorization_value(&client.response().unwrap());
    let client_token = parse_negotiate_header(&authorization).unwrap().unwrap();

    let result = server.server_step(client_token);
    assert_eq!(ResultCode::from(&result), ResultCode::Complete);

    let www_authenticate = challenge_value(Some(&server.response().unwrap()));
    let final_leg = parse_negotiate_header(&www_authenticate).unwrap().unwrap();

    assert_eq!(client.client_step(final_leg).unwrap(), AuthStatus::Complete);
    assert!(!client.has_response());

    assert_eq!(server.user_name().unwrap(), "alice@EXAMPLE.COM");
    assert_eq!(server.target_name().unwrap(), None);
    assert_eq!(client.user_name().unwrap(), "alice@EXAMPLE.COM");
    assert_eq!(client.target_name().unwrap(), None);
    assert!(server.negotiated_flags().unwrap().contains(ContextFlags::MUTUAL_AUTH));
    assert_eq!(client.rounds(), 2);
    assert_eq!(server.rounds(), 1);

    client.destroy().unwrap();
    server.destroy().unwrap();
}

#[test]
fn implicit_server_reports_the_accepted_service() {
    let realm = realm();
    let mut client = AuthContext::client(realm.mechanism(), "HTTP@backend.example.com")
        .build()
        .unwrap();
    let mut server = AuthContext::server(realm.mechanism()).with_service("  ").build().unwrap();

    negotiate(&mut client, &mut server).unwrap();

    assert_eq!(
        server.target_name().unwrap(),
        Some("HTTP/backend.example.com@EXAMPLE.COM")
    );

    client.destroy().unwrap();
    server.destroy().unwrap();
}

#[test]
fn one_leg_without_mutual_authentication() {
    let realm = realm();
    let mut client = AuthContext::client(realm.mechanism(), SERVICE)
        .with_flags(ContextFlags::empty())
        .build()
        .unwrap();
    let mut server = AuthContext::server(realm.mechanism()).build().unwrap();

    assert_eq!(client.client_step("").unwrap(), AuthStatus::Complete);
    assert_eq!(server.server_step(&client.response().unwrap()).unwrap(), AuthStatus::Complete);
    assert!(!server.has_response());
    assert!(!server.negotiated_flags().unwrap().contains(ContextFlags::MUTUAL_AUTH));

    client.destroy().unwrap();
    server.destroy().unwrap();
}

#[test]
fn explicit_client_principal() {
    let realm = realm();
    let mut client = AuthContext::client(realm.mechanism(), SERVICE)
        .with_client_principal("bob")
        .build()
        .unwrap();
    let mut server = AuthContext::server(realm.mechanism()).build().unwrap();

    negotiate(&mut client, &mut server).unwrap();

    assert_eq!(client.client_principal(), Some("bob"));
    assert_eq!(server.user_name().unwrap(), "bob@EXAMPLE.COM");

    client.destroy().unwrap();
    server.destroy().unwrap();
}

#[test]
fn extra_legs_are_negotiated() {
    let realm = realm().with_extra_legs(3);
    let mut client = AuthContext::client(realm.mechanism(), SERVICE).build().unwrap();
    let mut server = AuthContext::server(realm.mechanism()).with_service(SERVICE).build().unwrap();

    assert_eq!(negotiate(&mut client, &mut server).unwrap(), AuthStatus::Complete);
    assert_eq!(server.rounds(), 4);
    assert_eq!(client.rounds(), 5);
    assert!(client.is_established());

    client.destroy().unwrap();
    server.destroy().unwrap();
}

#[test]
fn round_limit_stops_endless_negotiation() {
    let realm = realm().with_extra_legs(50);
    let mut client = AuthContext::client(realm.mechanism(), SERVICE).build().unwrap();
    let mut server = AuthContext::server(realm.mechanism())
        .with_config(NegotiateConfig::default().with_max_rounds(4))
        .build()
        .unwrap();

    let err = negotiate(&mut client, &mut server).unwrap_err();

    assert_eq!(err.error_type, ErrorKind::OutOfSequence);
    assert_eq!(server.state(), ContextState::Failed);
    assert_eq!(server.rounds(), 5);

    client.destroy().unwrap();
    server.destroy().unwrap();
}

#[test]
fn protects_messages_in_both_directions() {
    let (mut client, mut server) = established_pair();

    client.wrap(&token::encode(b"GET /report"), ProtectionLevel::Confidentiality).unwrap();
    let sealed = client.response().unwrap();

    server.unwrap(&sealed).unwrap();
    assert_eq!(token::decode(&server.response().unwrap()).unwrap(), b"GET /report");
    assert_eq!(server.confidentiality_used(), Some(true));

    let signed = server.wrap_raw(b"200 OK", ProtectionLevel::Integrity).unwrap();
    assert!(signed.windows(6).any(|window| window == b"200 OK"));

    assert_eq!(client.unwrap_raw(&signed).unwrap(), b"200 OK");
    assert_eq!(client.confidentiality_used(), Some(false));

    client.destroy().unwrap();
    server.destroy().unwrap();
}

#[test]
fn sealed_payload_is_not_readable() {
    let (mut client, mut server) = established_pair();

    let sealed = client
        .wrap_raw(b"attack at dawn", ProtectionLevel::Confidentiality)
        .unwrap();

    assert!(!sealed.windows(14).any(|window| window == b"attack at dawn"));

    client.destroy().unwrap();
    server.destroy().unwrap();
}

#[test]
fn empty_protected_message_is_invalid() {
    let (mut client, mut server) = established_pair();

    assert_eq!(server.unwrap("").unwrap_err().error_type, ErrorKind::InvalidToken);
    assert_eq!(server.state(), ContextState::Established);

    client.destroy().unwrap();
    server.destroy().unwrap();
}

#[test]
fn clock_skew_is_an_infrastructure_failure() {
    let realm = realm();
    realm.set_clock_offset(600);

    let mut client = AuthContext::client(realm.mechanism(), SERVICE).build().unwrap();
    let mut server = AuthContext::server(realm.mechanism()).with_service(SERVICE).build().unwrap();

    let err = negotiate(&mut client, &mut server).unwrap_err();

    assert_eq!(err.error_type, ErrorKind::TimeSkew);
    assert!(err.is_infrastructure_failure());
    assert_eq!(server.state(), ContextState::Failed);

    client.destroy().unwrap();
    server.destroy().unwrap();
}

#[test]
fn replayed_client_token_is_rejected() {
    let realm = realm();
    let mut client = AuthContext::client(realm.mechanism(), SERVICE).build().unwrap();
    client.client_step("").unwrap();
    let client_token = client.response().unwrap();

    let mut first = AuthContext::server(realm.mechanism()).build().unwrap();
    let mut second = AuthContext::server(realm.mechanism()).build().unwrap();

    assert_eq!(first.server_step(&client_token).unwrap(), AuthStatus::Complete);

    let err = second.server_step(&client_token).unwrap_err();
    assert_eq!(err.error_type, ErrorKind::ReplayDetected);
    assert_eq!(err.category(), ErrorCategory::Negotiation);

    for mut context in [client, first, second] {
        context.destroy().unwrap();
    }
}

#[test]
fn token_for_another_service_is_rejected() {
    let realm = realm();
    let mut client = AuthContext::client(realm.mechanism(), "HTTP@backend.example.com")
        .build()
        .unwrap();
    let mut server = AuthContext::server(realm.mechanism()).with_service(SERVICE).build().unwrap();

    let err = negotiate(&mut client, &mut server).unwrap_err();

    assert_eq!(err.error_type, ErrorKind::WrongPrincipal);
    assert_eq!(err.category(), ErrorCategory::Configuration);

    client.destroy().unwrap();
    server.destroy().unwrap();
}

#[test]
fn configuration_errors() {
    let realm = realm();

    let err = AuthContext::server(realm.mechanism())
        .with_service("HTTP@nowhere.example.com")
        .build()
        .unwrap_err();
    assert_eq!(err.error_type, ErrorKind::TargetUnknown);

    let err = AuthContext::client(realm.mechanism(), SERVICE)
        .with_client_principal("carol")
        .build()
        .unwrap_err();
    assert_eq!(err.error_type, ErrorKind::NoCredentials);

    let err = AuthContext::client(realm.mechanism(), "").build().unwrap_err();
    assert_eq!(err.error_type, ErrorKind::TargetUnknown);

    let mut client = AuthContext::client(realm.mechanism(), "HTTP@nowhere.example.com")
        .build()
        .unwrap();
    assert_eq!(client.client_step("").unwrap_err().error_type, ErrorKind::TargetUnknown);
    assert_eq!(client.state(), ContextState::Failed);
    client.destroy().unwrap();
}

#[test]
fn unreachable_realm() {
    let realm = realm();
    let mut client = AuthContext::client(realm.mechanism(), SERVICE).build().unwrap();

    realm.set_offline(true);

    let err = client.client_step("").unwrap_err();
    assert_eq!(err.error_type, ErrorKind::NoAuthenticatingAuthority);
    assert!(err.is_infrastructure_failure());

    client.destroy().unwrap();
}

#[test]
fn delegated_credential_is_stored_and_used_onward() {
    let realm = realm();
    let ccache_dir = scratch_dir();

    let mut client = AuthContext::client(realm.mechanism(), SERVICE)
        .with_flags(ContextFlags::default() | ContextFlags::DELEGATE)
        .build()
        .unwrap();
    let mut server = AuthContext::server(realm.mechanism())
        .with_service(SERVICE)
        .with_config(NegotiateConfig::default().with_ccache_dir(&ccache_dir))
        .build()
        .unwrap();

    negotiate(&mut client, &mut server).unwrap();

    assert!(server.has_delegated_credential().unwrap());
    server.store_delegated_credential().unwrap();

    let cache_name = server.cache_name().unwrap();
    let path = cache_name.strip_prefix("FILE:").unwrap().to_owned();
    assert!(Path::new(&path).starts_with(&ccache_dir));
    assert!(Path::new(&path)
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("krb5cc_negotiate_"));

    let cached = realm.read_credential_cache(&path).unwrap();
    assert_eq!(cached.principal(), "alice@EXAMPLE.COM");

    // Storing again replaces the previous cache.
    server.store_delegated_credential().unwrap();
    let second_cache_name = server.cache_name().unwrap();
    assert_ne!(second_cache_name, cache_name);
    assert!(!Path::new(&path).exists());

    let delegated = server.take_delegated_credential().unwrap();
    let mut onward = AuthContext::client(realm.mechanism(), "HTTP@backend.example.com")
        .with_delegated_credential(delegated)
        .build()
        .unwrap();
    let mut backend = AuthContext::server(realm.mechanism()).build().unwrap();

    negotiate(&mut onward, &mut backend).unwrap();
    assert_eq!(backend.user_name().unwrap(), "alice@EXAMPLE.COM");

    server.destroy().unwrap();
    assert!(!Path::new(second_cache_name.trim_start_matches("FILE:")).exists());

    for mut context in [client, onward, backend] {
        context.destroy().unwrap();
    }
    let _ = std::fs::remove_dir_all(&ccache_dir);
}

#[test]
fn dropping_a_context_removes_its_cache() {
    let realm = realm();
    let ccache_dir = scratch_dir();

    let mut client = AuthContext::client(realm.mechanism(), SERVICE)
        .with_flags(ContextFlags::MUTUAL_AUTH | ContextFlags::DELEGATE)
        .build()
        .unwrap();
    let mut server = AuthContext::server(realm.mechanism())
        .with_config(NegotiateConfig::default().with_ccache_dir(&ccache_dir))
        .build()
        .unwrap();

    negotiate(&mut client, &mut server).unwrap();
    server.store_delegated_credential().unwrap();

    let cache_name = server.cache_name().unwrap();
    drop(server);

    assert!(!Path::new(cache_name.trim_start_matches("FILE:")).exists());

    client.destroy().unwrap();
    let _ = std::fs::remove_dir_all(&ccache_dir);
}

#[test]
fn no_delegation_unless_requested() {
    let (mut client, mut server) = established_pair();

    assert!(!server.has_delegated_credential().unwrap());
    assert!(!server.negotiated_flags().unwrap().contains(ContextFlags::DELEGATE));
    assert_eq!(
        server.store_delegated_credential().unwrap_err().error_type,
        ErrorKind::NoDelegatedCredential
    );

    client.destroy().unwrap();
    server.destroy().unwrap();
}

#[test]
fn destroyed_context_is_unusable() {
    let (mut client, mut server) = established_pair();

    server.destroy().unwrap();

    assert_eq!(server.destroy().unwrap_err().error_type, ErrorKind::ContextDestroyed);
    assert_eq!(server.user_name().unwrap_err().error_type, ErrorKind::ContextDestroyed);
    assert_eq!(server.server_step("AQ==").unwrap_err().error_type, ErrorKind::ContextDestroyed);
    assert_eq!(server.unwrap("AQ==").unwrap_err().category(), ErrorCategory::Misuse);

    client.destroy().unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn altered_client_token_fails_the_server(index in any::<prop::sample::Index>(), bit in 0u8..8) {
        let realm = realm();
        let mut client = AuthContext::client(realm.mechanism(), SERVICE).build().unwrap();
        let mut server = AuthContext::server(realm.mechanism()).with_service(SERVICE).build().unwrap();

        client.client_step("").unwrap();
        let mut client_token = client.response_raw().unwrap();
        let position = index.index(client_token.len());
        client_token[position] ^= 1 << bit;

        prop_assert!(server.step_raw(&client_token).is_err());
        prop_assert_eq!(server.state(), ContextState::Failed);

        client.destroy().unwrap();
        server.destroy().unwrap();
    }

    #[test]
    fn altered_server_reply_fails_the_client(index in any::<prop::sample::Index>(), bit in 0u8..8, extra_legs in 0u32..2) {
        let realm = realm().with_extra_legs(extra_legs);
        let mut client = AuthContext::client(realm.mechanism(), SERVICE).build().unwrap();
        let mut server = AuthContext::server(realm.mechanism()).with_service(SERVICE).build().unwrap();

        client.client_step("").unwrap();
        server.step_raw(&client.response_raw().unwrap()).unwrap();

        // AP-REP, or a challenge when the acceptor wants another leg.
        let mut reply = server.response_raw().unwrap();
        let position = index.index(reply.len());
        reply[position] ^= 1 << bit;

        prop_assert!(client.step_raw(&reply).is_err());
        prop_assert_eq!(client.state(), ContextState::Failed);
        prop_assert!(!client.has_response());

        client.destroy().unwrap();
        server.destroy().unwrap();
    }

    #[test]
    fn altered_protected_message_is_rejected(index in any::<prop::sample::Index>(), bit in 0u8..8, confidential: bool) {
        let (mut client, mut server) = established_pair();
        let level = if confidential { ProtectionLevel::Confidentiality } else { ProtectionLevel::Integrity };

        let message = client.wrap_raw(b"transfer 100 to bob", level).unwrap();
        let mut altered = message.clone();
        let position = index.index(altered.len());
        altered[position] ^= 1 << bit;

        prop_assert!(server.unwrap_raw(&altered).is_err());
        prop_assert_eq!(server.state(), ContextState::Established);
        prop_assert_eq!(server.unwrap_raw(&message).unwrap(), b"transfer 100 to bob".to_vec());

        client.destroy().unwrap();
        server.destroy().unwrap();
    }
}
