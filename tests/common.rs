#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Once;

use gss_negotiate::loopback::{LoopbackMechanism, LoopbackRealm};
use gss_negotiate::{AuthContext, AuthStatus, Result};
use tracing_subscriber::EnvFilter;

pub const SERVICE: &str = "HTTP@www.example.com";
pub const SERVICE_PRINCIPAL: &str = "HTTP/www.example.com@EXAMPLE.COM";

static TRACING: Once = Once::new();

/// Honors `RUST_LOG` when set.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn realm() -> LoopbackRealm {
    init_tracing();

    LoopbackRealm::new("EXAMPLE.COM")
        .with_user("alice", "secret")
        .with_user("bob", "hunter2")
        .with_default_principal("alice")
        .with_service("HTTP/www.example.com")
        .with_service("HTTP/backend.example.com")
        .with_service("host/www.example.com")
}

pub fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("gss-negotiate-test-{}", uuid::Uuid::new_v4().simple()))
}

/// Exchanges tokens until the client has nothing more to send.
/// Returns the status of the last server step.
pub fn negotiate(
    client: &mut AuthContext<LoopbackMechanism>,
    server: &mut AuthContext<LoopbackMechanism>,
) -> Result<AuthStatus> {
    let mut server_status = AuthStatus::Continue;
    let mut challenge = String::new();

    loop {
        let client_status = client.client_step(&challenge)?;

        if !client.has_response() {
            assert_eq!(client_status, AuthStatus::Complete);

            return Ok(server_status);
        }

        server_status = server.server_step(&client.response()?)?;

        if !server.has_response() {
            return Ok(server_status);
        }

        challenge = server.response()?;
    }
}
