//! Transport encoding of security tokens.
//!
//! Tokens cross the boundary as standard padded base64, the form used by the
//! HTTP `Negotiate` scheme (RFC 4559):
//!
//! ```text
//! WWW-Authenticate: Negotiate
//! Authorization: Negotiate <base64 token>
//! WWW-Authenticate: Negotiate <base64 token>
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::{Error, ErrorKind, Result};

pub const NEGOTIATE_SCHEME: &str = "Negotiate";

pub fn encode(token: &[u8]) -> String {
    STANDARD.encode(token)
}

/// Decodes a base64 token. Empty (or all-whitespace) text is an empty token.
pub fn decode(text: &str) -> Result<Vec<u8>> {
    let text = text.trim();

    if text.is_empty() {
        return Ok(Vec::new());
    }

    Ok(STANDARD.decode(text)?)
}

/// Extracts the token from an `Authorization` or `WWW-Authenticate` header value.
///
/// Returns `Ok(None)` for a bare `Negotiate` challenge. The scheme name is
/// matched case-insensitively.
pub fn parse_negotiate_header(value: &str) -> Result<Option<&str>> {
    let value = value.trim();
    let (scheme, rest) = match value.split_once(char::is_whitespace) {
        Some((scheme, rest)) => (scheme, rest.trim()),
        None => (value, ""),
    };

    if !scheme.eq_ignore_ascii_case(NEGOTIATE_SCHEME) {
        return Err(Error::new(
            ErrorKind::InvalidToken,
            format!("expected the {} scheme, got: {:?}", NEGOTIATE_SCHEME, scheme),
        ));
    }

    if rest.is_empty() {
        Ok(None)
    } else {
        Ok(Some(rest))
    }
}

/// `Authorization` header value carrying a client token.
pub fn authorization_value(token: &str) -> String {
    format!("{} {}", NEGOTIATE_SCHEME, token)
}

/// `WWW-Authenticate` header value: the bare challenge, or the server's final leg.
pub fn challenge_value(token: Option<&str>) -> String {
    match token {
        Some(token) if !token.is_empty() => format!("{} {}", NEGOTIATE_SCHEME, token),
        _ => NEGOTIATE_SCHEME.to_owned(),
    }
}
