use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::{Error, ErrorKind, Result};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 16;
pub const CHECKSUM_LEN: usize = 32;

type HmacSha256 = Hmac<Sha256>;

fn hmac(key: &[u8]) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(key).map_err(|err| Error::new(ErrorKind::InternalError, format!("HMAC error: {}", err)))
}

fn finalize(mac: HmacSha256) -> [u8; CHECKSUM_LEN] {
    let mut out = [0; CHECKSUM_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());

    out
}

pub fn checksum(key: &[u8], data: &[u8]) -> Result<[u8; CHECKSUM_LEN]> {
    let mut mac = hmac(key)?;
    mac.update(data);

    Ok(finalize(mac))
}

/// Constant-time comparison of `expected` against the checksum of `data`.
pub fn verify_checksum(key: &[u8], data: &[u8], expected: &[u8]) -> Result<bool> {
    let mut mac = hmac(key)?;
    mac.update(data);

    Ok(mac.verify_slice(expected).is_ok())
}

pub fn derive_key(secret: &[u8], label: &str, context: &[u8]) -> Result<[u8; KEY_LEN]> {
    let mut mac = hmac(secret)?;
    mac.update(label.as_bytes());
    mac.update(&[0]);
    mac.update(context);

    Ok(finalize(mac))
}

/// XORs `data` with an HMAC-SHA256 counter-mode keystream. Applying it twice
/// with the same inputs restores the data.
pub fn apply_keystream(key: &[u8], label: &str, iv: &[u8], data: &mut [u8]) -> Result<()> {
    for (counter, chunk) in data.chunks_mut(CHECKSUM_LEN).enumerate() {
        let mut mac = hmac(key)?;
        mac.update(label.as_bytes());
        mac.update(iv);
        mac.update(&(counter as u32).to_be_bytes());

        let block = mac.finalize().into_bytes();

        chunk.iter_mut().zip(block.iter()).for_each(|(byte, key_byte)| *byte ^= key_byte);
    }

    Ok(())
}

pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0; N];
    OsRng.fill_bytes(&mut bytes);

    bytes
}
