use std::io::{self, Cursor, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::crypto::{CHECKSUM_LEN, KEY_LEN, NONCE_LEN};

const AP_REQ_TOKEN_ID: [u8; 2] = [0x01, 0x00];
const AP_REP_TOKEN_ID: [u8; 2] = [0x02, 0x00];
const CHALLENGE_TOKEN_ID: [u8; 2] = [0x03, 0x00];
const CHALLENGE_RESPONSE_TOKEN_ID: [u8; 2] = [0x04, 0x00];
const WRAP_TOKEN_ID: [u8; 2] = [0x05, 0x04];

const WRAP_FILLER: u8 = 0xff;
const MAX_NAME_LEN: usize = 1024;

pub const WRAP_FLAG_SENT_BY_ACCEPTOR: u8 = 0x01;
pub const WRAP_FLAG_SEALED: u8 = 0x02;

fn invalid_data(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_owned())
}

fn write_string(mut data: impl Write, value: &str) -> io::Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| invalid_data("name is too long"))?;

    data.write_u16::<BigEndian>(len)?;
    data.write_all(value.as_bytes())
}

fn read_string(mut data: impl Read) -> io::Result<String> {
    let len = usize::from(data.read_u16::<BigEndian>()?);

    if len > MAX_NAME_LEN {
        return Err(invalid_data("name is too long"));
    }

    let mut buf = vec![0; len];
    data.read_exact(&mut buf)?;

    String::from_utf8(buf).map_err(|_| invalid_data("name is not UTF-8"))
}

fn read_token_id(mut data: impl Read, expected: [u8; 2], message: &str) -> io::Result<()> {
    let mut buf = [0, 0];

    data.read_exact(&mut buf)?;
    if buf != expected {
        return Err(invalid_data(message));
    }

    Ok(())
}

fn read_checksum(mut data: impl Read) -> io::Result<[u8; CHECKSUM_LEN]> {
    let mut checksum = [0; CHECKSUM_LEN];
    data.read_exact(&mut checksum)?;

    Ok(checksum)
}

/// Every byte of a token must be consumed.
fn ensure_consumed(data: &Cursor<&[u8]>) -> io::Result<()> {
    if data.position() as usize != data.get_ref().len() {
        return Err(invalid_data("trailing data after token"));
    }

    Ok(())
}

/// Kind of a handshake token, from its two leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeToken {
    ApReq,
    ApRep,
    Challenge,
    ChallengeResponse,
}

impl HandshakeToken {
    pub fn identify(token: &[u8]) -> Option<Self> {
        match token.get(..2)? {
            id if id == AP_REQ_TOKEN_ID => Some(HandshakeToken::ApReq),
            id if id == AP_REP_TOKEN_ID => Some(HandshakeToken::ApRep),
            id if id == CHALLENGE_TOKEN_ID => Some(HandshakeToken::Challenge),
            id if id == CHALLENGE_RESPONSE_TOKEN_ID => Some(HandshakeToken::ChallengeResponse),
            _ => None,
        }
    }
}

/// Initiator's first token: who is authenticating to which service, with the
/// session key encrypted for that service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApReq {
    pub flags: u32,
    pub client: String,
    pub target: String,
    pub timestamp: i64,
    pub nonce: [u8; NONCE_LEN],
    pub encrypted_session_key: [u8; KEY_LEN],
    pub delegated: Option<String>,
    pub checksum: [u8; CHECKSUM_LEN],
}

impl ApReq {
    pub fn encode_body(&self, mut data: impl Write) -> io::Result<()> {
        data.write_all(&AP_REQ_TOKEN_ID)?;
        data.write_u32::<BigEndian>(self.flags)?;
        write_string(&mut data, &self.client)?;
        write_string(&mut data, &self.target)?;
        data.write_i64::<BigEndian>(self.timestamp)?;
        data.write_all(&self.nonce)?;
        data.write_all(&self.encrypted_session_key)?;

        match &self.delegated {
            Some(principal) => {
                data.write_u8(1)?;
                write_string(&mut data, principal)?;
            }
            None => data.write_u8(0)?,
        }

        Ok(())
    }

    pub fn body(&self) -> io::Result<Vec<u8>> {
        let mut body = Vec::new();
        self.encode_body(&mut body)?;

        Ok(body)
    }

    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let mut token = self.body()?;
        token.extend_from_slice(&self.checksum);

        Ok(token)
    }

    pub fn decode(token: &[u8]) -> io::Result<Self> {
        let mut data = Cursor::new(token);

        read_token_id(&mut data, AP_REQ_TOKEN_ID, "Invalid AP-REQ token id")?;

        let flags = data.read_u32::<BigEndian>()?;
        let client = read_string(&mut data)?;
        let target = read_string(&mut data)?;
        let timestamp = data.read_i64::<BigEndian>()?;

        let mut nonce = [0; NONCE_LEN];
        data.read_exact(&mut nonce)?;

        let mut encrypted_session_key = [0; KEY_LEN];
        data.read_exact(&mut encrypted_session_key)?;

        let delegated = match data.read_u8()? {
            0 => None,
            1 => Some(read_string(&mut data)?),
            _ => return Err(invalid_data("Invalid AP-REQ delegation marker")),
        };

        let checksum = read_checksum(&mut data)?;
        ensure_consumed(&data)?;

        Ok(Self {
            flags,
            client,
            target,
            timestamp,
            nonce,
            encrypted_session_key,
            delegated,
            checksum,
        })
    }
}

/// Acceptor's proof that it holds the session key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApRep {
    pub nonce: [u8; NONCE_LEN],
    pub checksum: [u8; CHECKSUM_LEN],
}

impl ApRep {
    pub fn body(&self) -> Vec<u8> {
        let mut body = AP_REP_TOKEN_ID.to_vec();
        body.extend_from_slice(&self.nonce);

        body
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut token = self.body();
        token.extend_from_slice(&self.checksum);

        token
    }

    pub fn decode(token: &[u8]) -> io::Result<Self> {
        let mut data = Cursor::new(token);

        read_token_id(&mut data, AP_REP_TOKEN_ID, "Invalid AP-REP token id")?;

        let mut nonce = [0; NONCE_LEN];
        data.read_exact(&mut nonce)?;

        let checksum = read_checksum(&mut data)?;
        ensure_consumed(&data)?;

        Ok(Self { nonce, checksum })
    }
}

/// Extra leg issued by the acceptor; `remaining` counts the legs still owed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub remaining: u32,
    pub challenge: [u8; NONCE_LEN],
    pub checksum: [u8; CHECKSUM_LEN],
}

impl Challenge {
    pub fn body(&self) -> Vec<u8> {
        let mut body = CHALLENGE_TOKEN_ID.to_vec();
        body.extend_from_slice(&self.remaining.to_be_bytes());
        body.extend_from_slice(&self.challenge);

        body
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut token = self.body();
        token.extend_from_slice(&self.checksum);

        token
    }

    pub fn decode(token: &[u8]) -> io::Result<Self> {
        let mut data = Cursor::new(token);

        read_token_id(&mut data, CHALLENGE_TOKEN_ID, "Invalid challenge token id")?;

        let remaining = data.read_u32::<BigEndian>()?;

        let mut challenge = [0; NONCE_LEN];
        data.read_exact(&mut challenge)?;

        let checksum = read_checksum(&mut data)?;
        ensure_consumed(&data)?;

        Ok(Self {
            remaining,
            challenge,
            checksum,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeResponse {
    pub challenge: [u8; NONCE_LEN],
    pub checksum: [u8; CHECKSUM_LEN],
}

impl ChallengeResponse {
    pub fn body(&self) -> Vec<u8> {
        let mut body = CHALLENGE_RESPONSE_TOKEN_ID.to_vec();
        body.extend_from_slice(&self.challenge);

        body
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut token = self.body();
        token.extend_from_slice(&self.checksum);

        token
    }

    pub fn decode(token: &[u8]) -> io::Result<Self> {
        let mut data = Cursor::new(token);

        read_token_id(&mut data, CHALLENGE_RESPONSE_TOKEN_ID, "Invalid challenge response token id")?;

        let mut challenge = [0; NONCE_LEN];
        data.read_exact(&mut challenge)?;

        let checksum = read_checksum(&mut data)?;
        ensure_consumed(&data)?;

        Ok(Self { challenge, checksum })
    }
}

/// Per-message token produced by `wrap`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapToken {
    pub flags: u8,
    pub seq_num: u64,
    pub payload: Vec<u8>,
    pub checksum: [u8; CHECKSUM_LEN],
}

impl WrapToken {
    pub fn encode_body(&self, mut data: impl Write) -> io::Result<()> {
        let len = u32::try_from(self.payload.len()).map_err(|_| invalid_data("payload is too long"))?;

        data.write_all(&WRAP_TOKEN_ID)?;
        data.write_u8(self.flags)?;
        data.write_u8(WRAP_FILLER)?;
        data.write_u64::<BigEndian>(self.seq_num)?;
        data.write_u32::<BigEndian>(len)?;
        data.write_all(&self.payload)?;

        Ok(())
    }

    pub fn body(&self) -> io::Result<Vec<u8>> {
        let mut body = Vec::with_capacity(self.payload.len() + 16);
        self.encode_body(&mut body)?;

        Ok(body)
    }

    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let mut token = self.body()?;
        token.extend_from_slice(&self.checksum);

        Ok(token)
    }

    pub fn decode(token: &[u8]) -> io::Result<Self> {
        let mut data = Cursor::new(token);

        read_token_id(&mut data, WRAP_TOKEN_ID, "Invalid wrap token id")?;

        let flags = data.read_u8()?;
        if data.read_u8()? != WRAP_FILLER {
            return Err(invalid_data("Invalid wrap token filler"));
        }

        let seq_num = data.read_u64::<BigEndian>()?;
        let len = data.read_u32::<BigEndian>()? as usize;

        let remaining = token.len().saturating_sub(data.position() as usize);
        if len.checked_add(CHECKSUM_LEN) != Some(remaining) {
            return Err(invalid_data("Invalid wrap token length"));
        }

        let mut payload = vec![0; len];
        data.read_exact(&mut payload)?;

        let checksum = read_checksum(&mut data)?;
        ensure_consumed(&data)?;

        Ok(Self {
            flags,
            seq_num,
            payload,
            checksum,
        })
    }
}

/// Contents of a delegated credential cache file.
pub struct CredentialCache;

impl CredentialCache {
    const MAGIC: [u8; 4] = *b"LBCC";
    const VERSION: u16 = 1;

    pub fn write(mut data: impl Write, principal: &str) -> io::Result<()> {
        data.write_all(&Self::MAGIC)?;
        data.write_u16::<BigEndian>(Self::VERSION)?;
        write_string(&mut data, principal)?;

        data.flush()
    }

    pub fn read(mut data: impl Read) -> io::Result<String> {
        let mut magic = [0; 4];
        data.read_exact(&mut magic)?;

        if magic != Self::MAGIC || data.read_u16::<BigEndian>()? != Self::VERSION {
            return Err(invalid_data("not a loopback credential cache"));
        }

        read_string(&mut data)
    }
}
