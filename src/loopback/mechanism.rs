use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use time::OffsetDateTime;

use super::crypto::{self, CHECKSUM_LEN, KEY_LEN, NONCE_LEN};
use super::messages::{
    ApRep, ApReq, Challenge, ChallengeResponse, CredentialCache, HandshakeToken, WrapToken,
    WRAP_FLAG_SEALED, WRAP_FLAG_SENT_BY_ACCEPTOR,
};
use super::{LoopbackRealm, MAX_CLOCK_SKEW};
use crate::{
    krb5, ContextFlags, ContextInfo, CredentialUse, Error, ErrorKind, GssStatus, Identity, Result, Secret,
    SecurityMechanism, ServiceName, StepOutput, Unwrapped,
};

const SESSION_KEY_LABEL: &str = "session-key";
const SEAL_LABEL: &str = "seal";

fn defective(err: io::Error) -> Error {
    Error::gss(GssStatus::DEFECTIVE_TOKEN, 0, format!("Invalid token: {}", err))
}

fn missing_token(side: &str) -> Error {
    Error::gss(
        GssStatus::DEFECTIVE_TOKEN,
        0,
        format!("expected a token from the {}", side),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackCredential {
    principal: String,
    usage: CredentialUse,
    forwardable: bool,
}

impl LoopbackCredential {
    pub(super) fn delegated(principal: String) -> Self {
        Self {
            principal,
            usage: CredentialUse::Outbound,
            forwardable: true,
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn usage(&self) -> CredentialUse {
        self.usage
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Initial,
    AwaitingReply,
    AwaitingChallengeResponse {
        remaining: u32,
        challenge: [u8; NONCE_LEN],
    },
    Established,
}

pub struct LoopbackContext {
    initiator: bool,
    credential: Option<LoopbackCredential>,
    client: Option<String>,
    target: Option<String>,
    flags: ContextFlags,
    stage: Stage,
    nonce: [u8; NONCE_LEN],
    session_key: Option<Secret<[u8; KEY_LEN]>>,
    delegated: Option<LoopbackCredential>,
    send_seq: u64,
    recv_seq: u64,
}

impl LoopbackContext {
    fn new(initiator: bool, credential: Option<LoopbackCredential>, target: Option<String>, flags: ContextFlags) -> Self {
        Self {
            initiator,
            credential,
            client: None,
            target,
            flags,
            stage: Stage::Initial,
            nonce: [0; NONCE_LEN],
            session_key: None,
            delegated: None,
            send_seq: 0,
            recv_seq: 0,
        }
    }

    fn session_key(&self) -> Result<[u8; KEY_LEN]> {
        self.session_key
            .as_ref()
            .map(|key| *key.expose())
            .ok_or_else(|| Error::gss(GssStatus::NO_CONTEXT, 0, "no session key has been agreed"))
    }

    fn established_key(&self) -> Result<[u8; KEY_LEN]> {
        if self.stage != Stage::Established {
            return Err(Error::gss(GssStatus::NO_CONTEXT, 0, "the context is not established"));
        }

        self.session_key()
    }
}

/// [`SecurityMechanism`] backed by a [`LoopbackRealm`].
#[derive(Clone)]
pub struct LoopbackMechanism {
    realm: LoopbackRealm,
}

impl LoopbackMechanism {
    pub fn new(realm: LoopbackRealm) -> Self {
        Self { realm }
    }

    pub fn realm(&self) -> &LoopbackRealm {
        &self.realm
    }

    fn now_timestamp(&self) -> i64 {
        OffsetDateTime::now_utc().unix_timestamp()
    }

    fn initiate(&self, context: &mut LoopbackContext, input: Option<&[u8]>) -> Result<StepOutput> {
        if input.is_some() {
            return Err(Error::gss(
                GssStatus::DEFECTIVE_TOKEN,
                0,
                "the initiator does not expect a token on its first leg",
            ));
        }

        self.realm.ensure_reachable()?;

        let (client, forwardable) = match &context.credential {
            Some(credential) => (credential.principal.clone(), credential.forwardable),
            None => return Err(Error::gss(GssStatus::NO_CRED, 0, "the initiator has no credential")),
        };
        let target = match &context.target {
            Some(target) if self.realm.has_service(target) => target.clone(),
            Some(target) => {
                return Err(Error::gss(
                    GssStatus::FAILURE,
                    krb5::KDC_ERR_S_PRINCIPAL_UNKNOWN,
                    format!("Server {} not found in Kerberos database", target),
                ))
            }
            None => return Err(Error::gss(GssStatus::BAD_NAME, 0, "the initiator has no target")),
        };

        let service_key = self.realm.service_key(&target)?;
        let session_key: [u8; KEY_LEN] = crypto::random_bytes();
        let nonce: [u8; NONCE_LEN] = crypto::random_bytes();

        let mut encrypted_session_key = session_key;
        crypto::apply_keystream(&service_key, SESSION_KEY_LABEL, &nonce, &mut encrypted_session_key)?;

        let delegated = (context.flags.contains(ContextFlags::DELEGATE) && forwardable).then(|| client.clone());
        if delegated.is_none() {
            context.flags.remove(ContextFlags::DELEGATE);
        }

        let clock_offset = self.realm.read_state().clock_offset;
        let mut ap_req = ApReq {
            flags: context.flags.bits(),
            client: client.clone(),
            target,
            timestamp: self.now_timestamp() + clock_offset,
            nonce,
            encrypted_session_key,
            delegated,
            checksum: [0; CHECKSUM_LEN],
        };
        ap_req.checksum = crypto::checksum(&service_key, &ap_req.body().map_err(defective)?)?;

        let token = ap_req.encode().map_err(defective)?;

        context.client = Some(client);
        context.nonce = nonce;
        context.session_key = Some(Secret::new(session_key));

        if context.flags.contains(ContextFlags::MUTUAL_AUTH) {
            context.stage = Stage::AwaitingReply;

            Ok(StepOutput::continue_with(token))
        } else {
            context.stage = Stage::Established;

            Ok(StepOutput::complete(Some(token)))
        }
    }

    fn handle_reply(&self, context: &mut LoopbackContext, input: Option<&[u8]>) -> Result<StepOutput> {
        let input = input.ok_or_else(|| missing_token("acceptor"))?;
        let session_key = context.session_key()?;

        match HandshakeToken::identify(input) {
            Some(HandshakeToken::ApRep) => {
                let ap_rep = ApRep::decode(input).map_err(defective)?;

                if !crypto::verify_checksum(&session_key, &ap_rep.body(), &ap_rep.checksum)? {
                    return Err(Error::gss(
                        GssStatus::FAILURE,
                        krb5::AP_ERR_MODIFIED,
                        "AP-REP integrity check failed",
                    ));
                }

                if ap_rep.nonce != context.nonce {
                    return Err(Error::gss(
                        GssStatus::FAILURE,
                        krb5::AP_ERR_MUT_FAIL,
                        "Mutual authentication failed",
                    ));
                }

                context.stage = Stage::Established;

                Ok(StepOutput::complete(None))
            }
            Some(HandshakeToken::Challenge) => {
                let challenge = Challenge::decode(input).map_err(defective)?;

                if !crypto::verify_checksum(&session_key, &challenge.body(), &challenge.checksum)? {
                    return Err(Error::gss(
                        GssStatus::FAILURE,
                        krb5::AP_ERR_MODIFIED,
                        "challenge integrity check failed",
                    ));
                }

                trace!(remaining = challenge.remaining, "Answering acceptor challenge");

                let mut response = ChallengeResponse {
                    challenge: challenge.challenge,
                    checksum: [0; CHECKSUM_LEN],
                };
                response.checksum = crypto::checksum(&session_key, &response.body())?;

                Ok(StepOutput::continue_with(response.encode()))
            }
            _ => Err(Error::gss(
                GssStatus::DEFECTIVE_TOKEN,
                0,
                "unexpected token from the acceptor",
            )),
        }
    }

    fn accept(&self, context: &mut LoopbackContext, input: Option<&[u8]>) -> Result<StepOutput> {
        let input = input.ok_or_else(|| missing_token("initiator"))?;

        if HandshakeToken::identify(input) != Some(HandshakeToken::ApReq) {
            return Err(Error::gss(GssStatus::DEFECTIVE_TOKEN, 0, "expected an AP-REQ token"));
        }

        let ap_req = ApReq::decode(input).map_err(defective)?;

        match &context.credential {
            Some(credential) if credential.principal != ap_req.target => {
                return Err(Error::gss(
                    GssStatus::FAILURE,
                    krb5::AP_ERR_NOT_US,
                    format!(
                        "Wrong principal in request: expected {}, got {}",
                        credential.principal, ap_req.target
                    ),
                ))
            }
            None if !self.realm.has_service(&ap_req.target) => {
                return Err(Error::gss(
                    GssStatus::FAILURE,
                    krb5::AP_ERR_NOT_US,
                    format!("No key table entry found matching {}", ap_req.target),
                ))
            }
            _ => {}
        }

        let service_key = self.realm.service_key(&ap_req.target)?;

        if !crypto::verify_checksum(&service_key, &ap_req.body().map_err(defective)?, &ap_req.checksum)? {
            return Err(Error::gss(
                GssStatus::FAILURE,
                krb5::AP_ERR_BAD_INTEGRITY,
                "Decrypt integrity check failed",
            ));
        }

        if self.now_timestamp().abs_diff(ap_req.timestamp) > MAX_CLOCK_SKEW.unsigned_abs() {
            return Err(Error::gss(GssStatus::FAILURE, krb5::AP_ERR_SKEW, "Clock skew too great"));
        }

        if !self.realm.remember_nonce(ap_req.nonce) {
            return Err(Error::gss(GssStatus::FAILURE, krb5::AP_ERR_REPEAT, "Request is a replay"));
        }

        let mut session_key = ap_req.encrypted_session_key;
        crypto::apply_keystream(&service_key, SESSION_KEY_LABEL, &ap_req.nonce, &mut session_key)?;

        let mut flags = ContextFlags::from_bits_truncate(ap_req.flags);
        if ap_req.delegated.is_none() {
            flags.remove(ContextFlags::DELEGATE);
        }

        context.flags = flags;
        context.nonce = ap_req.nonce;
        context.session_key = Some(Secret::new(session_key));
        context.delegated = ap_req.delegated.map(LoopbackCredential::delegated);
        context.client = Some(ap_req.client);
        context.target = Some(ap_req.target);

        let extra_legs = self.realm.read_state().extra_legs;

        if flags.contains(ContextFlags::MUTUAL_AUTH) && extra_legs > 0 {
            self.issue_challenge(context, extra_legs)
        } else {
            self.finish_accept(context)
        }
    }

    fn issue_challenge(&self, context: &mut LoopbackContext, remaining: u32) -> Result<StepOutput> {
        let session_key = context.session_key()?;

        let mut challenge = Challenge {
            remaining,
            challenge: crypto::random_bytes(),
            checksum: [0; CHECKSUM_LEN],
        };
        challenge.checksum = crypto::checksum(&session_key, &challenge.body())?;

        context.stage = Stage::AwaitingChallengeResponse {
            remaining,
            challenge: challenge.challenge,
        };

        Ok(StepOutput::continue_with(challenge.encode()))
    }

    fn verify_challenge_response(
        &self,
        context: &mut LoopbackContext,
        input: Option<&[u8]>,
        remaining: u32,
        expected: [u8; NONCE_LEN],
    ) -> Result<StepOutput> {
        let input = input.ok_or_else(|| missing_token("initiator"))?;

        if HandshakeToken::identify(input) != Some(HandshakeToken::ChallengeResponse) {
            return Err(Error::gss(GssStatus::DEFECTIVE_TOKEN, 0, "expected a challenge response"));
        }

        let response = ChallengeResponse::decode(input).map_err(defective)?;
        let session_key = context.session_key()?;

        if !crypto::verify_checksum(&session_key, &response.body(), &response.checksum)? {
            return Err(Error::gss(
                GssStatus::FAILURE,
                krb5::AP_ERR_BAD_INTEGRITY,
                "challenge response integrity check failed",
            ));
        }

        if response.challenge != expected {
            return Err(Error::gss(
                GssStatus::FAILURE,
                krb5::AP_ERR_REPEAT,
                "challenge response answers an earlier challenge",
            ));
        }

        if remaining > 1 {
            self.issue_challenge(context, remaining - 1)
        } else {
            self.finish_accept(context)
        }
    }

    fn finish_accept(&self, context: &mut LoopbackContext) -> Result<StepOutput> {
        context.stage = Stage::Established;

        if !context.flags.contains(ContextFlags::MUTUAL_AUTH) {
            return Ok(StepOutput::complete(None));
        }

        let session_key = context.session_key()?;
        let mut ap_rep = ApRep {
            nonce: context.nonce,
            checksum: [0; CHECKSUM_LEN],
        };
        ap_rep.checksum = crypto::checksum(&session_key, &ap_rep.body())?;

        Ok(StepOutput::complete(Some(ap_rep.encode())))
    }
}

fn seal_iv(direction: u8, seq_num: u64) -> [u8; 9] {
    let mut iv = [0; 9];
    iv[0] = direction;
    iv[1..].copy_from_slice(&seq_num.to_be_bytes());

    iv
}

impl SecurityMechanism for LoopbackMechanism {
    type Credential = LoopbackCredential;
    type Context = LoopbackContext;

    fn name(&self) -> &str {
        "loopback"
    }

    fn acquire_credential(&self, identity: Option<Identity<'_>>, usage: CredentialUse) -> Result<LoopbackCredential> {
        let principal = match identity {
            Some(Identity::User(user)) => self.realm.qualify(user),
            Some(Identity::Service(name)) => name.to_principal(self.realm.name()),
            None if usage == CredentialUse::Outbound => self
                .realm
                .read_state()
                .default_principal
                .clone()
                .ok_or_else(|| Error::gss(GssStatus::NO_CRED, 0, "No Kerberos credentials available"))?,
            None => {
                return Err(Error::new(
                    ErrorKind::InvalidParameter,
                    "acceptor credentials need a service name",
                ))
            }
        };

        match usage {
            CredentialUse::Outbound if !self.realm.has_user(&principal) && !self.realm.has_service(&principal) => {
                Err(Error::gss(
                    GssStatus::NO_CRED,
                    0,
                    format!("No credentials found for {}", principal),
                ))
            }
            CredentialUse::Inbound if !self.realm.has_service(&principal) => Err(Error::gss(
                GssStatus::NO_CRED,
                krb5::KDC_ERR_S_PRINCIPAL_UNKNOWN,
                format!("No key table entry found for {}", principal),
            )),
            _ => Ok(LoopbackCredential {
                principal,
                usage,
                forwardable: true,
            }),
        }
    }

    fn new_initiator(
        &self,
        credential: Option<LoopbackCredential>,
        target: &ServiceName,
        flags: ContextFlags,
    ) -> Result<LoopbackContext> {
        let credential = match credential {
            Some(credential) => credential,
            None => self.acquire_credential(None, CredentialUse::Outbound)?,
        };

        if credential.usage != CredentialUse::Outbound {
            return Err(Error::gss(
                GssStatus::NO_CRED,
                0,
                "the credential cannot initiate contexts",
            ));
        }

        Ok(LoopbackContext::new(
            true,
            Some(credential),
            Some(target.to_principal(self.realm.name())),
            flags,
        ))
    }

    fn new_acceptor(&self, credential: Option<LoopbackCredential>) -> Result<LoopbackContext> {
        if let Some(credential) = &credential {
            if credential.usage != CredentialUse::Inbound {
                return Err(Error::gss(
                    GssStatus::NO_CRED,
                    0,
                    "the credential cannot accept contexts",
                ));
            }
        }

        Ok(LoopbackContext::new(false, credential, None, ContextFlags::empty()))
    }

    fn step(&self, context: &mut LoopbackContext, input: Option<&[u8]>) -> Result<StepOutput> {
        match (context.initiator, context.stage) {
            (true, Stage::Initial) => self.initiate(context, input),
            (true, Stage::AwaitingReply) => self.handle_reply(context, input),
            (false, Stage::Initial) => self.accept(context, input),
            (false, Stage::AwaitingChallengeResponse { remaining, challenge }) => {
                self.verify_challenge_response(context, input, remaining, challenge)
            }
            _ => Err(Error::gss(GssStatus::FAILURE, 0, "the context is already established")),
        }
    }

    fn inquire(&self, context: &mut LoopbackContext) -> Result<ContextInfo> {
        if context.stage != Stage::Established {
            return Err(Error::gss(GssStatus::NO_CONTEXT, 0, "the context is not established"));
        }

        match (&context.client, &context.target) {
            (Some(client), Some(target)) => Ok(ContextInfo {
                source_name: client.clone(),
                target_name: target.clone(),
                flags: context.flags
                    | ContextFlags::INTEGRITY
                    | ContextFlags::CONFIDENTIALITY
                    | ContextFlags::PROTECTION_READY,
            }),
            _ => Err(Error::gss(GssStatus::NO_CONTEXT, 0, "the context names are unknown")),
        }
    }

    fn take_delegated_credential(&self, context: &mut LoopbackContext) -> Option<LoopbackCredential> {
        context.delegated.take()
    }

    fn store_credential(&self, credential: &LoopbackCredential, path: &Path) -> Result<()> {
        let file = OpenOptions::new().write(true).truncate(true).open(path)?;
        let mut writer = BufWriter::new(file);

        CredentialCache::write(&mut writer, &credential.principal)?;
        writer.flush()?;

        Ok(())
    }

    fn wrap(&self, context: &mut LoopbackContext, confidential: bool, message: &[u8]) -> Result<Vec<u8>> {
        let session_key = context.established_key()?;

        let direction = if context.initiator { 0 } else { WRAP_FLAG_SENT_BY_ACCEPTOR };
        let flags = if confidential { direction | WRAP_FLAG_SEALED } else { direction };
        let seq_num = context.send_seq;

        let mut payload = message.to_vec();
        if confidential {
            crypto::apply_keystream(&session_key, SEAL_LABEL, &seal_iv(direction, seq_num), &mut payload)?;
        }

        let mut token = WrapToken {
            flags,
            seq_num,
            payload,
            checksum: [0; CHECKSUM_LEN],
        };
        token.checksum = crypto::checksum(&session_key, &token.body().map_err(defective)?)?;

        context.send_seq = context.send_seq.wrapping_add(1);

        token.encode().map_err(defective)
    }

    fn unwrap(&self, context: &mut LoopbackContext, message: &[u8]) -> Result<Unwrapped> {
        let session_key = context.established_key()?;
        let token = WrapToken::decode(message).map_err(defective)?;

        if !crypto::verify_checksum(&session_key, &token.body().map_err(defective)?, &token.checksum)? {
            return Err(Error::gss(GssStatus::BAD_MIC, 0, "wrap token checksum mismatch"));
        }

        let direction = token.flags & WRAP_FLAG_SENT_BY_ACCEPTOR;
        if (direction != 0) == !context.initiator {
            return Err(Error::gss(
                GssStatus::DEFECTIVE_TOKEN,
                0,
                "the token was produced by this side of the context",
            ));
        }

        if token.seq_num < context.recv_seq
            && context.flags.intersects(ContextFlags::REPLAY_DETECT | ContextFlags::SEQUENCE_DETECT)
        {
            return Err(Error::gss(
                GssStatus::DUPLICATE_TOKEN,
                0,
                format!("sequence number {} was already received", token.seq_num),
            ));
        }

        if token.seq_num > context.recv_seq && context.flags.contains(ContextFlags::SEQUENCE_DETECT) {
            return Err(Error::gss(
                GssStatus::GAP_TOKEN,
                0,
                format!("expected sequence number {}, got {}", context.recv_seq, token.seq_num),
            ));
        }

        context.recv_seq = token.seq_num.wrapping_add(1);

        let confidential = token.flags & WRAP_FLAG_SEALED != 0;
        let mut data = token.payload;

        if confidential {
            crypto::apply_keystream(&session_key, SEAL_LABEL, &seal_iv(direction, token.seq_num), &mut data)?;
        }

        Ok(Unwrapped {
            data,
            confidential: Some(confidential),
        })
    }
}
