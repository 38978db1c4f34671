//! Security suite 0: AES-128-GCM with a 12-byte nonce and a 12-byte tag.
//!
//! A ciphered APDU is an envelope around the plain APDU:
//!
//! ```text
//! CC 1F 30 00 00 00 2A [ciphertext ........ tag(12)]
//! │  │  │  └────┬────┘
//! │  │  │       └────── invocation counter (u32 BE)
//! │  │  └────────────── security control
//! │  └───────────────── length of everything that follows (BER)
//! └──────────────────── ciphered tag (glo-get-response here)
//! ```
//!
//! The nonce is `system title (8) ‖ invocation counter (4)` of the sender and
//! the associated data is `security control ‖ authentication key`.

use aes::Aes128;
use aes_gcm::AesGcm;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use cipher::Key;
use cipher::consts::U12;
use nom::{IResult, Parser, bytes::streaming::take, number::streaming::{be_u32, u8}};

use crate::data::{ByteBuffer, parse_count};
use crate::error::Error;
use crate::security_control::SecurityControl;

type Aes128Gcm12 = AesGcm<Aes128, U12, U12>;

pub const TAG_LEN: usize = 12;
/// Bytes an envelope adds around the plain APDU, not counting the length field.
pub const ENVELOPE_OVERHEAD: usize = 1 + 1 + 4 + TAG_LEN;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CipherError {
    #[error("malformed ciphered envelope: {0}")]
    Malformed(String),
    #[error("ciphering key is not configured")]
    InvalidKey,
    #[error("authentication tag does not match")]
    Authentication,
    #[error("invocation counter {received} is not greater than {last}")]
    InvocationCounter { received: u32, last: u32 },
    #[error("invocation counter exhausted")]
    CounterExhausted,
}

impl From<CipherError> for Error {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::Malformed(reason) => Error::InvalidResponse(reason),
            CipherError::InvalidKey | CipherError::CounterExhausted => {
                Error::InvalidParameter(err.to_string())
            }
            CipherError::Authentication => Error::WrongKeys,
            CipherError::InvocationCounter { received, last } => {
                Error::FailureInvocationCounter { received, last }
            }
        }
    }
}

/// Which key protects an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Global,
    Dedicated,
}

/// `(plain, glo, ded)` tag triples.
#[rustfmt::skip]
const CIPHERED_TAGS: [(u8, u8, u8); 10] = [
    (0x01, 0x21, 0x41), // initiate-request
    (0x08, 0x28, 0x48), // initiate-response
    (0x0E, 0x2E, 0x4E), // confirmed-service-error
    (0xC0, 0xC8, 0xD0), // get-request
    (0xC1, 0xC9, 0xD1), // set-request
    (0xC2, 0xCA, 0xD2), // event-notification-request
    (0xC3, 0xCB, 0xD3), // action-request
    (0xC4, 0xCC, 0xD4), // get-response
    (0xC5, 0xCD, 0xD5), // set-response
    (0xC7, 0xCF, 0xD7), // action-response
];

/// The ciphered counterpart of a plain APDU tag.
pub fn ciphered_tag(plain: u8, kind: KeyKind) -> Option<u8> {
    CIPHERED_TAGS.iter().find(|(p, _, _)| *p == plain).map(|&(_, glo, ded)| match kind {
        KeyKind::Global => glo,
        KeyKind::Dedicated => ded,
    })
}

/// The plain tag and key kind behind a ciphered tag.
pub fn plain_tag(ciphered: u8) -> Option<(u8, KeyKind)> {
    CIPHERED_TAGS.iter().find_map(|&(plain, glo, ded)| match ciphered {
        t if t == glo => Some((plain, KeyKind::Global)),
        t if t == ded => Some((plain, KeyKind::Dedicated)),
        _ => None,
    })
}

pub fn is_ciphered_tag(tag: u8) -> bool {
    plain_tag(tag).is_some()
}

/// A parsed but still protected envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub tag: u8,
    pub security_control: SecurityControl,
    pub invocation_counter: u32,
    /// Ciphertext and tag, or plaintext and tag, depending on the security control.
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, tag) = u8(input)?;
        let (input, len) = parse_count(input)?;
        let (input, body) = take(len).parse(input)?;
        let (payload, (security_control, invocation_counter)) =
            (SecurityControl::parse, be_u32).parse(body)?;
        Ok((
            input,
            Self { tag, security_control, invocation_counter, payload: payload.to_vec() },
        ))
    }

    /// Decodes a whole envelope; trailing bytes and unknown tags are rejected.
    pub fn decode(bytes: &[u8]) -> Result<Self, CipherError> {
        let (rest, envelope) = Self::parse(bytes)
            .map_err(|e| CipherError::Malformed(format!("cannot parse envelope: {e:?}")))?;
        if !rest.is_empty() {
            return Err(CipherError::Malformed(format!("{} bytes after envelope", rest.len())));
        }
        if !is_ciphered_tag(envelope.tag) {
            return Err(CipherError::Malformed(format!("tag 0x{:02X} is not ciphered", envelope.tag)));
        }
        Ok(envelope)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.payload.len() + 8);
        buf.push(self.tag);
        buf.push_length(5 + self.payload.len());
        buf.push(self.security_control.bits());
        buf.push_u32(self.invocation_counter);
        buf.extend_from_slice(&self.payload);
        buf
    }
}

fn nonce(system_title: &[u8; 8], invocation_counter: u32) -> [u8; 12] {
    let mut iv = [0u8; 12];
    iv[..8].copy_from_slice(system_title);
    iv[8..].copy_from_slice(&invocation_counter.to_be_bytes());
    iv
}

fn associated_data(security_control: SecurityControl, authentication_key: &[u8; 16]) -> Vec<u8> {
    let mut ad = Vec::with_capacity(17);
    ad.push(security_control.bits());
    ad.extend_from_slice(authentication_key);
    ad
}

fn new_cipher(key: &[u8; 16]) -> Result<Aes128Gcm12, CipherError> {
    if key.iter().all(|&b| b == 0) {
        return Err(CipherError::InvalidKey);
    }
    Ok(Aes128Gcm12::new(Key::<Aes128>::from_slice(key)))
}

/// Key material needed to seal or open envelopes with one key.
#[derive(Clone, Copy)]
pub struct CipherKeys<'a> {
    pub block_cipher_key: &'a [u8; 16],
    pub authentication_key: &'a [u8; 16],
}

fn unprotected(security_control: SecurityControl) -> CipherError {
    CipherError::Malformed(format!(
        "security control 0x{:02X} neither authenticates nor encrypts",
        u8::from(security_control)
    ))
}

/// Seals `plaintext` into an envelope with tag `tag`.
///
/// `system_title` is the sender's own title. The caller owns the invocation
/// counter and advances it only when this returns `Ok`.
pub fn seal(
    keys: CipherKeys<'_>,
    system_title: &[u8; 8],
    invocation_counter: u32,
    security_control: SecurityControl,
    tag: u8,
    plaintext: &[u8],
) -> Result<Vec<u8>, CipherError> {
    let cipher = new_cipher(keys.block_cipher_key)?;
    let iv = nonce(system_title, invocation_counter);
    let ad = associated_data(security_control, keys.authentication_key);

    let payload = match (security_control.authentication(), security_control.encryption()) {
        (true, true) => {
            let mut buffer = plaintext.to_vec();
            let auth_tag = cipher
                .encrypt_in_place_detached(&iv.into(), &ad, &mut buffer)
                .map_err(|_| CipherError::Authentication)?;
            buffer.extend_from_slice(&auth_tag);
            buffer
        }
        (false, true) => {
            let mut buffer = plaintext.to_vec();
            cipher
                .encrypt_in_place_detached(&iv.into(), &[], &mut buffer)
                .map_err(|_| CipherError::Authentication)?;
            buffer
        }
        (true, false) => {
            let mut ad = ad;
            ad.extend_from_slice(plaintext);
            let auth_tag = cipher
                .encrypt_in_place_detached(&iv.into(), &ad, &mut [])
                .map_err(|_| CipherError::Authentication)?;
            let mut buffer = plaintext.to_vec();
            buffer.extend_from_slice(&auth_tag);
            buffer
        }
        (false, false) => return Err(unprotected(security_control)),
    };

    Ok(Envelope { tag, security_control, invocation_counter, payload }.encode())
}

/// Opens an envelope sent by the peer whose title is `system_title`.
///
/// Counter freshness is not checked here; see [`check_invocation_counter`].
pub fn open(
    keys: CipherKeys<'_>,
    system_title: &[u8; 8],
    envelope: &Envelope,
) -> Result<Vec<u8>, CipherError> {
    let cipher = new_cipher(keys.block_cipher_key)?;
    let security_control = envelope.security_control;
    let iv = nonce(system_title, envelope.invocation_counter);
    let ad = associated_data(security_control, keys.authentication_key);

    let split_tag = |payload: &[u8]| -> Result<(Vec<u8>, [u8; TAG_LEN]), CipherError> {
        let body_len = payload.len().checked_sub(TAG_LEN).ok_or_else(|| {
            CipherError::Malformed(format!("payload of {} bytes has no tag", payload.len()))
        })?;
        let mut auth_tag = [0u8; TAG_LEN];
        auth_tag.copy_from_slice(&payload[body_len..]);
        Ok((payload[..body_len].to_vec(), auth_tag))
    };

    match (security_control.authentication(), security_control.encryption()) {
        (true, true) => {
            let (mut buffer, auth_tag) = split_tag(&envelope.payload)?;
            cipher
                .decrypt_in_place_detached(
                    &iv.into(),
                    &ad,
                    &mut buffer,
                    GenericArray::from_slice(&auth_tag),
                )
                .map_err(|_| CipherError::Authentication)?;
            Ok(buffer)
        }
        (false, true) => {
            // GCM without a tag is CTR mode, so encrypting again decrypts.
            let mut buffer = envelope.payload.clone();
            cipher
                .encrypt_in_place_detached(&iv.into(), &[], &mut buffer)
                .map_err(|_| CipherError::Authentication)?;
            Ok(buffer)
        }
        (true, false) => {
            let (plaintext, auth_tag) = split_tag(&envelope.payload)?;
            let mut ad = ad;
            ad.extend_from_slice(&plaintext);
            cipher
                .decrypt_in_place_detached(
                    &iv.into(),
                    &ad,
                    &mut [],
                    GenericArray::from_slice(&auth_tag),
                )
                .map_err(|_| CipherError::Authentication)?;
            Ok(plaintext)
        }
        (false, false) => Err(unprotected(security_control)),
    }
}

/// Accepts `received` only if it is strictly greater than the last accepted counter.
pub fn check_invocation_counter(received: u32, last: Option<u32>) -> Result<(), CipherError> {
    match last {
        Some(last) if received <= last => Err(CipherError::InvocationCounter { received, last }),
        _ => Ok(()),
    }
}
