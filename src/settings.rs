//! Client configuration.
//!
//! [`Settings`] is everything the engine needs to associate and exchange
//! data with one server. It is built with [`Settings::builder`]:
//!
//! ```
//! use std::time::Duration;
//! use dlms_engine::settings::{Authentication, Settings};
//!
//! let settings = Settings::builder()
//!     .authentication(Authentication::Low)
//!     .password(b"12345678")
//!     .max_pdu_receive(1024)
//!     .reply_timeout(Duration::from_secs(5))
//!     .build()
//!     .unwrap();
//! assert_eq!(settings.max_pdu_receive, 1024);
//! ```

use std::time::Duration;

pub use crate::association::Authentication;
use crate::association::Conformance;
use crate::cipher::{self, CipherError, CipherKeys, Envelope, KeyKind};
use crate::data::DeviationMode;
use crate::error::{Error, Result};
use crate::security_control::SecurityControl;

/// Size proposed in the AARQ and used for sending until the AARE says otherwise.
pub const DEFAULT_MAX_PDU_SIZE: u16 = 256;

/// PDU sizes below this value are reserved.
pub const MIN_PDU_SIZE: u16 = 12;

pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Which key protects data-exchange APDUs once associated.
///
/// The AARQ and AARE always use the global unicast key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityLevel {
    #[default]
    Global,
    Dedicated,
}

/// Keys, titles and invocation counters of a ciphered association.
///
/// Own counters advance after every sealed APDU. The last counter accepted
/// from the peer is tracked per key; persisting both across sessions is up
/// to the caller.
#[derive(Clone)]
pub struct Ciphering {
    pub level: SecurityLevel,
    pub security_control: SecurityControl,
    pub system_title: [u8; 8],
    /// Learned from the AARE when not configured.
    pub peer_system_title: Option<[u8; 8]>,
    pub unicast_key: [u8; 16],
    pub authentication_key: [u8; 16],
    pub dedicated_key: Option<[u8; 16]>,
    pub invocation_counter: u32,
    pub dedicated_invocation_counter: u32,
    last_peer_counter: Option<u32>,
    last_peer_dedicated_counter: Option<u32>,
}

impl core::fmt::Debug for Ciphering {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Keys stay out of logs.
        f.debug_struct("Ciphering")
            .field("level", &self.level)
            .field("security_control", &self.security_control)
            .field("system_title", &self.system_title)
            .field("peer_system_title", &self.peer_system_title)
            .field("invocation_counter", &self.invocation_counter)
            .field("dedicated_invocation_counter", &self.dedicated_invocation_counter)
            .finish_non_exhaustive()
    }
}

impl Ciphering {
    /// Global-key ciphering with authenticated encryption.
    pub fn new(system_title: [u8; 8], unicast_key: [u8; 16], authentication_key: [u8; 16]) -> Self {
        Self {
            level: SecurityLevel::Global,
            security_control: SecurityControl::authenticated_encryption(),
            system_title,
            peer_system_title: None,
            unicast_key,
            authentication_key,
            dedicated_key: None,
            invocation_counter: 0,
            dedicated_invocation_counter: 0,
            last_peer_counter: None,
            last_peer_dedicated_counter: None,
        }
    }

    /// Proposes `key` in the InitiateRequest and protects data exchange with it.
    pub fn with_dedicated_key(mut self, key: [u8; 16]) -> Self {
        self.dedicated_key = Some(key);
        self.level = SecurityLevel::Dedicated;
        self
    }

    pub fn with_security_control(mut self, security_control: SecurityControl) -> Self {
        self.security_control = security_control;
        self
    }

    pub fn with_invocation_counter(mut self, invocation_counter: u32) -> Self {
        self.invocation_counter = invocation_counter;
        self
    }

    pub fn with_peer_system_title(mut self, title: [u8; 8]) -> Self {
        self.peer_system_title = Some(title);
        self
    }

    /// The key kind used for data-exchange APDUs.
    pub fn data_key_kind(&self) -> KeyKind {
        match (self.level, self.dedicated_key) {
            (SecurityLevel::Dedicated, Some(_)) => KeyKind::Dedicated,
            _ => KeyKind::Global,
        }
    }

    /// The last invocation counter accepted from the peer for `kind`.
    pub fn last_peer_counter(&self, kind: KeyKind) -> Option<u32> {
        match kind {
            KeyKind::Global => self.last_peer_counter,
            KeyKind::Dedicated => self.last_peer_dedicated_counter,
        }
    }

    /// Forgets the dedicated key state. A dedicated key lives for one
    /// association only.
    pub fn reset_dedicated(&mut self) {
        self.dedicated_invocation_counter = 0;
        self.last_peer_dedicated_counter = None;
    }

    fn block_cipher_key(&self, kind: KeyKind) -> core::result::Result<&[u8; 16], CipherError> {
        match kind {
            KeyKind::Global => Ok(&self.unicast_key),
            KeyKind::Dedicated => self.dedicated_key.as_ref().ok_or(CipherError::InvalidKey),
        }
    }

    /// Seals a plain APDU with the key of `kind` and advances that key's
    /// invocation counter.
    pub fn seal(&mut self, apdu: &[u8], kind: KeyKind) -> core::result::Result<Vec<u8>, CipherError> {
        let plain = *apdu.first().ok_or_else(|| CipherError::Malformed("empty APDU".into()))?;
        let tag = cipher::ciphered_tag(plain, kind)
            .ok_or_else(|| CipherError::Malformed(format!("tag 0x{plain:02X} cannot be ciphered")))?;
        let counter = match kind {
            KeyKind::Global => self.invocation_counter,
            KeyKind::Dedicated => self.dedicated_invocation_counter,
        };
        let next = counter.checked_add(1).ok_or(CipherError::CounterExhausted)?;
        let keys = CipherKeys {
            block_cipher_key: self.block_cipher_key(kind)?,
            authentication_key: &self.authentication_key,
        };
        let sealed = cipher::seal(keys, &self.system_title, counter, self.security_control, tag, apdu)?;
        match kind {
            KeyKind::Global => self.invocation_counter = next,
            KeyKind::Dedicated => self.dedicated_invocation_counter = next,
        }
        Ok(sealed)
    }

    /// Opens an envelope from the peer.
    ///
    /// Envelopes whose security control byte differs from
    /// [`security_control`](Self::security_control) are refused outright.
    /// The counter is checked before the AEAD so a replayed frame is reported
    /// as such even with correct keys. It is recorded only after the envelope
    /// authenticates.
    pub fn open(&mut self, envelope: &Envelope) -> core::result::Result<Vec<u8>, CipherError> {
        let (plain, kind) = cipher::plain_tag(envelope.tag)
            .ok_or_else(|| CipherError::Malformed(format!("tag 0x{:02X} is not ciphered", envelope.tag)))?;
        let peer_title = self
            .peer_system_title
            .ok_or_else(|| CipherError::Malformed("peer system title is unknown".into()))?;
        // The peer must not pick a weaker protection than the one configured.
        if envelope.security_control != self.security_control {
            return Err(CipherError::Malformed(format!(
                "security control 0x{:02X} differs from the configured 0x{:02X}",
                u8::from(envelope.security_control),
                u8::from(self.security_control)
            )));
        }
        cipher::check_invocation_counter(envelope.invocation_counter, self.last_peer_counter(kind))?;

        let keys = CipherKeys {
            block_cipher_key: self.block_cipher_key(kind)?,
            authentication_key: &self.authentication_key,
        };
        let plaintext = cipher::open(keys, &peer_title, envelope)?;
        if plaintext.first() != Some(&plain) {
            return Err(CipherError::Malformed(format!(
                "deciphered APDU does not start with 0x{plain:02X}"
            )));
        }

        match kind {
            KeyKind::Global => self.last_peer_counter = Some(envelope.invocation_counter),
            KeyKind::Dedicated => self.last_peer_dedicated_counter = Some(envelope.invocation_counter),
        }
        Ok(plaintext)
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub authentication: Authentication,
    /// Sent as the calling authentication value when authentication is not
    /// [`Authentication::None`].
    pub password: Option<Vec<u8>>,
    pub ciphering: Option<Ciphering>,
    /// Proposed to the server in the InitiateRequest.
    pub max_pdu_receive: u16,
    /// Upper bound for outgoing APDUs, clamped by the server's value on
    /// association.
    pub max_pdu_send: u16,
    pub conformance: Conformance,
    pub reply_timeout: Duration,
    /// Disconnect after this long without traffic.
    pub inactivity_timeout: Option<Duration>,
    /// How date-time deviations are interpreted when converted to calendar time.
    pub deviation_mode: DeviationMode,
    /// Whether a struct-of-elements Set keeps going after a rejected field.
    pub continue_on_set_rejected: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            authentication: Authentication::None,
            password: None,
            ciphering: None,
            max_pdu_receive: DEFAULT_MAX_PDU_SIZE,
            max_pdu_send: DEFAULT_MAX_PDU_SIZE,
            conformance: Conformance::DEFAULT_CLIENT,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            inactivity_timeout: None,
            deviation_mode: DeviationMode::default(),
            continue_on_set_rejected: false,
        }
    }
}

impl Settings {
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    pub fn is_ciphered(&self) -> bool {
        self.ciphering.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    pub fn authentication(mut self, authentication: Authentication) -> Self {
        self.settings.authentication = authentication;
        self
    }

    pub fn password(mut self, password: impl AsRef<[u8]>) -> Self {
        self.settings.password = Some(password.as_ref().to_vec());
        self
    }

    pub fn ciphering(mut self, ciphering: Ciphering) -> Self {
        self.settings.ciphering = Some(ciphering);
        self
    }

    pub fn max_pdu_receive(mut self, size: u16) -> Self {
        self.settings.max_pdu_receive = size;
        self
    }

    pub fn max_pdu_send(mut self, size: u16) -> Self {
        self.settings.max_pdu_send = size;
        self
    }

    pub fn conformance(mut self, conformance: Conformance) -> Self {
        self.settings.conformance = conformance;
        self
    }

    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.settings.reply_timeout = timeout;
        self
    }

    pub fn inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.settings.inactivity_timeout = Some(timeout);
        self
    }

    pub fn deviation_mode(mut self, mode: DeviationMode) -> Self {
        self.settings.deviation_mode = mode;
        self
    }

    pub fn continue_on_set_rejected(mut self, continue_on_rejected: bool) -> Self {
        self.settings.continue_on_set_rejected = continue_on_rejected;
        self
    }

    pub fn build(self) -> Result<Settings> {
        let settings = self.settings;
        if settings.authentication != Authentication::None && settings.password.is_none() {
            return Err(Error::InvalidParameter(format!(
                "{:?} authentication needs a password",
                settings.authentication
            )));
        }
        if settings.authentication == Authentication::HighGmac && settings.ciphering.is_none() {
            return Err(Error::InvalidParameter("GMAC authentication needs ciphering".into()));
        }
        for (name, size) in [("max_pdu_receive", settings.max_pdu_receive), ("max_pdu_send", settings.max_pdu_send)] {
            if size < MIN_PDU_SIZE {
                return Err(Error::InvalidParameter(format!("{name} {size} is below {MIN_PDU_SIZE}")));
            }
        }
        if let Some(ciphering) = &settings.ciphering {
            if !ciphering.security_control.is_protected() {
                return Err(Error::InvalidParameter(
                    "ciphering security control must authenticate or encrypt".into(),
                ));
            }
        }
        if settings.reply_timeout.is_zero() {
            return Err(Error::InvalidParameter("reply_timeout must not be zero".into()));
        }
        Ok(settings)
    }
}
