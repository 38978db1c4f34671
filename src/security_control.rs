use core::fmt;

use nom::{IResult, number::streaming::u8};

/// The security-control byte that opens every ciphered envelope.
///
/// ```text
/// bit 7  compression
/// bit 6  broadcast key
/// bit 5  encryption
/// bit 4  authentication
/// 3..0   security suite id
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct SecurityControl {
    security_control: u8,
}

impl fmt::Debug for SecurityControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityControl")
            .field("suite_id", &self.suite_id())
            .field("authentication", &self.authentication())
            .field("encryption", &self.encryption())
            .field("broadcast", &self.broadcast())
            .field("compression", &self.compression())
            .finish()
    }
}

impl From<u8> for SecurityControl {
    fn from(security_control: u8) -> Self {
        Self { security_control }
    }
}

impl From<SecurityControl> for u8 {
    fn from(sc: SecurityControl) -> Self {
        sc.security_control
    }
}

impl SecurityControl {
    #[rustfmt::skip]
    const COMPRESSION_BIT:    u8 = 0b10000000;
    #[rustfmt::skip]
    const BROADCAST_BIT:      u8 = 0b01000000;
    #[rustfmt::skip]
    const ENCRYPTION_BIT:     u8 = 0b00100000;
    #[rustfmt::skip]
    const AUTHENTICATION_BIT: u8 = 0b00010000;

    /// Suite 0 with authentication and encryption (`0x30`).
    pub const fn authenticated_encryption() -> Self {
        Self { security_control: Self::AUTHENTICATION_BIT | Self::ENCRYPTION_BIT }
    }

    /// Suite 0 with encryption only (`0x20`).
    pub const fn encryption_only() -> Self {
        Self { security_control: Self::ENCRYPTION_BIT }
    }

    /// Suite 0 with authentication only (`0x10`).
    pub const fn authentication_only() -> Self {
        Self { security_control: Self::AUTHENTICATION_BIT }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, security_control) = u8(input)?;
        Ok((input, Self { security_control }))
    }

    pub fn bits(&self) -> u8 {
        self.security_control
    }

    pub fn suite_id(&self) -> u8 {
        self.security_control & 0b00001111
    }

    /// Whether an envelope with this byte is protected at all.
    pub fn is_protected(&self) -> bool {
        self.authentication() || self.encryption()
    }

    pub fn authentication(&self) -> bool {
        (self.security_control & Self::AUTHENTICATION_BIT) != 0
    }

    pub fn set_authentication(&mut self, authentication: bool) {
        self.set_bit(Self::AUTHENTICATION_BIT, authentication)
    }

    pub fn encryption(&self) -> bool {
        (self.security_control & Self::ENCRYPTION_BIT) != 0
    }

    pub fn set_encryption(&mut self, encryption: bool) {
        self.set_bit(Self::ENCRYPTION_BIT, encryption)
    }

    pub fn broadcast(&self) -> bool {
        (self.security_control & Self::BROADCAST_BIT) != 0
    }

    pub fn compression(&self) -> bool {
        (self.security_control & Self::COMPRESSION_BIT) != 0
    }

    fn set_bit(&mut self, bit: u8, value: bool) {
        if value {
            self.security_control |= bit
        } else {
            self.security_control &= !bit
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_security_control() {
        let input = [0x30, 0xFF];
        let (remaining, sc) = SecurityControl::parse(&input).unwrap();

        assert_eq!(remaining, &[0xFF]);
        assert_eq!(sc, SecurityControl::authenticated_encryption());
        assert_eq!(sc.suite_id(), 0);
    }

    #[test]
    fn test_suite_id_ignores_flags() {
        assert_eq!(SecurityControl::from(0xFF).suite_id(), 15);
        assert_eq!(SecurityControl::from(0xF0).suite_id(), 0);
    }

    #[test]
    fn test_flags() {
        let sc = SecurityControl::from(0xF0);
        assert!(sc.authentication());
        assert!(sc.encryption());
        assert!(sc.broadcast());
        assert!(sc.compression());

        assert!(!SecurityControl::default().is_protected());
        assert!(SecurityControl::authentication_only().is_protected());
        assert!(!SecurityControl::authentication_only().encryption());
        assert!(!SecurityControl::encryption_only().authentication());
    }

    #[test]
    fn test_setters_keep_other_bits() {
        let mut sc = SecurityControl::from(0xFF);
        sc.set_authentication(false);
        assert_eq!(sc.bits(), 0xEF);
        sc.set_encryption(false);
        assert_eq!(sc.bits(), 0xCF);
        sc.set_encryption(true);
        assert_eq!(u8::from(sc), 0xEF);
        assert!(sc.broadcast());
    }

    #[test]
    fn test_debug_format() {
        let debug = format!("{:?}", SecurityControl::from(0x3F));
        assert!(debug.contains("suite_id: 15"));
        assert!(debug.contains("authentication: true"));
        assert!(debug.contains("broadcast: false"));
    }
}
