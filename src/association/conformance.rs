//! The xDLMS conformance block.
//!
//! Conformance is a 24-bit BIT STRING. Bit 0 is the most significant bit of
//! the first byte, so bit `k` has the value `1 << (23 - k)`. The block is
//! carried inside the initiate request/response as
//! `5F 1F 04 00 <3 bytes>` (application tag 31, length 4, 0 unused bits).

use core::fmt;

use nom::{IResult, Parser, bytes::streaming::tag, number::streaming::u8};

const CONFORMANCE_TAG: [u8; 4] = [0x5F, 0x1F, 0x04, 0x00];

/// Services negotiated for an association.
///
/// ```
/// use dlms_engine::association::Conformance;
///
/// let proposed = Conformance::default();
/// assert_eq!(proposed.bits(), 0x00181F);
/// assert!(proposed.contains(Conformance::BLOCK_TRANSFER_WITH_GET_OR_READ));
/// assert!(!proposed.contains(Conformance::MULTIPLE_REFERENCES));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Conformance {
    bits: u32,
}

macro_rules! conformance_bits {
    ($($name:ident = $bit:expr, $label:literal;)*) => {
        impl Conformance {
            $(
                pub const $name: Self = Self { bits: 1 << (23 - $bit) };
            )*

            const NAMES: &'static [(Self, &'static str)] = &[$((Self::$name, $label)),*];
        }
    };
}

conformance_bits! {
    RESERVED_ZERO = 0, "reserved-zero";
    GENERAL_PROTECTION = 1, "general-protection";
    GENERAL_BLOCK_TRANSFER = 2, "general-block-transfer";
    READ = 3, "read";
    WRITE = 4, "write";
    UNCONFIRMED_WRITE = 5, "unconfirmed-write";
    DELTA_VALUE_ENCODING = 6, "delta-value-encoding";
    RESERVED_SEVEN = 7, "reserved-seven";
    ATTRIBUTE_0_SUPPORTED_WITH_SET = 8, "attribute0-supported-with-set";
    PRIORITY_MGMT_SUPPORTED = 9, "priority-mgmt-supported";
    ATTRIBUTE_0_SUPPORTED_WITH_GET = 10, "attribute0-supported-with-get";
    BLOCK_TRANSFER_WITH_GET_OR_READ = 11, "block-transfer-with-get-or-read";
    BLOCK_TRANSFER_WITH_SET_OR_WRITE = 12, "block-transfer-with-set-or-write";
    BLOCK_TRANSFER_WITH_ACTION = 13, "block-transfer-with-action";
    MULTIPLE_REFERENCES = 14, "multiple-references";
    INFORMATION_REPORT = 15, "information-report";
    DATA_NOTIFICATION = 16, "data-notification";
    ACCESS = 17, "access";
    PARAMETERIZED_ACCESS = 18, "parameterized-access";
    GET = 19, "get";
    SET = 20, "set";
    SELECTIVE_ACCESS = 21, "selective-access";
    EVENT_NOTIFICATION = 22, "event-notification";
    ACTION = 23, "action";
}

impl Conformance {
    pub const EMPTY: Self = Self { bits: 0 };

    /// What a logical-name client proposes unless configured otherwise:
    /// block transfer for get and set, plus get, set, selective access,
    /// event notification and action (`0x00181F`).
    pub const DEFAULT_CLIENT: Self = Self {
        bits: Self::BLOCK_TRANSFER_WITH_GET_OR_READ.bits
            | Self::BLOCK_TRANSFER_WITH_SET_OR_WRITE.bits
            | Self::GET.bits
            | Self::SET.bits
            | Self::SELECTIVE_ACCESS.bits
            | Self::EVENT_NOTIFICATION.bits
            | Self::ACTION.bits,
    };

    /// Anything above 24 bits is dropped.
    pub const fn from_bits(bits: u32) -> Self {
        Self { bits: bits & 0x00FF_FFFF }
    }

    pub const fn bits(&self) -> u32 {
        self.bits
    }

    pub const fn from_bytes(bytes: [u8; 3]) -> Self {
        Self { bits: ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32 }
    }

    pub const fn to_bytes(self) -> [u8; 3] {
        [(self.bits >> 16) as u8, (self.bits >> 8) as u8, self.bits as u8]
    }

    pub const fn contains(self, other: Self) -> bool {
        self.bits & other.bits == other.bits
    }

    pub const fn is_empty(self) -> bool {
        self.bits == 0
    }

    /// Parses the tagged block `5F 1F 04 00 xx xx xx`.
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, _) = tag(&CONFORMANCE_TAG[..]).parse(input)?;
        let (input, (b0, b1, b2)) = (u8, u8, u8).parse(input)?;
        Ok((input, Self::from_bytes([b0, b1, b2])))
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&CONFORMANCE_TAG);
        buf.extend_from_slice(&self.to_bytes());
    }

    /// Names of the set bits, most significant first.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        Self::NAMES.iter().filter(|(flag, _)| self.contains(*flag)).map(|(_, name)| *name)
    }
}

impl Default for Conformance {
    fn default() -> Self {
        Self::DEFAULT_CLIENT
    }
}

impl core::ops::BitOr for Conformance {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self { bits: self.bits | rhs.bits }
    }
}

impl core::ops::BitOrAssign for Conformance {
    fn bitor_assign(&mut self, rhs: Self) {
        self.bits |= rhs.bits;
    }
}

/// Negotiation intersects the proposed and the granted blocks.
impl core::ops::BitAnd for Conformance {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self { bits: self.bits & rhs.bits }
    }
}

impl core::ops::Not for Conformance {
    type Output = Self;

    fn not(self) -> Self {
        Self::from_bits(!self.bits)
    }
}

impl fmt::Debug for Conformance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Conformance(0x{:06X})", self.bits)
    }
}

impl fmt::Display for Conformance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for name in self.names() {
            if !first {
                f.write_str(" | ")?;
            }
            f.write_str(name)?;
            first = false;
        }
        if first {
            f.write_str("(none)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_numbering() {
        assert_eq!(Conformance::RESERVED_ZERO.bits(), 0x80_0000);
        assert_eq!(Conformance::BLOCK_TRANSFER_WITH_GET_OR_READ.bits(), 0x1000);
        assert_eq!(Conformance::BLOCK_TRANSFER_WITH_SET_OR_WRITE.bits(), 0x0800);
        assert_eq!(Conformance::BLOCK_TRANSFER_WITH_ACTION.bits(), 0x0400);
        assert_eq!(Conformance::MULTIPLE_REFERENCES.bits(), 0x0200);
        assert_eq!(Conformance::DATA_NOTIFICATION.bits(), 0x0080);
        assert_eq!(Conformance::GET.bits(), 0x0010);
        assert_eq!(Conformance::SET.bits(), 0x0008);
        assert_eq!(Conformance::SELECTIVE_ACCESS.bits(), 0x0004);
        assert_eq!(Conformance::EVENT_NOTIFICATION.bits(), 0x0002);
        assert_eq!(Conformance::ACTION.bits(), 0x0001);
    }

    #[test]
    fn test_default_client() {
        assert_eq!(Conformance::default().bits(), 0x00181F);
        assert_eq!(Conformance::default().to_bytes(), [0x00, 0x18, 0x1F]);
    }

    #[test]
    fn test_parse_and_encode() {
        let input = [0x5F, 0x1F, 0x04, 0x00, 0x00, 0x50, 0x1F, 0xAA];
        let (rest, conformance) = Conformance::parse(&input).unwrap();
        assert_eq!(rest, &[0xAA]);
        assert_eq!(conformance.bits(), 0x00501F);
        assert!(conformance.contains(Conformance::BLOCK_TRANSFER_WITH_GET_OR_READ));
        assert!(conformance.contains(Conformance::ATTRIBUTE_0_SUPPORTED_WITH_GET));

        let mut buf = Vec::new();
        conformance.encode_into(&mut buf);
        assert_eq!(buf, &input[..7]);
    }

    #[test]
    fn test_parse_wrong_tag() {
        assert!(Conformance::parse(&[0x5F, 0x1E, 0x04, 0x00, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_negotiation() {
        let granted = Conformance::from_bits(0x00101F);
        let negotiated = Conformance::default() & granted;
        assert!(negotiated.contains(Conformance::BLOCK_TRANSFER_WITH_GET_OR_READ));
        assert!(!negotiated.contains(Conformance::BLOCK_TRANSFER_WITH_SET_OR_WRITE));
        assert_eq!((!Conformance::EMPTY).bits(), 0xFF_FFFF);
    }

    #[test]
    fn test_display_lists_names() {
        let conformance = Conformance::GET | Conformance::ACTION;
        assert_eq!(conformance.to_string(), "get | action");
        assert_eq!(Conformance::EMPTY.to_string(), "(none)");
        assert_eq!(Conformance::from_bits(0x1_000010), Conformance::GET);
    }
}
