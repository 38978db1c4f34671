//! The small subset of ASN.1 BER used by the ACSE APDUs.
//!
//! Only single-byte tags and definite lengths occur in AARQ, AARE, RLRQ and
//! RLRE, so a TLV is always `[tag][BER length][content]`.

use nom::{IResult, Parser, bytes::streaming::take, number::streaming::u8};

use crate::data::{ByteBuffer, parse_count, unexpected_tag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagClass {
    Universal,
    Application,
    ContextSpecific,
}

impl TagClass {
    const fn to_bits(self) -> u8 {
        match self {
            TagClass::Universal => 0b00_000000,
            TagClass::Application => 0b01_000000,
            TagClass::ContextSpecific => 0b10_000000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagType {
    Primitive,
    /// Contains nested TLVs.
    Constructed,
}

impl TagType {
    const fn to_bit(self) -> u8 {
        match self {
            TagType::Primitive => 0b0000_0000,
            TagType::Constructed => 0b0010_0000,
        }
    }
}

/// Builds a single-byte tag. Tag numbers above 30 need the multi-byte form
/// and never occur in ACSE APDUs.
pub const fn tag(class: TagClass, tag_type: TagType, tag_number: u8) -> u8 {
    class.to_bits() | tag_type.to_bit() | (tag_number & 0b000_11111)
}

pub const OBJECT_IDENTIFIER: u8 = tag(TagClass::Universal, TagType::Primitive, 6);
pub const OCTET_STRING: u8 = tag(TagClass::Universal, TagType::Primitive, 4);
pub const INTEGER: u8 = tag(TagClass::Universal, TagType::Primitive, 2);

pub fn encode_tlv(buf: &mut Vec<u8>, tag: u8, content: &[u8]) {
    buf.push(tag);
    buf.push_length(content.len());
    buf.extend_from_slice(content);
}

pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(content.len() + 3);
    encode_tlv(&mut buf, tag, content);
    buf
}

/// Parses any TLV, returning its tag byte and content.
pub fn parse_tlv(input: &[u8]) -> IResult<&[u8], (u8, &[u8])> {
    let (input, tag) = u8(input)?;
    let (input, len) = parse_count(input)?;
    let (input, content) = take(len).parse(input)?;
    Ok((input, (tag, content)))
}

/// Parses a TLV whose tag must be `expected`.
pub fn expect_tlv(input: &[u8], expected: u8) -> IResult<&[u8], &[u8]> {
    let (rest, (tag, content)) = parse_tlv(input)?;
    if tag != expected {
        return Err(unexpected_tag(input));
    }
    Ok((rest, content))
}

/// Parses an `INTEGER` that fits in one byte, as used for ACSE enums.
pub fn parse_small_integer(input: &[u8]) -> IResult<&[u8], u8> {
    let (rest, content) = expect_tlv(input, INTEGER)?;
    match content {
        [value] => Ok((rest, *value)),
        _ => Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::LengthValue))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_construction() {
        assert_eq!(tag(TagClass::Application, TagType::Constructed, 0), 0x60);
        assert_eq!(tag(TagClass::Application, TagType::Constructed, 1), 0x61);
        assert_eq!(tag(TagClass::ContextSpecific, TagType::Constructed, 1), 0xA1);
        assert_eq!(tag(TagClass::ContextSpecific, TagType::Constructed, 30), 0xBE);
        assert_eq!(tag(TagClass::ContextSpecific, TagType::Primitive, 10), 0x8A);
        assert_eq!(OBJECT_IDENTIFIER, 0x06);
    }

    #[test]
    fn test_tlv_round_trip_long_content() {
        let content = vec![0xAB; 300];
        let encoded = tlv(OCTET_STRING, &content);
        assert_eq!(&encoded[..4], &[0x04, 0x82, 0x01, 0x2C]);

        let (rest, parsed) = expect_tlv(&encoded, OCTET_STRING).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, content.as_slice());
    }

    #[test]
    fn test_expect_tlv_wrong_tag() {
        assert!(matches!(expect_tlv(&[0x04, 0x00], OBJECT_IDENTIFIER), Err(nom::Err::Error(_))));
    }

    #[test]
    fn test_small_integer() {
        assert_eq!(parse_small_integer(&[0x02, 0x01, 0x0D]).unwrap().1, 13);
        assert!(parse_small_integer(&[0x02, 0x02, 0x00, 0x01]).is_err());
    }
}
