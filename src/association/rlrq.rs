use nom::IResult;
use nom::error::{Error, ErrorKind};

use super::aarq::USER_INFORMATION;
use super::ber::{self, OCTET_STRING, TagClass, TagType, expect_tlv, parse_tlv, tlv};
use super::{RLRQ_TAG, ReleaseRequestReason};

pub(super) const REASON: u8 = ber::tag(TagClass::ContextSpecific, TagType::Primitive, 0);

/// A-Release request: `62 len 80 01 <reason> [BE len 04 len <user information>]`.
///
/// When the association is ciphered the user information carries a
/// ciphered InitiateRequest.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RlrqApdu {
    pub reason: Option<ReleaseRequestReason>,
    pub user_information: Option<Vec<u8>>,
}

impl RlrqApdu {
    pub fn new() -> Self {
        Self { reason: Some(ReleaseRequestReason::Normal), user_information: None }
    }

    pub fn with_user_information(user_information: Vec<u8>) -> Self {
        Self { user_information: Some(user_information), ..Self::new() }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_release(RLRQ_TAG, self.reason.map(|r| r as u8), self.user_information.as_deref())
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, (reason, user_information)) = parse_release(input, RLRQ_TAG)?;
        let reason = reason
            .map(ReleaseRequestReason::try_from)
            .transpose()
            .map_err(|_| nom::Err::Error(Error::new(input, ErrorKind::Verify)))?;
        Ok((rest, Self { reason, user_information }))
    }
}

/// Shared layout of RLRQ and RLRE.
pub(super) fn encode_release(tag: u8, reason: Option<u8>, user_information: Option<&[u8]>) -> Vec<u8> {
    let mut content = Vec::new();
    if let Some(reason) = reason {
        content.extend(tlv(REASON, &[reason]));
    }
    if let Some(user_information) = user_information {
        content.extend(tlv(USER_INFORMATION, &tlv(OCTET_STRING, user_information)));
    }
    tlv(tag, &content)
}

pub(super) fn parse_release(input: &[u8], tag: u8) -> IResult<&[u8], (Option<u8>, Option<Vec<u8>>)> {
    let (rest, mut content) = expect_tlv(input, tag)?;
    let mut reason = None;
    let mut user_information = None;
    while !content.is_empty() {
        let (next, (field, value)) = parse_tlv(content)?;
        match (field, value) {
            (REASON, [byte]) => reason = Some(*byte),
            (REASON, _) => return Err(nom::Err::Error(Error::new(content, ErrorKind::LengthValue))),
            (USER_INFORMATION, _) => {
                let (_, octets) = expect_tlv(value, OCTET_STRING)?;
                user_information = Some(octets.to_vec());
            }
            _ => {}
        }
        content = next;
    }
    Ok((rest, (reason, user_information)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_normal() {
        assert_eq!(RlrqApdu::new().encode(), [0x62, 0x03, 0x80, 0x01, 0x00]);
        assert_eq!(RlrqApdu::default().encode(), [0x62, 0x00]);
    }

    #[test]
    fn test_with_user_information() {
        let rlrq = RlrqApdu::with_user_information(vec![0x21, 0x03, 0x30, 0x00, 0x01]);
        let encoded = rlrq.encode();
        assert_eq!(
            encoded,
            [0x62, 0x0C, 0x80, 0x01, 0x00, 0xBE, 0x07, 0x04, 0x05, 0x21, 0x03, 0x30, 0x00, 0x01]
        );
        let (rest, parsed) = RlrqApdu::parse(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, rlrq);
    }

    #[test]
    fn test_parse_rejects_unknown_reason() {
        assert!(RlrqApdu::parse(&[0x62, 0x03, 0x80, 0x01, 0x05]).is_err());
        assert!(RlrqApdu::parse(&[0x62, 0x04, 0x80, 0x02, 0x00, 0x00]).is_err());
    }
}
