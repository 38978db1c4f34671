use nom::IResult;
use nom::error::{Error, ErrorKind};

use super::rlrq::{encode_release, parse_release};
use super::{RLRE_TAG, ReleaseResponseReason};

/// A-Release response: `63 len 80 01 <reason> [BE len 04 len <user information>]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RlreApdu {
    pub reason: Option<ReleaseResponseReason>,
    pub user_information: Option<Vec<u8>>,
}

impl RlreApdu {
    pub fn new() -> Self {
        Self { reason: Some(ReleaseResponseReason::Normal), user_information: None }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_release(RLRE_TAG, self.reason.map(|r| r as u8), self.user_information.as_deref())
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, (reason, user_information)) = parse_release(input, RLRE_TAG)?;
        let reason = reason
            .map(ReleaseResponseReason::try_from)
            .transpose()
            .map_err(|_| nom::Err::Error(Error::new(input, ErrorKind::Verify)))?;
        Ok((rest, Self { reason, user_information }))
    }
}
