//! The Get service (`C0` request, `C4` response).
//!
//! A Get reads one attribute ([`GetRequestNormal`]) or several at once
//! ([`GetRequestWithList`]). When the encoded value does not fit into one
//! APDU the server answers with numbered [`DataBlockG`] blocks, and the client
//! asks for each following block with [`GetRequestNext`].
//!
//! ```
//! use dlms_engine::descriptor::AttributeDescriptor;
//! use dlms_engine::get::{GetRequest, GetRequestNormal};
//! use dlms_engine::ObisCode;
//!
//! let request = GetRequest::Normal(GetRequestNormal {
//!     invoke_id: 0xC1,
//!     attribute: AttributeDescriptor::new(8, ObisCode::new(0, 0, 1, 0, 0, 255), 2),
//!     access_selection: None,
//! });
//! assert_eq!(request.encode(), [0xC0, 0x01, 0xC1, 0x00, 0x08, 0, 0, 1, 0, 0, 255, 0x02, 0x00]);
//! ```

use derive_try_from_primitive::TryFromPrimitive;
use nom::{
    IResult, Parser,
    bytes::streaming::tag,
    multi::length_count,
    number::streaming::{be_u32, u8},
};

use crate::data::{ByteBuffer, Data, parse_count, parse_octets, unexpected_tag};
use crate::descriptor::{
    AttributeDescriptor, AttributeWithSelection, SelectiveAccessDescriptor, encode_access_selection,
    parse_access_selection,
};

pub const GET_REQUEST_TAG: u8 = 0xC0;
pub const GET_RESPONSE_TAG: u8 = 0xC4;

/// Result code of an attribute access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum DataAccessResult {
    Success = 0,
    HardwareFault = 1,
    TemporaryFailure = 2,
    ReadWriteDenied = 3,
    ObjectUndefined = 4,
    ObjectClassInconsistent = 9,
    ObjectUnavailable = 11,
    TypeUnmatched = 12,
    ScopeOfAccessViolated = 13,
    DataBlockUnavailable = 14,
    LongGetAborted = 15,
    NoLongGetInProgress = 16,
    LongSetAborted = 17,
    NoLongSetInProgress = 18,
    DataBlockNumberInvalid = 19,
    OtherReason = 250,
}

impl DataAccessResult {
    pub(crate) fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, raw) = u8(input)?;
        match Self::try_from(raw) {
            Ok(result) => Ok((rest, result)),
            Err(_) => Err(unexpected_tag(input)),
        }
    }
}

/// Get-Data-Result: `00 <Data>` or `01 <DataAccessResult>`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum GetDataResult {
    Data(Data),
    DataAccessError(DataAccessResult),
}

impl GetDataResult {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, choice) = u8(input)?;
        match choice {
            0x00 => Data::parse(rest).map(|(rest, data)| (rest, GetDataResult::Data(data))),
            0x01 => DataAccessResult::parse(rest)
                .map(|(rest, result)| (rest, GetDataResult::DataAccessError(result))),
            _ => Err(unexpected_tag(input)),
        }
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            GetDataResult::Data(data) => {
                buf.push(0x00);
                data.encode_into(buf);
            }
            GetDataResult::DataAccessError(result) => buf.extend_from_slice(&[0x01, *result as u8]),
        }
    }
}

/// The result carried by a Get data block: a slice of the encoded value, or
/// an access error that ends the transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DataBlockResult {
    RawData(Vec<u8>),
    DataAccessError(DataAccessResult),
}

/// DataBlock-G: `<last u8> <block number u32> <00 len raw | 01 result>`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DataBlockG {
    pub last_block: bool,
    pub block_number: u32,
    pub result: DataBlockResult,
}

impl DataBlockG {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, (last_block, block_number)) = (u8, be_u32).parse(input)?;
        let (rest, choice) = u8(input)?;
        let (rest, result) = match choice {
            0x00 => {
                let (rest, raw) = parse_octets(rest)?;
                (rest, DataBlockResult::RawData(raw))
            }
            0x01 => {
                let (rest, error) = DataAccessResult::parse(rest)?;
                (rest, DataBlockResult::DataAccessError(error))
            }
            _ => return Err(unexpected_tag(input)),
        };
        Ok((rest, Self { last_block: last_block != 0, block_number, result }))
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.last_block as u8);
        buf.push_u32(self.block_number);
        match &self.result {
            DataBlockResult::RawData(raw) => {
                buf.push(0x00);
                buf.push_length(raw.len());
                buf.extend_from_slice(raw);
            }
            DataBlockResult::DataAccessError(error) => buf.extend_from_slice(&[0x01, *error as u8]),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum GetRequest {
    Normal(GetRequestNormal),
    Next(GetRequestNext),
    WithList(GetRequestWithList),
}

/// ```text
/// C0 01 C1 00 08 00 00 01 00 00 FF 02 00
/// │  │  │  └─────────┬──────────────┘ └── no selective access
/// │  │  │            └─────────────────── attribute descriptor
/// │  │  └──────────────────────────────── invoke id and priority
/// │  └─────────────────────────────────── get-request-normal
/// └────────────────────────────────────── get-request
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct GetRequestNormal {
    pub invoke_id: u8,
    pub attribute: AttributeDescriptor,
    pub access_selection: Option<SelectiveAccessDescriptor>,
}

/// Asks for the block after `block_number`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct GetRequestNext {
    pub invoke_id: u8,
    pub block_number: u32,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct GetRequestWithList {
    pub invoke_id: u8,
    pub attributes: Vec<AttributeWithSelection>,
}

impl GetRequest {
    pub fn invoke_id(&self) -> u8 {
        match self {
            GetRequest::Normal(r) => r.invoke_id,
            GetRequest::Next(r) => r.invoke_id,
            GetRequest::WithList(r) => r.invoke_id,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, _) = tag(&[GET_REQUEST_TAG][..]).parse(input)?;
        let (rest, (choice, invoke_id)) = (u8, u8).parse(input)?;
        match choice {
            0x01 => {
                let (rest, attribute) = AttributeDescriptor::parse(rest)?;
                let (rest, access_selection) = parse_access_selection(rest)?;
                Ok((rest, GetRequest::Normal(GetRequestNormal { invoke_id, attribute, access_selection })))
            }
            0x02 => {
                let (rest, block_number) = be_u32(rest)?;
                Ok((rest, GetRequest::Next(GetRequestNext { invoke_id, block_number })))
            }
            0x03 => {
                let (rest, attributes) = length_count(parse_count, AttributeWithSelection::parse).parse(rest)?;
                Ok((rest, GetRequest::WithList(GetRequestWithList { invoke_id, attributes })))
            }
            _ => Err(unexpected_tag(input)),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![GET_REQUEST_TAG];
        match self {
            GetRequest::Normal(r) => {
                buf.extend_from_slice(&[0x01, r.invoke_id]);
                r.attribute.encode_into(&mut buf);
                encode_access_selection(&r.access_selection, &mut buf);
            }
            GetRequest::Next(r) => {
                buf.extend_from_slice(&[0x02, r.invoke_id]);
                buf.push_u32(r.block_number);
            }
            GetRequest::WithList(r) => {
                buf.extend_from_slice(&[0x03, r.invoke_id]);
                buf.push_length(r.attributes.len());
                for attribute in &r.attributes {
                    attribute.encode_into(&mut buf);
                }
            }
        }
        buf
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum GetResponse {
    Normal(GetResponseNormal),
    WithDataBlock(GetResponseWithDataBlock),
    WithList(GetResponseWithList),
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct GetResponseNormal {
    pub invoke_id: u8,
    pub result: GetDataResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct GetResponseWithDataBlock {
    pub invoke_id: u8,
    pub block: DataBlockG,
}

/// One result per requested attribute, in request order.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct GetResponseWithList {
    pub invoke_id: u8,
    pub results: Vec<GetDataResult>,
}

impl GetResponse {
    pub fn invoke_id(&self) -> u8 {
        match self {
            GetResponse::Normal(r) => r.invoke_id,
            GetResponse::WithDataBlock(r) => r.invoke_id,
            GetResponse::WithList(r) => r.invoke_id,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, _) = tag(&[GET_RESPONSE_TAG][..]).parse(input)?;
        let (rest, (choice, invoke_id)) = (u8, u8).parse(input)?;
        match choice {
            0x01 => {
                let (rest, result) = GetDataResult::parse(rest)?;
                Ok((rest, GetResponse::Normal(GetResponseNormal { invoke_id, result })))
            }
            0x02 => {
                let (rest, block) = DataBlockG::parse(rest)?;
                Ok((rest, GetResponse::WithDataBlock(GetResponseWithDataBlock { invoke_id, block })))
            }
            0x03 => {
                let (rest, results) = length_count(parse_count, GetDataResult::parse).parse(rest)?;
                Ok((rest, GetResponse::WithList(GetResponseWithList { invoke_id, results })))
            }
            _ => Err(unexpected_tag(input)),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![GET_RESPONSE_TAG];
        match self {
            GetResponse::Normal(r) => {
                buf.extend_from_slice(&[0x01, r.invoke_id]);
                r.result.encode_into(&mut buf);
            }
            GetResponse::WithDataBlock(r) => {
                buf.extend_from_slice(&[0x02, r.invoke_id]);
                r.block.encode_into(&mut buf);
            }
            GetResponse::WithList(r) => {
                buf.extend_from_slice(&[0x03, r.invoke_id]);
                buf.push_length(r.results.len());
                for result in &r.results {
                    result.encode_into(&mut buf);
                }
            }
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::EntryDescriptor;
    use crate::obis_code::ObisCode;

    #[test]
    fn test_encode_get_request_with_entry_access() {
        let request = GetRequest::Normal(GetRequestNormal {
            invoke_id: 0x81,
            attribute: AttributeDescriptor::new(1, ObisCode::new(1, 0, 0, 3, 0, 255), 2),
            access_selection: Some(SelectiveAccessDescriptor::by_entry(&EntryDescriptor::new(0, 5))),
        });

        let expected =
            hex::decode("C00181000101000003 00FF 02 01 02 02 04 0600000000 0600000005 120000 120000".replace(' ', ""))
                .unwrap();
        assert_eq!(request.encode(), expected);

        let (rest, parsed) = GetRequest::parse(&expected).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_parse_get_response_normal() {
        // C4 01 C1 00 06 00 00 04 D2: double-long-unsigned 1234
        let input = [0xC4, 0x01, 0xC1, 0x00, 0x06, 0x00, 0x00, 0x04, 0xD2];
        let (rest, response) = GetResponse::parse(&input).unwrap();
        assert!(rest.is_empty());
        assert_eq!(
            response,
            GetResponse::Normal(GetResponseNormal {
                invoke_id: 0xC1,
                result: GetDataResult::Data(Data::DoubleLongUnsigned(1234)),
            })
        );
        assert_eq!(response.encode(), input);
    }

    #[test]
    fn test_parse_get_response_access_error() {
        let (_, response) = GetResponse::parse(&[0xC4, 0x01, 0xC1, 0x01, 0x03]).unwrap();
        assert_eq!(
            response,
            GetResponse::Normal(GetResponseNormal {
                invoke_id: 0xC1,
                result: GetDataResult::DataAccessError(DataAccessResult::ReadWriteDenied),
            })
        );
        assert!(GetResponse::parse(&[0xC4, 0x01, 0xC1, 0x01, 0x05]).is_err());
    }

    #[test]
    fn test_parse_data_block() {
        #[rustfmt::skip]
        let input = [
            0xC4, 0x02, 0xC1,
            0x00,                   // not last
            0x00, 0x00, 0x00, 0x01, // block 1
            0x00, 0x04,             // raw data, 4 bytes
            0x01, 0x02, 0x11, 0x05,
        ];
        let (rest, response) = GetResponse::parse(&input).unwrap();
        assert!(rest.is_empty());
        let GetResponse::WithDataBlock(GetResponseWithDataBlock { block, .. }) = &response else {
            panic!("expected data block, got {response:?}");
        };
        assert!(!block.last_block);
        assert_eq!(block.block_number, 1);
        assert_eq!(block.result, DataBlockResult::RawData(vec![0x01, 0x02, 0x11, 0x05]));
        assert_eq!(response.encode(), input);
    }

    #[test]
    fn test_data_block_truncated_raw_data() {
        let input = [0xC4, 0x02, 0xC1, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x08, 0x01];
        assert!(matches!(GetResponse::parse(&input), Err(nom::Err::Incomplete(_))));
    }

    #[test]
    fn test_with_list_round_trip() {
        let request = GetRequest::WithList(GetRequestWithList {
            invoke_id: 0xC2,
            attributes: vec![
                AttributeWithSelection::new(AttributeDescriptor::new(8, ObisCode::new(0, 0, 1, 0, 0, 255), 2)),
                AttributeWithSelection::new(AttributeDescriptor::new(3, ObisCode::new(1, 0, 1, 8, 0, 255), 2)),
            ],
        });
        let encoded = request.encode();
        assert_eq!(&encoded[..4], &[0xC0, 0x03, 0xC2, 0x02]);
        assert_eq!(GetRequest::parse(&encoded).unwrap().1, request);

        let response = GetResponse::WithList(GetResponseWithList {
            invoke_id: 0xC2,
            results: vec![
                GetDataResult::DataAccessError(DataAccessResult::ObjectUndefined),
                GetDataResult::Data(Data::Long(-3)),
            ],
        });
        let encoded = response.encode();
        assert_eq!(encoded, [0xC4, 0x03, 0xC2, 0x02, 0x01, 0x04, 0x00, 0x10, 0xFF, 0xFD]);
        assert_eq!(GetResponse::parse(&encoded).unwrap().1, response);
    }

    #[test]
    fn test_next_request() {
        let request = GetRequest::Next(GetRequestNext { invoke_id: 0xC3, block_number: 2 });
        assert_eq!(request.encode(), [0xC0, 0x02, 0xC3, 0x00, 0x00, 0x00, 0x02]);
        assert_eq!(request.invoke_id(), 0xC3);
    }

    #[test]
    fn test_unknown_choice() {
        assert!(matches!(GetRequest::parse(&[0xC0, 0x04, 0xC1]), Err(nom::Err::Error(_))));
    }
}
