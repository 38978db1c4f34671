//! The Action service (`C3` request, `C7` response).
//!
//! An Action invokes a method on a COSEM object, optionally with parameters,
//! and may return data. Large parameters travel as p-blocks
//! ([`DataBlockSa`]) in both directions.
//!
//! ```
//! use dlms_engine::action::{ActionRequest, ActionRequestNormal};
//! use dlms_engine::descriptor::MethodDescriptor;
//! use dlms_engine::ObisCode;
//!
//! // Clock: adjust_to_quarter
//! let request = ActionRequest::Normal(ActionRequestNormal {
//!     invoke_id: 0xC1,
//!     method: MethodDescriptor::new(8, ObisCode::new(0, 0, 1, 0, 0, 255), 1),
//!     parameters: None,
//! });
//! assert_eq!(request.encode(), [0xC3, 0x01, 0xC1, 0x00, 0x08, 0, 0, 1, 0, 0, 255, 0x01, 0x00]);
//! ```

use derive_try_from_primitive::TryFromPrimitive;
use nom::{
    IResult, Parser,
    bytes::streaming::tag,
    multi::length_count,
    number::streaming::{be_u32, u8},
};

use crate::data::{ByteBuffer, Data, parse_count, unexpected_tag};
use crate::descriptor::MethodDescriptor;
use crate::get::GetDataResult;
use crate::set::DataBlockSa;

pub const ACTION_REQUEST_TAG: u8 = 0xC3;
pub const ACTION_RESPONSE_TAG: u8 = 0xC7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum ActionResult {
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
    LongActionAborted = 15,
    NoLongActionInProgress = 16,
    OtherReason = 250,
}

impl ActionResult {
    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, raw) = u8(input)?;
        match Self::try_from(raw) {
            Ok(result) => Ok((rest, result)),
            Err(_) => Err(unexpected_tag(input)),
        }
    }
}

fn parse_optional<'a, T>(
    input: &'a [u8],
    parser: fn(&'a [u8]) -> IResult<&'a [u8], T>,
) -> IResult<&'a [u8], Option<T>> {
    let (rest, present) = u8(input)?;
    match present {
        0x00 => Ok((rest, None)),
        0x01 => parser(rest).map(|(rest, value)| (rest, Some(value))),
        _ => Err(unexpected_tag(input)),
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ActionRequest {
    Normal(ActionRequestNormal),
    NextPBlock { invoke_id: u8, block_number: u32 },
    WithList(ActionRequestWithList),
    WithFirstPBlock { invoke_id: u8, method: MethodDescriptor, block: DataBlockSa },
    WithListAndFirstPBlock { invoke_id: u8, methods: Vec<MethodDescriptor>, block: DataBlockSa },
    WithPBlock { invoke_id: u8, block: DataBlockSa },
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ActionRequestNormal {
    pub invoke_id: u8,
    pub method: MethodDescriptor,
    pub parameters: Option<Data>,
}

/// `parameters[i]` is passed to `methods[i]`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ActionRequestWithList {
    pub invoke_id: u8,
    pub methods: Vec<MethodDescriptor>,
    pub parameters: Vec<Data>,
}

impl ActionRequest {
    pub fn invoke_id(&self) -> u8 {
        match self {
            ActionRequest::Normal(r) => r.invoke_id,
            ActionRequest::WithList(r) => r.invoke_id,
            ActionRequest::NextPBlock { invoke_id, .. }
            | ActionRequest::WithFirstPBlock { invoke_id, .. }
            | ActionRequest::WithListAndFirstPBlock { invoke_id, .. }
            | ActionRequest::WithPBlock { invoke_id, .. } => *invoke_id,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, _) = tag(&[ACTION_REQUEST_TAG][..]).parse(input)?;
        let (rest, (choice, invoke_id)) = (u8, u8).parse(input)?;
        match choice {
            0x01 => {
                let (rest, method) = MethodDescriptor::parse(rest)?;
                let (rest, parameters) = parse_optional(rest, Data::parse)?;
                Ok((rest, ActionRequest::Normal(ActionRequestNormal { invoke_id, method, parameters })))
            }
            0x02 => {
                let (rest, block_number) = be_u32(rest)?;
                Ok((rest, ActionRequest::NextPBlock { invoke_id, block_number }))
            }
            0x03 => {
                let (rest, methods) = length_count(parse_count, MethodDescriptor::parse).parse(rest)?;
                let (rest, parameters) = length_count(parse_count, Data::parse).parse(rest)?;
                Ok((rest, ActionRequest::WithList(ActionRequestWithList { invoke_id, methods, parameters })))
            }
            0x04 => {
                let (rest, (method, block)) = (MethodDescriptor::parse, DataBlockSa::parse).parse(rest)?;
                Ok((rest, ActionRequest::WithFirstPBlock { invoke_id, method, block }))
            }
            0x05 => {
                let (rest, methods) = length_count(parse_count, MethodDescriptor::parse).parse(rest)?;
                let (rest, block) = DataBlockSa::parse(rest)?;
                Ok((rest, ActionRequest::WithListAndFirstPBlock { invoke_id, methods, block }))
            }
            0x06 => {
                let (rest, block) = DataBlockSa::parse(rest)?;
                Ok((rest, ActionRequest::WithPBlock { invoke_id, block }))
            }
            _ => Err(unexpected_tag(input)),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![ACTION_REQUEST_TAG];
        match self {
            ActionRequest::Normal(r) => {
                buf.extend_from_slice(&[0x01, r.invoke_id]);
                r.method.encode_into(&mut buf);
                match &r.parameters {
                    Some(data) => {
                        buf.push(0x01);
                        data.encode_into(&mut buf);
                    }
                    None => buf.push(0x00),
                }
            }
            ActionRequest::NextPBlock { invoke_id, block_number } => {
                buf.extend_from_slice(&[0x02, *invoke_id]);
                buf.push_u32(*block_number);
            }
            ActionRequest::WithList(r) => {
                buf.extend_from_slice(&[0x03, r.invoke_id]);
                buf.push_length(r.methods.len());
                for method in &r.methods {
                    method.encode_into(&mut buf);
                }
                buf.push_length(r.parameters.len());
                for data in &r.parameters {
                    data.encode_into(&mut buf);
                }
            }
            ActionRequest::WithFirstPBlock { invoke_id, method, block } => {
                buf.extend_from_slice(&[0x04, *invoke_id]);
                method.encode_into(&mut buf);
                block.encode_into(&mut buf);
            }
            ActionRequest::WithListAndFirstPBlock { invoke_id, methods, block } => {
                buf.extend_from_slice(&[0x05, *invoke_id]);
                buf.push_length(methods.len());
                for method in methods {
                    method.encode_into(&mut buf);
                }
                block.encode_into(&mut buf);
            }
            ActionRequest::WithPBlock { invoke_id, block } => {
                buf.extend_from_slice(&[0x06, *invoke_id]);
                block.encode_into(&mut buf);
            }
        }
        buf
    }
}

/// Action-Response-With-Optional-Data.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ActionResponseWithOptionalData {
    pub result: ActionResult,
    pub return_parameters: Option<GetDataResult>,
}

impl ActionResponseWithOptionalData {
    pub fn success(return_parameters: Option<GetDataResult>) -> Self {
        Self { result: ActionResult::Success, return_parameters }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, result) = ActionResult::parse(input)?;
        let (rest, return_parameters) = parse_optional(rest, GetDataResult::parse)?;
        Ok((rest, Self { result, return_parameters }))
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.result as u8);
        match &self.return_parameters {
            Some(data) => {
                buf.push(0x01);
                data.encode_into(buf);
            }
            None => buf.push(0x00),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ActionResponse {
    Normal { invoke_id: u8, response: ActionResponseWithOptionalData },
    /// A block of the encoded return value.
    WithPBlock { invoke_id: u8, block: DataBlockSa },
    WithList { invoke_id: u8, responses: Vec<ActionResponseWithOptionalData> },
    /// Asks for the next block of the request parameters.
    NextPBlock { invoke_id: u8, block_number: u32 },
}

impl ActionResponse {
    pub fn invoke_id(&self) -> u8 {
        match self {
            ActionResponse::Normal { invoke_id, .. }
            | ActionResponse::WithPBlock { invoke_id, .. }
            | ActionResponse::WithList { invoke_id, .. }
            | ActionResponse::NextPBlock { invoke_id, .. } => *invoke_id,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, _) = tag(&[ACTION_RESPONSE_TAG][..]).parse(input)?;
        let (rest, (choice, invoke_id)) = (u8, u8).parse(input)?;
        match choice {
            0x01 => {
                let (rest, response) = ActionResponseWithOptionalData::parse(rest)?;
                Ok((rest, ActionResponse::Normal { invoke_id, response }))
            }
            0x02 => {
                let (rest, block) = DataBlockSa::parse(rest)?;
                Ok((rest, ActionResponse::WithPBlock { invoke_id, block }))
            }
            0x03 => {
                let (rest, responses) =
                    length_count(parse_count, ActionResponseWithOptionalData::parse).parse(rest)?;
                Ok((rest, ActionResponse::WithList { invoke_id, responses }))
            }
            0x04 => {
                let (rest, block_number) = be_u32(rest)?;
                Ok((rest, ActionResponse::NextPBlock { invoke_id, block_number }))
            }
            _ => Err(unexpected_tag(input)),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![ACTION_RESPONSE_TAG];
        match self {
            ActionResponse::Normal { invoke_id, response } => {
                buf.extend_from_slice(&[0x01, *invoke_id]);
                response.encode_into(&mut buf);
            }
            ActionResponse::WithPBlock { invoke_id, block } => {
                buf.extend_from_slice(&[0x02, *invoke_id]);
                block.encode_into(&mut buf);
            }
            ActionResponse::WithList { invoke_id, responses } => {
                buf.extend_from_slice(&[0x03, *invoke_id]);
                buf.push_length(responses.len());
                for response in responses {
                    response.encode_into(&mut buf);
                }
            }
            ActionResponse::NextPBlock { invoke_id, block_number } => {
                buf.extend_from_slice(&[0x04, *invoke_id]);
                buf.push_u32(*block_number);
            }
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::get::DataAccessResult;
    use crate::obis_code::ObisCode;

    fn disconnect_control() -> MethodDescriptor {
        MethodDescriptor::new(70, ObisCode::new(0, 0, 96, 3, 10, 255), 1)
    }

    #[test]
    fn test_encode_normal_with_parameters() {
        let request = ActionRequest::Normal(ActionRequestNormal {
            invoke_id: 0xC1,
            method: disconnect_control(),
            parameters: Some(Data::Integer(0)),
        });
        #[rustfmt::skip]
        assert_eq!(request.encode(), [
            0xC3, 0x01, 0xC1,
            0x00, 0x46, 0x00, 0x00, 0x60, 0x03, 0x0A, 0xFF, 0x01,
            0x01, 0x0F, 0x00, // integer 0
        ]);
        assert_eq!(ActionRequest::parse(&request.encode()).unwrap().1, request);
    }

    #[test]
    fn test_request_variants_round_trip() {
        let block = DataBlockSa { last_block: false, block_number: 1, raw_data: vec![0x09, 0x04] };
        let requests = [
            ActionRequest::NextPBlock { invoke_id: 0xC2, block_number: 7 },
            ActionRequest::WithList(ActionRequestWithList {
                invoke_id: 0xC2,
                methods: vec![disconnect_control(), disconnect_control()],
                parameters: vec![Data::Integer(0), Data::Integer(0)],
            }),
            ActionRequest::WithFirstPBlock { invoke_id: 0xC2, method: disconnect_control(), block: block.clone() },
            ActionRequest::WithListAndFirstPBlock {
                invoke_id: 0xC2,
                methods: vec![disconnect_control()],
                block: block.clone(),
            },
            ActionRequest::WithPBlock { invoke_id: 0xC2, block },
        ];
        for request in requests {
            let encoded = request.encode();
            let (rest, parsed) = ActionRequest::parse(&encoded).unwrap();
            assert!(rest.is_empty());
            assert_eq!(parsed.invoke_id(), 0xC2);
            assert_eq!(parsed, request);
        }
    }

    #[test]
    fn test_parse_normal_response() {
        let (_, response) = ActionResponse::parse(&[0xC7, 0x01, 0xC1, 0x00, 0x00]).unwrap();
        assert_eq!(
            response,
            ActionResponse::Normal { invoke_id: 0xC1, response: ActionResponseWithOptionalData::success(None) }
        );

        // Return parameters: double-long-unsigned 42
        let bytes = [0xC7, 0x01, 0xC1, 0x00, 0x01, 0x00, 0x06, 0x00, 0x00, 0x00, 0x2A];
        let (_, response) = ActionResponse::parse(&bytes).unwrap();
        match response {
            ActionResponse::Normal { response, .. } => assert_eq!(
                response.return_parameters,
                Some(GetDataResult::Data(Data::DoubleLongUnsigned(42)))
            ),
            other => panic!("unexpected {other:?}"),
        }

        let bytes = [0xC7, 0x01, 0xC1, 0x03, 0x01, 0x01, 0x0B];
        let (_, response) = ActionResponse::parse(&bytes).unwrap();
        assert_eq!(response.encode(), bytes);
        match response {
            ActionResponse::Normal { response, .. } => {
                assert_eq!(response.result, ActionResult::ReadWriteDenied);
                assert_eq!(
                    response.return_parameters,
                    Some(GetDataResult::DataAccessError(DataAccessResult::ObjectUnavailable))
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_response_variants_round_trip() {
        let responses = [
            ActionResponse::WithPBlock {
                invoke_id: 0xC3,
                block: DataBlockSa { last_block: true, block_number: 2, raw_data: vec![0x00] },
            },
            ActionResponse::WithList {
                invoke_id: 0xC3,
                responses: vec![
                    ActionResponseWithOptionalData::success(None),
                    ActionResponseWithOptionalData { result: ActionResult::OtherReason, return_parameters: None },
                ],
            },
            ActionResponse::NextPBlock { invoke_id: 0xC3, block_number: 2 },
        ];
        for response in responses {
            assert_eq!(ActionResponse::parse(&response.encode()).unwrap().1, response);
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(ActionRequest::parse(&[0xC7, 0x01, 0xC1]).is_err());
        assert!(ActionRequest::parse(&[0xC3, 0x07, 0xC1]).is_err());
        // unknown action result
        assert!(ActionResponse::parse(&[0xC7, 0x01, 0xC1, 0x05, 0x00]).is_err());
        // optional-data flag other than 0 or 1
        assert!(ActionResponse::parse(&[0xC7, 0x01, 0xC1, 0x00, 0x02]).is_err());
        assert!(matches!(ActionResponse::parse(&[0xC7, 0x04, 0xC1, 0x00]), Err(nom::Err::Incomplete(_))));
    }
}
