//! xDLMS InitiateRequest and InitiateResponse.
//!
//! These travel inside the user-information field of AARQ and AARE, either
//! in plain or as the plaintext of a glo/ded envelope. Both are A-XDR encoded
//! and start with their own tag byte.

use core::fmt;

use nom::{
    IResult, Parser,
    bytes::streaming::tag,
    number::streaming::{be_u16, i8, u8},
};

use super::{Conformance, DLMS_VERSION, VAA_NAME_LN};
use crate::data::{ByteBuffer, parse_octets, unexpected_tag};

pub const INITIATE_REQUEST_TAG: u8 = 0x01;
pub const INITIATE_RESPONSE_TAG: u8 = 0x08;

/// ```text
/// InitiateRequest ::= SEQUENCE {
///     dedicated-key               OCTET STRING OPTIONAL,
///     response-allowed            BOOLEAN DEFAULT TRUE,
///     proposed-quality-of-service [0] IMPLICIT Integer8 OPTIONAL,
///     proposed-dlms-version-number Unsigned8,
///     proposed-conformance        Conformance,
///     client-max-receive-pdu-size Unsigned16
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateRequest {
    pub dedicated_key: Option<Vec<u8>>,
    pub response_allowed: bool,
    pub proposed_quality_of_service: Option<i8>,
    pub proposed_dlms_version_number: u8,
    pub proposed_conformance: Conformance,
    pub client_max_receive_pdu_size: u16,
}

impl InitiateRequest {
    pub fn new(conformance: Conformance, max_pdu_size: u16) -> Self {
        Self {
            dedicated_key: None,
            response_allowed: true,
            proposed_quality_of_service: None,
            proposed_dlms_version_number: DLMS_VERSION,
            proposed_conformance: conformance,
            client_max_receive_pdu_size: max_pdu_size,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![INITIATE_REQUEST_TAG];
        match &self.dedicated_key {
            Some(key) => {
                buf.push(0x01);
                buf.push_length(key.len());
                buf.extend_from_slice(key);
            }
            None => buf.push(0x00),
        }
        // A DEFAULT field equal to its default is sent as "absent".
        if self.response_allowed {
            buf.push(0x00);
        } else {
            buf.extend_from_slice(&[0x01, 0x00]);
        }
        match self.proposed_quality_of_service {
            Some(qos) => buf.extend_from_slice(&[0x01, qos as u8]),
            None => buf.push(0x00),
        }
        buf.push(self.proposed_dlms_version_number);
        self.proposed_conformance.encode_into(&mut buf);
        buf.push_u16(self.client_max_receive_pdu_size);
        buf
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, _) = tag(&[INITIATE_REQUEST_TAG][..]).parse(input)?;
        let (input, dedicated_key) = optional(input, parse_octets)?;
        let (input, response_allowed) = optional(input, |i| u8(i).map(|(i, b)| (i, b != 0)))?;
        let (input, proposed_quality_of_service) = optional(input, i8)?;
        let (input, proposed_dlms_version_number) = u8(input)?;
        let (input, proposed_conformance) = Conformance::parse(input)?;
        let (input, client_max_receive_pdu_size) = be_u16(input)?;
        Ok((
            input,
            Self {
                dedicated_key,
                response_allowed: response_allowed.unwrap_or(true),
                proposed_quality_of_service,
                proposed_dlms_version_number,
                proposed_conformance,
                client_max_receive_pdu_size,
            },
        ))
    }
}

impl fmt::Display for InitiateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InitiateRequest(v{}, {:?}, max_pdu={})",
            self.proposed_dlms_version_number, self.proposed_conformance, self.client_max_receive_pdu_size
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateResponse {
    pub negotiated_quality_of_service: Option<i8>,
    pub negotiated_dlms_version_number: u8,
    pub negotiated_conformance: Conformance,
    pub server_max_receive_pdu_size: u16,
    pub vaa_name: u16,
}

impl InitiateResponse {
    pub fn new(conformance: Conformance, max_pdu_size: u16) -> Self {
        Self {
            negotiated_quality_of_service: None,
            negotiated_dlms_version_number: DLMS_VERSION,
            negotiated_conformance: conformance,
            server_max_receive_pdu_size: max_pdu_size,
            vaa_name: VAA_NAME_LN,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![INITIATE_RESPONSE_TAG];
        match self.negotiated_quality_of_service {
            Some(qos) => buf.extend_from_slice(&[0x01, qos as u8]),
            None => buf.push(0x00),
        }
        buf.push(self.negotiated_dlms_version_number);
        self.negotiated_conformance.encode_into(&mut buf);
        buf.push_u16(self.server_max_receive_pdu_size);
        buf.push_u16(self.vaa_name);
        buf
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, _) = tag(&[INITIATE_RESPONSE_TAG][..]).parse(input)?;
        let (input, negotiated_quality_of_service) = optional(input, i8)?;
        let (input, negotiated_dlms_version_number) = u8(input)?;
        let (input, negotiated_conformance) = Conformance::parse(input)?;
        let (input, (server_max_receive_pdu_size, vaa_name)) = (be_u16, be_u16).parse(input)?;
        Ok((
            input,
            Self {
                negotiated_quality_of_service,
                negotiated_dlms_version_number,
                negotiated_conformance,
                server_max_receive_pdu_size,
                vaa_name,
            },
        ))
    }
}

impl fmt::Display for InitiateResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InitiateResponse(v{}, {:?}, max_pdu={}, vaa=0x{:04X})",
            self.negotiated_dlms_version_number,
            self.negotiated_conformance,
            self.server_max_receive_pdu_size,
            self.vaa_name
        )
    }
}

/// An A-XDR OPTIONAL: `00` when absent, `01` followed by the value.
fn optional<'a, T>(
    input: &'a [u8],
    mut value: impl FnMut(&'a [u8]) -> IResult<&'a [u8], T>,
) -> IResult<&'a [u8], Option<T>> {
    match u8(input)? {
        (rest, 0x00) => Ok((rest, None)),
        (rest, 0x01) => value(rest).map(|(rest, v)| (rest, Some(v))),
        _ => Err(unexpected_tag(input)),
    }
}
