//! Out-of-band error PDUs: `exception-response` and `confirmed-service-error`.
//!
//! Either can arrive where a regular response is expected. A confirmed
//! service error also appears inside the AARE user information when the
//! server refuses the initiate request.

use core::fmt;

use derive_try_from_primitive::TryFromPrimitive;
use nom::{
    IResult, Parser,
    bytes::streaming::tag,
    number::streaming::{be_u32, u8},
};

use crate::data::{ByteBuffer, unexpected_tag};
use crate::error::CodecError;

pub const EXCEPTION_RESPONSE_TAG: u8 = 0xD8;
pub const CONFIRMED_SERVICE_ERROR_TAG: u8 = 0x0E;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum StateError {
    ServiceNotAllowed = 1,
    ServiceUnknown = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionServiceError {
    OperationNotPossible,
    ServiceNotSupported,
    OtherReason,
    PduTooLong,
    DecipheringError,
    /// Carries the invocation counter the server expects next.
    InvocationCounterError(u32),
}

impl ExceptionServiceError {
    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, choice) = u8(input)?;
        let error = match choice {
            1 => ExceptionServiceError::OperationNotPossible,
            2 => ExceptionServiceError::ServiceNotSupported,
            3 => ExceptionServiceError::OtherReason,
            4 => ExceptionServiceError::PduTooLong,
            5 => ExceptionServiceError::DecipheringError,
            6 => {
                let (rest, counter) = be_u32(rest)?;
                return Ok((rest, ExceptionServiceError::InvocationCounterError(counter)));
            }
            _ => return Err(unexpected_tag(input)),
        };
        Ok((rest, error))
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            ExceptionServiceError::OperationNotPossible => buf.push(1),
            ExceptionServiceError::ServiceNotSupported => buf.push(2),
            ExceptionServiceError::OtherReason => buf.push(3),
            ExceptionServiceError::PduTooLong => buf.push(4),
            ExceptionServiceError::DecipheringError => buf.push(5),
            ExceptionServiceError::InvocationCounterError(counter) => {
                buf.push(6);
                buf.push_u32(*counter);
            }
        }
    }
}

/// `D8 <state-error> <service-error> [invocation counter]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub state_error: StateError,
    pub service_error: ExceptionServiceError,
}

impl ExceptionResponse {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, _) = tag(&[EXCEPTION_RESPONSE_TAG][..]).parse(input)?;
        let (rest, raw) = u8(input)?;
        let state_error = StateError::try_from(raw).map_err(|_| unexpected_tag(input))?;
        let (rest, service_error) = ExceptionServiceError::parse(rest)?;
        Ok((rest, Self { state_error, service_error }))
    }

    /// Decodes a complete frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        match Self::parse(bytes).map_err(CodecError::from_nom)? {
            ([], response) => Ok(response),
            (rest, _) => Err(CodecError::TrailingBytes(rest.len())),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![EXCEPTION_RESPONSE_TAG, self.state_error as u8];
        self.service_error.encode_into(&mut buf);
        buf
    }
}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}, {:?}", self.state_error, self.service_error)
    }
}

/// The confirmed service that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum ConfirmedService {
    InitiateError = 1,
    GetStatus = 2,
    GetNameList = 3,
    GetVariableAttribute = 4,
    Read = 5,
    Write = 6,
    GetDataSetAttribute = 7,
    GetTiAttribute = 8,
    ChangeScope = 9,
    Start = 10,
    Stop = 11,
    Resume = 12,
    MakeUsable = 13,
    InitiateLoad = 14,
    LoadSegment = 15,
    TerminateLoad = 16,
    InitiateUpLoad = 17,
    UpLoadSegment = 18,
    TerminateUpLoad = 19,
}

/// Which table the error value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum ServiceErrorKind {
    ApplicationReference = 0,
    HardwareResource = 1,
    VdeStateError = 2,
    Service = 3,
    Definition = 4,
    Access = 5,
    Initiate = 6,
    LoadDataSet = 7,
    ChangeScope = 8,
    Task = 9,
    Other = 10,
}

/// `0E <service> <error kind> <value>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmedServiceError {
    pub service: ConfirmedService,
    pub error: ServiceErrorKind,
    pub value: u8,
}

impl ConfirmedServiceError {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, _) = tag(&[CONFIRMED_SERVICE_ERROR_TAG][..]).parse(input)?;
        let (rest, raw_service) = u8(input)?;
        let service = ConfirmedService::try_from(raw_service).map_err(|_| unexpected_tag(input))?;
        let (after_kind, raw_kind) = u8(rest)?;
        let error = ServiceErrorKind::try_from(raw_kind).map_err(|_| unexpected_tag(rest))?;
        let (rest, value) = u8(after_kind)?;
        Ok((rest, Self { service, error, value }))
    }

    pub fn encode(&self) -> Vec<u8> {
        vec![CONFIRMED_SERVICE_ERROR_TAG, self.service as u8, self.error as u8, self.value]
    }

    /// Human readable meaning of `value` for the tables a client meets in
    /// practice.
    pub fn reason(&self) -> &'static str {
        match (self.error, self.value) {
            (ServiceErrorKind::Initiate, 0) => "other",
            (ServiceErrorKind::Initiate, 1) => "dlms version too low",
            (ServiceErrorKind::Initiate, 2) => "incompatible conformance",
            (ServiceErrorKind::Initiate, 3) => "pdu size too short",
            (ServiceErrorKind::Initiate, 4) => "refused by the VDE handler",
            (ServiceErrorKind::ApplicationReference, 6) => "deciphering error",
            (ServiceErrorKind::Access, 1) => "scope of access violated",
            (ServiceErrorKind::Access, 2) => "object access invalid",
            (ServiceErrorKind::Access, 3) => "hardware fault",
            (ServiceErrorKind::Access, 4) => "object unavailable",
            _ => "unspecified",
        }
    }
}

impl fmt::Display for ConfirmedServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} failed with {:?} error {} ({})", self.service, self.error, self.value, self.reason())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exception_response() {
        let (rest, exception) = ExceptionResponse::parse(&[0xD8, 0x01, 0x05]).unwrap();
        assert!(rest.is_empty());
        assert_eq!(exception.state_error, StateError::ServiceNotAllowed);
        assert_eq!(exception.service_error, ExceptionServiceError::DecipheringError);
    }

    #[test]
    fn test_invocation_counter_error() {
        let bytes = [0xD8, 0x02, 0x06, 0x00, 0x00, 0x01, 0x00];
        let exception = ExceptionResponse::decode(&bytes).unwrap();
        assert_eq!(exception.service_error, ExceptionServiceError::InvocationCounterError(256));
        assert_eq!(exception.encode(), bytes);
    }

    #[test]
    fn test_exception_errors() {
        assert_eq!(ExceptionResponse::decode(&[0xD8, 0x03, 0x01]), Err(CodecError::UnrecognizedTag(0x03)));
        assert_eq!(ExceptionResponse::decode(&[0xD8, 0x01, 0x07]), Err(CodecError::UnrecognizedTag(0x07)));
        assert_eq!(ExceptionResponse::decode(&[0xD8, 0x01, 0x06, 0x00]), Err(CodecError::Incomplete));
        assert_eq!(ExceptionResponse::decode(&[0xD8, 0x01, 0x01, 0x00]), Err(CodecError::TrailingBytes(1)));
    }

    #[test]
    fn test_confirmed_service_error() {
        let (_, error) = ConfirmedServiceError::parse(&[0x0E, 0x01, 0x06, 0x02]).unwrap();
        assert_eq!(error.service, ConfirmedService::InitiateError);
        assert_eq!(error.error, ServiceErrorKind::Initiate);
        assert_eq!(error.reason(), "incompatible conformance");
        assert_eq!(error.to_string(), "InitiateError failed with Initiate error 2 (incompatible conformance)");
        assert_eq!(error.encode(), [0x0E, 0x01, 0x06, 0x02]);

        assert!(ConfirmedServiceError::parse(&[0x0E, 0x00, 0x06, 0x02]).is_err());
        assert!(ConfirmedServiceError::parse(&[0x0E, 0x01, 0x0B, 0x02]).is_err());
    }
}
