//! Error types.
//!
//! [`CodecError`] reports malformed bytes or text and is produced by every
//! `decode` entry point. [`Error`] is what the client engine returns and wraps
//! codec failures together with association, access and security conditions.

use thiserror::Error;

use crate::action::ActionResult;
use crate::client::ClientState;
use crate::exception::ConfirmedServiceError;
use crate::get::DataAccessResult;

/// Failure while decoding A-XDR, APDU bytes or the textual value form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Fewer bytes remain than the encoding requires.
    #[error("input ended before the value was complete")]
    Incomplete,
    /// A tag or choice byte that has no meaning at this position.
    #[error("unrecognized tag 0x{0:02X}")]
    UnrecognizedTag(u8),
    /// A BER length whose length-of-length byte announces more than 8 bytes.
    #[error("length field 0x{0:02X} announces more than 8 length bytes")]
    LengthTooLarge(u8),
    /// A complete PDU was decoded but bytes were left over.
    #[error("{0} trailing bytes after the decoded PDU")]
    TrailingBytes(usize),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// The `tag{payload}` text could not be parsed.
    #[error("invalid text form: {0}")]
    Text(String),
}

impl CodecError {
    /// Converts a nom failure into a codec error.
    ///
    /// Parsers in this crate report an unknown tag with `ErrorKind::Tag` and an
    /// oversized length prefix with `ErrorKind::TooLarge`, both positioned on
    /// the offending byte. `ErrorKind::Count` marks input nested past
    /// [`MAX_NESTING`](crate::data::MAX_NESTING).
    pub(crate) fn from_nom(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        use nom::error::ErrorKind;

        match err {
            nom::Err::Incomplete(_) => CodecError::Incomplete,
            nom::Err::Error(e) | nom::Err::Failure(e) => match e.code {
                ErrorKind::Tag => match e.input.first() {
                    Some(&tag) => CodecError::UnrecognizedTag(tag),
                    None => CodecError::Incomplete,
                },
                ErrorKind::TooLarge => match e.input.first() {
                    Some(&byte) => CodecError::LengthTooLarge(byte),
                    None => CodecError::Incomplete,
                },
                ErrorKind::Eof => CodecError::Incomplete,
                ErrorKind::Count => CodecError::InvalidValue(format!(
                    "containers nested deeper than {} levels",
                    crate::data::MAX_NESTING
                )),
                ErrorKind::Char => CodecError::InvalidValue("utf8-string is not valid UTF-8".into()),
                kind => CodecError::InvalidValue(format!("{kind:?}")),
            },
        }
    }
}

/// Errors returned by the client engine.
#[derive(Debug, Error)]
pub enum Error {
    /// The operation is not valid in the current session state.
    #[error("operation not valid in state {0:?}")]
    InvalidState(ClientState),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// Transport send failure, closed transport or reply timeout.
    #[error("communication failed: {0}")]
    CommunicationFailed(String),
    /// Unexpected PDU type, block-number mismatch or malformed envelope.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid password")]
    InvalidPassword,
    /// The association was refused with a confirmed-service-error.
    #[error("association refused: {0}")]
    ServiceError(ConfirmedServiceError),
    /// AEAD authentication failed while deciphering.
    #[error("wrong keys")]
    WrongKeys,
    /// A received invocation counter was not greater than the last accepted one.
    #[error("invocation counter {received} is not greater than {last}")]
    FailureInvocationCounter { received: u32, last: u32 },
    #[error("get rejected: {0:?}")]
    GetRejected(DataAccessResult),
    #[error("set rejected: {0:?}")]
    SetRejected(DataAccessResult),
    #[error("action rejected: {0:?}")]
    ActionRejected(ActionResult),
    /// Some, but not all, fields of a struct-of-elements write failed.
    #[error("set partially applied, failed attributes {failed:?}")]
    SetPartial { failed: Vec<i8> },
    #[error("check does not match: {0}")]
    CheckDoesNotMatch(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl Error {
    /// Returns true for failures caused by the link rather than the peer's answer.
    pub fn is_communication(&self) -> bool {
        matches!(self, Error::CommunicationFailed(_))
    }

    /// Returns true when the peer refused an access with a result code.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::GetRejected(_)
                | Error::SetRejected(_)
                | Error::ActionRejected(_)
                | Error::SetPartial { .. }
        )
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
