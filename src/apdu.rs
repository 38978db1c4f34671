//! Top-level APDU dispatch.
//!
//! The first byte of a frame selects the PDU family. Each family parser then
//! reads its own choice byte, so [`Apdu::parse`] only routes.

use nom::IResult;

use crate::action::{ACTION_REQUEST_TAG, ACTION_RESPONSE_TAG, ActionRequest, ActionResponse};
use crate::association::{AARE_TAG, AARQ_TAG, AareApdu, AarqApdu, RLRE_TAG, RLRQ_TAG, RlreApdu, RlrqApdu};
use crate::cipher::{Envelope, is_ciphered_tag};
use crate::data::unexpected_tag;
use crate::error::CodecError;
use crate::exception::{
    CONFIRMED_SERVICE_ERROR_TAG, ConfirmedServiceError, EXCEPTION_RESPONSE_TAG, ExceptionResponse,
};
use crate::get::{GET_REQUEST_TAG, GET_RESPONSE_TAG, GetRequest, GetResponse};
use crate::notification::{
    DATA_NOTIFICATION_TAG, DataNotification, EVENT_NOTIFICATION_REQUEST_TAG, EventNotificationRequest,
};
use crate::set::{SET_REQUEST_TAG, SET_RESPONSE_TAG, SetRequest, SetResponse};

#[derive(Debug, Clone, PartialEq)]
pub enum Apdu {
    Aarq(AarqApdu),
    Aare(AareApdu),
    Rlrq(RlrqApdu),
    Rlre(RlreApdu),
    GetRequest(GetRequest),
    GetResponse(GetResponse),
    SetRequest(SetRequest),
    SetResponse(SetResponse),
    ActionRequest(ActionRequest),
    ActionResponse(ActionResponse),
    DataNotification(DataNotification),
    EventNotificationRequest(EventNotificationRequest),
    ExceptionResponse(ExceptionResponse),
    ConfirmedServiceError(ConfirmedServiceError),
    /// A glo- or ded-ciphered APDU, still protected.
    Ciphered(Envelope),
}

impl Apdu {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let Some(&tag) = input.first() else {
            return Err(nom::Err::Incomplete(nom::Needed::new(1)));
        };
        match tag {
            AARQ_TAG => AarqApdu::parse(input).map(|(r, apdu)| (r, Apdu::Aarq(apdu))),
            AARE_TAG => AareApdu::parse(input).map(|(r, apdu)| (r, Apdu::Aare(apdu))),
            RLRQ_TAG => RlrqApdu::parse(input).map(|(r, apdu)| (r, Apdu::Rlrq(apdu))),
            RLRE_TAG => RlreApdu::parse(input).map(|(r, apdu)| (r, Apdu::Rlre(apdu))),
            GET_REQUEST_TAG => GetRequest::parse(input).map(|(r, apdu)| (r, Apdu::GetRequest(apdu))),
            GET_RESPONSE_TAG => GetResponse::parse(input).map(|(r, apdu)| (r, Apdu::GetResponse(apdu))),
            SET_REQUEST_TAG => SetRequest::parse(input).map(|(r, apdu)| (r, Apdu::SetRequest(apdu))),
            SET_RESPONSE_TAG => SetResponse::parse(input).map(|(r, apdu)| (r, Apdu::SetResponse(apdu))),
            ACTION_REQUEST_TAG => ActionRequest::parse(input).map(|(r, apdu)| (r, Apdu::ActionRequest(apdu))),
            ACTION_RESPONSE_TAG => {
                ActionResponse::parse(input).map(|(r, apdu)| (r, Apdu::ActionResponse(apdu)))
            }
            DATA_NOTIFICATION_TAG => {
                DataNotification::parse(input).map(|(r, apdu)| (r, Apdu::DataNotification(apdu)))
            }
            EVENT_NOTIFICATION_REQUEST_TAG => EventNotificationRequest::parse(input)
                .map(|(r, apdu)| (r, Apdu::EventNotificationRequest(apdu))),
            EXCEPTION_RESPONSE_TAG => {
                ExceptionResponse::parse(input).map(|(r, apdu)| (r, Apdu::ExceptionResponse(apdu)))
            }
            CONFIRMED_SERVICE_ERROR_TAG => {
                ConfirmedServiceError::parse(input).map(|(r, apdu)| (r, Apdu::ConfirmedServiceError(apdu)))
            }
            t if is_ciphered_tag(t) => Envelope::parse(input).map(|(r, envelope)| (r, Apdu::Ciphered(envelope))),
            _ => Err(unexpected_tag(input)),
        }
    }

    /// Decodes a frame holding exactly one APDU.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        match Self::parse(bytes).map_err(CodecError::from_nom)? {
            ([], apdu) => Ok(apdu),
            (rest, _) => Err(CodecError::TrailingBytes(rest.len())),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Apdu::Aarq(apdu) => apdu.encode(),
            Apdu::Aare(apdu) => apdu.encode(),
            Apdu::Rlrq(apdu) => apdu.encode(),
            Apdu::Rlre(apdu) => apdu.encode(),
            Apdu::GetRequest(apdu) => apdu.encode(),
            Apdu::GetResponse(apdu) => apdu.encode(),
            Apdu::SetRequest(apdu) => apdu.encode(),
            Apdu::SetResponse(apdu) => apdu.encode(),
            Apdu::ActionRequest(apdu) => apdu.encode(),
            Apdu::ActionResponse(apdu) => apdu.encode(),
            Apdu::DataNotification(apdu) => apdu.encode(),
            Apdu::EventNotificationRequest(apdu) => apdu.encode(),
            Apdu::ExceptionResponse(apdu) => apdu.encode(),
            Apdu::ConfirmedServiceError(apdu) => apdu.encode(),
            Apdu::Ciphered(envelope) => envelope.encode(),
        }
    }

    /// The invoke id of a confirmed data-exchange PDU.
    pub fn invoke_id(&self) -> Option<u8> {
        match self {
            Apdu::GetRequest(apdu) => Some(apdu.invoke_id()),
            Apdu::GetResponse(apdu) => Some(apdu.invoke_id()),
            Apdu::SetRequest(apdu) => Some(apdu.invoke_id()),
            Apdu::SetResponse(apdu) => Some(apdu.invoke_id()),
            Apdu::ActionRequest(apdu) => Some(apdu.invoke_id()),
            Apdu::ActionResponse(apdu) => Some(apdu.invoke_id()),
            _ => None,
        }
    }

    /// Short name used in log lines and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Apdu::Aarq(_) => "AARQ",
            Apdu::Aare(_) => "AARE",
            Apdu::Rlrq(_) => "RLRQ",
            Apdu::Rlre(_) => "RLRE",
            Apdu::GetRequest(_) => "get-request",
            Apdu::GetResponse(_) => "get-response",
            Apdu::SetRequest(_) => "set-request",
            Apdu::SetResponse(_) => "set-response",
            Apdu::ActionRequest(_) => "action-request",
            Apdu::ActionResponse(_) => "action-response",
            Apdu::DataNotification(_) => "data-notification",
            Apdu::EventNotificationRequest(_) => "event-notification-request",
            Apdu::ExceptionResponse(_) => "exception-response",
            Apdu::ConfirmedServiceError(_) => "confirmed-service-error",
            Apdu::Ciphered(_) => "ciphered",
        }
    }
}
