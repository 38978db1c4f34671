//! Application association: the ACSE APDUs (AARQ, AARE, RLRQ, RLRE) and the
//! xDLMS initiate exchange they carry.
//!
//! ACSE fields are BER encoded, while the user-information payload inside
//! them is A-XDR. A client sends an [`AarqApdu`] and gets back an
//! [`AareApdu`] whose user information holds either an [`InitiateResponse`]
//! or a [`ConfirmedServiceError`], possibly inside a ciphered envelope.

pub use self::{
    aare::AareApdu,
    aarq::AarqApdu,
    conformance::Conformance,
    enums::*,
    initiate::{INITIATE_REQUEST_TAG, INITIATE_RESPONSE_TAG, InitiateRequest, InitiateResponse},
    rlre::RlreApdu,
    rlrq::RlrqApdu,
};

use crate::error::CodecError;
use crate::exception::{CONFIRMED_SERVICE_ERROR_TAG, ConfirmedServiceError};

mod aare;
mod aarq;
mod ber;
mod conformance;
mod enums;
mod initiate;
mod rlre;
mod rlrq;

pub const AARQ_TAG: u8 = 0x60;
pub const AARE_TAG: u8 = 0x61;
pub const RLRQ_TAG: u8 = 0x62;
pub const RLRE_TAG: u8 = 0x63;

/// VAA name of a logical-name association.
pub const VAA_NAME_LN: u16 = 0x0007;
pub const DLMS_VERSION: u8 = 6;

/// Plain user information of an AARE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserInformation {
    InitiateResponse(InitiateResponse),
    ConfirmedServiceError(ConfirmedServiceError),
}

impl UserInformation {
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let (rest, information) = match bytes.first() {
            Some(&INITIATE_RESPONSE_TAG) => InitiateResponse::parse(bytes)
                .map(|(rest, r)| (rest, UserInformation::InitiateResponse(r)))
                .map_err(CodecError::from_nom)?,
            Some(&CONFIRMED_SERVICE_ERROR_TAG) => ConfirmedServiceError::parse(bytes)
                .map(|(rest, e)| (rest, UserInformation::ConfirmedServiceError(e)))
                .map_err(CodecError::from_nom)?,
            Some(&tag) => return Err(CodecError::UnrecognizedTag(tag)),
            None => return Err(CodecError::Incomplete),
        };
        match rest.len() {
            0 => Ok(information),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::{ConfirmedService, ServiceErrorKind};

    #[test]
    fn test_handshake_accepted() {
        let proposed = InitiateRequest::new(Conformance::default(), 0xFFFF);
        let aarq = AarqApdu::new(ApplicationContextName::LogicalNameReferencing, proposed.encode());
        let (_, received) = AarqApdu::parse(&aarq.encode()).unwrap();
        let (_, request) = InitiateRequest::parse(&received.user_information).unwrap();

        // Server side: intersect conformance and clamp the PDU size.
        let granted = request.proposed_conformance & Conformance::from_bits(0x00101F);
        let response = InitiateResponse::new(granted, request.client_max_receive_pdu_size.min(0x0400));
        let aare = AareApdu::accepted(received.application_context_name, response.encode());

        let (_, parsed) = AareApdu::parse(&aare.encode()).unwrap();
        assert!(parsed.is_accepted());
        match UserInformation::decode(parsed.user_information.as_deref().unwrap()).unwrap() {
            UserInformation::InitiateResponse(r) => {
                assert_eq!(r.server_max_receive_pdu_size, 0x0400);
                assert_eq!(r.negotiated_conformance.bits(), 0x00101F);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_user_information_service_error() {
        let bytes = [0x0E, 0x01, 0x06, 0x00];
        assert_eq!(
            UserInformation::decode(&bytes).unwrap(),
            UserInformation::ConfirmedServiceError(ConfirmedServiceError {
                service: ConfirmedService::InitiateError,
                error: ServiceErrorKind::Initiate,
                value: 0,
            })
        );
        assert_eq!(UserInformation::decode(&[0x0E, 0x01, 0x06, 0x00, 0x00]), Err(CodecError::TrailingBytes(1)));
        assert_eq!(UserInformation::decode(&[0x07]), Err(CodecError::UnrecognizedTag(0x07)));
        assert_eq!(UserInformation::decode(&[]), Err(CodecError::Incomplete));
    }
}
