use nom::IResult;
use nom::error::{Error, ErrorKind};

use super::ber::{self, OBJECT_IDENTIFIER, OCTET_STRING, TagClass, TagType, expect_tlv, parse_tlv, tlv};
use super::{AARQ_TAG, ApplicationContextName, Authentication};

const APPLICATION_CONTEXT_NAME: u8 = ber::tag(TagClass::ContextSpecific, TagType::Constructed, 1);
const CALLING_AP_TITLE: u8 = ber::tag(TagClass::ContextSpecific, TagType::Constructed, 6);
const SENDER_ACSE_REQUIREMENTS: u8 = ber::tag(TagClass::ContextSpecific, TagType::Primitive, 10);
const MECHANISM_NAME: u8 = ber::tag(TagClass::ContextSpecific, TagType::Primitive, 11);
const CALLING_AUTHENTICATION_VALUE: u8 = ber::tag(TagClass::ContextSpecific, TagType::Constructed, 12);
const CHAR_STRING: u8 = ber::tag(TagClass::ContextSpecific, TagType::Primitive, 0);
pub(super) const USER_INFORMATION: u8 = ber::tag(TagClass::ContextSpecific, TagType::Constructed, 30);

/// `sender-acse-requirements`: a BIT STRING with only the authentication bit.
const AUTHENTICATION_REQUIRED: [u8; 2] = [0x07, 0x80];

/// A-Associate request.
///
/// ```text
/// 60 len
///    A1 09 06 07 <application context OID>
///    A6 0A 04 08 <calling AP title>            ciphered contexts only
///    8A 02 07 80                               when authenticating
///    8B 07 <mechanism OID>                     when authenticating
///    AC len 80 len <password>                  when a secret is sent
///    BE len 04 len <initiate request or its envelope>
/// ```
///
/// The user information is kept as raw bytes because it may be a ciphered
/// envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AarqApdu {
    pub application_context_name: ApplicationContextName,
    pub calling_ap_title: Option<Vec<u8>>,
    pub authentication: Authentication,
    pub calling_authentication_value: Option<Vec<u8>>,
    pub user_information: Vec<u8>,
}

impl AarqApdu {
    pub fn new(application_context_name: ApplicationContextName, user_information: Vec<u8>) -> Self {
        Self {
            application_context_name,
            calling_ap_title: None,
            authentication: Authentication::None,
            calling_authentication_value: None,
            user_information,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut content = tlv(APPLICATION_CONTEXT_NAME, &tlv(OBJECT_IDENTIFIER, &self.application_context_name.oid()));
        if let Some(title) = &self.calling_ap_title {
            content.extend(tlv(CALLING_AP_TITLE, &tlv(OCTET_STRING, title)));
        }
        if self.authentication != Authentication::None {
            content.extend(tlv(SENDER_ACSE_REQUIREMENTS, &AUTHENTICATION_REQUIRED));
            content.extend(tlv(MECHANISM_NAME, &self.authentication.oid()));
            if let Some(secret) = &self.calling_authentication_value {
                content.extend(tlv(CALLING_AUTHENTICATION_VALUE, &tlv(CHAR_STRING, secret)));
            }
        }
        content.extend(tlv(USER_INFORMATION, &tlv(OCTET_STRING, &self.user_information)));
        tlv(AARQ_TAG, &content)
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, mut content) = expect_tlv(input, AARQ_TAG)?;

        let mut application_context_name = None;
        let mut aarq = Self::new(ApplicationContextName::LogicalNameReferencing, Vec::new());
        while !content.is_empty() {
            let (next, (tag, value)) = parse_tlv(content)?;
            match tag {
                APPLICATION_CONTEXT_NAME => {
                    let (_, oid) = expect_tlv(value, OBJECT_IDENTIFIER)?;
                    application_context_name = ApplicationContextName::from_oid(oid);
                }
                CALLING_AP_TITLE => {
                    let (_, title) = expect_tlv(value, OCTET_STRING)?;
                    aarq.calling_ap_title = Some(title.to_vec());
                }
                MECHANISM_NAME => {
                    aarq.authentication = Authentication::from_oid(value)
                        .ok_or(nom::Err::Error(Error::new(content, ErrorKind::Verify)))?;
                }
                CALLING_AUTHENTICATION_VALUE => {
                    let (_, secret) = expect_tlv(value, CHAR_STRING)?;
                    aarq.calling_authentication_value = Some(secret.to_vec());
                }
                USER_INFORMATION => {
                    let (_, user_information) = expect_tlv(value, OCTET_STRING)?;
                    aarq.user_information = user_information.to_vec();
                }
                _ => {}
            }
            content = next;
        }

        aarq.application_context_name =
            application_context_name.ok_or(nom::Err::Error(Error::new(input, ErrorKind::Verify)))?;
        Ok((rest, aarq))
    }
}
