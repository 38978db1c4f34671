use core::fmt;

use nom::IResult;
use nom::error::{Error, ErrorKind};

use super::aarq::USER_INFORMATION;
use super::ber::{
    self, INTEGER, OBJECT_IDENTIFIER, OCTET_STRING, TagClass, TagType, expect_tlv, parse_small_integer, parse_tlv,
    tlv,
};
use super::{AARE_TAG, ApplicationContextName, AssociationResult, Authentication, SourceDiagnostic};

const APPLICATION_CONTEXT_NAME: u8 = ber::tag(TagClass::ContextSpecific, TagType::Constructed, 1);
const RESULT: u8 = ber::tag(TagClass::ContextSpecific, TagType::Constructed, 2);
const RESULT_SOURCE_DIAGNOSTIC: u8 = ber::tag(TagClass::ContextSpecific, TagType::Constructed, 3);
const RESPONDING_AP_TITLE: u8 = ber::tag(TagClass::ContextSpecific, TagType::Constructed, 4);
const RESPONDER_ACSE_REQUIREMENTS: u8 = ber::tag(TagClass::ContextSpecific, TagType::Primitive, 8);
const MECHANISM_NAME: u8 = ber::tag(TagClass::ContextSpecific, TagType::Primitive, 9);
const RESPONDING_AUTHENTICATION_VALUE: u8 = ber::tag(TagClass::ContextSpecific, TagType::Constructed, 10);
const CHAR_STRING: u8 = ber::tag(TagClass::ContextSpecific, TagType::Primitive, 0);
const ACSE_SERVICE_USER: u8 = ber::tag(TagClass::ContextSpecific, TagType::Constructed, 1);
const ACSE_SERVICE_PROVIDER: u8 = ber::tag(TagClass::ContextSpecific, TagType::Constructed, 2);

/// A-Associate response.
///
/// ```text
/// 61 len
///    A1 09 06 07 <application context OID>
///    A2 03 02 01 <result>
///    A3 05 A1|A2 03 02 01 <diagnostic>
///    A4 0A 04 08 <responding AP title>          optional
///    88 02 07 80                                optional
///    89 07 <mechanism OID>                      optional
///    AA len 80 len <challenge>                  optional
///    BE len 04 len <initiate response, confirmed service error or envelope>
/// ```
///
/// Fields with other tags are skipped on decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AareApdu {
    /// `None` when the peer answered with an OID this crate does not know.
    pub application_context_name: Option<ApplicationContextName>,
    pub result: AssociationResult,
    pub result_source_diagnostic: SourceDiagnostic,
    pub responding_ap_title: Option<Vec<u8>>,
    pub authentication: Option<Authentication>,
    pub responding_authentication_value: Option<Vec<u8>>,
    pub user_information: Option<Vec<u8>>,
}

impl AareApdu {
    pub fn accepted(application_context_name: ApplicationContextName, user_information: Vec<u8>) -> Self {
        Self {
            application_context_name: Some(application_context_name),
            result: AssociationResult::Accepted,
            result_source_diagnostic: SourceDiagnostic::NULL,
            responding_ap_title: None,
            authentication: None,
            responding_authentication_value: None,
            user_information: Some(user_information),
        }
    }

    pub fn rejected(
        application_context_name: ApplicationContextName,
        result: AssociationResult,
        diagnostic: SourceDiagnostic,
    ) -> Self {
        Self {
            result,
            result_source_diagnostic: diagnostic,
            user_information: None,
            ..Self::accepted(application_context_name, Vec::new())
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.result == AssociationResult::Accepted && self.result_source_diagnostic.is_null()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut content = Vec::new();
        if let Some(context) = &self.application_context_name {
            content.extend(tlv(APPLICATION_CONTEXT_NAME, &tlv(OBJECT_IDENTIFIER, &context.oid())));
        }
        content.extend(tlv(RESULT, &tlv(INTEGER, &[self.result as u8])));
        let (choice, value) = match self.result_source_diagnostic {
            SourceDiagnostic::ServiceUser(value) => (ACSE_SERVICE_USER, value),
            SourceDiagnostic::ServiceProvider(value) => (ACSE_SERVICE_PROVIDER, value),
        };
        content.extend(tlv(RESULT_SOURCE_DIAGNOSTIC, &tlv(choice, &tlv(INTEGER, &[value]))));
        if let Some(title) = &self.responding_ap_title {
            content.extend(tlv(RESPONDING_AP_TITLE, &tlv(OCTET_STRING, title)));
        }
        if let Some(authentication) = &self.authentication {
            content.extend(tlv(RESPONDER_ACSE_REQUIREMENTS, &[0x07, 0x80]));
            content.extend(tlv(MECHANISM_NAME, &authentication.oid()));
        }
        if let Some(challenge) = &self.responding_authentication_value {
            content.extend(tlv(RESPONDING_AUTHENTICATION_VALUE, &tlv(CHAR_STRING, challenge)));
        }
        if let Some(user_information) = &self.user_information {
            content.extend(tlv(USER_INFORMATION, &tlv(OCTET_STRING, user_information)));
        }
        tlv(AARE_TAG, &content)
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, mut content) = expect_tlv(input, AARE_TAG)?;
        let missing = || nom::Err::Error(Error::new(input, ErrorKind::Verify));

        let mut application_context_name = None;
        let mut result = None;
        let mut result_source_diagnostic = SourceDiagnostic::NULL;
        let mut responding_ap_title = None;
        let mut authentication = None;
        let mut responding_authentication_value = None;
        let mut user_information = None;

        while !content.is_empty() {
            let (next, (tag, value)) = parse_tlv(content)?;
            match tag {
                APPLICATION_CONTEXT_NAME => {
                    let (_, oid) = expect_tlv(value, OBJECT_IDENTIFIER)?;
                    application_context_name = ApplicationContextName::from_oid(oid);
                }
                RESULT => {
                    let (_, raw) = parse_small_integer(value)?;
                    result = Some(AssociationResult::try_from(raw).map_err(|_| missing())?);
                }
                RESULT_SOURCE_DIAGNOSTIC => {
                    let (_, (choice, inner)) = parse_tlv(value)?;
                    let (_, raw) = parse_small_integer(inner)?;
                    result_source_diagnostic = match choice {
                        ACSE_SERVICE_USER => SourceDiagnostic::ServiceUser(raw),
                        ACSE_SERVICE_PROVIDER => SourceDiagnostic::ServiceProvider(raw),
                        _ => return Err(crate::data::unexpected_tag(value)),
                    };
                }
                RESPONDING_AP_TITLE => {
                    let (_, title) = expect_tlv(value, OCTET_STRING)?;
                    responding_ap_title = Some(title.to_vec());
                }
                MECHANISM_NAME => authentication = Authentication::from_oid(value),
                RESPONDING_AUTHENTICATION_VALUE => {
                    let (_, challenge) = expect_tlv(value, CHAR_STRING)?;
                    responding_authentication_value = Some(challenge.to_vec());
                }
                USER_INFORMATION => {
                    let (_, octets) = expect_tlv(value, OCTET_STRING)?;
                    user_information = Some(octets.to_vec());
                }
                _ => {}
            }
            content = next;
        }

        Ok((
            rest,
            Self {
                application_context_name,
                result: result.ok_or_else(missing)?,
                result_source_diagnostic,
                responding_ap_title,
                authentication,
                responding_authentication_value,
                user_information,
            },
        ))
    }
}

impl fmt::Display for AareApdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AARE({}, {})", self.result, self.result_source_diagnostic)
    }
}
