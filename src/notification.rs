//! Unsolicited PDUs pushed by a server: `data-notification` and
//! `event-notification-request`. Neither expects a response.

use nom::{
    IResult, Parser,
    bytes::streaming::tag,
    error::{Error, ErrorKind},
    number::streaming::{be_u32, u8},
};

use crate::data::{ByteBuffer, Data, DateTime, unexpected_tag};
use crate::descriptor::AttributeDescriptor;
use crate::error::CodecError;

pub const DATA_NOTIFICATION_TAG: u8 = 0x0F;
pub const EVENT_NOTIFICATION_REQUEST_TAG: u8 = 0xC2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceClass {
    Confirmed,
    Unconfirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingOption {
    ContinueOnError,
    BreakOnError,
}

/// Long-Invoke-Id-And-Priority: a 24 bit invoke id and four flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LongInvokeIdAndPriority(pub u32);

impl LongInvokeIdAndPriority {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, id) = be_u32(input)?;
        Ok((input, Self(id)))
    }

    pub fn priority(&self) -> Priority {
        if self.0 & (1 << 31) == 0 { Priority::Normal } else { Priority::High }
    }

    pub fn service_class(&self) -> ServiceClass {
        if self.0 & (1 << 30) == 0 { ServiceClass::Unconfirmed } else { ServiceClass::Confirmed }
    }

    pub fn processing_option(&self) -> ProcessingOption {
        if self.0 & (1 << 29) == 0 {
            ProcessingOption::ContinueOnError
        } else {
            ProcessingOption::BreakOnError
        }
    }

    pub fn self_descriptive(&self) -> bool {
        self.0 & (1 << 28) != 0
    }

    pub fn invoke_id(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }
}

/// A date-time carried as an octet-string, empty when absent.
fn parse_octet_date_time(input: &[u8]) -> IResult<&[u8], Option<DateTime>> {
    let (rest, len) = u8(input)?;
    match len {
        0 => Ok((rest, None)),
        12 => DateTime::parse(rest).map(|(rest, dt)| (rest, Some(dt))),
        _ => Err(nom::Err::Error(Error::new(input, ErrorKind::LengthValue))),
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DataNotification {
    pub long_invoke_id_and_priority: LongInvokeIdAndPriority,
    pub date_time: Option<DateTime>,
    pub body: Data,
}

impl DataNotification {
    pub fn invoke_id(&self) -> u32 {
        self.long_invoke_id_and_priority.invoke_id()
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, _) = tag(&[DATA_NOTIFICATION_TAG][..]).parse(input)?;
        let (input, long_invoke_id_and_priority) = LongInvokeIdAndPriority::parse(input)?;
        let (input, date_time) = parse_octet_date_time(input)?;
        let (input, body) = Data::parse(input)?;
        Ok((input, Self { long_invoke_id_and_priority, date_time, body }))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![DATA_NOTIFICATION_TAG];
        buf.push_u32(self.long_invoke_id_and_priority.0);
        match &self.date_time {
            Some(date_time) => {
                buf.push(12);
                date_time.encode_into(&mut buf);
            }
            None => buf.push(0),
        }
        self.body.encode_into(&mut buf);
        buf
    }
}

/// Event-Notification-Request: `C2 [01 0C <date-time> | 00] <attribute> <value>`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct EventNotificationRequest {
    pub time: Option<DateTime>,
    pub attribute: AttributeDescriptor,
    pub value: Data,
}

impl EventNotificationRequest {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, _) = tag(&[EVENT_NOTIFICATION_REQUEST_TAG][..]).parse(input)?;
        let (rest, present) = u8(input)?;
        let (rest, time) = match present {
            0x00 => (rest, None),
            0x01 => parse_octet_date_time(rest)?,
            _ => return Err(unexpected_tag(input)),
        };
        let (rest, attribute) = AttributeDescriptor::parse(rest)?;
        let (rest, value) = Data::parse(rest)?;
        Ok((rest, Self { time, attribute, value }))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![EVENT_NOTIFICATION_REQUEST_TAG];
        match &self.time {
            Some(time) => {
                buf.extend_from_slice(&[0x01, 12]);
                time.encode_into(&mut buf);
            }
            None => buf.push(0x00),
        }
        self.attribute.encode_into(&mut buf);
        self.value.encode_into(&mut buf);
        buf
    }
}

/// What a notification subscriber receives.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Notification {
    Data(DataNotification),
    Event(EventNotificationRequest),
}

impl Notification {
    /// Decodes a frame if it holds exactly one notification PDU.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let (rest, notification) = match bytes.first() {
            Some(&DATA_NOTIFICATION_TAG) => DataNotification::parse(bytes)
                .map(|(rest, n)| (rest, Notification::Data(n)))
                .map_err(CodecError::from_nom)?,
            Some(&EVENT_NOTIFICATION_REQUEST_TAG) => EventNotificationRequest::parse(bytes)
                .map(|(rest, n)| (rest, Notification::Event(n)))
                .map_err(CodecError::from_nom)?,
            Some(&other) => return Err(CodecError::UnrecognizedTag(other)),
            None => return Err(CodecError::Incomplete),
        };
        match rest.len() {
            0 => Ok(notification),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Notification::Data(n) => n.encode(),
            Notification::Event(n) => n.encode(),
        }
    }

    pub fn body(&self) -> &Data {
        match self {
            Notification::Data(n) => &n.body,
            Notification::Event(n) => &n.value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ClockStatus, Date, Time};
    use crate::obis_code::ObisCode;

    #[test]
    fn test_long_invoke_id_flags() {
        let id = LongInvokeIdAndPriority(0xC0_00_00_2A);
        assert_eq!(id.invoke_id(), 42);
        assert_eq!(id.priority(), Priority::High);
        assert_eq!(id.service_class(), ServiceClass::Confirmed);
        assert_eq!(id.processing_option(), ProcessingOption::ContinueOnError);
        assert!(!id.self_descriptive());

        let id = LongInvokeIdAndPriority(0x30_00_00_01);
        assert_eq!(id.priority(), Priority::Normal);
        assert_eq!(id.processing_option(), ProcessingOption::BreakOnError);
        assert!(id.self_descriptive());
    }

    #[test]
    fn test_parse_data_notification_without_time() {
        #[rustfmt::skip]
        let bytes = [
            0x0F,
            0x00, 0x00, 0x00, 0x01, // long invoke id
            0x00,                   // no date-time
            0x02, 0x02,             // structure of 2
                0x12, 0x00, 0x2A,
                0x06, 0x00, 0x00, 0x01, 0x00,
        ];
        let notification = Notification::decode(&bytes).unwrap();
        match &notification {
            Notification::Data(n) => {
                assert_eq!(n.invoke_id(), 1);
                assert_eq!(n.date_time, None);
                assert_eq!(
                    n.body,
                    Data::Structure(vec![Data::LongUnsigned(42), Data::DoubleLongUnsigned(256)])
                );
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(notification.encode(), bytes);
    }

    #[test]
    fn test_data_notification_with_time() {
        let date_time = DateTime::new(Date::new(2024, 3, 1, 5), Time::new(12, 30, 0, 0), Some(-60), ClockStatus(0));
        let notification = DataNotification {
            long_invoke_id_and_priority: LongInvokeIdAndPriority(7),
            date_time: Some(date_time),
            body: Data::Unsigned(1),
        };
        let encoded = notification.encode();
        assert_eq!(encoded[5], 12);
        assert_eq!(encoded.len(), 1 + 4 + 1 + 12 + 2);
        assert_eq!(DataNotification::parse(&encoded).unwrap().1, notification);
    }

    #[test]
    fn test_event_notification() {
        let event = EventNotificationRequest {
            time: None,
            attribute: AttributeDescriptor::new(1, ObisCode::new(0, 0, 96, 11, 0, 255), 2),
            value: Data::LongUnsigned(5),
        };
        #[rustfmt::skip]
        assert_eq!(event.encode(), [
            0xC2, 0x00,
            0x00, 0x01, 0x00, 0x00, 0x60, 0x0B, 0x00, 0xFF, 0x02,
            0x12, 0x00, 0x05,
        ]);
        assert_eq!(Notification::decode(&event.encode()).unwrap(), Notification::Event(event.clone()));
        assert_eq!(Notification::Event(event).body(), &Data::LongUnsigned(5));
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(Notification::decode(&[0xC4, 0x01]), Err(CodecError::UnrecognizedTag(0xC4)));
        assert_eq!(Notification::decode(&[0x0F, 0x00, 0x00]), Err(CodecError::Incomplete));
        // date-time octet-string of length 5
        assert!(Notification::decode(&[0x0F, 0, 0, 0, 1, 0x05, 0, 0, 0, 0, 0, 0x00]).is_err());
        assert_eq!(
            Notification::decode(&[0x0F, 0, 0, 0, 1, 0x00, 0x00, 0xFF]),
            Err(CodecError::TrailingBytes(1))
        );
    }
}
