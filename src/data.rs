//! A-XDR value model and codec.
//!
//! Every value on the wire is `[tag][length?][payload]`. Only the counted tags
//! (array, structure, compact-array, bit-string, octet-string and the string
//! types) carry a length; all other payload sizes are implied by the tag.
//!
//! ```text
//! 01 02 12 00 01 12 00 02      array of two long-unsigned (1, 2)
//! │  │  └──┬───┘ └──┬───┘
//! │  │     └────────┴────── elements, each with its own tag
//! │  └───────────────────── element count (BER length)
//! └──────────────────────── tag: array (0x01)
//! ```
//!
//! Besides the binary form, [`Data`] has a textual `tag{payload}` form
//! (`Structure{LongUnsigned{1}, OctetString{0aff}}`) produced by `Display`
//! and parsed back by `FromStr`.

use core::fmt;
use core::str::FromStr;

use chrono::{Datelike, FixedOffset, Local, NaiveDate, TimeZone, Timelike, Utc};
use derive_try_from_primitive::TryFromPrimitive;
use nom::{
    IResult, Parser,
    bytes::streaming::take,
    error::{Error, ErrorKind},
    number::streaming::{be_f32, be_f64, be_i16, be_i32, be_i64, be_u16, be_u32, be_u64, i8, u8},
};
#[cfg(feature = "serde")]
use serde::{Serialize, Serializer};

use crate::error::CodecError;

/// Big-endian append helpers used by every encoder in the crate.
pub(crate) trait ByteBuffer {
    fn push_u16(&mut self, value: u16);
    fn push_u32(&mut self, value: u32);
    fn push_u64(&mut self, value: u64);
    /// Appends a BER definite length.
    fn push_length(&mut self, length: usize);
}

impl ByteBuffer for Vec<u8> {
    fn push_u16(&mut self, value: u16) {
        self.extend_from_slice(&value.to_be_bytes());
    }

    fn push_u32(&mut self, value: u32) {
        self.extend_from_slice(&value.to_be_bytes());
    }

    fn push_u64(&mut self, value: u64) {
        self.extend_from_slice(&value.to_be_bytes());
    }

    fn push_length(&mut self, length: usize) {
        self.extend_from_slice(&encode_length(length as u64));
    }
}

pub(crate) fn unexpected_tag(at: &[u8]) -> nom::Err<Error<&[u8]>> {
    nom::Err::Error(Error::new(at, ErrorKind::Tag))
}

/// Deepest container nesting accepted from the wire, counting arrays,
/// structures and compact-array type descriptions alike.
pub const MAX_NESTING: usize = 32;

fn too_deep(at: &[u8]) -> nom::Err<Error<&[u8]>> {
    nom::Err::Failure(Error::new(at, ErrorKind::Count))
}

// ============================================================================
// Length codec
// ============================================================================

/// Encodes a BER definite length.
///
/// Values up to 127 take one byte. Larger values are written as `0x80 | n`
/// followed by `n` big-endian bytes.
pub fn encode_length(length: u64) -> Vec<u8> {
    if length < 0x80 {
        return vec![length as u8];
    }
    let bytes = length.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    let mut out = Vec::with_capacity(1 + bytes.len() - skip);
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
    out
}

/// Parses a BER definite length. More than 8 length bytes is rejected.
pub fn parse_length(input: &[u8]) -> IResult<&[u8], u64> {
    let (rest, first) = u8(input)?;
    if first & 0x80 == 0 {
        return Ok((rest, first as u64));
    }
    let count = (first & 0x7F) as usize;
    if count > 8 {
        return Err(nom::Err::Failure(Error::new(input, ErrorKind::TooLarge)));
    }
    let (rest, bytes) = take(count).parse(rest)?;
    Ok((rest, bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)))
}

/// Decodes a BER length, returning it with the number of bytes consumed.
pub fn decode_length(bytes: &[u8]) -> Result<(u64, usize), CodecError> {
    let (rest, length) = parse_length(bytes).map_err(CodecError::from_nom)?;
    Ok((length, bytes.len() - rest.len()))
}

/// Parses a BER length used as an element or byte count.
pub(crate) fn parse_count(input: &[u8]) -> IResult<&[u8], usize> {
    let (rest, length) = parse_length(input)?;
    match usize::try_from(length) {
        Ok(count) => Ok((rest, count)),
        Err(_) => Err(nom::Err::Failure(Error::new(input, ErrorKind::TooLarge))),
    }
}

/// Parses a length-prefixed byte string (A-XDR octet-string without tag).
pub(crate) fn parse_octets(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    let (input, len) = parse_count(input)?;
    let (input, bytes) = take(len).parse(input)?;
    Ok((input, bytes.to_vec()))
}

// ============================================================================
// Data types
// ============================================================================

/// A-XDR type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[repr(u8)]
#[rustfmt::skip]
pub enum DataType {
  Null               =   0,
  Array              =   1,
  Structure          =   2,
  Boolean            =   3,
  BitString          =   4,
  DoubleLong         =   5,
  DoubleLongUnsigned =   6,
  FloatingPoint      =   7,
  OctetString        =   9,
  VisibleString      =  10,
  Utf8String         =  12,
  Bcd                =  13,
  Integer            =  15,
  Long               =  16,
  Unsigned           =  17,
  LongUnsigned       =  18,
  CompactArray       =  19,
  Long64             =  20,
  Long64Unsigned     =  21,
  Enum               =  22,
  Float32            =  23,
  Float64            =  24,
  DateTime           =  25,
  Date               =  26,
  Time               =  27,
  DontCare           = 255,
}

impl DataType {
    #[rustfmt::skip]
    const NAMES: [(DataType, &'static str); 26] = [
        (DataType::Null, "Null"),
        (DataType::Array, "Array"),
        (DataType::Structure, "Structure"),
        (DataType::Boolean, "Boolean"),
        (DataType::BitString, "BitString"),
        (DataType::DoubleLong, "DoubleLong"),
        (DataType::DoubleLongUnsigned, "DoubleLongUnsigned"),
        (DataType::FloatingPoint, "FloatingPoint"),
        (DataType::OctetString, "OctetString"),
        (DataType::VisibleString, "VisibleString"),
        (DataType::Utf8String, "Utf8String"),
        (DataType::Bcd, "Bcd"),
        (DataType::Integer, "Integer"),
        (DataType::Long, "Long"),
        (DataType::Unsigned, "Unsigned"),
        (DataType::LongUnsigned, "LongUnsigned"),
        (DataType::CompactArray, "CompactArray"),
        (DataType::Long64, "Long64"),
        (DataType::Long64Unsigned, "Long64Unsigned"),
        (DataType::Enum, "Enum"),
        (DataType::Float32, "Float32"),
        (DataType::Float64, "Float64"),
        (DataType::DateTime, "DateTime"),
        (DataType::Date, "Date"),
        (DataType::Time, "Time"),
        (DataType::DontCare, "DontCare"),
    ];

    /// Name used by the text form.
    pub fn name(self) -> &'static str {
        Self::NAMES.iter().find(|(dt, _)| *dt == self).map(|(_, name)| *name).unwrap_or("?")
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMES.iter().find(|(_, n)| *n == name).map(|(dt, _)| *dt)
    }

    fn is_container(self) -> bool {
        matches!(self, DataType::Array | DataType::Structure | DataType::CompactArray)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Date / Time / DateTime
// ============================================================================

const NOT_SPECIFIED: u8 = 0xFF;
const YEAR_NOT_SPECIFIED: u16 = 0xFFFF;
/// Deviation value meaning "local time, deviation not specified".
pub const DEVIATION_NOT_SPECIFIED: i16 = 0x8000u16 as i16;

/// How the deviation field of a `date-time` is turned into a UTC offset.
///
/// DLMS defines the deviation as minutes *from local time to UTC*, so a meter
/// in UTC+1 sends `-60`. Some devices send the opposite sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviationMode {
    /// Offset is the negated deviation.
    #[default]
    Standard,
    /// Offset equals the deviation.
    Reversed,
    /// Ignore the deviation and interpret every timestamp as local time.
    IgnoreTimezone,
}

/// A-XDR `date`: 5 bytes. `0xFF` (`0xFFFF` for the year) marks a field as not specified.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Date {
    pub year: u16,
    pub month: u8,
    pub day_of_month: u8,
    /// 1 = Monday .. 7 = Sunday.
    pub day_of_week: u8,
}

impl Date {
    pub fn new(year: u16, month: u8, day_of_month: u8, day_of_week: u8) -> Self {
        Self { year, month, day_of_month, day_of_week }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, (year, month, day_of_month, day_of_week)) = (be_u16, u8, u8, u8).parse(input)?;
        Ok((input, Self { year, month, day_of_month, day_of_week }))
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push_u16(self.year);
        buf.extend_from_slice(&[self.month, self.day_of_month, self.day_of_week]);
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.year == YEAR_NOT_SPECIFIED {
            f.write_str("*")?;
        } else {
            write!(f, "{:04}", self.year)?;
        }
        f.write_str("-")?;
        write_field(f, self.month)?;
        f.write_str("-")?;
        write_field(f, self.day_of_month)?;
        f.write_str("/")?;
        if self.day_of_week == NOT_SPECIFIED {
            f.write_str("*")
        } else {
            write!(f, "{}", self.day_of_week)
        }
    }
}

impl fmt::Debug for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Date(\"{}\")", self)
    }
}

impl FromStr for Date {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (date, weekday) = s.split_once('/').ok_or_else(|| text_error("date", s))?;
        let mut parts = date.splitn(3, '-');
        let (Some(year), Some(month), Some(day)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(text_error("date", s));
        };
        let year = if year == "*" {
            YEAR_NOT_SPECIFIED
        } else {
            year.parse().map_err(|_| text_error("date", s))?
        };
        Ok(Self {
            year,
            month: parse_field(month, s)?,
            day_of_month: parse_field(day, s)?,
            day_of_week: parse_field(weekday, s)?,
        })
    }
}

/// A-XDR `time`: 4 bytes, `0xFF` marks a field as not specified.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Time {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub hundredths: u8,
}

impl Time {
    pub fn new(hour: u8, minute: u8, second: u8, hundredths: u8) -> Self {
        Self { hour, minute, second, hundredths }
    }

    /// Out-of-range fields are kept as received; see [`DateTime::to_chrono`].
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, (hour, minute, second, hundredths)) = (u8, u8, u8, u8).parse(input)?;
        Ok((input, Self { hour, minute, second, hundredths }))
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&[self.hour, self.minute, self.second, self.hundredths]);
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_field(f, self.hour)?;
        f.write_str(":")?;
        write_field(f, self.minute)?;
        f.write_str(":")?;
        write_field(f, self.second)?;
        f.write_str(".")?;
        write_field(f, self.hundredths)
    }
}

impl fmt::Debug for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Time(\"{}\")", self)
    }
}

impl FromStr for Time {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hms, hundredths) = s.rsplit_once('.').ok_or_else(|| text_error("time", s))?;
        let mut parts = hms.splitn(3, ':');
        let (Some(hour), Some(minute), Some(second)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(text_error("time", s));
        };
        Ok(Self {
            hour: parse_field(hour, s)?,
            minute: parse_field(minute, s)?,
            second: parse_field(second, s)?,
            hundredths: parse_field(hundredths, s)?,
        })
    }
}

fn write_field(f: &mut fmt::Formatter<'_>, value: u8) -> fmt::Result {
    if value == NOT_SPECIFIED { f.write_str("*") } else { write!(f, "{:02}", value) }
}

fn parse_field(field: &str, whole: &str) -> Result<u8, CodecError> {
    if field == "*" {
        return Ok(NOT_SPECIFIED);
    }
    field.parse().map_err(|_| text_error("date/time field", whole))
}

fn text_error(what: &str, input: &str) -> CodecError {
    CodecError::Text(format!("invalid {what}: {input:?}"))
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClockStatus(pub u8);

impl ClockStatus {
    #[rustfmt::skip]
    const INVALID_VALUE_BIT:   u8 = 0b00000001;
    #[rustfmt::skip]
    const DOUBTFUL_VALUE_BIT:  u8 = 0b00000010;
    #[rustfmt::skip]
    const DIFFERENT_BASE_BIT:  u8 = 0b00000100;
    #[rustfmt::skip]
    const INVALID_STATUS_BIT:  u8 = 0b00001000;
    #[rustfmt::skip]
    const DAYLIGHT_SAVING_BIT: u8 = 0b10000000;

    pub const NOT_SPECIFIED: Self = Self(NOT_SPECIFIED);

    pub fn is_specified(&self) -> bool {
        self.0 != NOT_SPECIFIED
    }

    pub fn invalid_value(&self) -> bool {
        self.is_specified() && (self.0 & Self::INVALID_VALUE_BIT) != 0
    }

    pub fn doubtful_value(&self) -> bool {
        self.is_specified() && (self.0 & Self::DOUBTFUL_VALUE_BIT) != 0
    }

    pub fn different_base(&self) -> bool {
        self.is_specified() && (self.0 & Self::DIFFERENT_BASE_BIT) != 0
    }

    pub fn invalid_status(&self) -> bool {
        self.is_specified() && (self.0 & Self::INVALID_STATUS_BIT) != 0
    }

    pub fn daylight_saving(&self) -> bool {
        self.is_specified() && (self.0 & Self::DAYLIGHT_SAVING_BIT) != 0
    }
}

impl fmt::Debug for ClockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClockStatus(0x{:02X})", self.0)
    }
}

/// A-XDR `date-time`: 12 bytes.
///
/// ```text
/// 07 E8 03 01 05 0C 1E 00 00 FF C4 00
/// └─┬─┘ │  │  │  │  │  │  │  └─┬─┘ └── clock status
///   │   │  │  │  │  │  │  │    └────── deviation (i16, minutes, 0x8000 = local)
///   │   │  │  │  └──┴──┴──┴─────────── hour, minute, second, hundredths
///   │   │  │  └────────────────────── day of week
///   │   │  └───────────────────────── day of month
///   │   └──────────────────────────── month
///   └──────────────────────────────── year
/// ```
///
/// Fields are stored as received so encoding is lossless. Calendar
/// interpretation happens in [`DateTime::to_chrono`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateTime {
    pub date: Date,
    pub time: Time,
    pub deviation: i16,
    pub clock_status: ClockStatus,
}

impl DateTime {
    pub fn new(date: Date, time: Time, deviation: Option<i16>, clock_status: ClockStatus) -> Self {
        Self { date, time, deviation: deviation.unwrap_or(DEVIATION_NOT_SPECIFIED), clock_status }
    }

    /// The deviation in minutes, or `None` for local time.
    pub fn deviation(&self) -> Option<i16> {
        Some(self.deviation).filter(|&d| d != DEVIATION_NOT_SPECIFIED)
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, date) = Date::parse(input)?;
        let (input, time) = Time::parse(input)?;
        let (input, deviation) = be_i16(input)?;
        let (input, clock_status) = u8(input)?;
        Ok((input, Self { date, time, deviation, clock_status: ClockStatus(clock_status) }))
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        self.date.encode_into(buf);
        self.time.encode_into(buf);
        buf.extend_from_slice(&self.deviation.to_be_bytes());
        buf.push(self.clock_status.0);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(12);
        self.encode_into(&mut buf);
        buf
    }

    /// The sentinel returned for timestamps that do not name a calendar instant.
    pub fn epoch() -> chrono::DateTime<FixedOffset> {
        chrono::DateTime::<Utc>::UNIX_EPOCH.fixed_offset()
    }

    /// Interprets the timestamp.
    ///
    /// A deviation of `0x8000`, or [`DeviationMode::IgnoreTimezone`], yields
    /// local time. Non-specified time fields count as zero. Anything that does
    /// not form a valid calendar instant (month 13, year not specified) yields
    /// [`DateTime::epoch`].
    pub fn to_chrono(&self, mode: DeviationMode) -> chrono::DateTime<FixedOffset> {
        self.try_to_chrono(mode).unwrap_or_else(Self::epoch)
    }

    fn try_to_chrono(&self, mode: DeviationMode) -> Option<chrono::DateTime<FixedOffset>> {
        if self.date.year == YEAR_NOT_SPECIFIED {
            return None;
        }
        let date = NaiveDate::from_ymd_opt(
            self.date.year as i32,
            self.date.month as u32,
            self.date.day_of_month as u32,
        )?;
        let or_zero = |v: u8| if v == NOT_SPECIFIED { 0 } else { v as u32 };
        let naive = date.and_hms_milli_opt(
            or_zero(self.time.hour),
            or_zero(self.time.minute),
            or_zero(self.time.second),
            or_zero(self.time.hundredths) * 10,
        )?;

        let offset_minutes = match (mode, self.deviation()) {
            (DeviationMode::IgnoreTimezone, _) | (_, None) => {
                return Local.from_local_datetime(&naive).earliest().map(|dt| dt.fixed_offset());
            }
            (DeviationMode::Standard, Some(deviation)) => -(deviation as i32),
            (DeviationMode::Reversed, Some(deviation)) => deviation as i32,
        };
        FixedOffset::east_opt(offset_minutes * 60)?.from_local_datetime(&naive).single()
    }

    /// Builds a wire timestamp from a chrono value using the inverse of
    /// [`DateTime::to_chrono`]. Clock status is set to "ok".
    pub fn from_chrono(value: &chrono::DateTime<FixedOffset>, mode: DeviationMode) -> Self {
        let offset_minutes = (value.offset().local_minus_utc() / 60) as i16;
        let deviation = match mode {
            DeviationMode::Standard => -offset_minutes,
            DeviationMode::Reversed => offset_minutes,
            DeviationMode::IgnoreTimezone => DEVIATION_NOT_SPECIFIED,
        };
        let date = Date {
            year: value.year() as u16,
            month: value.month() as u8,
            day_of_month: value.day() as u8,
            day_of_week: value.weekday().number_from_monday() as u8,
        };
        let time = Time {
            hour: value.hour() as u8,
            minute: value.minute() as u8,
            second: value.second() as u8,
            hundredths: (value.timestamp_subsec_millis() / 10) as u8,
        };
        Self { date, time, deviation, clock_status: ClockStatus(0x00) }
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ", self.date, self.time)?;
        match self.deviation() {
            Some(deviation) => write!(f, "{deviation}")?,
            None => f.write_str("*")?,
        }
        if self.clock_status.is_specified() {
            write!(f, " {:02x}", self.clock_status.0)
        } else {
            f.write_str(" *")
        }
    }
}

impl fmt::Debug for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DateTime(\"{}\")", self)
    }
}

impl FromStr for DateTime {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        let [date, time, deviation, status] = parts[..] else {
            return Err(text_error("date-time", s));
        };
        let deviation = if deviation == "*" {
            DEVIATION_NOT_SPECIFIED
        } else {
            deviation.parse().map_err(|_| text_error("date-time", s))?
        };
        let clock_status = if status == "*" {
            ClockStatus::NOT_SPECIFIED
        } else {
            ClockStatus(u8::from_str_radix(status, 16).map_err(|_| text_error("date-time", s))?)
        };
        Ok(Self { date: date.parse()?, time: time.parse()?, deviation, clock_status })
    }
}

#[cfg(feature = "serde")]
macro_rules! serialize_as_string {
    ($($ty:ty),*) => {
        $(impl Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.collect_str(self)
            }
        })*
    };
}

#[cfg(feature = "serde")]
serialize_as_string!(Date, Time, DateTime, BitString);

// ============================================================================
// BitString
// ============================================================================

/// A bit string whose length is counted in bits. Bit 0 is the MSB of the first byte.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct BitString {
    len: usize,
    bytes: Vec<u8>,
}

impl BitString {
    /// Wraps raw bytes. Bytes beyond `ceil(len / 8)` are dropped.
    pub fn from_bytes(mut bytes: Vec<u8>, len: usize) -> Self {
        bytes.resize(len.div_ceil(8), 0);
        Self { len, bytes }
    }

    pub fn from_bits(bits: &[bool]) -> Self {
        let mut bytes = vec![0u8; bits.len().div_ceil(8)];
        for (i, _) in bits.iter().enumerate().filter(|(_, bit)| **bit) {
            bytes[i / 8] |= 0x80 >> (i % 8);
        }
        Self { len: bits.len(), bytes }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bit(&self, index: usize) -> Option<bool> {
        (index < self.len).then(|| self.bytes[index / 8] & (0x80 >> (index % 8)) != 0)
    }
}

impl fmt::Display for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.len {
            f.write_str(if self.bit(i) == Some(true) { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl fmt::Debug for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitString(\"{}\")", self)
    }
}

impl FromStr for BitString {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bits = s
            .chars()
            .map(|c| match c {
                '0' => Ok(false),
                '1' => Ok(true),
                _ => Err(text_error("bit string", s)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_bits(&bits))
    }
}

// ============================================================================
// CompactArray
// ============================================================================

/// Row schema of a compact array.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum TypeDescription {
    /// A single non-container type.
    Simple(DataType),
    /// Fixed-size array of one element type.
    Array { count: u16, element: Box<TypeDescription> },
    Structure(Vec<TypeDescription>),
}

impl TypeDescription {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        Self::parse_nested(input, 0)
    }

    fn parse_nested(input: &[u8], depth: usize) -> IResult<&[u8], Self> {
        let (rest, tag) = u8(input)?;
        let data_type = DataType::try_from(tag).map_err(|_| unexpected_tag(input))?;
        if data_type.is_container() && depth >= MAX_NESTING {
            return Err(too_deep(input));
        }
        match data_type {
            DataType::Array => {
                let (rest, count) = be_u16(rest)?;
                let (rest, element) = Self::parse_nested(rest, depth + 1)?;
                Ok((rest, TypeDescription::Array { count, element: Box::new(element) }))
            }
            DataType::Structure => {
                let (mut rest, count) = parse_count(rest)?;
                let mut fields = Vec::with_capacity(count.min(rest.len()));
                for _ in 0..count {
                    let (r, field) = Self::parse_nested(rest, depth + 1)?;
                    fields.push(field);
                    rest = r;
                }
                Ok((rest, TypeDescription::Structure(fields)))
            }
            DataType::CompactArray => Err(unexpected_tag(input)),
            simple => Ok((rest, TypeDescription::Simple(simple))),
        }
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            TypeDescription::Simple(data_type) => buf.push(*data_type as u8),
            TypeDescription::Array { count, element } => {
                buf.push(DataType::Array as u8);
                buf.push_u16(*count);
                element.encode_into(buf);
            }
            TypeDescription::Structure(fields) => {
                buf.push(DataType::Structure as u8);
                buf.push_length(fields.len());
                for field in fields {
                    field.encode_into(buf);
                }
            }
        }
    }

    /// Whether `value` has exactly this shape.
    pub fn matches(&self, value: &Data) -> bool {
        match (self, value) {
            (TypeDescription::Simple(data_type), value) => {
                !data_type.is_container() && value.data_type() == *data_type
            }
            (TypeDescription::Array { count, element }, Data::Array(items)) => {
                items.len() == *count as usize && items.iter().all(|item| element.matches(item))
            }
            (TypeDescription::Structure(fields), Data::Structure(items)) => {
                fields.len() == items.len() && fields.iter().zip(items).all(|(f, i)| f.matches(i))
            }
            _ => false,
        }
    }

    /// Whether a row of this shape occupies no bytes at all.
    fn is_zero_width(&self) -> bool {
        match self {
            TypeDescription::Simple(data_type) => {
                matches!(data_type, DataType::Null | DataType::DontCare)
            }
            TypeDescription::Array { count, element } => *count == 0 || element.is_zero_width(),
            TypeDescription::Structure(fields) => fields.iter().all(TypeDescription::is_zero_width),
        }
    }

    fn parse_row<'a>(&self, input: &'a [u8]) -> IResult<&'a [u8], Data> {
        match self {
            // Simple descriptions never hold containers, so no depth to carry.
            TypeDescription::Simple(data_type) => Data::parse_payload(*data_type, input, 0),
            TypeDescription::Array { count, element } => {
                let mut rest = input;
                let mut items = Vec::with_capacity((*count as usize).min(input.len()));
                for _ in 0..*count {
                    let (r, item) = element.parse_row(rest)?;
                    items.push(item);
                    rest = r;
                }
                Ok((rest, Data::Array(items)))
            }
            TypeDescription::Structure(fields) => {
                let mut rest = input;
                let mut items = Vec::with_capacity(fields.len());
                for field in fields {
                    let (r, item) = field.parse_row(rest)?;
                    items.push(item);
                    rest = r;
                }
                Ok((rest, Data::Structure(items)))
            }
        }
    }

    fn encode_row(&self, value: &Data, buf: &mut Vec<u8>) {
        match (self, value) {
            (TypeDescription::Simple(_), value) => value.encode_payload(buf),
            (TypeDescription::Array { element, .. }, Data::Array(items)) => {
                for item in items {
                    element.encode_row(item, buf);
                }
            }
            (TypeDescription::Structure(fields), Data::Structure(items)) => {
                for (field, item) in fields.iter().zip(items) {
                    field.encode_row(item, buf);
                }
            }
            _ => panic!("compact array row {value:?} does not match its type description"),
        }
    }
}

impl fmt::Display for TypeDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescription::Simple(data_type) => write!(f, "{data_type}"),
            TypeDescription::Array { count, element } => write!(f, "Array[{count}]({element})"),
            TypeDescription::Structure(fields) => {
                f.write_str("Structure(")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{field}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// A compact array: one type description shared by all rows, so rows are
/// encoded without their own tags.
///
/// ```text
/// 13 12 05 12 00 01 12 00 02 12 00 03 ...
/// │  └┬┘ │  └──────┬──────┘
/// │   │  │         └──────── rows (payload only)
/// │   │  └────────────────── byte length of all rows
/// │   └───────────────────── type description: long-unsigned
/// └───────────────────────── tag: compact-array (0x13)
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct CompactArray {
    description: TypeDescription,
    elements: Vec<Data>,
}

impl CompactArray {
    /// Fails if any element does not match `description`.
    pub fn new(description: TypeDescription, elements: Vec<Data>) -> Result<Self, CodecError> {
        if let TypeDescription::Simple(data_type) = &description {
            if data_type.is_container() {
                return Err(CodecError::InvalidValue(format!(
                    "{data_type} cannot be a simple compact array type"
                )));
            }
        }
        if description.is_zero_width() {
            return Err(CodecError::InvalidValue(format!(
                "compact array rows of {description} carry no bytes"
            )));
        }
        if let Some(position) = elements.iter().position(|e| !description.matches(e)) {
            return Err(CodecError::InvalidValue(format!(
                "compact array element {position} does not match {description}"
            )));
        }
        Ok(Self { description, elements })
    }

    pub fn description(&self) -> &TypeDescription {
        &self.description
    }

    pub fn elements(&self) -> &[Data] {
        &self.elements
    }

    pub fn into_elements(self) -> Vec<Data> {
        self.elements
    }

    fn parse(input: &[u8], depth: usize) -> IResult<&[u8], Self> {
        let (rest, description) = TypeDescription::parse_nested(input, depth)?;
        // A row that consumes nothing would never exhaust the row bytes.
        if description.is_zero_width() {
            return Err(nom::Err::Failure(Error::new(input, ErrorKind::Verify)));
        }
        let (input, len) = parse_count(rest)?;
        let (input, mut rows) = take(len).parse(input)?;
        let mut elements = Vec::new();
        while !rows.is_empty() {
            // Running out mid-row is malformed input, not a request for more data.
            let (rest, row) = description.parse_row(rows).map_err(|e| match e {
                nom::Err::Incomplete(_) => nom::Err::Failure(Error::new(rows, ErrorKind::Eof)),
                e => e,
            })?;
            elements.push(row);
            rows = rest;
        }
        Ok((input, Self { description, elements }))
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        self.description.encode_into(buf);
        let mut rows = Vec::new();
        for element in &self.elements {
            self.description.encode_row(element, &mut rows);
        }
        buf.push_length(rows.len());
        buf.extend_from_slice(&rows);
    }
}

// ============================================================================
// Data
// ============================================================================

/// An A-XDR value.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Null,
    Array(Vec<Data>),
    Structure(Vec<Data>),
    Boolean(bool),
    BitString(BitString),
    DoubleLong(i32),
    DoubleLongUnsigned(u32),
    /// Legacy `floating-point` (tag 7), same layout as `float32`.
    FloatingPoint(f32),
    OctetString(Vec<u8>),
    VisibleString(String),
    Utf8String(String),
    Bcd(i8),
    Integer(i8),
    Long(i16),
    Unsigned(u8),
    LongUnsigned(u16),
    CompactArray(CompactArray),
    Long64(i64),
    Long64Unsigned(u64),
    Enum(u8),
    Float32(f32),
    Float64(f64),
    DateTime(DateTime),
    Date(Date),
    Time(Time),
    DontCare,
}

impl Data {
    pub fn data_type(&self) -> DataType {
        match self {
            Data::Null => DataType::Null,
            Data::Array(_) => DataType::Array,
            Data::Structure(_) => DataType::Structure,
            Data::Boolean(_) => DataType::Boolean,
            Data::BitString(_) => DataType::BitString,
            Data::DoubleLong(_) => DataType::DoubleLong,
            Data::DoubleLongUnsigned(_) => DataType::DoubleLongUnsigned,
            Data::FloatingPoint(_) => DataType::FloatingPoint,
            Data::OctetString(_) => DataType::OctetString,
            Data::VisibleString(_) => DataType::VisibleString,
            Data::Utf8String(_) => DataType::Utf8String,
            Data::Bcd(_) => DataType::Bcd,
            Data::Integer(_) => DataType::Integer,
            Data::Long(_) => DataType::Long,
            Data::Unsigned(_) => DataType::Unsigned,
            Data::LongUnsigned(_) => DataType::LongUnsigned,
            Data::CompactArray(_) => DataType::CompactArray,
            Data::Long64(_) => DataType::Long64,
            Data::Long64Unsigned(_) => DataType::Long64Unsigned,
            Data::Enum(_) => DataType::Enum,
            Data::Float32(_) => DataType::Float32,
            Data::Float64(_) => DataType::Float64,
            Data::DateTime(_) => DataType::DateTime,
            Data::Date(_) => DataType::Date,
            Data::Time(_) => DataType::Time,
            Data::DontCare => DataType::DontCare,
        }
    }

    /// Parses one tagged value. Containers nested deeper than
    /// [`MAX_NESTING`] are rejected.
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        Self::parse_nested(input, 0)
    }

    fn parse_nested(input: &[u8], depth: usize) -> IResult<&[u8], Self> {
        let (rest, tag) = u8(input)?;
        let data_type = DataType::try_from(tag).map_err(|_| unexpected_tag(input))?;
        if data_type.is_container() && depth >= MAX_NESTING {
            return Err(too_deep(input));
        }
        Self::parse_payload(data_type, rest, depth)
    }

    /// Parses the bytes following a tag. `depth` counts the containers
    /// already entered.
    fn parse_payload(data_type: DataType, input: &[u8], depth: usize) -> IResult<&[u8], Self> {
        Ok(match data_type {
            DataType::Null => (input, Data::Null),
            DataType::DontCare => (input, Data::DontCare),
            DataType::Array | DataType::Structure => {
                let (mut rest, count) = parse_count(input)?;
                let mut items = Vec::with_capacity(count.min(rest.len()));
                for _ in 0..count {
                    let (r, item) = Self::parse_nested(rest, depth + 1)?;
                    items.push(item);
                    rest = r;
                }
                if data_type == DataType::Array {
                    (rest, Data::Array(items))
                } else {
                    (rest, Data::Structure(items))
                }
            }
            DataType::Boolean => {
                let (input, b) = u8(input)?;
                (input, Data::Boolean(b != 0))
            }
            DataType::BitString => {
                let (input, bits) = parse_count(input)?;
                let (input, bytes) = take(bits.div_ceil(8)).parse(input)?;
                (input, Data::BitString(BitString::from_bytes(bytes.to_vec(), bits)))
            }
            DataType::DoubleLong => {
                let (input, n) = be_i32(input)?;
                (input, Data::DoubleLong(n))
            }
            DataType::DoubleLongUnsigned => {
                let (input, n) = be_u32(input)?;
                (input, Data::DoubleLongUnsigned(n))
            }
            DataType::FloatingPoint => {
                let (input, n) = be_f32(input)?;
                (input, Data::FloatingPoint(n))
            }
            DataType::OctetString => {
                let (input, bytes) = parse_octets(input)?;
                (input, Data::OctetString(bytes))
            }
            DataType::VisibleString => {
                let (input, bytes) = parse_octets(input)?;
                // One char per byte so any octet survives a decode/encode pass.
                (input, Data::VisibleString(bytes.iter().map(|&b| char::from(b)).collect()))
            }
            DataType::Utf8String => {
                let (rest, bytes) = parse_octets(input)?;
                let text = String::from_utf8(bytes)
                    .map_err(|_| nom::Err::Failure(Error::new(input, ErrorKind::Char)))?;
                (rest, Data::Utf8String(text))
            }
            DataType::Bcd => {
                let (input, n) = i8(input)?;
                (input, Data::Bcd(n))
            }
            DataType::Integer => {
                let (input, n) = i8(input)?;
                (input, Data::Integer(n))
            }
            DataType::Long => {
                let (input, n) = be_i16(input)?;
                (input, Data::Long(n))
            }
            DataType::Unsigned => {
                let (input, n) = u8(input)?;
                (input, Data::Unsigned(n))
            }
            DataType::LongUnsigned => {
                let (input, n) = be_u16(input)?;
                (input, Data::LongUnsigned(n))
            }
            DataType::CompactArray => {
                let (input, array) = CompactArray::parse(input, depth)?;
                (input, Data::CompactArray(array))
            }
            DataType::Long64 => {
                let (input, n) = be_i64(input)?;
                (input, Data::Long64(n))
            }
            DataType::Long64Unsigned => {
                let (input, n) = be_u64(input)?;
                (input, Data::Long64Unsigned(n))
            }
            DataType::Enum => {
                let (input, n) = u8(input)?;
                (input, Data::Enum(n))
            }
            DataType::Float32 => {
                let (input, n) = be_f32(input)?;
                (input, Data::Float32(n))
            }
            DataType::Float64 => {
                let (input, n) = be_f64(input)?;
                (input, Data::Float64(n))
            }
            DataType::DateTime => {
                let (input, date_time) = DateTime::parse(input)?;
                (input, Data::DateTime(date_time))
            }
            DataType::Date => {
                let (input, date) = Date::parse(input)?;
                (input, Data::Date(date))
            }
            DataType::Time => {
                let (input, time) = Time::parse(input)?;
                (input, Data::Time(time))
            }
        })
    }

    /// Decodes one value from the front of `bytes`, returning it with the
    /// number of bytes consumed. Trailing bytes are left for the caller.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), CodecError> {
        let (rest, data) = Self::parse(bytes).map_err(CodecError::from_nom)?;
        Ok((data, bytes.len() - rest.len()))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.data_type() as u8);
        self.encode_payload(buf);
    }

    /// Encodes everything after the tag.
    fn encode_payload(&self, buf: &mut Vec<u8>) {
        match self {
            Data::Null | Data::DontCare => {}
            Data::Array(items) | Data::Structure(items) => {
                buf.push_length(items.len());
                for item in items {
                    item.encode_into(buf);
                }
            }
            Data::Boolean(b) => buf.push(if *b { 0x01 } else { 0x00 }),
            Data::BitString(bits) => {
                buf.push_length(bits.len());
                buf.extend_from_slice(bits.bytes());
            }
            Data::DoubleLong(n) => buf.extend_from_slice(&n.to_be_bytes()),
            Data::DoubleLongUnsigned(n) => buf.push_u32(*n),
            Data::FloatingPoint(n) | Data::Float32(n) => buf.extend_from_slice(&n.to_be_bytes()),
            Data::OctetString(bytes) => {
                buf.push_length(bytes.len());
                buf.extend_from_slice(bytes);
            }
            Data::VisibleString(s) => {
                // Characters outside Latin-1 have no single-byte form.
                buf.push_length(s.chars().count());
                buf.extend(s.chars().map(|c| u8::try_from(c).unwrap_or(b'?')));
            }
            Data::Utf8String(s) => {
                buf.push_length(s.len());
                buf.extend_from_slice(s.as_bytes());
            }
            Data::Bcd(n) | Data::Integer(n) => buf.push(*n as u8),
            Data::Long(n) => buf.extend_from_slice(&n.to_be_bytes()),
            Data::Unsigned(n) | Data::Enum(n) => buf.push(*n),
            Data::LongUnsigned(n) => buf.push_u16(*n),
            Data::CompactArray(array) => array.encode_into(buf),
            Data::Long64(n) => buf.extend_from_slice(&n.to_be_bytes()),
            Data::Long64Unsigned(n) => buf.push_u64(*n),
            Data::Float64(n) => buf.extend_from_slice(&n.to_be_bytes()),
            Data::DateTime(date_time) => date_time.encode_into(buf),
            Data::Date(date) => date.encode_into(buf),
            Data::Time(time) => time.encode_into(buf),
        }
    }
}

// ============================================================================
// Text form
// ============================================================================

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Data]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.data_type())?;
        match self {
            Data::Null | Data::DontCare => {}
            Data::Array(items) | Data::Structure(items) => write_list(f, items)?,
            Data::Boolean(b) => write!(f, "{b}")?,
            Data::BitString(bits) => write!(f, "{bits}")?,
            Data::DoubleLong(n) => write!(f, "{n}")?,
            Data::DoubleLongUnsigned(n) => write!(f, "{n}")?,
            Data::FloatingPoint(n) | Data::Float32(n) => write!(f, "{n:?}")?,
            Data::OctetString(bytes) => f.write_str(&hex::encode(bytes))?,
            Data::VisibleString(s) | Data::Utf8String(s) => write_quoted(f, s)?,
            Data::Bcd(n) | Data::Integer(n) => write!(f, "{n}")?,
            Data::Long(n) => write!(f, "{n}")?,
            Data::Unsigned(n) | Data::Enum(n) => write!(f, "{n}")?,
            Data::LongUnsigned(n) => write!(f, "{n}")?,
            Data::CompactArray(array) => {
                write!(f, "{};", array.description)?;
                if !array.elements.is_empty() {
                    f.write_str(" ")?;
                    write_list(f, &array.elements)?;
                }
            }
            Data::Long64(n) => write!(f, "{n}")?,
            Data::Long64Unsigned(n) => write!(f, "{n}")?,
            Data::Float64(n) => write!(f, "{n:?}")?,
            Data::DateTime(date_time) => write!(f, "{date_time}")?,
            Data::Date(date) => write!(f, "{date}")?,
            Data::Time(time) => write!(f, "{time}")?,
        }
        f.write_str("}")
    }
}

impl FromStr for Data {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parser = TextParser { input: s, pos: 0 };
        let data = parser.value()?;
        parser.skip_whitespace();
        if parser.pos != s.len() {
            return Err(parser.error("unexpected trailing text"));
        }
        Ok(data)
    }
}

/// Recursive-descent reader for the `tag{payload}` form.
struct TextParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> TextParser<'a> {
    fn error(&self, what: &str) -> CodecError {
        CodecError::Text(format!("{what} at offset {} in {:?}", self.pos, self.input))
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), CodecError> {
        self.skip_whitespace();
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            _ => Err(self.error(&format!("expected '{expected}'"))),
        }
    }

    fn identifier(&mut self) -> &'a str {
        self.skip_whitespace();
        let rest = self.rest();
        let len = rest.find(|c: char| !c.is_ascii_alphanumeric()).unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    fn data_type(&mut self) -> Result<DataType, CodecError> {
        let name = self.identifier();
        DataType::from_name(name).ok_or_else(|| self.error(&format!("unknown type {name:?}")))
    }

    /// Raw scalar payload up to the closing brace.
    fn until_close(&mut self) -> &'a str {
        let rest = self.rest();
        let len = rest.find('}').unwrap_or(rest.len());
        self.pos += len;
        rest[..len].trim()
    }

    fn quoted(&mut self) -> Result<String, CodecError> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some(c @ ('"' | '\\')) => out.push(c),
                    _ => return Err(self.error("invalid escape")),
                },
                Some(c) => out.push(c),
                None => return Err(self.error("unterminated string")),
            }
        }
    }

    fn list(&mut self) -> Result<Vec<Data>, CodecError> {
        let mut items = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some('}') {
            return Ok(items);
        }
        loop {
            items.push(self.value()?);
            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some('}') => return Ok(items),
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn description(&mut self) -> Result<TypeDescription, CodecError> {
        let data_type = self.data_type()?;
        match data_type {
            DataType::Array => {
                self.expect('[')?;
                let rest = self.rest();
                let len = rest.find(']').ok_or_else(|| self.error("expected ']'"))?;
                let count = rest[..len].trim().parse().map_err(|_| self.error("invalid count"))?;
                self.pos += len + 1;
                self.expect('(')?;
                let element = self.description()?;
                self.expect(')')?;
                Ok(TypeDescription::Array { count, element: Box::new(element) })
            }
            DataType::Structure => {
                self.expect('(')?;
                let mut fields = Vec::new();
                self.skip_whitespace();
                if self.peek() == Some(')') {
                    self.bump();
                    return Ok(TypeDescription::Structure(fields));
                }
                loop {
                    fields.push(self.description()?);
                    self.skip_whitespace();
                    match self.bump() {
                        Some(',') => continue,
                        Some(')') => return Ok(TypeDescription::Structure(fields)),
                        _ => return Err(self.error("expected ',' or ')'")),
                    }
                }
            }
            DataType::CompactArray => Err(self.error("nested compact array description")),
            simple => Ok(TypeDescription::Simple(simple)),
        }
    }

    fn value(&mut self) -> Result<Data, CodecError> {
        let data_type = self.data_type()?;
        self.expect('{')?;
        let data = match data_type {
            DataType::Array => Data::Array(self.list()?),
            DataType::Structure => Data::Structure(self.list()?),
            DataType::CompactArray => {
                let description = self.description()?;
                self.expect(';')?;
                let elements = self.list()?;
                Data::CompactArray(CompactArray::new(description, elements)?)
            }
            DataType::VisibleString => Data::VisibleString(self.quoted()?),
            DataType::Utf8String => Data::Utf8String(self.quoted()?),
            scalar => {
                let raw = self.until_close();
                parse_scalar(scalar, raw).ok_or_else(|| self.error(&format!("invalid {scalar}")))?
            }
        };
        self.expect('}')?;
        Ok(data)
    }
}

fn parse_scalar(data_type: DataType, raw: &str) -> Option<Data> {
    Some(match data_type {
        DataType::Null if raw.is_empty() => Data::Null,
        DataType::DontCare if raw.is_empty() => Data::DontCare,
        DataType::Boolean => Data::Boolean(raw.parse().ok()?),
        DataType::BitString => Data::BitString(raw.parse().ok()?),
        DataType::DoubleLong => Data::DoubleLong(raw.parse().ok()?),
        DataType::DoubleLongUnsigned => Data::DoubleLongUnsigned(raw.parse().ok()?),
        DataType::FloatingPoint => Data::FloatingPoint(raw.parse().ok()?),
        DataType::OctetString => Data::OctetString(hex::decode(raw).ok()?),
        DataType::Bcd => Data::Bcd(raw.parse().ok()?),
        DataType::Integer => Data::Integer(raw.parse().ok()?),
        DataType::Long => Data::Long(raw.parse().ok()?),
        DataType::Unsigned => Data::Unsigned(raw.parse().ok()?),
        DataType::LongUnsigned => Data::LongUnsigned(raw.parse().ok()?),
        DataType::Long64 => Data::Long64(raw.parse().ok()?),
        DataType::Long64Unsigned => Data::Long64Unsigned(raw.parse().ok()?),
        DataType::Enum => Data::Enum(raw.parse().ok()?),
        DataType::Float32 => Data::Float32(raw.parse().ok()?),
        DataType::Float64 => Data::Float64(raw.parse().ok()?),
        DataType::DateTime => Data::DateTime(raw.parse().ok()?),
        DataType::Date => Data::Date(raw.parse().ok()?),
        DataType::Time => Data::Time(raw.parse().ok()?),
        _ => return None,
    })
}
