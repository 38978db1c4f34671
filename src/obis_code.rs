use core::fmt::{self, Debug, Display};
use core::str::FromStr;

use nom::{IResult, Parser, number::streaming::u8};
#[cfg(feature = "serde")]
use serde::{Serialize, Serializer};

use crate::error::CodecError;

/// An OBIS code: the 6-byte logical name of a COSEM object.
///
/// Printed as `a-b:c.d.e.f`. Parsing also accepts `*` before the last group
/// and the plain dotted form `a.b.c.d.e.f`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObisCode {
    pub a: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub f: u8,
}

impl ObisCode {
    pub const fn new(a: u8, b: u8, c: u8, d: u8, e: u8, f: u8) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, (a, b, c, d, e, f)) = (u8, u8, u8, u8, u8, u8).parse(input)?;
        Ok((input, Self::new(a, b, c, d, e, f)))
    }

    pub const fn to_bytes(self) -> [u8; 6] {
        [self.a, self.b, self.c, self.d, self.e, self.f]
    }
}

impl From<[u8; 6]> for ObisCode {
    fn from([a, b, c, d, e, f]: [u8; 6]) -> Self {
        Self::new(a, b, c, d, e, f)
    }
}

impl TryFrom<&[u8]> for ObisCode {
    type Error = CodecError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; 6] = bytes.try_into().map_err(|_| {
            CodecError::InvalidValue(format!("logical name must be 6 bytes, got {}", bytes.len()))
        })?;
        Ok(bytes.into())
    }
}

impl Display for ObisCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}:{}.{}.{}.{}", self.a, self.b, self.c, self.d, self.e, self.f)
    }
}

impl Debug for ObisCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ObisCode({})", self)
    }
}

impl FromStr for ObisCode {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CodecError::Text(format!("invalid OBIS code {s:?}"));
        let groups = s
            .split(['-', ':', '.', '*'])
            .map(|group| group.trim().parse::<u8>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        let bytes: [u8; 6] = groups.try_into().map_err(|_| invalid())?;
        Ok(bytes.into())
    }
}

#[cfg(feature = "serde")]
impl Serialize for ObisCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
