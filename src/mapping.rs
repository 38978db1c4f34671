//! Conversions between native Rust values and [`Data`].
//!
//! Primitive types map to one fixed A-XDR type each. Aggregates describe their
//! own layout with [`StructBuilder`] and [`StructReader`]:
//!
//! ```
//! use dlms_engine::data::Data;
//! use dlms_engine::mapping::{FromData, IntoData, StructBuilder, StructReader};
//!
//! struct ScalerUnit {
//!     scaler: i8,
//!     unit: u8,
//! }
//!
//! impl IntoData for ScalerUnit {
//!     fn into_data(self) -> Data {
//!         StructBuilder::new().field(self.scaler).field(Data::Enum(self.unit)).build()
//!     }
//! }
//!
//! impl FromData for ScalerUnit {
//!     fn from_data(data: &Data) -> dlms_engine::Result<Self> {
//!         let mut reader = StructReader::new(data)?;
//!         let scaler = reader.next()?;
//!         let unit = reader.next()?;
//!         reader.finish()?;
//!         Ok(Self { scaler, unit })
//!     }
//! }
//!
//! let data = ScalerUnit { scaler: -1, unit: 30 }.into_data();
//! assert_eq!(data.to_string(), "Structure{Integer{-1}, Enum{30}}");
//! let back = ScalerUnit::from_data(&data).unwrap();
//! assert_eq!((back.scaler, back.unit), (-1, 30));
//! ```

use crate::data::{Data, Date, DateTime, Time};
use crate::error::{Error, Result};
use crate::obis_code::ObisCode;

pub trait IntoData {
    fn into_data(self) -> Data;
}

pub trait FromData: Sized {
    fn from_data(data: &Data) -> Result<Self>;
}

/// A value whose attributes are written one Set request per field.
///
/// Used by `ClientEngine::set_fields`.
pub trait AttributeFields {
    /// `(attribute id, value)` pairs in write order.
    fn attribute_fields(&self) -> Vec<(i8, Data)>;
}

fn mismatch<T>(expected: &str, data: &Data) -> Result<T> {
    Err(Error::CheckDoesNotMatch(format!("expected {expected}, got {data}")))
}

macro_rules! primitive_mapping {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl IntoData for $ty {
                fn into_data(self) -> Data {
                    Data::$variant(self)
                }
            }

            impl FromData for $ty {
                fn from_data(data: &Data) -> Result<Self> {
                    match data {
                        Data::$variant(value) => Ok(value.clone()),
                        other => mismatch(stringify!($variant), other),
                    }
                }
            }
        )*
    };
}

primitive_mapping! {
    bool => Boolean,
    i8 => Integer,
    i16 => Long,
    i32 => DoubleLong,
    i64 => Long64,
    u16 => LongUnsigned,
    u32 => DoubleLongUnsigned,
    u64 => Long64Unsigned,
    f64 => Float64,
    Vec<u8> => OctetString,
    DateTime => DateTime,
    Date => Date,
    Time => Time,
}

impl IntoData for u8 {
    fn into_data(self) -> Data {
        Data::Unsigned(self)
    }
}

/// Accepts `unsigned` and `enum`.
impl FromData for u8 {
    fn from_data(data: &Data) -> Result<Self> {
        match data {
            Data::Unsigned(value) | Data::Enum(value) => Ok(*value),
            other => mismatch("Unsigned", other),
        }
    }
}

impl IntoData for f32 {
    fn into_data(self) -> Data {
        Data::Float32(self)
    }
}

/// Accepts `float32` and the legacy `floating-point`.
impl FromData for f32 {
    fn from_data(data: &Data) -> Result<Self> {
        match data {
            Data::Float32(value) | Data::FloatingPoint(value) => Ok(*value),
            other => mismatch("Float32", other),
        }
    }
}

impl IntoData for String {
    fn into_data(self) -> Data {
        Data::VisibleString(self)
    }
}

impl IntoData for &str {
    fn into_data(self) -> Data {
        Data::VisibleString(self.to_owned())
    }
}

/// Accepts both string types and octet strings holding UTF-8.
impl FromData for String {
    fn from_data(data: &Data) -> Result<Self> {
        match data {
            Data::VisibleString(s) | Data::Utf8String(s) => Ok(s.clone()),
            Data::OctetString(bytes) => String::from_utf8(bytes.clone())
                .map_err(|_| Error::CheckDoesNotMatch(format!("octet string {data} is not UTF-8"))),
            other => mismatch("VisibleString", other),
        }
    }
}

impl IntoData for ObisCode {
    fn into_data(self) -> Data {
        Data::OctetString(self.to_bytes().to_vec())
    }
}

impl FromData for ObisCode {
    fn from_data(data: &Data) -> Result<Self> {
        match data {
            Data::OctetString(bytes) => ObisCode::try_from(bytes.as_slice())
                .map_err(|e| Error::CheckDoesNotMatch(e.to_string())),
            other => mismatch("logical name", other),
        }
    }
}

impl IntoData for Data {
    fn into_data(self) -> Data {
        self
    }
}

impl FromData for Data {
    fn from_data(data: &Data) -> Result<Self> {
        Ok(data.clone())
    }
}

impl<T: IntoData> IntoData for Option<T> {
    fn into_data(self) -> Data {
        self.map_or(Data::Null, IntoData::into_data)
    }
}

/// `null` maps to `None`.
impl<T: FromData> FromData for Option<T> {
    fn from_data(data: &Data) -> Result<Self> {
        match data {
            Data::Null => Ok(None),
            other => T::from_data(other).map(Some),
        }
    }
}

/// Builds an `array` from any sequence of mappable values.
pub fn array_of<T: IntoData>(items: impl IntoIterator<Item = T>) -> Data {
    Data::Array(items.into_iter().map(IntoData::into_data).collect())
}

/// Reads every element of an `array`.
pub fn array_from<T: FromData>(data: &Data) -> Result<Vec<T>> {
    match data {
        Data::Array(items) => items.iter().map(T::from_data).collect(),
        other => mismatch("Array", other),
    }
}

/// Builds a `structure` field by field, in declaration order.
#[derive(Debug, Default)]
pub struct StructBuilder {
    fields: Vec<Data>,
}

impl StructBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, value: impl IntoData) -> Self {
        self.fields.push(value.into_data());
        self
    }

    pub fn build(self) -> Data {
        Data::Structure(self.fields)
    }
}

/// Reads a `structure` field by field. [`StructReader::finish`] fails if
/// fields are left over.
#[derive(Debug)]
pub struct StructReader<'a> {
    fields: core::slice::Iter<'a, Data>,
    position: usize,
}

impl<'a> StructReader<'a> {
    pub fn new(data: &'a Data) -> Result<Self> {
        match data {
            Data::Structure(fields) => Ok(Self { fields: fields.iter(), position: 0 }),
            other => mismatch("Structure", other),
        }
    }

    /// The next field as raw [`Data`].
    pub fn next_data(&mut self) -> Result<&'a Data> {
        let position = self.position;
        self.position += 1;
        self.fields
            .next()
            .ok_or_else(|| Error::CheckDoesNotMatch(format!("structure has no field {position}")))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next<T: FromData>(&mut self) -> Result<T> {
        let position = self.position;
        T::from_data(self.next_data()?).map_err(|e| match e {
            Error::CheckDoesNotMatch(reason) => {
                Error::CheckDoesNotMatch(format!("field {position}: {reason}"))
            }
            e => e,
        })
    }

    pub fn finish(self) -> Result<()> {
        match self.fields.len() {
            0 => Ok(()),
            left => Err(Error::CheckDoesNotMatch(format!("{left} unread structure fields"))),
        }
    }
}
