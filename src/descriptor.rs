//! COSEM object addressing.
//!
//! An attribute or method is addressed by `{class-id, logical name, index}`.
//! Get and Set requests may narrow the returned data with a selective-access
//! descriptor, whose parameters are an ordinary [`Data`] value.

use derive_try_from_primitive::TryFromPrimitive;
use nom::{
    IResult,
    number::streaming::{be_u16, i8, u8},
};

use crate::data::{ByteBuffer, Data, DateTime, unexpected_tag};
use crate::error::CodecError;
use crate::obis_code::ObisCode;

/// Cosem-Attribute-Descriptor.
///
/// ```text
/// 00 08 00 00 01 00 00 FF 02
/// └─┬─┘ └───────┬───────┘ └── attribute id
///   │           └──────────── logical name
///   └──────────────────────── class id
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AttributeDescriptor {
    pub class_id: u16,
    pub instance_id: ObisCode,
    pub attribute_id: i8,
}

impl AttributeDescriptor {
    pub const fn new(class_id: u16, instance_id: ObisCode, attribute_id: i8) -> Self {
        Self { class_id, instance_id, attribute_id }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, class_id) = be_u16(input)?;
        let (input, instance_id) = ObisCode::parse(input)?;
        let (input, attribute_id) = i8(input)?;
        Ok((input, Self { class_id, instance_id, attribute_id }))
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push_u16(self.class_id);
        buf.extend_from_slice(&self.instance_id.to_bytes());
        buf.push(self.attribute_id as u8);
    }
}

/// Cosem-Method-Descriptor. Same layout as [`AttributeDescriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MethodDescriptor {
    pub class_id: u16,
    pub instance_id: ObisCode,
    pub method_id: i8,
}

impl MethodDescriptor {
    pub const fn new(class_id: u16, instance_id: ObisCode, method_id: i8) -> Self {
        Self { class_id, instance_id, method_id }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, class_id) = be_u16(input)?;
        let (input, instance_id) = ObisCode::parse(input)?;
        let (input, method_id) = i8(input)?;
        Ok((input, Self { class_id, instance_id, method_id }))
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push_u16(self.class_id);
        buf.extend_from_slice(&self.instance_id.to_bytes());
        buf.push(self.method_id as u8);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum AccessSelector {
    /// Profile rows restricted by a value range of one column (usually the clock).
    ByRange = 1,
    /// Profile rows restricted by entry number.
    ByEntry = 2,
}

/// Selective-Access-Descriptor: `[selector u8][access parameters Data]`.
///
/// The selector is kept as a raw byte so vendor-specific selectors survive a
/// decode/encode cycle.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SelectiveAccessDescriptor {
    pub selector: u8,
    pub parameters: Data,
}

impl SelectiveAccessDescriptor {
    pub fn new(selector: AccessSelector, parameters: Data) -> Self {
        Self { selector: selector as u8, parameters }
    }

    pub fn by_range(range: &RangeDescriptor) -> Self {
        Self::new(AccessSelector::ByRange, range.to_data())
    }

    pub fn by_entry(entry: &EntryDescriptor) -> Self {
        Self::new(AccessSelector::ByEntry, entry.to_data())
    }

    pub fn access_selector(&self) -> Option<AccessSelector> {
        AccessSelector::try_from(self.selector).ok()
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, selector) = u8(input)?;
        let (input, parameters) = Data::parse(input)?;
        Ok((input, Self { selector, parameters }))
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.selector);
        self.parameters.encode_into(buf);
    }
}

/// Parses the optional access selection that follows an attribute descriptor.
pub(crate) fn parse_access_selection(
    input: &[u8],
) -> IResult<&[u8], Option<SelectiveAccessDescriptor>> {
    let (rest, present) = u8(input)?;
    match present {
        0x00 => Ok((rest, None)),
        0x01 => {
            let (rest, access) = SelectiveAccessDescriptor::parse(rest)?;
            Ok((rest, Some(access)))
        }
        _ => Err(unexpected_tag(input)),
    }
}

pub(crate) fn encode_access_selection(
    access: &Option<SelectiveAccessDescriptor>,
    buf: &mut Vec<u8>,
) {
    match access {
        Some(access) => {
            buf.push(0x01);
            access.encode_into(buf);
        }
        None => buf.push(0x00),
    }
}

/// An attribute descriptor with its optional selective access, the element
/// of every `*-with-list` Get and Set request.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AttributeWithSelection {
    pub attribute: AttributeDescriptor,
    pub access_selection: Option<SelectiveAccessDescriptor>,
}

impl AttributeWithSelection {
    pub fn new(attribute: AttributeDescriptor) -> Self {
        Self { attribute, access_selection: None }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, attribute) = AttributeDescriptor::parse(input)?;
        let (input, access_selection) = parse_access_selection(input)?;
        Ok((input, Self { attribute, access_selection }))
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        self.attribute.encode_into(buf);
        encode_access_selection(&self.access_selection, buf);
    }
}

fn invalid(what: &str, data: &Data) -> CodecError {
    CodecError::InvalidValue(format!("{what}: unexpected {data}"))
}

/// A capture-object definition: one column of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CaptureObject {
    pub class_id: u16,
    pub logical_name: ObisCode,
    pub attribute_id: i8,
    /// 0 selects the whole attribute.
    pub data_index: u16,
}

impl CaptureObject {
    pub const fn new(class_id: u16, logical_name: ObisCode, attribute_id: i8) -> Self {
        Self { class_id, logical_name, attribute_id, data_index: 0 }
    }

    /// The clock time attribute (class 8, `0-0:1.0.0.255`, attribute 2).
    pub const fn clock() -> Self {
        Self::new(8, ObisCode::new(0, 0, 1, 0, 0, 255), 2)
    }

    pub fn to_data(&self) -> Data {
        Data::Structure(vec![
            Data::LongUnsigned(self.class_id),
            Data::OctetString(self.logical_name.to_bytes().to_vec()),
            Data::Integer(self.attribute_id),
            Data::LongUnsigned(self.data_index),
        ])
    }

    pub fn from_data(data: &Data) -> Result<Self, CodecError> {
        match data {
            Data::Structure(fields) => match fields.as_slice() {
                [
                    Data::LongUnsigned(class_id),
                    Data::OctetString(logical_name),
                    Data::Integer(attribute_id),
                    Data::LongUnsigned(data_index),
                ] => Ok(Self {
                    class_id: *class_id,
                    logical_name: ObisCode::try_from(logical_name.as_slice())?,
                    attribute_id: *attribute_id,
                    data_index: *data_index,
                }),
                _ => Err(invalid("capture object", data)),
            },
            _ => Err(invalid("capture object", data)),
        }
    }
}

/// Range access parameters.
///
/// ```text
/// structure {
///     restricting-object  capture object definition
///     from-value          Data
///     to-value            Data
///     selected-values     array of capture objects, empty selects all columns
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RangeDescriptor {
    pub restricting_object: CaptureObject,
    pub from_value: Data,
    pub to_value: Data,
    pub selected_values: Vec<CaptureObject>,
}

impl RangeDescriptor {
    /// Rows whose clock column lies between `from` and `to`.
    pub fn by_clock(from: &DateTime, to: &DateTime) -> Self {
        Self {
            restricting_object: CaptureObject::clock(),
            from_value: Data::OctetString(from.encode()),
            to_value: Data::OctetString(to.encode()),
            selected_values: Vec::new(),
        }
    }

    pub fn to_data(&self) -> Data {
        Data::Structure(vec![
            self.restricting_object.to_data(),
            self.from_value.clone(),
            self.to_value.clone(),
            Data::Array(self.selected_values.iter().map(CaptureObject::to_data).collect()),
        ])
    }

    pub fn from_data(data: &Data) -> Result<Self, CodecError> {
        let Data::Structure(fields) = data else {
            return Err(invalid("range descriptor", data));
        };
        let [restricting, from_value, to_value, Data::Array(columns)] = fields.as_slice() else {
            return Err(invalid("range descriptor", data));
        };
        Ok(Self {
            restricting_object: CaptureObject::from_data(restricting)?,
            from_value: from_value.clone(),
            to_value: to_value.clone(),
            selected_values: columns
                .iter()
                .map(CaptureObject::from_data)
                .collect::<Result<_, _>>()?,
        })
    }
}

/// Entry access parameters. Entries and columns are numbered from 1; a `to`
/// value of 0 means "up to the last one".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct EntryDescriptor {
    pub from_entry: u32,
    pub to_entry: u32,
    pub from_selected_value: u16,
    pub to_selected_value: u16,
}

impl EntryDescriptor {
    /// Entries `from..=to` with all columns.
    pub const fn new(from_entry: u32, to_entry: u32) -> Self {
        Self { from_entry, to_entry, from_selected_value: 0, to_selected_value: 0 }
    }

    pub fn to_data(&self) -> Data {
        Data::Structure(vec![
            Data::DoubleLongUnsigned(self.from_entry),
            Data::DoubleLongUnsigned(self.to_entry),
            Data::LongUnsigned(self.from_selected_value),
            Data::LongUnsigned(self.to_selected_value),
        ])
    }

    pub fn from_data(data: &Data) -> Result<Self, CodecError> {
        match data {
            Data::Structure(fields) => match fields.as_slice() {
                [
                    Data::DoubleLongUnsigned(from_entry),
                    Data::DoubleLongUnsigned(to_entry),
                    Data::LongUnsigned(from_selected_value),
                    Data::LongUnsigned(to_selected_value),
                ] => Ok(Self {
                    from_entry: *from_entry,
                    to_entry: *to_entry,
                    from_selected_value: *from_selected_value,
                    to_selected_value: *to_selected_value,
                }),
                _ => Err(invalid("entry descriptor", data)),
            },
            _ => Err(invalid("entry descriptor", data)),
        }
    }
}
