//! The Set service (`C1` request, `C5` response).
//!
//! Values that exceed the negotiated PDU size are sent as a
//! `with-first-datablock` request followed by `with-datablock` requests, each
//! acknowledged by the server with the block number it received.

use nom::{
    IResult, Parser,
    bytes::streaming::tag,
    multi::{count, length_count},
    number::streaming::{be_u32, u8},
};

use crate::data::{ByteBuffer, Data, parse_count, parse_octets, unexpected_tag};
use crate::descriptor::{
    AttributeDescriptor, AttributeWithSelection, SelectiveAccessDescriptor, encode_access_selection,
    parse_access_selection,
};
use crate::get::DataAccessResult;

pub const SET_REQUEST_TAG: u8 = 0xC1;
pub const SET_RESPONSE_TAG: u8 = 0xC5;

/// DataBlock-SA: `<last u8> <block number u32> <len> <raw>`.
///
/// Shared by the block-wise Set requests and the Action p-blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DataBlockSa {
    pub last_block: bool,
    pub block_number: u32,
    pub raw_data: Vec<u8>,
}

impl DataBlockSa {
    /// Splits an encoded value into blocks of at most `block_size` bytes,
    /// numbered from 1.
    pub fn split(encoded: &[u8], block_size: usize) -> Vec<Self> {
        let chunks: Vec<&[u8]> = encoded.chunks(block_size.max(1)).collect();
        let total = chunks.len();
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| Self {
                last_block: i + 1 == total,
                block_number: i as u32 + 1,
                raw_data: chunk.to_vec(),
            })
            .collect()
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, (last_block, block_number)) = (u8, be_u32).parse(input)?;
        let (input, raw_data) = parse_octets(input)?;
        Ok((input, Self { last_block: last_block != 0, block_number, raw_data }))
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.last_block as u8);
        buf.push_u32(self.block_number);
        buf.push_length(self.raw_data.len());
        buf.extend_from_slice(&self.raw_data);
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SetRequest {
    Normal(SetRequestNormal),
    WithFirstDataBlock(SetRequestWithFirstDataBlock),
    WithDataBlock(SetRequestWithDataBlock),
    WithList(SetRequestWithList),
    WithListAndFirstDataBlock(SetRequestWithListAndFirstDataBlock),
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SetRequestNormal {
    pub invoke_id: u8,
    pub attribute: AttributeDescriptor,
    pub access_selection: Option<SelectiveAccessDescriptor>,
    pub value: Data,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SetRequestWithFirstDataBlock {
    pub invoke_id: u8,
    pub attribute: AttributeDescriptor,
    pub access_selection: Option<SelectiveAccessDescriptor>,
    pub block: DataBlockSa,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SetRequestWithDataBlock {
    pub invoke_id: u8,
    pub block: DataBlockSa,
}

/// `values[i]` is written to `attributes[i]`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SetRequestWithList {
    pub invoke_id: u8,
    pub attributes: Vec<AttributeWithSelection>,
    pub values: Vec<Data>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SetRequestWithListAndFirstDataBlock {
    pub invoke_id: u8,
    pub attributes: Vec<AttributeWithSelection>,
    pub block: DataBlockSa,
}

impl SetRequest {
    pub fn invoke_id(&self) -> u8 {
        match self {
            SetRequest::Normal(r) => r.invoke_id,
            SetRequest::WithFirstDataBlock(r) => r.invoke_id,
            SetRequest::WithDataBlock(r) => r.invoke_id,
            SetRequest::WithList(r) => r.invoke_id,
            SetRequest::WithListAndFirstDataBlock(r) => r.invoke_id,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, _) = tag(&[SET_REQUEST_TAG][..]).parse(input)?;
        let (rest, (choice, invoke_id)) = (u8, u8).parse(input)?;
        match choice {
            0x01 => {
                let (rest, attribute) = AttributeDescriptor::parse(rest)?;
                let (rest, access_selection) = parse_access_selection(rest)?;
                let (rest, value) = Data::parse(rest)?;
                Ok((rest, SetRequest::Normal(SetRequestNormal { invoke_id, attribute, access_selection, value })))
            }
            0x02 => {
                let (rest, attribute) = AttributeDescriptor::parse(rest)?;
                let (rest, access_selection) = parse_access_selection(rest)?;
                let (rest, block) = DataBlockSa::parse(rest)?;
                Ok((
                    rest,
                    SetRequest::WithFirstDataBlock(SetRequestWithFirstDataBlock {
                        invoke_id,
                        attribute,
                        access_selection,
                        block,
                    }),
                ))
            }
            0x03 => {
                let (rest, block) = DataBlockSa::parse(rest)?;
                Ok((rest, SetRequest::WithDataBlock(SetRequestWithDataBlock { invoke_id, block })))
            }
            0x04 => {
                let (rest, attributes) = length_count(parse_count, AttributeWithSelection::parse).parse(rest)?;
                let (rest, values) = length_count(parse_count, Data::parse).parse(rest)?;
                Ok((rest, SetRequest::WithList(SetRequestWithList { invoke_id, attributes, values })))
            }
            0x05 => {
                let (rest, attributes) = length_count(parse_count, AttributeWithSelection::parse).parse(rest)?;
                let (rest, block) = DataBlockSa::parse(rest)?;
                Ok((
                    rest,
                    SetRequest::WithListAndFirstDataBlock(SetRequestWithListAndFirstDataBlock {
                        invoke_id,
                        attributes,
                        block,
                    }),
                ))
            }
            _ => Err(unexpected_tag(input)),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![SET_REQUEST_TAG];
        match self {
            SetRequest::Normal(r) => {
                buf.extend_from_slice(&[0x01, r.invoke_id]);
                r.attribute.encode_into(&mut buf);
                encode_access_selection(&r.access_selection, &mut buf);
                r.value.encode_into(&mut buf);
            }
            SetRequest::WithFirstDataBlock(r) => {
                buf.extend_from_slice(&[0x02, r.invoke_id]);
                r.attribute.encode_into(&mut buf);
                encode_access_selection(&r.access_selection, &mut buf);
                r.block.encode_into(&mut buf);
            }
            SetRequest::WithDataBlock(r) => {
                buf.extend_from_slice(&[0x03, r.invoke_id]);
                r.block.encode_into(&mut buf);
            }
            SetRequest::WithList(r) => {
                buf.extend_from_slice(&[0x04, r.invoke_id]);
                encode_attributes(&r.attributes, &mut buf);
                buf.push_length(r.values.len());
                for value in &r.values {
                    value.encode_into(&mut buf);
                }
            }
            SetRequest::WithListAndFirstDataBlock(r) => {
                buf.extend_from_slice(&[0x05, r.invoke_id]);
                encode_attributes(&r.attributes, &mut buf);
                r.block.encode_into(&mut buf);
            }
        }
        buf
    }
}

fn encode_attributes(attributes: &[AttributeWithSelection], buf: &mut Vec<u8>) {
    buf.push_length(attributes.len());
    for attribute in attributes {
        attribute.encode_into(buf);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SetResponse {
    Normal { invoke_id: u8, result: DataAccessResult },
    /// Acknowledges a non-final block.
    DataBlock { invoke_id: u8, block_number: u32 },
    LastDataBlock { invoke_id: u8, result: DataAccessResult, block_number: u32 },
    LastDataBlockWithList { invoke_id: u8, results: Vec<DataAccessResult>, block_number: u32 },
    WithList { invoke_id: u8, results: Vec<DataAccessResult> },
}

impl SetResponse {
    pub fn invoke_id(&self) -> u8 {
        match self {
            SetResponse::Normal { invoke_id, .. }
            | SetResponse::DataBlock { invoke_id, .. }
            | SetResponse::LastDataBlock { invoke_id, .. }
            | SetResponse::LastDataBlockWithList { invoke_id, .. }
            | SetResponse::WithList { invoke_id, .. } => *invoke_id,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, _) = tag(&[SET_RESPONSE_TAG][..]).parse(input)?;
        let (rest, (choice, invoke_id)) = (u8, u8).parse(input)?;
        match choice {
            0x01 => {
                let (rest, result) = DataAccessResult::parse(rest)?;
                Ok((rest, SetResponse::Normal { invoke_id, result }))
            }
            0x02 => {
                let (rest, block_number) = be_u32(rest)?;
                Ok((rest, SetResponse::DataBlock { invoke_id, block_number }))
            }
            0x03 => {
                let (rest, (result, block_number)) = (DataAccessResult::parse, be_u32).parse(rest)?;
                Ok((rest, SetResponse::LastDataBlock { invoke_id, result, block_number }))
            }
            0x04 => {
                let (rest, n) = parse_count(rest)?;
                let (rest, results) = count(DataAccessResult::parse, n).parse(rest)?;
                let (rest, block_number) = be_u32(rest)?;
                Ok((rest, SetResponse::LastDataBlockWithList { invoke_id, results, block_number }))
            }
            0x05 => {
                let (rest, results) = length_count(parse_count, DataAccessResult::parse).parse(rest)?;
                Ok((rest, SetResponse::WithList { invoke_id, results }))
            }
            _ => Err(unexpected_tag(input)),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![SET_RESPONSE_TAG];
        match self {
            SetResponse::Normal { invoke_id, result } => {
                buf.extend_from_slice(&[0x01, *invoke_id, *result as u8]);
            }
            SetResponse::DataBlock { invoke_id, block_number } => {
                buf.extend_from_slice(&[0x02, *invoke_id]);
                buf.push_u32(*block_number);
            }
            SetResponse::LastDataBlock { invoke_id, result, block_number } => {
                buf.extend_from_slice(&[0x03, *invoke_id, *result as u8]);
                buf.push_u32(*block_number);
            }
            SetResponse::LastDataBlockWithList { invoke_id, results, block_number } => {
                buf.extend_from_slice(&[0x04, *invoke_id]);
                buf.push_length(results.len());
                buf.extend(results.iter().map(|r| *r as u8));
                buf.push_u32(*block_number);
            }
            SetResponse::WithList { invoke_id, results } => {
                buf.extend_from_slice(&[0x05, *invoke_id]);
                buf.push_length(results.len());
                buf.extend(results.iter().map(|r| *r as u8));
            }
        }
        buf
    }
}
