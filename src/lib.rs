//! A DLMS/COSEM client protocol engine.
//!
//! The crate is layered bottom-up:
//!
//! - [`data`]: the A-XDR value model ([`Data`]) with its binary codec and a
//!   `Tag{payload}` text form.
//! - [`obis_code`], [`descriptor`]: object addressing.
//! - [`association`], [`get`], [`set`], [`action`], [`notification`],
//!   [`exception`] and the [`apdu`] dispatch enum: every APDU a client sends
//!   or receives, including block transfer variants.
//! - [`cipher`], [`security_control`]: AES-GCM protection of APDUs with
//!   invocation counter replay checks.
//! - [`client`]: [`DlmsSession`](client::DlmsSession), the I/O free protocol
//!   core, and [`ClientEngine`](client::ClientEngine), which drives it over
//!   any [`Transport`](transport::Transport).
//!
//! Link-layer framing (HDLC, the IP wrapper) is left to transport
//! implementations.
//!
//! # Example
//!
//! ```
//! use dlms_engine::data::Data;
//! use dlms_engine::descriptor::AttributeDescriptor;
//! use dlms_engine::get::{GetRequest, GetRequestNormal};
//! use dlms_engine::ObisCode;
//!
//! let request = GetRequest::Normal(GetRequestNormal {
//!     invoke_id: 0xC1,
//!     attribute: AttributeDescriptor::new(8, ObisCode::new(0, 0, 1, 0, 0, 255), 2),
//!     access_selection: None,
//! });
//! assert_eq!(
//!     request.encode(),
//!     [0xC0, 0x01, 0xC1, 0x00, 0x08, 0x00, 0x00, 0x01, 0x00, 0x00, 0xFF, 0x02, 0x00]
//! );
//!
//! let (value, _) = Data::decode(&[0x12, 0x00, 0x2A]).unwrap();
//! assert_eq!(value.to_string(), "LongUnsigned{42}");
//! ```

#![forbid(unsafe_code)]

pub mod action;
pub mod apdu;
pub mod association;
pub mod cipher;
pub mod client;
pub mod data;
pub mod descriptor;
pub mod error;
pub mod exception;
pub mod get;
pub mod mapping;
pub mod notification;
pub mod obis_code;
pub mod security_control;
pub mod set;
pub mod settings;
pub mod transport;

pub use data::Data;
pub use error::{Error, Result};
pub use obis_code::ObisCode;
