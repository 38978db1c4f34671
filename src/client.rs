//! DLMS client.
//!
//! - [`DlmsSession`] builds requests and interprets responses without doing
//!   any I/O.
//! - [`ClientEngine`] drives a session over a [`Transport`](crate::transport::Transport),
//!   correlating each request with its reply and reassembling block transfers.

use core::fmt;

pub use engine::ClientEngine;
pub use session::{ActionProgress, BlockReassembly, DlmsSession, GetProgress, SetProgress};

mod engine;
mod session;

/// Where a client is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    #[default]
    Disconnected,
    /// The transport is up, no application association yet.
    Connected,
    Associated,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClientState::Disconnected => "disconnected",
            ClientState::Connected => "connected",
            ClientState::Associated => "associated",
        })
    }
}
