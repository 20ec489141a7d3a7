//! Session protocol: correlated request/response pairs over SysEx.
//!
//! A session is opened with a handshake on message ID [`HANDSHAKE_ID`]. The device
//! answers with a session ID and a small window of message IDs, which requests then
//! cycle through (see [`MessageIdWindow`]). Replies are matched by ID alone, so
//! reordering on the transport is harmless as long as no ID is reused while pending.

mod protocol;
mod window;

pub use protocol::{Reply, Session, SessionProtocol};
pub use window::MessageIdWindow;

/// Message ID reserved for the session handshake.
pub const HANDSHAKE_ID: u8 = 0;
