//! File commands: list, open/read/write/close, delete, rename, move, mkdir.
//!
//! Every operation is one or more session requests. Device refusals come back as
//! [`DeviceError`](crate::DeviceError), missing replies as
//! [`ProtocolError`](crate::ProtocolError), so callers can tell "the device said no"
//! from "the device said nothing". Only idempotent reads (`dir`, `read`) are retried.

mod client;
mod file_transfer;
pub mod message;

pub use client::{CommandClient, FileHandle, join_path};
pub use message::OpenMode;

pub(crate) use client::unix_now;
