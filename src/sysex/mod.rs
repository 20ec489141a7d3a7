//! SysEx framing: `F0 7D <sub-command...> <payload...> F7`.
//!
//! [`parse`] turns raw bytes into an [`Envelope`] whose [`SubCommand`] is an exhaustive
//! sum over the paths this crate understands, with an explicit `Unknown` arm for the rest.
//! The [`outbound`] builders add the prefix and terminator to host requests.

mod envelope;
pub mod outbound;

pub use envelope::{Envelope, SubCommand, parse, text_payload};
pub use outbound::{BINARY_SEPARATOR, Request};

/// SysEx start byte.
pub const SYSEX_START: u8 = 0xF0;
/// SysEx end byte.
pub const SYSEX_END: u8 = 0xF7;
/// Manufacturer ID used by the device (non-commercial / educational).
pub const VENDOR_ID: u8 = 0x7D;
