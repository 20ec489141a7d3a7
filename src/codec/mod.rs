//! Byte codecs for data carried inside SysEx messages.
//!
//! - [`rle`] inflates the device's run-length packed screen data (and packs it, for tests
//!   and tooling).
//! - [`septet`] carries arbitrary binary file data as 7-bit-clean bytes.
//!
//! Both are pure functions with no state and no I/O.

pub mod rle;
pub mod septet;

pub use rle::{DEFAULT_UNPACK_LIMIT, pack, unpack, unpack_bounded};
