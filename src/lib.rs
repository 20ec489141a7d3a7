//! Screen mirroring and file management for MIDI workstations over SysEx.
//!
//! The device mirrors its display, streams debug console text and exposes its SD card
//! filesystem through vendor SysEx messages. This crate speaks that protocol over any
//! pair of MIDI port halves.
//!
//! # Features
//!
//! - **Display mirror**: full and delta screen updates decoded into [`DisplayFrame`]s
//! - **Debug console**: device text split into timestamped lines
//! - **File commands**: directory listing, open/read/write/close, rename, move, delete, mkdir
//! - **Transfer queue**: sequential uploads, downloads and moves with live progress
//! - **Sessions**: message ID windows, timeouts, retries and transparent renewal
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use sysex_bridge::{ChannelOutput, SysexBridge, UpdateRate};
//!
//! #[tokio::main]
//! async fn main() -> sysex_bridge::Result<()> {
//!     // Any `MidiOutput` / `MidiInput` pair works; channels stand in for real ports here.
//!     let (output, _to_device) = ChannelOutput::new();
//!     let (_from_device, input) = tokio::sync::mpsc::unbounded_channel::<Vec<u8>>();
//!
//!     let connection = SysexBridge::connect(output, input)?;
//!     for entry in connection.commands().list_dir("/").await? {
//!         println!("{} ({} bytes)", entry.name, entry.size);
//!     }
//!
//!     let mut frames = Box::pin(connection.display_frames(UpdateRate::Max(30)));
//!     while let Some(frame) = frames.next().await {
//!         println!("{:?}", frame.mode);
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod config;
mod error;
pub mod logging;
pub mod types;

// Wire formats
pub mod codec;
pub mod sysex;

// Protocol and device operations
pub mod command;
pub mod display;
pub mod session;
pub mod transfer;

// Stream-based connection architecture
pub mod connection;
pub mod driver;
pub mod stream;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Core exports
pub use config::{BridgeConfig, MAX_CHUNK_SIZE, MAX_WINDOW_SIZE};
pub use error::*;
pub use types::*;

// Main API exports
pub use command::{CommandClient, OpenMode};
pub use connection::Connection;
pub use transfer::{DownloadSpec, TransferQueue, UploadSpec};
pub use transport::{ChannelOutput, MidiInput, MidiOutput};

/// Entry point for device connections.
///
/// ```rust,no_run
/// use sysex_bridge::{BridgeConfig, ChannelOutput, SysexBridge};
///
/// # #[tokio::main]
/// # async fn main() -> sysex_bridge::Result<()> {
/// let config = BridgeConfig::from_yaml_str("request_timeout_ms: 5000\nchunk_size: 512\n")?;
/// let (output, _to_device) = ChannelOutput::new();
/// let (_from_device, input) = tokio::sync::mpsc::unbounded_channel::<Vec<u8>>();
/// let connection = SysexBridge::connect_with(output, input, config)?;
/// println!("{}", connection.query_version().await?);
/// # Ok(())
/// # }
/// ```
pub struct SysexBridge;

impl SysexBridge {
    /// Connect over the given port halves with default settings.
    ///
    /// Must be called from within a tokio runtime. The session handshake happens on the
    /// first file command, so this returns immediately.
    pub fn connect<O, I>(output: O, input: I) -> Result<Connection>
    where
        O: MidiOutput,
        I: MidiInput,
    {
        Self::connect_with(output, input, BridgeConfig::default())
    }

    /// Connect with explicit settings.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] if `config` fails validation.
    pub fn connect_with<O, I>(output: O, input: I, config: BridgeConfig) -> Result<Connection>
    where
        O: MidiOutput,
        I: MidiInput,
    {
        Connection::open(output, input, config)
    }
}
