//! Error types for the SysEx bridge.
//!
//! Errors are layered the same way the components are:
//!
//! - **Codec Errors**: malformed RLE or septet data from the device. Always local and
//!   never retried; the display path drops the offending frame.
//! - **Protocol Errors**: timeouts, stale sessions and malformed replies. Retriable at the
//!   command layer's discretion.
//! - **Device Errors**: the device answered, but refused the operation (file not found,
//!   already exists, write protected, ...). Never retried automatically.
//! - **Transfer Errors**: the per-item outcome of a queued transfer, including
//!   user-initiated cancellation.
//!
//! [`BridgeError`] wraps all of them together with transport and configuration failures.
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use sysex_bridge::{BridgeError, ProtocolError};
//! use std::time::Duration;
//!
//! let error: BridgeError = ProtocolError::Timeout { msg_id: 0x41, after: Duration::from_secs(3) }.into();
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for bridge operations.
pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/// Failures while decoding packed device data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid dense marker {marker:#04x} at offset {offset}")]
    InvalidDenseMarker { marker: u8, offset: usize },

    #[error("Incomplete packet at offset {offset}: needs {needed} bytes, {available} available")]
    IncompletePacket { offset: usize, needed: usize, available: usize },

    #[error("Run-length packet at offset {offset} is missing its extension byte")]
    MissingRunLengthExtension { offset: usize },

    #[error("Packet at offset {offset} is missing its value byte")]
    MissingValueByte { offset: usize },

    #[error("Cannot grow output buffer to {requested} bytes (limit {limit})")]
    BufferGrowthFailed { requested: usize, limit: usize },

    #[error("Run-length packet at offset {offset} has a zero run length")]
    ZeroLengthRun { offset: usize },
}

/// Failures of the session protocol itself (no usable reply from the device).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("No reply to message {msg_id:#04x} within {after:?}")]
    Timeout { msg_id: u8, after: Duration },

    #[error("Device reported the session as stale")]
    SessionStale,

    #[error("Malformed response: {details}")]
    MalformedResponse { details: String },

    #[error("Session handshake failed: {reason}")]
    HandshakeFailed { reason: String },

    #[error("No {request} reply within {after:?}")]
    NoReply { request: &'static str, after: Duration },

    #[error("Device disconnected")]
    Disconnected,
}

/// Result codes reported by the device's filesystem.
///
/// The numbering follows the FatFS `FRESULT` enumeration used by the device firmware.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceStatus {
    #[error("low-level disk error")]
    DiskError,
    #[error("internal filesystem error")]
    InternalError,
    #[error("drive not ready")]
    NotReady,
    #[error("file not found")]
    NoFile,
    #[error("path not found")]
    NoPath,
    #[error("invalid name")]
    InvalidName,
    #[error("access denied")]
    Denied,
    #[error("already exists")]
    Exist,
    #[error("invalid file object")]
    InvalidObject,
    #[error("write protected")]
    WriteProtected,
    #[error("invalid drive")]
    InvalidDrive,
    #[error("volume not mounted")]
    NotEnabled,
    #[error("no filesystem")]
    NoFilesystem,
    #[error("format aborted")]
    MkfsAborted,
    #[error("device busy")]
    Timeout,
    #[error("file locked")]
    Locked,
    #[error("out of memory")]
    NotEnoughCore,
    #[error("too many open files")]
    TooManyOpenFiles,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("unknown device error {0}")]
    Other(i64),
}

impl DeviceStatus {
    /// Map a non-zero device result code to a status.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => DeviceStatus::DiskError,
            2 => DeviceStatus::InternalError,
            3 => DeviceStatus::NotReady,
            4 => DeviceStatus::NoFile,
            5 => DeviceStatus::NoPath,
            6 => DeviceStatus::InvalidName,
            7 => DeviceStatus::Denied,
            8 => DeviceStatus::Exist,
            9 => DeviceStatus::InvalidObject,
            10 => DeviceStatus::WriteProtected,
            11 => DeviceStatus::InvalidDrive,
            12 => DeviceStatus::NotEnabled,
            13 => DeviceStatus::NoFilesystem,
            14 => DeviceStatus::MkfsAborted,
            15 => DeviceStatus::Timeout,
            16 => DeviceStatus::Locked,
            17 => DeviceStatus::NotEnoughCore,
            18 => DeviceStatus::TooManyOpenFiles,
            19 => DeviceStatus::InvalidParameter,
            other => DeviceStatus::Other(other),
        }
    }

    /// The numeric code as reported on the wire.
    pub fn code(self) -> i64 {
        match self {
            DeviceStatus::DiskError => 1,
            DeviceStatus::InternalError => 2,
            DeviceStatus::NotReady => 3,
            DeviceStatus::NoFile => 4,
            DeviceStatus::NoPath => 5,
            DeviceStatus::InvalidName => 6,
            DeviceStatus::Denied => 7,
            DeviceStatus::Exist => 8,
            DeviceStatus::InvalidObject => 9,
            DeviceStatus::WriteProtected => 10,
            DeviceStatus::InvalidDrive => 11,
            DeviceStatus::NotEnabled => 12,
            DeviceStatus::NoFilesystem => 13,
            DeviceStatus::MkfsAborted => 14,
            DeviceStatus::Timeout => 15,
            DeviceStatus::Locked => 16,
            DeviceStatus::NotEnoughCore => 17,
            DeviceStatus::TooManyOpenFiles => 18,
            DeviceStatus::InvalidParameter => 19,
            DeviceStatus::Other(code) => code,
        }
    }
}

/// The device understood a request and refused it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed on device{}: {status}", path_suffix(.path))]
pub struct DeviceError {
    pub operation: &'static str,
    pub status: DeviceStatus,
    pub path: Option<String>,
}

fn path_suffix(path: &Option<String>) -> String {
    path.as_ref().map(|p| format!(" ({p})")).unwrap_or_default()
}

/// Outcome of a single queued transfer item.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Transfer canceled")]
    Canceled,

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Local file error: {path}")]
    Local {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(Box<BridgeError>),
}

impl TransferError {
    /// Whether this outcome was user-initiated rather than a failure.
    pub fn is_canceled(&self) -> bool {
        matches!(self, TransferError::Canceled)
    }
}

impl From<BridgeError> for TransferError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Device(e) => TransferError::Device(e),
            BridgeError::Protocol(e) => TransferError::Protocol(e),
            BridgeError::Transfer(e) => *e,
            other => TransferError::Other(Box::new(other)),
        }
    }
}

/// Main error type for bridge operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BridgeError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Transfer(Box<TransferError>),

    #[error("MIDI transport error: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Invalid configuration: {details}")]
    Config { details: String },

    #[error("Malformed display frame: {details}")]
    MalformedFrame { details: String },

    #[error("JSON encoding error")]
    Json(#[from] serde_json::Error),

    #[error("File error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<TransferError> for BridgeError {
    fn from(err: TransferError) -> Self {
        BridgeError::Transfer(Box::new(err))
    }
}

impl BridgeError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::Codec(_) => false,
            BridgeError::Protocol(ProtocolError::Timeout { .. }) => true,
            BridgeError::Protocol(ProtocolError::NoReply { .. }) => true,
            BridgeError::Protocol(ProtocolError::SessionStale) => true,
            BridgeError::Protocol(ProtocolError::Disconnected) => true,
            BridgeError::Protocol(ProtocolError::HandshakeFailed { .. }) => true,
            BridgeError::Protocol(ProtocolError::MalformedResponse { .. }) => false,
            BridgeError::Device(_) => false,
            BridgeError::Transfer(_) => false,
            BridgeError::Transport { .. } => true,
            BridgeError::Config { .. } => false,
            BridgeError::MalformedFrame { .. } => false,
            BridgeError::Json(_) => false,
            BridgeError::File { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            BridgeError::Codec(_) | BridgeError::MalformedFrame { .. } => vec![
                "Request a fresh full display frame",
                "Check for foreign SysEx traffic on the same port",
            ],
            BridgeError::Protocol(ProtocolError::Timeout { .. } | ProtocolError::NoReply { .. }) => vec![
                "Retry the operation if it is idempotent",
                "Increase request_timeout_ms",
                "Check that the MIDI port is still connected",
            ],
            BridgeError::Protocol(_) => vec![
                "Retry the operation to open a new session",
                "Reconnect the MIDI port",
                "Check the device firmware supports the SysEx file protocol",
            ],
            BridgeError::Device(_) => vec![
                "Check the path exists on the device",
                "Check the SD card is inserted and not write protected",
            ],
            BridgeError::Transfer(_) => vec!["Inspect the transfer item's error and retry it"],
            BridgeError::Transport { .. } => vec![
                "Check the MIDI port is still open",
                "Reconnect the device",
            ],
            BridgeError::Config { .. } => vec![
                "Check the configuration values against their documented ranges",
            ],
            BridgeError::Json(_) => vec!["Check the device firmware version"],
            BridgeError::File { .. } => vec![
                "Check the local file exists and is readable",
                "Check the destination directory is writable",
            ],
        }
    }

    /// Helper constructor for transport errors.
    pub fn transport(reason: impl Into<String>) -> Self {
        BridgeError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport errors with source.
    pub fn transport_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        BridgeError::Transport { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for configuration errors.
    pub fn config(details: impl Into<String>) -> Self {
        BridgeError::Config { details: details.into() }
    }

    /// Helper constructor for malformed display frames.
    pub fn malformed_frame(details: impl Into<String>) -> Self {
        BridgeError::MalformedFrame { details: details.into() }
    }

    /// Helper constructor for malformed protocol replies.
    pub fn malformed_response(details: impl Into<String>) -> Self {
        BridgeError::Protocol(ProtocolError::MalformedResponse { details: details.into() })
    }

    /// Helper constructor for device refusals.
    pub fn device(operation: &'static str, code: i64, path: Option<&str>) -> Self {
        BridgeError::Device(DeviceError {
            operation,
            status: DeviceStatus::from_code(code),
            path: path.map(str::to_string),
        })
    }

    /// Helper constructor for local file errors.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        BridgeError::File { path, source }
    }

    /// The protocol error inside this error, if any.
    pub fn as_protocol(&self) -> Option<&ProtocolError> {
        match self {
            BridgeError::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn device_status_codes_roundtrip(code in -5i64..64i64) {
                let status = DeviceStatus::from_code(code);
                prop_assert_eq!(status.code(), code);
                prop_assert!(!status.to_string().is_empty());
            }

            #[test]
            fn device_error_message_names_operation_and_path(
                path in "/[A-Z]{1,8}/[A-Z0-9]{1,8}\\.XML",
                code in 1i64..20i64
            ) {
                let err = BridgeError::device("open", code, Some(&path));
                let msg = err.to_string();
                prop_assert!(msg.contains("open"));
                prop_assert!(msg.contains(&path));
                prop_assert!(!err.is_retryable());
            }
        }
    }

    #[test]
    fn timeouts_are_retryable_device_refusals_are_not() {
        let timeout: BridgeError =
            ProtocolError::Timeout { msg_id: 0x41, after: Duration::from_secs(1) }.into();
        assert!(timeout.is_retryable());
        assert!(!timeout.recovery_suggestions().is_empty());

        let refusal = BridgeError::device("delete", 4, Some("/SONGS/A.XML"));
        assert!(!refusal.is_retryable());
        assert!(matches!(
            refusal,
            BridgeError::Device(DeviceError { status: DeviceStatus::NoFile, .. })
        ));
    }

    #[test]
    fn transfer_error_unwraps_bridge_layers() {
        let err: TransferError = BridgeError::device("write", 10, None).into();
        assert!(matches!(err, TransferError::Device(DeviceError { status: DeviceStatus::WriteProtected, .. })));

        let err: TransferError = BridgeError::from(ProtocolError::Disconnected).into();
        assert!(matches!(err, TransferError::Protocol(ProtocolError::Disconnected)));

        let err: TransferError = BridgeError::from(TransferError::Canceled).into();
        assert!(err.is_canceled());
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<BridgeError>();
        assert_send_sync_static::<TransferError>();

        let error = BridgeError::transport("port closed");
        let _: &dyn std::error::Error = &error;
    }
}
