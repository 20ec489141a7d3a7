//! Bridge configuration
//!
//! Every field has a default, so a YAML file only needs the values it changes:
//!
//! ```yaml
//! request_timeout_ms: 5000
//! chunk_size: 512
//! display_rate:
//!   Max: 15
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::types::{DisplayGeometry, UpdateRate};
use crate::{BridgeError, Result};

/// Largest binary chunk that still fits one SysEx message on the device side.
pub const MAX_CHUNK_SIZE: usize = 4096;

/// Largest message-ID window the device may hand out.
pub const MAX_WINDOW_SIZE: usize = 16;

/// Tunables for one device connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// How long a command waits for its reply.
    pub request_timeout_ms: u64,
    /// Messages per session before a transparent re-handshake.
    pub renewal_threshold: u32,
    /// Tag sent with the session handshake so the device can tell hosts apart.
    pub session_tag: String,
    /// Bytes per read/write chunk.
    pub chunk_size: usize,
    /// Entries requested per directory listing page.
    pub list_page_lines: usize,
    /// Extra attempts for idempotent commands that time out.
    pub idempotent_retries: u32,
    /// Screen geometry of the device.
    pub display: DisplayGeometry,
    /// Rate of [`Connection::default_display_frames`](crate::Connection::default_display_frames).
    pub display_rate: UpdateRate,
    /// Debug console lines kept in history.
    pub debug_history: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 3000,
            renewal_threshold: 1000,
            session_tag: format!("sysex-bridge/{}", env!("CARGO_PKG_VERSION")),
            chunk_size: 1024,
            list_page_lines: 20,
            idempotent_retries: 2,
            display: DisplayGeometry::default(),
            display_rate: UpdateRate::default(),
            debug_history: 500,
        }
    }
}

impl BridgeConfig {
    /// Parse a YAML document and validate it.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)
            .map_err(|e| BridgeError::config(format!("YAML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading bridge configuration");
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::file_error(path.to_path_buf(), e))?;
        Self::from_yaml_str(&yaml)
    }

    /// Reject values the protocol cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(BridgeError::config("request_timeout_ms must be greater than zero"));
        }
        if self.renewal_threshold == 0 {
            return Err(BridgeError::config("renewal_threshold must be greater than zero"));
        }
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(BridgeError::config(format!(
                "chunk_size must be in 1..={MAX_CHUNK_SIZE}, got {}",
                self.chunk_size
            )));
        }
        if self.list_page_lines == 0 || self.list_page_lines > 127 {
            return Err(BridgeError::config(format!(
                "list_page_lines must be in 1..=127, got {}",
                self.list_page_lines
            )));
        }
        if self.display.width == 0 || self.display.pages == 0 {
            return Err(BridgeError::config("display geometry must be non-empty"));
        }
        if self.debug_history == 0 {
            return Err(BridgeError::config("debug_history must be greater than zero"));
        }
        if !self.session_tag.is_ascii() {
            return Err(BridgeError::config("session_tag must be ASCII"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
