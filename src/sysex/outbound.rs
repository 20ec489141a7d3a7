//! Outbound SysEx message construction

use super::{SYSEX_END, SYSEX_START, VENDOR_ID};
use crate::codec::septet;
use crate::{BridgeError, Result};

/// Separator between the JSON text and the binary attachment of a JSON command.
pub const BINARY_SEPARATOR: u8 = 0x00;

/// Fixed host-to-device requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// `02 00 01`: send a full display frame (and subsequent deltas).
    DisplayFrame,
    /// `03 00 01`: start streaming debug console text.
    DebugStream,
    /// `03 01 01`: report feature status.
    FeatureStatus,
    /// `03 02 01`: report firmware version.
    Version,
}

impl Request {
    /// Sub-command path bytes for this request.
    pub fn path(self) -> &'static [u8] {
        match self {
            Request::DisplayFrame => &[0x02, 0x00, 0x01],
            Request::DebugStream => &[0x03, 0x00, 0x01],
            Request::FeatureStatus => &[0x03, 0x01, 0x01],
            Request::Version => &[0x03, 0x02, 0x01],
        }
    }

    /// Complete wire message.
    pub fn to_bytes(self) -> Vec<u8> {
        frame(&[self.path()])
    }
}

/// Wrap a sub-command path and payload in the SysEx prefix and terminator.
///
/// Every body byte must be 7-bit clean.
pub fn build(path: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
    if let Some(pos) = path.iter().chain(payload).position(|&b| b >= 0x80) {
        return Err(BridgeError::transport(format!(
            "SysEx body byte {pos} has its high bit set"
        )));
    }
    Ok(frame(&[path, payload]))
}

/// Build a JSON command message: `04 <msg_id> <json> [00 <septets>]`.
pub fn json(msg_id: u8, json: &[u8], binary: Option<&[u8]>) -> Result<Vec<u8>> {
    if msg_id >= 0x80 {
        return Err(BridgeError::transport(format!("Message ID {msg_id:#04x} is not 7-bit")));
    }

    let mut payload = Vec::with_capacity(
        json.len() + binary.map_or(0, |b| 1 + septet::encoded_len(b.len())),
    );
    payload.extend_from_slice(json);
    if let Some(data) = binary {
        payload.push(BINARY_SEPARATOR);
        payload.extend(septet::encode(data));
    }
    build(&[0x04, msg_id], &payload)
}

fn frame(parts: &[&[u8]]) -> Vec<u8> {
    let len = parts.iter().map(|p| p.len()).sum::<usize>() + 3;
    let mut out = Vec::with_capacity(len);
    out.push(SYSEX_START);
    out.push(VENDOR_ID);
    for part in parts {
        out.extend_from_slice(part);
    }
    out.push(SYSEX_END);
    out
}
