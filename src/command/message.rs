//! JSON request and reply bodies of the file commands
//!
//! Requests are externally tagged objects, `{"dir":{"path":"/SONGS",...}}`. The device
//! answers under the same name prefixed with `^`, with a FatFS result code in `err`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::session::Reply;
use crate::types::{Attributes, DirEntry, FatTimestamp};
use crate::{BridgeError, Result};

/// How a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Open an existing file for reading.
    Read,
    /// Create or truncate for writing.
    CreateAlways,
    /// Create for writing; fails with `Exist` if the name is taken.
    CreateNew,
}

/// A file command as sent to the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Request<'a> {
    Dir { path: &'a str, offset: u32, lines: u32 },
    Open { path: &'a str, mode: OpenMode, date: u16, time: u16 },
    Read { fid: u32, addr: u64, size: u32 },
    Write { fid: u32, addr: u64, size: u32 },
    Close { fid: u32 },
    Delete { path: &'a str },
    Rename { from: &'a str, to: &'a str },
    Move { from: &'a str, to: &'a str },
    Mkdir { path: &'a str, date: u16, time: u16 },
}

impl Request<'_> {
    /// Command name, also the reply key without its `^`.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Dir { .. } => "dir",
            Request::Open { .. } => "open",
            Request::Read { .. } => "read",
            Request::Write { .. } => "write",
            Request::Close { .. } => "close",
            Request::Delete { .. } => "delete",
            Request::Rename { .. } => "rename",
            Request::Move { .. } => "move",
            Request::Mkdir { .. } => "mkdir",
        }
    }

    /// Device path the command refers to, for error reports.
    pub fn path(&self) -> Option<&str> {
        match self {
            Request::Dir { path, .. }
            | Request::Open { path, .. }
            | Request::Delete { path }
            | Request::Mkdir { path, .. } => Some(path),
            Request::Rename { from, .. } | Request::Move { from, .. } => Some(from),
            Request::Read { .. } | Request::Write { .. } | Request::Close { .. } => None,
        }
    }

    /// Serialize as 7-bit JSON.
    pub fn to_wire(&self) -> Result<Vec<u8>> {
        ascii_json(self)
    }
}

/// Serialize to JSON with every non-ASCII character escaped as `\uXXXX`.
///
/// SysEx bodies are 7-bit, and non-ASCII characters can only occur inside JSON
/// strings, where the escape is equivalent.
pub fn ascii_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let text = serde_json::to_string(value)?;
    let mut out = Vec::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_ascii() {
            out.push(ch as u8);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                out.extend_from_slice(format!("\\u{unit:04x}").as_bytes());
            }
        }
    }
    Ok(out)
}

/// Extract the body of a reply to `op`, turning a non-zero `err` into a [`DeviceError`].
///
/// [`DeviceError`]: crate::DeviceError
pub fn reply_body<T: DeserializeOwned>(reply: &Reply, op: &'static str, path: Option<&str>) -> Result<T> {
    let key = format!("^{op}");
    let Some(body) = reply.json.get(&key) else {
        if let Some(error) = reply.json.get("^error") {
            return Err(BridgeError::malformed_response(format!("{op}: device error {error}")));
        }
        return Err(BridgeError::malformed_response(format!("{op}: reply has no {key} object")));
    };

    let code = body.get("err").and_then(serde_json::Value::as_i64).unwrap_or(0);
    if code != 0 {
        return Err(BridgeError::device(op, code, path));
    }

    T::deserialize(body).map_err(|e| BridgeError::malformed_response(format!("{op}: {e}")))
}

/// Reply to `dir`.
#[derive(Debug, Deserialize)]
pub struct DirReply {
    #[serde(default)]
    pub list: Vec<WireEntry>,
}

/// One entry as the device lists it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEntry {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub date: u16,
    #[serde(default)]
    pub time: u16,
    #[serde(default)]
    pub attr: u8,
}

impl From<WireEntry> for DirEntry {
    fn from(entry: WireEntry) -> Self {
        Self {
            name: entry.name,
            size: entry.size,
            attributes: Attributes::new(entry.attr),
            modified: FatTimestamp { date: entry.date, time: entry.time },
        }
    }
}

/// Reply to `open`.
#[derive(Debug, Deserialize)]
pub struct OpenReply {
    pub fid: u32,
    #[serde(default)]
    pub size: u64,
}

/// Reply to `read` and `write`: the byte count actually transferred.
#[derive(Debug, Deserialize)]
pub struct ChunkReply {
    #[serde(default)]
    pub size: u32,
}

/// Reply with nothing but the result code.
#[derive(Debug, Deserialize)]
pub struct Ack {}
