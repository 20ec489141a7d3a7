//! Typed file operations on top of the session protocol

use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::message::{Ack, ChunkReply, DirReply, OpenMode, OpenReply, Request, reply_body};
use crate::session::{Reply, SessionProtocol};
use crate::types::{DirEntry, FatTimestamp};
use crate::{BridgeConfig, BridgeError, ProtocolError, Result};

/// An open file on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHandle {
    /// Device file ID.
    pub fid: u32,
    /// File size at open time (zero for newly created files).
    pub size: u64,
}

/// File commands for one connection.
///
/// Cheap to clone; all clones share the session.
#[derive(Clone)]
pub struct CommandClient {
    protocol: Arc<SessionProtocol>,
    chunk_size: usize,
    page_lines: u32,
    retries: u32,
}

impl CommandClient {
    pub fn new(protocol: Arc<SessionProtocol>, config: &BridgeConfig) -> Self {
        Self {
            protocol,
            chunk_size: config.chunk_size,
            page_lines: config.list_page_lines as u32,
            retries: config.idempotent_retries,
        }
    }

    /// Bytes per read/write chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// List a directory, following pages until the device returns a short one.
    pub async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        loop {
            let request = Request::Dir { path, offset: entries.len() as u32, lines: self.page_lines };
            let (page, _): (DirReply, _) = self.call_idempotent(&request, None).await?;
            let count = page.list.len();
            entries.extend(page.list.into_iter().map(DirEntry::from));
            trace!(path, count, total = entries.len(), "Directory page received");
            if count < self.page_lines as usize {
                break;
            }
        }
        debug!(path, entries = entries.len(), "Listed directory");
        Ok(entries)
    }

    /// Whether `dir` contains an entry called `name` (FAT names compare case-insensitively).
    pub async fn exists(&self, dir: &str, name: &str) -> Result<bool> {
        let entries = self.list_dir(dir).await?;
        Ok(entries.iter().any(|e| e.name.eq_ignore_ascii_case(name)))
    }

    pub async fn open(&self, path: &str, mode: OpenMode, modified: FatTimestamp) -> Result<FileHandle> {
        let request = Request::Open { path, mode, date: modified.date, time: modified.time };
        let (reply, _): (OpenReply, _) = self.call(&request, None).await?;
        debug!(path, fid = reply.fid, size = reply.size, ?mode, "Opened file");
        Ok(FileHandle { fid: reply.fid, size: reply.size })
    }

    /// Read up to `len` bytes at `addr`. A short result means end of file.
    pub async fn read_chunk(&self, fid: u32, addr: u64, len: usize) -> Result<Vec<u8>> {
        let request = Request::Read { fid, addr, size: len as u32 };
        let (reply, binary): (ChunkReply, _) = self.call_idempotent(&request, None).await?;
        let data = binary.unwrap_or_default();
        if data.len() != reply.size as usize || data.len() > len {
            return Err(BridgeError::malformed_response(format!(
                "read: reply claims {} bytes, carries {} (asked for {len})",
                reply.size,
                data.len()
            )));
        }
        Ok(data)
    }

    /// Write `data` at `addr`. Never retried: a lost reply leaves the device state unknown.
    pub async fn write_chunk(&self, fid: u32, addr: u64, data: &[u8]) -> Result<usize> {
        let request = Request::Write { fid, addr, size: data.len() as u32 };
        let (reply, _): (ChunkReply, _) = self.call(&request, Some(data)).await?;
        Ok(reply.size as usize)
    }

    pub async fn close(&self, fid: u32) -> Result<()> {
        let _: (Ack, _) = self.call(&Request::Close { fid }, None).await?;
        trace!(fid, "Closed file");
        Ok(())
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let _: (Ack, _) = self.call(&Request::Delete { path }, None).await?;
        debug!(path, "Deleted");
        Ok(())
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let _: (Ack, _) = self.call(&Request::Rename { from, to }, None).await?;
        debug!(from, to, "Renamed");
        Ok(())
    }

    /// Move an entry to the full destination path `to`.
    pub async fn move_entry(&self, from: &str, to: &str) -> Result<()> {
        let _: (Ack, _) = self.call(&Request::Move { from, to }, None).await?;
        debug!(from, to, "Moved");
        Ok(())
    }

    pub async fn mkdir(&self, path: &str) -> Result<()> {
        let now = FatTimestamp::from_unix(unix_now());
        let request = Request::Mkdir { path, date: now.date, time: now.time };
        let _: (Ack, _) = self.call(&request, None).await?;
        debug!(path, "Created directory");
        Ok(())
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: &Request<'_>,
        binary: Option<&[u8]>,
    ) -> Result<(T, Option<Vec<u8>>)> {
        let wire = request.to_wire()?;
        let reply = self.protocol.send(&wire, binary).await?;
        decode(reply, request)
    }

    /// Like [`call`](Self::call), but retries timeouts and stale sessions.
    async fn call_idempotent<T: DeserializeOwned>(
        &self,
        request: &Request<'_>,
        binary: Option<&[u8]>,
    ) -> Result<(T, Option<Vec<u8>>)> {
        let wire = request.to_wire()?;
        let mut attempt = 0;
        loop {
            match self.protocol.send(&wire, binary).await {
                Ok(reply) => return decode(reply, request),
                Err(e) if attempt < self.retries && is_transient(&e) => {
                    attempt += 1;
                    warn!(op = request.name(), attempt, "Retrying after: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn decode<T: DeserializeOwned>(reply: Reply, request: &Request<'_>) -> Result<(T, Option<Vec<u8>>)> {
    let body = reply_body(&reply, request.name(), request.path())?;
    Ok((body, reply.binary))
}

fn is_transient(err: &BridgeError) -> bool {
    matches!(
        err.as_protocol(),
        Some(ProtocolError::Timeout { .. } | ProtocolError::SessionStale)
    )
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Join a device directory and an entry name.
pub fn join_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    format!("{dir}/{}", name.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_path_handles_root_and_slashes() {
        assert_eq!(join_path("/", "A.XML"), "/A.XML");
        assert_eq!(join_path("/SONGS/", "A.XML"), "/SONGS/A.XML");
        assert_eq!(join_path("/SONGS", "/A.XML"), "/SONGS/A.XML");
    }

    #[test]
    fn only_timeouts_and_stale_sessions_are_transient() {
        assert!(is_transient(&ProtocolError::SessionStale.into()));
        assert!(!is_transient(&ProtocolError::Disconnected.into()));
        assert!(!is_transient(&BridgeError::device("dir", 5, Some("/X"))));
    }
}
