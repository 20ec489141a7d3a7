//! Chunked upload and download
//!
//! Cancellation is cooperative: the token is checked before the file is opened and
//! between chunks. An upload that does not finish closes its handle and deletes the
//! file, so the device never keeps a truncated copy. That includes a refused final
//! `close`: the device flushes on close, so the data may not all have landed.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::CommandClient;
use super::message::OpenMode;
use crate::BridgeError;
use crate::error::TransferError;
use crate::types::FatTimestamp;

/// FAT32 caps files just below 4 GiB.
const MAX_FILE_SIZE: u64 = u32::MAX as u64;

/// Download buffer reserved up front, in chunks. Larger files grow as data arrives.
const PREALLOCATED_CHUNKS: usize = 64;

impl CommandClient {
    /// Write `data` to `path` in chunks. `on_progress(sent, total)` runs after each chunk.
    pub async fn upload<F>(
        &self,
        path: &str,
        data: &[u8],
        mode: OpenMode,
        modified: FatTimestamp,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<u64, TransferError>
    where
        F: FnMut(u64, u64) + Send,
    {
        if cancel.is_cancelled() {
            return Err(TransferError::Canceled);
        }

        let handle = self.open(path, mode, modified).await?;
        let total = data.len() as u64;
        on_progress(0, total);

        let result = match self.write_chunks(handle.fid, data, cancel, &mut on_progress).await {
            Ok(()) => self.close(handle.fid).await.map_err(TransferError::from),
            Err(e) => {
                if let Err(close_err) = self.close(handle.fid).await {
                    warn!(path, "Failed to close interrupted upload: {}", close_err);
                }
                Err(e)
            }
        };

        match result {
            Ok(()) => {
                info!(path, bytes = total, "Upload complete");
                Ok(total)
            }
            Err(e) => {
                debug!(path, "Upload did not complete ({}), removing file", e);
                if let Err(delete_err) = self.delete(path).await {
                    warn!(path, "Failed to delete partial upload: {}", delete_err);
                }
                Err(e)
            }
        }
    }

    async fn write_chunks<F>(
        &self,
        fid: u32,
        data: &[u8],
        cancel: &CancellationToken,
        on_progress: &mut F,
    ) -> Result<(), TransferError>
    where
        F: FnMut(u64, u64) + Send,
    {
        let total = data.len() as u64;
        let mut addr = 0u64;
        for chunk in data.chunks(self.chunk_size()) {
            if cancel.is_cancelled() {
                return Err(TransferError::Canceled);
            }
            let written = self.write_chunk(fid, addr, chunk).await?;
            if written != chunk.len() {
                return Err(BridgeError::malformed_response(format!(
                    "write: device accepted {written} of {} bytes at {addr}",
                    chunk.len()
                ))
                .into());
            }
            addr += written as u64;
            on_progress(addr, total);
        }
        Ok(())
    }

    /// Read the whole file at `path`. `on_progress(received, total)` runs after each chunk.
    pub async fn download<F>(
        &self,
        path: &str,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<Vec<u8>, TransferError>
    where
        F: FnMut(u64, u64) + Send,
    {
        if cancel.is_cancelled() {
            return Err(TransferError::Canceled);
        }

        let handle = self.open(path, OpenMode::Read, FatTimestamp::default()).await?;
        on_progress(0, handle.size);

        let result = self.read_chunks(handle.fid, handle.size, cancel, &mut on_progress).await;
        if let Err(close_err) = self.close(handle.fid).await {
            warn!(path, "Failed to close download: {}", close_err);
            if result.is_ok() {
                return Err(close_err.into());
            }
        }

        let data = result?;
        info!(path, bytes = data.len(), "Download complete");
        Ok(data)
    }

    async fn read_chunks<F>(
        &self,
        fid: u32,
        size: u64,
        cancel: &CancellationToken,
        on_progress: &mut F,
    ) -> Result<Vec<u8>, TransferError>
    where
        F: FnMut(u64, u64) + Send,
    {
        if size > MAX_FILE_SIZE {
            return Err(BridgeError::malformed_response(format!(
                "open: file size {size} exceeds the FAT limit"
            ))
            .into());
        }
        let reserve = usize::try_from(size)
            .unwrap_or(usize::MAX)
            .min(self.chunk_size().saturating_mul(PREALLOCATED_CHUNKS));
        let mut data = Vec::with_capacity(reserve);
        while (data.len() as u64) < size {
            if cancel.is_cancelled() {
                return Err(TransferError::Canceled);
            }
            let want = (size - data.len() as u64).min(self.chunk_size() as u64) as usize;
            let chunk = self.read_chunk(fid, data.len() as u64, want).await?;
            if chunk.is_empty() {
                warn!(fid, expected = size, got = data.len(), "File ended early");
                break;
            }
            data.extend_from_slice(&chunk);
            on_progress(data.len() as u64, size);
        }
        Ok(data)
    }
}
