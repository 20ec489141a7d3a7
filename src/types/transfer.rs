//! Transfer queue model types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Queue-unique identifier of a transfer item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransferId(pub u64);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a transfer item does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    Upload,
    Download,
    Move,
}

/// Lifecycle of a transfer item.
///
/// `Pending -> Active -> {Done, Error, Canceled}`. Pending items may also be canceled
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    Pending,
    Active,
    Done,
    Error,
    Canceled,
}

impl TransferStatus {
    /// Whether the item will not change any more.
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Done | TransferStatus::Error | TransferStatus::Canceled)
    }
}

/// One queued upload, download or move, as seen by observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferItem {
    pub id: TransferId,
    pub kind: TransferKind,
    /// Local path or label for uploads, device path for downloads and moves.
    pub source: String,
    /// Device path for uploads and moves, local path for downloads.
    pub destination: Option<String>,
    pub bytes: u64,
    pub total: u64,
    pub status: TransferStatus,
    pub error: Option<String>,
}

impl TransferItem {
    /// Fraction done in `0.0..=1.0`. Zero-length items count as complete once done.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return if self.status == TransferStatus::Done { 1.0 } else { 0.0 };
        }
        (self.bytes as f64 / self.total as f64).min(1.0)
    }
}

/// Aggregate progress of the current queue pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferProgress {
    /// Index of the active item within the pass.
    pub current_index: Option<usize>,
    pub current_bytes: u64,
    pub current_total: u64,
    /// Items of this pass that reached a terminal state.
    pub files_completed: usize,
    pub files_total: usize,
    pub in_progress: bool,
}

impl TransferProgress {
    pub fn is_complete(&self) -> bool {
        self.files_total > 0 && self.files_completed >= self.files_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(bytes: u64, total: u64, status: TransferStatus) -> TransferItem {
        TransferItem {
            id: TransferId(1),
            kind: TransferKind::Upload,
            source: "A.WAV".into(),
            destination: Some("/SAMPLES/A.WAV".into()),
            bytes,
            total,
            status,
            error: None,
        }
    }

    #[test]
    fn terminal_states() {
        assert!(!TransferStatus::Pending.is_terminal());
        assert!(!TransferStatus::Active.is_terminal());
        assert!(TransferStatus::Done.is_terminal());
        assert!(TransferStatus::Error.is_terminal());
        assert!(TransferStatus::Canceled.is_terminal());
    }

    #[test]
    fn fraction_handles_empty_files() {
        assert_eq!(item(0, 0, TransferStatus::Active).fraction(), 0.0);
        assert_eq!(item(0, 0, TransferStatus::Done).fraction(), 1.0);
        assert_eq!(item(512, 1024, TransferStatus::Active).fraction(), 0.5);
    }
}
