//! Shared value types.
//!
//! - [`DisplayFrame`] is the mirrored screen buffer with its [`RenderMode`]
//! - [`DirEntry`] with [`Attributes`] and [`FatTimestamp`] describe device files
//! - [`TransferItem`] and [`TransferProgress`] are what transfer queue observers see
//! - [`UpdateRate`] controls display stream throttling

mod entry;
mod frame;
mod transfer;
mod update_rate;

pub use entry::{Attributes, DirEntry, FatTimestamp};
pub use frame::{DisplayFrame, DisplayGeometry, RenderMode};
pub use transfer::{TransferId, TransferItem, TransferKind, TransferProgress, TransferStatus};
pub use update_rate::UpdateRate;

use serde::{Deserialize, Serialize};

/// Text the device reported about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub version: Option<String>,
    pub features: Option<String>,
}
