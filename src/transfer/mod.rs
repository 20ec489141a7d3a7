//! Transfer queue manager.
//!
//! [`TransferQueue`] turns batches of uploads, downloads and moves into a strictly
//! sequential stream of command calls, with observable per-item state, cooperative
//! cancellation and an aggregate busy flag.

mod conflict;
mod queue;

pub use conflict::{find_conflicts, unique_name};
pub use queue::{DownloadSpec, TransferQueue, UploadSpec};
