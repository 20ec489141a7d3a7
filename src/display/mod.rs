//! Display mirroring and the device debug console.
//!
//! [`DisplayAssembler`] owns the screen buffer and is only ever touched by the driver
//! task. It shares nothing with the session or transfer path, so mirroring keeps
//! running during file transfers.

mod assembler;
mod console;

pub use assembler::DisplayAssembler;
pub use console::{DebugConsole, DebugLine};
