//! Driver spawns and manages the inbound message task

use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::display::{DebugConsole, DisplayAssembler};
use crate::session::SessionProtocol;
use crate::sysex::{self, SubCommand, text_payload};
use crate::transport::MidiInput;
use crate::types::DisplayFrame;

/// Consecutive input errors tolerated before the link is considered dead.
const MAX_ERRORS: u32 = 10;

/// Components the reader task feeds.
pub struct Router {
    pub protocol: Arc<SessionProtocol>,
    pub display: DisplayAssembler,
    pub console: Arc<DebugConsole>,
}

/// Result of spawning the driver task
pub struct DriverChannels {
    /// Latest display frame
    pub frames: watch::Receiver<Arc<DisplayFrame>>,
    /// Latest firmware version text
    pub version: watch::Receiver<Option<String>>,
    /// Latest feature status text
    pub features: watch::Receiver<Option<String>>,
    /// Whether the input is still open
    pub connected: watch::Receiver<bool>,
    /// Cancellation token for graceful shutdown
    pub cancel: CancellationToken,
}

struct Publishers {
    frames: watch::Sender<Arc<DisplayFrame>>,
    version: watch::Sender<Option<String>>,
    features: watch::Sender<Option<String>>,
    connected: watch::Sender<bool>,
}

/// Driver owns the MIDI input and dispatches every message it receives.
///
/// Display updates go to the assembler, debug text to the console, device text to
/// the info channels and JSON replies to the session protocol. Nothing here blocks
/// on a command, so display mirroring continues while transfers run.
pub struct Driver;

impl Driver {
    /// Spawn the reader task for the given input
    pub fn spawn<I>(input: I, router: Router) -> DriverChannels
    where
        I: MidiInput,
    {
        let (frames_tx, frames_rx) = watch::channel(Arc::new(router.display.frame().clone()));
        let (version_tx, version_rx) = watch::channel(None);
        let (features_tx, features_rx) = watch::channel(None);
        let (connected_tx, connected_rx) = watch::channel(true);
        let cancel = CancellationToken::new();

        let publishers = Publishers {
            frames: frames_tx,
            version: version_tx,
            features: features_tx,
            connected: connected_tx,
        };

        let cancel_reader = cancel.clone();
        tokio::spawn(async move {
            Self::reader_task(input, router, publishers, cancel_reader).await;
        });

        DriverChannels {
            frames: frames_rx,
            version: version_rx,
            features: features_rx,
            connected: connected_rx,
            cancel,
        }
    }

    async fn reader_task<I>(
        mut input: I,
        mut router: Router,
        publishers: Publishers,
        cancel: CancellationToken,
    ) where
        I: MidiInput,
    {
        info!("MIDI reader task started");
        let mut message_count = 0u64;
        let mut error_count = 0u32;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("MIDI reader cancelled");
                    break;
                }
                result = input.next_message() => result,
            };

            match result {
                Ok(Some(raw)) => {
                    message_count += 1;
                    error_count = 0;
                    Self::dispatch(&raw, &mut router, &publishers);
                }
                Ok(None) => {
                    info!("MIDI input closed after {} messages", message_count);
                    break;
                }
                Err(e) => {
                    // Input error - don't give up on transient failures
                    error_count += 1;
                    error!("MIDI input error ({}/{}): {}", error_count, MAX_ERRORS, e);

                    if error_count >= MAX_ERRORS {
                        error!("Too many MIDI input errors, shutting down");
                        break;
                    }

                    // Exponential backoff: 100ms, 200ms, 400ms, ...
                    let backoff = std::time::Duration::from_millis(50 * (1 << error_count.min(5)));
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        router.protocol.reset().await;
        router.display.reset();
        let _ = publishers.frames.send(Arc::new(router.display.frame().clone()));
        let _ = publishers.connected.send(false);
        info!("MIDI reader task ended (processed {} messages)", message_count);
    }

    fn dispatch(raw: &[u8], router: &mut Router, publishers: &Publishers) {
        let Some(envelope) = sysex::parse(raw) else {
            trace!(bytes = raw.len(), "Ignoring foreign MIDI message");
            return;
        };

        match envelope.command {
            SubCommand::DisplayFull { row, col, packed } => {
                Self::publish_frame(router.display.apply_full(row, col, packed), router, publishers);
            }
            SubCommand::DisplayDelta { first_page, page_count, packed } => {
                let result = router.display.apply_delta(first_page, page_count, packed);
                Self::publish_frame(result, router, publishers);
            }
            SubCommand::SevenSegment { digits, dots } => {
                router.display.apply_seven_segment(digits, dots);
                Self::publish_frame(Ok(()), router, publishers);
            }
            SubCommand::DebugText(text) => {
                router.console.push(&String::from_utf8_lossy(text));
            }
            SubCommand::FeatureStatus(text) => {
                let _ = publishers.features.send(Some(text_payload(text)));
            }
            SubCommand::Version(text) => {
                let version = text_payload(text);
                debug!(%version, "Firmware version");
                let _ = publishers.version.send(Some(version));
            }
            SubCommand::Json { msg_id, body } => router.protocol.deliver(msg_id, body),
            SubCommand::Unknown(body) => {
                debug!(prefix = ?&body[..body.len().min(4)], len = body.len(), "Unknown SysEx");
            }
        }
    }

    fn publish_frame(result: crate::Result<()>, router: &Router, publishers: &Publishers) {
        match result {
            Ok(()) => {
                let _ = publishers.frames.send(Arc::new(router.display.frame().clone()));
            }
            Err(e) => warn!("Dropping display update: {}", e),
        }
    }
}
