//! One live link to a device

use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::command::CommandClient;
use crate::display::{DebugConsole, DebugLine, DisplayAssembler};
use crate::driver::{Driver, Router};
use crate::session::SessionProtocol;
use crate::stream::ThrottleExt;
use crate::sysex::Request;
use crate::transfer::TransferQueue;
use crate::transport::{MidiInput, MidiOutput};
use crate::types::{DeviceInfo, DisplayFrame, UpdateRate};
use crate::{BridgeConfig, ProtocolError, Result};

/// Fastest rate the device pushes display updates.
pub const DISPLAY_SOURCE_HZ: f64 = 60.0;


/// A connected device: display mirror, debug console, file commands and transfer queue.
///
/// Dropping the connection stops the reader task.
pub struct Connection {
    output: Arc<dyn MidiOutput>,
    protocol: Arc<SessionProtocol>,
    commands: CommandClient,
    transfers: TransferQueue,
    console: Arc<DebugConsole>,
    frames: watch::Receiver<Arc<DisplayFrame>>,
    version: watch::Receiver<Option<String>>,
    features: watch::Receiver<Option<String>>,
    connected: watch::Receiver<bool>,
    config: BridgeConfig,
    cancel: CancellationToken,
}

impl Connection {
    /// Wire up all components over the given port halves and start reading.
    ///
    /// Must be called from within a tokio runtime. No traffic is sent until the first
    /// command or request.
    pub fn open<O, I>(output: O, input: I, config: BridgeConfig) -> Result<Self>
    where
        O: MidiOutput,
        I: MidiInput,
    {
        config.validate()?;

        let output: Arc<dyn MidiOutput> = Arc::new(output);
        let protocol = Arc::new(SessionProtocol::new(output.clone(), &config));
        let commands = CommandClient::new(protocol.clone(), &config);
        let transfers = TransferQueue::new(commands.clone());
        let console = Arc::new(DebugConsole::new(config.debug_history));

        let router = Router {
            protocol: protocol.clone(),
            display: DisplayAssembler::new(config.display),
            console: console.clone(),
        };
        let channels = Driver::spawn(input, router);

        info!(
            timeout_ms = config.request_timeout_ms,
            chunk_size = config.chunk_size,
            "Device connection opened"
        );

        Ok(Self {
            output,
            protocol,
            commands,
            transfers,
            console,
            frames: channels.frames,
            version: channels.version,
            features: channels.features,
            connected: channels.connected,
            config,
            cancel: channels.cancel,
        })
    }

    /// File commands on this connection.
    pub fn commands(&self) -> &CommandClient {
        &self.commands
    }

    /// The transfer queue of this connection.
    pub fn transfers(&self) -> &TransferQueue {
        &self.transfers
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Display frames, starting with the current one, at most `rate` per second.
    pub fn display_frames(&self, rate: UpdateRate) -> impl Stream<Item = Arc<DisplayFrame>> + 'static {
        let frames = WatchStream::new(self.frames.clone());
        match rate.throttle_interval(DISPLAY_SOURCE_HZ) {
            None => frames.boxed(),
            Some(interval) => frames.throttle(interval).boxed(),
        }
    }

    /// Display frames at the configured `display_rate`.
    pub fn default_display_frames(&self) -> impl Stream<Item = Arc<DisplayFrame>> + 'static {
        self.display_frames(self.config.display_rate)
    }

    pub fn current_frame(&self) -> Arc<DisplayFrame> {
        self.frames.borrow().clone()
    }

    /// Debug console lines as they complete. Slow consumers skip lines rather than block.
    pub fn debug_lines(&self) -> impl Stream<Item = DebugLine> + 'static {
        BroadcastStream::new(self.console.subscribe()).filter_map(|line| async move { line.ok() })
    }

    /// Retained debug console lines, oldest first.
    pub fn debug_history(&self) -> Vec<DebugLine> {
        self.console.history()
    }

    /// Ask the device for a full frame; subsequent changes arrive as deltas.
    pub async fn request_display(&self) -> Result<()> {
        debug!("Requesting display stream");
        self.output.send(&Request::DisplayFrame.to_bytes()).await
    }

    /// Ask the device to start sending debug console text.
    pub async fn request_debug_stream(&self) -> Result<()> {
        debug!("Requesting debug stream");
        self.output.send(&Request::DebugStream.to_bytes()).await
    }

    /// Query the firmware version and wait for the answer.
    pub async fn query_version(&self) -> Result<String> {
        self.query_text(Request::Version, self.version.clone(), "version").await
    }

    /// Query the feature status and wait for the answer.
    pub async fn query_features(&self) -> Result<String> {
        self.query_text(Request::FeatureStatus, self.features.clone(), "feature status").await
    }

    /// Latest device text seen so far, without sending anything.
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo { version: self.version.borrow().clone(), features: self.features.borrow().clone() }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow() && !self.cancel.is_cancelled()
    }

    /// Stop reading, fail in-flight requests and blank the display.
    pub async fn disconnect(&self) {
        info!("Disconnecting");
        self.cancel.cancel();
        let mut connected = self.connected.clone();
        let _ = connected.wait_for(|up| !up).await;
    }

    async fn query_text(
        &self,
        request: Request,
        mut rx: watch::Receiver<Option<String>>,
        name: &'static str,
    ) -> Result<String> {
        rx.mark_unchanged();
        self.output.send(&request.to_bytes()).await?;

        let after = self.config.request_timeout();
        let wait = async {
            loop {
                if rx.changed().await.is_err() {
                    return Err(ProtocolError::Disconnected.into());
                }
                if let Some(text) = rx.borrow_and_update().clone() {
                    return Ok(text);
                }
            }
        };
        tokio::time::timeout(after, wait)
            .await
            .unwrap_or_else(|_| Err(ProtocolError::NoReply { request: name, after }.into()))
    }

    /// Number of protocol requests awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.protocol.in_flight()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        debug!("Dropping device connection");
        self.cancel.cancel();
    }
}
