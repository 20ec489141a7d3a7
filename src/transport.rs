//! MIDI transport traits
//!
//! The bridge never talks to a MIDI library directly. Hosts implement these two traits
//! over whatever port API they use, or feed the channel-backed implementations below.

use tokio::sync::mpsc;

use crate::{BridgeError, Result};

/// Outbound half of a MIDI port.
#[async_trait::async_trait]
pub trait MidiOutput: Send + Sync + 'static {
    /// Send one complete SysEx message.
    ///
    /// Delivery is not guaranteed; the session protocol compensates with timeouts.
    async fn send(&self, bytes: &[u8]) -> Result<()>;
}

/// Inbound half of a MIDI port.
#[async_trait::async_trait]
pub trait MidiInput: Send + 'static {
    /// Wait for the next complete message
    ///
    /// Returns:
    /// - `Ok(Some(bytes))` - A message arrived
    /// - `Ok(None)` - The port closed (device disconnected)
    /// - `Err(e)` - Transient read error
    async fn next_message(&mut self) -> Result<Option<Vec<u8>>>;
}

#[async_trait::async_trait]
impl MidiInput for mpsc::Receiver<Vec<u8>> {
    async fn next_message(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.recv().await)
    }
}

#[async_trait::async_trait]
impl MidiInput for mpsc::UnboundedReceiver<Vec<u8>> {
    async fn next_message(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.recv().await)
    }
}

/// Output that forwards every message into a channel, for hosts whose MIDI library
/// wants to own the port on its own thread.
#[derive(Debug, Clone)]
pub struct ChannelOutput {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelOutput {
    /// Create an output and the receiver the host drains into its port.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl MidiOutput for ChannelOutput {
    async fn send(&self, bytes: &[u8]) -> Result<()> {
        self.tx
            .send(bytes.to_vec())
            .map_err(|_| BridgeError::transport("MIDI output channel closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_output_forwards_and_reports_closure() {
        let (output, mut rx) = ChannelOutput::new();
        output.send(&[0xF0, 0x7D, 0xF7]).await.unwrap();
        assert_eq!(rx.recv().await, Some(vec![0xF0, 0x7D, 0xF7]));

        drop(rx);
        let err = output.send(&[0xF0, 0xF7]).await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport { .. }));
    }

    #[tokio::test]
    async fn receiver_end_of_stream_is_disconnect() {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(4);
        tx.send(vec![1, 2]).await.unwrap();
        drop(tx);
        assert_eq!(rx.next_message().await.unwrap(), Some(vec![1, 2]));
        assert_eq!(rx.next_message().await.unwrap(), None);
    }
}
