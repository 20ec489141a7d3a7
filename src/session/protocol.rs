//! Request/response correlation over the JSON sub-command

use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, oneshot};
use tracing::{debug, info, trace, warn};

use super::{HANDSHAKE_ID, MessageIdWindow};
use crate::codec::septet;
use crate::error::ProtocolError;
use crate::sysex::{BINARY_SEPARATOR, outbound};
use crate::transport::MidiOutput;
use crate::{BridgeConfig, BridgeError, Result};

/// A device reply: the JSON object and the optional binary attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub json: serde_json::Value,
    pub binary: Option<Vec<u8>>,
}

impl Reply {
    /// Split a JSON sub-command body into JSON and septet-decoded binary.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let (text, binary) = match body.iter().position(|&b| b == BINARY_SEPARATOR) {
            Some(split) => (&body[..split], Some(septet::decode(&body[split + 1..])?)),
            None => (body, None),
        };
        let json = serde_json::from_slice(text)
            .map_err(|e| BridgeError::malformed_response(format!("invalid reply JSON: {e}")))?;
        Ok(Self { json, binary })
    }

    /// `{"^error":{"reason":"session"}}`: the device no longer knows our session.
    pub fn is_stale_session(&self) -> bool {
        self.json
            .get("^error")
            .and_then(|e| e.get("reason"))
            .and_then(serde_json::Value::as_str)
            == Some("session")
    }
}

/// One established session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Device-assigned session identifier.
    pub id: u32,
    pub window: MessageIdWindow,
    /// Requests sent since the handshake.
    pub sent: u32,
}

#[derive(Deserialize)]
struct HandshakeReply {
    #[serde(rename = "^session")]
    session: SessionGrant,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionGrant {
    sid: u32,
    mid_min: u8,
    mid_max: u8,
}

struct Pending {
    seq: u64,
    tx: oneshot::Sender<Result<Reply>>,
}

/// Session state machine for one connection.
///
/// `None` is the uninitialized state; the first send after it runs the handshake.
/// Up to one request per message ID may be outstanding. A send whose ID is still
/// taken waits until that slot frees, so IDs are never reused while pending.
pub struct SessionProtocol {
    output: Arc<dyn MidiOutput>,
    timeout: Duration,
    renewal_threshold: u32,
    tag: String,
    state: tokio::sync::Mutex<Option<Session>>,
    pending: Mutex<HashMap<u8, Pending>>,
    next_seq: AtomicU64,
    slot_freed: Notify,
}

impl SessionProtocol {
    pub fn new(output: Arc<dyn MidiOutput>, config: &BridgeConfig) -> Self {
        Self {
            output,
            timeout: config.request_timeout(),
            renewal_threshold: config.renewal_threshold,
            tag: config.session_tag.clone(),
            state: tokio::sync::Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            slot_freed: Notify::new(),
        }
    }

    /// Send a JSON request (with optional binary payload) and wait for its reply.
    ///
    /// Fails with [`ProtocolError::Timeout`] if no reply arrives in time. Never retries.
    pub async fn send(&self, json: &[u8], binary: Option<&[u8]>) -> Result<Reply> {
        let (msg_id, sid, seq, rx) = self.register().await?;
        // Frees the slot however this future ends, including when the caller drops it.
        let _slot = SlotGuard { protocol: self, msg_id, seq };

        let message = outbound::json(msg_id, json, binary)?;
        self.output.send(&message).await?;
        trace!(msg_id, sid, bytes = message.len(), "Request sent");

        let reply = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(ProtocolError::Disconnected.into()),
            Err(_) => {
                warn!(msg_id, sid, "Request timed out after {:?}", self.timeout);
                return Err(ProtocolError::Timeout { msg_id, after: self.timeout }.into());
            }
        };

        if reply.is_stale_session() {
            warn!(sid, "Device reports stale session");
            self.invalidate(sid).await;
            return Err(ProtocolError::SessionStale.into());
        }

        Ok(reply)
    }

    /// Route a JSON reply from the driver to whoever is waiting for `msg_id`.
    pub fn deliver(&self, msg_id: u8, body: &[u8]) {
        let Some(pending) = self.pending().remove(&msg_id) else {
            debug!(msg_id, "Dropping reply with no pending request");
            return;
        };

        trace!(msg_id, bytes = body.len(), "Reply received");
        if pending.tx.send(Reply::parse(body)).is_err() {
            debug!(msg_id, "Reply arrived after its caller went away");
        }
        self.slot_freed.notify_waiters();
    }

    /// Drop the session and fail every pending request with `Disconnected`.
    pub async fn reset(&self) {
        let drained: Vec<(u8, Pending)> = self.pending().drain().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "Failing in-flight requests");
        }
        for (_, pending) in drained {
            let _ = pending.tx.send(Err(ProtocolError::Disconnected.into()));
        }
        self.slot_freed.notify_waiters();

        if let Some(session) = self.state.lock().await.take() {
            info!(sid = session.id, sent = session.sent, "Session reset");
        }
    }

    /// Number of requests awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.pending().len()
    }

    /// Snapshot of the active session, if any.
    pub async fn session(&self) -> Option<Session> {
        self.state.lock().await.clone()
    }

    async fn register(&self) -> Result<(u8, u32, u64, oneshot::Receiver<Result<Reply>>)> {
        loop {
            let mut state = self.state.lock().await;

            let session = match state.take() {
                Some(session) if !self.renewal_due(&session) => state.insert(session),
                previous => {
                    if let Some(old) = previous {
                        info!(sid = old.id, sent = old.sent, "Renewing session");
                    }
                    state.insert(self.handshake().await?)
                }
            };

            let msg_id = session.window.current();
            let notified = self.slot_freed.notified();
            {
                let mut pending = self.pending();
                if !pending.contains_key(&msg_id) {
                    let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = oneshot::channel();
                    pending.insert(msg_id, Pending { seq, tx });
                    session.window.advance();
                    session.sent += 1;
                    return Ok((msg_id, session.id, seq, rx));
                }
            }

            drop(state);
            trace!(msg_id, "Message ID still in flight, waiting for its slot");
            notified.await;
        }
    }

    fn renewal_due(&self, session: &Session) -> bool {
        session.sent >= self.renewal_threshold && self.in_flight() == 0
    }

    async fn handshake(&self) -> Result<Session> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending().insert(HANDSHAKE_ID, Pending { seq, tx });
        let _slot = SlotGuard { protocol: self, msg_id: HANDSHAKE_ID, seq };

        let result = self.handshake_exchange(rx).await;
        match &result {
            Ok(session) => {
                info!(
                    sid = session.id,
                    min = session.window.min(),
                    max = session.window.max(),
                    "Session established"
                );
            }
            Err(e) => warn!("Session handshake failed: {}", e),
        }
        result
    }

    async fn handshake_exchange(&self, rx: oneshot::Receiver<Result<Reply>>) -> Result<Session> {
        let failed = |reason: String| BridgeError::from(ProtocolError::HandshakeFailed { reason });

        let request = serde_json::to_vec(&json!({ "session": { "tag": self.tag } }))?;
        let message = outbound::json(HANDSHAKE_ID, &request, None)?;
        self.output.send(&message).await?;

        let reply = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(Ok(reply))) => reply,
            Ok(Ok(Err(e))) => return Err(failed(e.to_string())),
            Ok(Err(_)) => return Err(failed("connection closed".into())),
            Err(_) => return Err(failed(format!("no reply within {:?}", self.timeout))),
        };

        let grant: HandshakeReply = serde_json::from_value(reply.json)
            .map_err(|e| failed(format!("malformed session reply: {e}")))?;
        let window = MessageIdWindow::new(grant.session.mid_min, grant.session.mid_max)
            .map_err(|e| failed(e.to_string()))?;

        Ok(Session { id: grant.session.sid, window, sent: 0 })
    }

    /// Forget the session if it is still the one that went stale.
    async fn invalidate(&self, sid: u32) {
        let mut state = self.state.lock().await;
        if state.as_ref().is_some_and(|s| s.id == sid) {
            *state = None;
        }
    }

    fn release(&self, msg_id: u8, seq: u64) {
        let mut pending = self.pending();
        if pending.get(&msg_id).is_some_and(|p| p.seq == seq) {
            pending.remove(&msg_id);
            drop(pending);
            self.slot_freed.notify_waiters();
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u8, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases a pending slot on drop. A no-op once the reply was delivered, because
/// `release` only removes the entry registered under the same `seq`.
struct SlotGuard<'a> {
    protocol: &'a SessionProtocol,
    msg_id: u8,
    seq: u64,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.protocol.release(self.msg_id, self.seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sysex::{SubCommand, parse};
    use crate::transport::ChannelOutput;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn protocol(timeout_ms: u64, renewal_threshold: u32) -> (Arc<SessionProtocol>, UnboundedReceiver<Vec<u8>>) {
        let _ = tracing_subscriber::fmt::try_init();
        let (output, rx) = ChannelOutput::new();
        let config = BridgeConfig {
            request_timeout_ms: timeout_ms,
            renewal_threshold,
            session_tag: "test".into(),
            ..BridgeConfig::default()
        };
        (Arc::new(SessionProtocol::new(Arc::new(output), &config)), rx)
    }

    async fn next_request(rx: &mut UnboundedReceiver<Vec<u8>>) -> (u8, serde_json::Value) {
        let raw = rx.recv().await.expect("request sent");
        match parse(&raw).expect("vendor message").command {
            SubCommand::Json { msg_id, body } => (msg_id, Reply::parse(body).unwrap().json),
            other => panic!("unexpected outbound message {other:?}"),
        }
    }

    fn grant(protocol: &SessionProtocol, sid: u32, min: u8, max: u8) {
        let body = json!({ "^session": { "sid": sid, "midMin": min, "midMax": max } });
        protocol.deliver(HANDSHAKE_ID, body.to_string().as_bytes());
    }

    fn answer(protocol: &SessionProtocol, msg_id: u8) {
        protocol.deliver(msg_id, br#"{"^ping":{"err":0}}"#);
    }

    #[tokio::test]
    async fn first_send_runs_handshake_then_cycles_ids() {
        let (protocol, mut rx) = protocol(2000, 1000);

        let p = protocol.clone();
        let first = tokio::spawn(async move { p.send(br#"{"ping":{}}"#, None).await });

        let (id, body) = next_request(&mut rx).await;
        assert_eq!(id, HANDSHAKE_ID);
        assert_eq!(body["session"]["tag"], "test");
        grant(&protocol, 7, 0x41, 0x43);

        let (id, _) = next_request(&mut rx).await;
        assert_eq!(id, 0x41);
        answer(&protocol, id);
        first.await.unwrap().unwrap();

        let mut seen = Vec::new();
        for _ in 0..4 {
            let p = protocol.clone();
            let task = tokio::spawn(async move { p.send(br#"{"ping":{}}"#, None).await });
            let (id, _) = next_request(&mut rx).await;
            seen.push(id);
            answer(&protocol, id);
            task.await.unwrap().unwrap();
        }
        assert_eq!(seen, vec![0x42, 0x43, 0x41, 0x42]);
        assert_eq!(protocol.session().await.map(|s| s.id), Some(7));
    }

    #[tokio::test]
    async fn send_blocks_while_every_id_is_outstanding() {
        let (protocol, mut rx) = protocol(5000, 1000);

        let p = protocol.clone();
        let a = tokio::spawn(async move { p.send(b"{}", None).await });
        next_request(&mut rx).await;
        grant(&protocol, 1, 0x10, 0x11);
        let (id_a, _) = next_request(&mut rx).await;

        let p = protocol.clone();
        let b = tokio::spawn(async move { p.send(b"{}", None).await });
        let (id_b, _) = next_request(&mut rx).await;
        assert_eq!((id_a, id_b), (0x10, 0x11));

        let p = protocol.clone();
        let c = tokio::spawn(async move { p.send(b"{}", None).await });

        // The third request must not go out while both IDs are taken.
        let blocked = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(blocked.is_err(), "request sent while window exhausted");
        assert_eq!(protocol.in_flight(), 2);

        answer(&protocol, id_a);
        a.await.unwrap().unwrap();

        let (id_c, _) = next_request(&mut rx).await;
        assert_eq!(id_c, 0x10);
        answer(&protocol, id_b);
        answer(&protocol, id_c);
        b.await.unwrap().unwrap();
        c.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn timeout_frees_the_slot_and_late_reply_is_ignored() {
        let (protocol, mut rx) = protocol(100, 1000);

        let p = protocol.clone();
        let task = tokio::spawn(async move { p.send(b"{}", None).await });
        next_request(&mut rx).await;
        grant(&protocol, 3, 0x20, 0x20);
        let (id, _) = next_request(&mut rx).await;

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Protocol(ProtocolError::Timeout { msg_id: 0x20, .. })
        ));
        assert_eq!(protocol.in_flight(), 0);

        // Late reply for the abandoned request
        answer(&protocol, id);

        // The single-ID window is usable again.
        let p = protocol.clone();
        let task = tokio::spawn(async move { p.send(b"{}", None).await });
        let (id, _) = next_request(&mut rx).await;
        assert_eq!(id, 0x20);
        answer(&protocol, id);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn abandoned_send_frees_its_slot() {
        let (protocol, mut rx) = protocol(60_000, 1000);

        let p = protocol.clone();
        let task = tokio::spawn(async move { p.send(b"{}", None).await });
        next_request(&mut rx).await;
        grant(&protocol, 4, 0x20, 0x20);
        next_request(&mut rx).await;
        assert_eq!(protocol.in_flight(), 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(protocol.in_flight(), 0);

        // The only ID in the window is available again long before the timeout.
        let p = protocol.clone();
        let task = tokio::spawn(async move { p.send(b"{}", None).await });
        let (id, _) = tokio::time::timeout(Duration::from_secs(2), next_request(&mut rx))
            .await
            .expect("request should not wait for the abandoned slot");
        assert_eq!(id, 0x20);
        answer(&protocol, id);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn renews_session_after_threshold() {
        let (protocol, mut rx) = protocol(2000, 2);

        let mut next_sid = 10;
        for expected_sid in [10, 10, 11] {
            let p = protocol.clone();
            let task = tokio::spawn(async move { p.send(b"{}", None).await });
            let (mut id, _) = next_request(&mut rx).await;
            if id == HANDSHAKE_ID {
                grant(&protocol, next_sid, 0x30, 0x3F);
                next_sid += 1;
                id = next_request(&mut rx).await.0;
            }
            answer(&protocol, id);
            task.await.unwrap().unwrap();
            assert_eq!(protocol.session().await.map(|s| s.id), Some(expected_sid));
        }
    }

    #[tokio::test]
    async fn stale_session_fails_call_and_forces_new_handshake() {
        let (protocol, mut rx) = protocol(2000, 1000);

        let p = protocol.clone();
        let task = tokio::spawn(async move { p.send(b"{}", None).await });
        next_request(&mut rx).await;
        grant(&protocol, 5, 0x41, 0x4F);
        let (id, _) = next_request(&mut rx).await;
        protocol.deliver(id, br#"{"^error":{"reason":"session"}}"#);

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(ProtocolError::SessionStale)));
        assert!(protocol.session().await.is_none());

        let p = protocol.clone();
        let task = tokio::spawn(async move { p.send(b"{}", None).await });
        let (id, _) = next_request(&mut rx).await;
        assert_eq!(id, HANDSHAKE_ID);
        grant(&protocol, 6, 0x41, 0x4F);
        let (id, _) = next_request(&mut rx).await;
        answer(&protocol, id);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn reset_fails_in_flight_requests() {
        let (protocol, mut rx) = protocol(5000, 1000);

        let p = protocol.clone();
        let task = tokio::spawn(async move { p.send(b"{}", None).await });
        next_request(&mut rx).await;
        grant(&protocol, 9, 0x41, 0x4F);
        next_request(&mut rx).await;

        protocol.reset().await;
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(ProtocolError::Disconnected)));
        assert!(protocol.session().await.is_none());
        assert_eq!(protocol.in_flight(), 0);
    }

    #[tokio::test]
    async fn bad_window_fails_handshake() {
        let (protocol, mut rx) = protocol(2000, 1000);

        let p = protocol.clone();
        let task = tokio::spawn(async move { p.send(b"{}", None).await });
        next_request(&mut rx).await;
        grant(&protocol, 1, 0x00, 0x0F);

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(ProtocolError::HandshakeFailed { .. })));
        assert!(protocol.session().await.is_none());
    }

    #[test]
    fn reply_splits_binary_attachment() {
        let mut body = br#"{"^read":{"err":0}}"#.to_vec();
        body.push(BINARY_SEPARATOR);
        body.extend(septet::encode(&[0x80, 0x7F]));
        let reply = Reply::parse(&body).unwrap();
        assert_eq!(reply.json["^read"]["err"], 0);
        assert_eq!(reply.binary, Some(vec![0x80, 0x7F]));

        assert!(Reply::parse(b"{not json").is_err());
    }
}
