//! Byte-level protocol tests through the public API
//!
//! The device side is scripted by hand: each test reads what the host sent from a
//! `ChannelOutput` and answers with raw SysEx, so the exact wire format is pinned down.

use serde_json::{Value, json};
use std::time::Duration;
use sysex_bridge::session::Reply;
use sysex_bridge::sysex::{self, Request, SubCommand, outbound};
use sysex_bridge::{
    BridgeConfig, BridgeError, ChannelOutput, Connection, DeviceStatus, ProtocolError, SysexBridge,
    TransferError,
};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio_util::sync::CancellationToken;

struct ScriptedDevice {
    sent: UnboundedReceiver<Vec<u8>>,
    replies: UnboundedSender<Vec<u8>>,
}

impl ScriptedDevice {
    async fn next_raw(&mut self) -> Vec<u8> {
        tokio::time::timeout(Duration::from_secs(2), self.sent.recv())
            .await
            .expect("host sent nothing")
            .expect("host output closed")
    }

    /// Next host message, which must be a JSON command.
    async fn next_json(&mut self) -> (u8, Reply) {
        let raw = self.next_raw().await;
        let envelope = sysex::parse(&raw).expect("framed message");
        match envelope.command {
            SubCommand::Json { msg_id, body } => (msg_id, Reply::parse(body).expect("valid command body")),
            other => panic!("expected JSON command, got {other:?}"),
        }
    }

    fn reply(&self, msg_id: u8, body: Value) {
        let text = serde_json::to_vec(&body).unwrap();
        self.replies.send(outbound::json(msg_id, &text, None).unwrap()).unwrap();
    }

    async fn accept_session(&mut self, sid: u32, min: u8, max: u8) {
        let (msg_id, request) = self.next_json().await;
        assert_eq!(msg_id, 0);
        assert_eq!(request.json, json!({ "session": { "tag": "wire-test" } }));
        self.reply(0, json!({ "^session": { "sid": sid, "midMin": min, "midMax": max } }));
    }
}

fn connect() -> (ScriptedDevice, Connection) {
    let _ = tracing_subscriber::fmt::try_init();
    let (output, sent) = ChannelOutput::new();
    let (replies, input) = unbounded_channel::<Vec<u8>>();
    let config = BridgeConfig { session_tag: "wire-test".into(), ..BridgeConfig::default() };
    let connection = SysexBridge::connect_with(output, input, config).unwrap();
    (ScriptedDevice { sent, replies }, connection)
}

#[tokio::test]
async fn plain_requests_are_bare_paths() {
    let (mut device, connection) = connect();

    connection.request_display().await.unwrap();
    assert_eq!(device.next_raw().await, [0xF0, 0x7D, 0x02, 0x00, 0x01, 0xF7]);

    connection.request_debug_stream().await.unwrap();
    assert_eq!(device.next_raw().await, Request::DebugStream.to_bytes());
}

#[tokio::test]
async fn commands_cycle_through_the_granted_window() {
    let (mut device, connection) = connect();
    let commands = connection.commands().clone();

    let listing = tokio::spawn(async move { commands.list_dir("/").await });
    device.accept_session(7, 0x41, 0x42).await;

    let (msg_id, request) = device.next_json().await;
    assert_eq!(msg_id, 0x41);
    assert_eq!(request.json, json!({ "dir": { "path": "/", "offset": 0, "lines": 20 } }));
    device.reply(
        0x41,
        json!({ "^dir": { "list": [{ "name": "SONG.XML", "size": 12, "attr": 32 }], "err": 0 } }),
    );

    let entries = listing.await.unwrap().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "SONG.XML");
    assert_eq!(entries[0].size, 12);

    let commands = connection.commands().clone();
    let mkdir = tokio::spawn(async move { commands.mkdir("/SONGS").await });
    let (msg_id, request) = device.next_json().await;
    assert_eq!(msg_id, 0x42);
    assert_eq!(request.json["mkdir"]["path"], "/SONGS");
    device.reply(0x42, json!({ "^mkdir": { "err": 8 } }));

    match mkdir.await.unwrap().unwrap_err() {
        BridgeError::Device(e) => assert_eq!(e.status, DeviceStatus::Exist),
        other => panic!("expected device error, got {other:?}"),
    }

    let commands = connection.commands().clone();
    let delete = tokio::spawn(async move { commands.delete("/OLD.XML").await });
    let (msg_id, request) = device.next_json().await;
    assert_eq!(msg_id, 0x41, "window wraps back to its first ID");
    assert_eq!(request.json, json!({ "delete": { "path": "/OLD.XML" } }));
    device.reply(0x41, json!({ "^delete": { "err": 0 } }));
    delete.await.unwrap().unwrap();
}

#[tokio::test]
async fn write_payload_travels_as_septets() {
    let (mut device, connection) = connect();
    let commands = connection.commands().clone();
    let data = vec![0xFF, 0x00, 0x80, 0x7F, 0x01, 0xAA, 0x55, 0xF7, 0xF0];

    let chunk = data.clone();
    let write = tokio::spawn(async move { commands.write_chunk(3, 0, &chunk).await });
    device.accept_session(1, 0x10, 0x1F).await;

    let raw = device.next_raw().await;
    assert!(raw[1..raw.len() - 1].iter().all(|&b| b < 0x80), "body must be 7-bit clean");

    let envelope = sysex::parse(&raw).unwrap();
    let SubCommand::Json { msg_id, body } = envelope.command else {
        panic!("expected JSON command");
    };
    let request = Reply::parse(body).unwrap();
    assert_eq!(request.json, json!({ "write": { "fid": 3, "addr": 0, "size": 9 } }));
    assert_eq!(request.binary.as_deref(), Some(&data[..]));

    device.reply(msg_id, json!({ "^write": { "fid": 3, "size": 9, "err": 0 } }));
    assert_eq!(write.await.unwrap().unwrap(), 9);
}

#[tokio::test]
async fn implausible_file_size_fails_the_download() {
    let (mut device, connection) = connect();
    let commands = connection.commands().clone();
    let download = tokio::spawn(async move {
        commands.download("/HUGE.BIN", &CancellationToken::new(), |_, _| {}).await
    });
    device.accept_session(2, 0x41, 0x4F).await;

    let (msg_id, request) = device.next_json().await;
    assert_eq!(request.json["open"]["path"], "/HUGE.BIN");
    device.reply(msg_id, json!({ "^open": { "fid": 1, "size": u64::MAX, "err": 0 } }));

    // The handle is still closed before the error is reported.
    let (msg_id, request) = device.next_json().await;
    assert_eq!(request.json, json!({ "close": { "fid": 1 } }));
    device.reply(msg_id, json!({ "^close": { "err": 0 } }));

    let err = download.await.expect("download task panicked").unwrap_err();
    assert!(
        matches!(err, TransferError::Protocol(ProtocolError::MalformedResponse { .. })),
        "{err:?}"
    );
}

#[tokio::test]
async fn version_reply_is_plain_text() {
    let (mut device, connection) = connect();

    let version = tokio::spawn(async move {
        let version = connection.query_version().await;
        (version, connection)
    });
    assert_eq!(device.next_raw().await, Request::Version.to_bytes());
    device.replies.send(outbound::build(&[0x03, 0x42], b"4.1.4").unwrap()).unwrap();

    let (version, _connection) = version.await.unwrap();
    assert_eq!(version.unwrap(), "4.1.4");
}
