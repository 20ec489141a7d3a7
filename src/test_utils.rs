//! Simulated device for tests and benchmarks
//!
//! [`SimulatedDevice`] implements [`MidiOutput`], answering every host message the
//! way the workstation firmware does: session handshakes, file commands against an
//! in-memory filesystem, version and feature queries, and display requests. Replies
//! go to the receiver returned by [`SimulatedDevice::new`], which the host uses as its
//! [`MidiInput`](crate::MidiInput).
//!
//! Knobs let tests drop replies, fail specific commands, slow replies down, expire the
//! session or pull the cable.

use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::codec::pack;
use crate::command::message::ascii_json;
use crate::connection::Connection;
use crate::error::DeviceStatus;
use crate::session::{HANDSHAKE_ID, Reply};
use crate::sysex::{self, SubCommand, outbound};
use crate::transport::MidiOutput;
use crate::types::{Attributes, DisplayGeometry};
use crate::{BridgeConfig, Result};

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File { data: Vec<u8>, date: u16, time: u16 },
}

#[derive(Debug, Clone)]
struct OpenFile {
    path: String,
    writable: bool,
}

#[derive(Debug, Clone)]
struct Failure {
    op: String,
    path: Option<String>,
    status: DeviceStatus,
}

struct DeviceState {
    nodes: BTreeMap<String, Node>,
    open: HashMap<u32, OpenFile>,
    next_fid: u32,
    next_sid: u32,
    session: Option<u32>,
    window: (u8, u8),
    screen: Vec<u8>,
    version: String,
    features: String,
    drop_replies: u32,
    reply_delay: Duration,
    failures: Vec<Failure>,
    requests: Vec<String>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::from([("/".to_string(), Node::Dir)]),
            open: HashMap::new(),
            next_fid: 1,
            next_sid: 1,
            session: None,
            window: (0x41, 0x4F),
            screen: vec![0; DisplayGeometry::default().frame_size()],
            version: "4.1.4-simulated".into(),
            features: "sysex-fs display debug".into(),
            drop_replies: 0,
            reply_delay: Duration::ZERO,
            failures: Vec::new(),
            requests: Vec::new(),
        }
    }
}

/// In-memory stand-in for the workstation.
#[derive(Clone)]
pub struct SimulatedDevice {
    state: Arc<Mutex<DeviceState>>,
    to_host: Arc<Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>>,
}

impl SimulatedDevice {
    /// A device with an empty filesystem, and the host's input side of its port.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let device = Self {
            state: Arc::new(Mutex::new(DeviceState::default())),
            to_host: Arc::new(Mutex::new(Some(tx))),
        };
        (device, rx)
    }

    /// A device plus a [`Connection`] talking to it.
    pub fn connect(config: BridgeConfig) -> Result<(Self, Connection)> {
        let (device, input) = Self::new();
        device.state().screen = vec![0; config.display.frame_size()];
        let connection = Connection::open(device.clone(), input, config)?;
        Ok((device, connection))
    }

    // ---- filesystem setup and inspection ----

    pub fn add_dir(&self, path: &str) {
        self.state().nodes.insert(normalize(path), Node::Dir);
    }

    pub fn add_file(&self, path: &str, data: impl Into<Vec<u8>>) {
        let node = Node::File { data: data.into(), date: 0, time: 0 };
        self.state().nodes.insert(normalize(path), node);
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.state().nodes.get(&normalize(path)) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state().nodes.contains_key(&normalize(path))
    }

    /// Files currently open on the device.
    pub fn open_handles(&self) -> usize {
        self.state().open.len()
    }

    /// Command names received, in order (`session`, `dir`, `open`, ...).
    pub fn requests(&self) -> Vec<String> {
        self.state().requests.clone()
    }

    pub fn handshakes(&self) -> usize {
        self.state().requests.iter().filter(|r| *r == "session").count()
    }

    // ---- behaviour knobs ----

    /// Window handed out by future handshakes.
    pub fn set_window(&self, min: u8, max: u8) {
        self.state().window = (min, max);
    }

    /// Silently drop the next `count` command replies.
    pub fn drop_replies(&self, count: u32) {
        self.state().drop_replies = count;
    }

    /// Delay every reply by `delay`.
    pub fn set_reply_delay(&self, delay: Duration) {
        self.state().reply_delay = delay;
    }

    /// Refuse every `op` on `path` (any path with `None`) with `status`.
    pub fn fail(&self, op: &str, path: Option<&str>, status: DeviceStatus) {
        self.state().failures.push(Failure {
            op: op.to_string(),
            path: path.map(normalize),
            status,
        });
    }

    /// Forget the session, so the next command gets a stale-session error.
    pub fn expire_session(&self) {
        self.state().session = None;
    }

    /// Close the port; the host sees end of input.
    pub fn disconnect(&self) {
        self.to_host.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    // ---- device-initiated traffic ----

    pub fn set_version(&self, version: &str) {
        self.state().version = version.to_string();
    }

    /// Replace the screen and send it as a full frame.
    pub fn push_full_frame(&self, pixels: &[u8]) {
        self.state().screen = pixels.to_vec();
        let mut payload = vec![0, 0];
        payload.extend(pack(pixels));
        self.emit(&[0x02, 0x40, 0x01], &payload);
    }

    /// Send `page_count` pages of `data` to be spliced at `8 * first_page`.
    pub fn push_delta(&self, first_page: u8, page_count: u8, data: &[u8]) {
        {
            let mut state = self.state();
            let offset = 8 * usize::from(first_page);
            if let Some(target) = state.screen.get_mut(offset..offset + data.len()) {
                target.copy_from_slice(data);
            }
        }
        let mut payload = vec![first_page, page_count];
        payload.extend(pack(data));
        self.emit(&[0x02, 0x40, 0x02], &payload);
    }

    pub fn push_seven_segment(&self, digits: [u8; 4], dots: u8) {
        let mut payload = digits.to_vec();
        payload.push(dots);
        self.emit(&[0x02, 0x41, 0x00], &payload);
    }

    /// Send debug console text (ASCII).
    pub fn push_debug_text(&self, text: &str) {
        self.emit(&[0x03, 0x40], text.as_bytes());
    }

    /// Send arbitrary bytes, e.g. foreign or corrupt SysEx.
    pub fn push_raw(&self, bytes: &[u8]) {
        self.deliver(bytes.to_vec(), Duration::ZERO);
    }

    fn emit(&self, path: &[u8], payload: &[u8]) {
        match outbound::build(path, payload) {
            Ok(message) => self.deliver(message, Duration::ZERO),
            Err(e) => warn!("Simulated device cannot build message: {}", e),
        }
    }

    fn deliver(&self, message: Vec<u8>, delay: Duration) {
        let Some(tx) = self.to_host.lock().unwrap_or_else(PoisonError::into_inner).clone() else {
            return;
        };
        if delay.is_zero() {
            let _ = tx.send(message);
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(message);
            });
        }
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Work out the replies to one host message.
    fn respond(&self, raw: &[u8]) -> (Vec<Vec<u8>>, Duration) {
        let mut state = self.state();
        let delay = state.reply_delay;
        let Some(envelope) = sysex::parse(raw) else {
            return (Vec::new(), delay);
        };

        let replies = match envelope.command {
            SubCommand::Unknown(&[0x02, 0x00, 0x01]) => {
                let mut payload = vec![0x02, 0x40, 0x01, 0, 0];
                payload.extend(pack(&state.screen));
                vec![payload]
            }
            SubCommand::Unknown(&[0x03, 0x00, 0x01]) => Vec::new(),
            SubCommand::Unknown(&[0x03, 0x01, 0x01]) => {
                vec![[&[0x03, 0x41][..], state.features.as_bytes()].concat()]
            }
            SubCommand::Unknown(&[0x03, 0x02, 0x01]) => {
                vec![[&[0x03, 0x42][..], state.version.as_bytes()].concat()]
            }
            SubCommand::Json { msg_id, body } => match state.command(msg_id, body) {
                Some((json, binary)) => {
                    let Ok(text) = ascii_json(&json) else { return (Vec::new(), delay) };
                    let mut payload = vec![0x04, msg_id];
                    payload.extend(text);
                    if let Some(data) = binary {
                        payload.push(sysex::BINARY_SEPARATOR);
                        payload.extend(crate::codec::septet::encode(&data));
                    }
                    vec![payload]
                }
                None => Vec::new(),
            },
            _ => Vec::new(),
        };

        let messages = replies
            .into_iter()
            .filter_map(|body| outbound::build(&body, &[]).ok())
            .collect();
        (messages, delay)
    }
}

#[async_trait::async_trait]
impl MidiOutput for SimulatedDevice {
    async fn send(&self, bytes: &[u8]) -> Result<()> {
        let (replies, delay) = self.respond(bytes);
        for reply in replies {
            self.deliver(reply, delay);
        }
        Ok(())
    }
}

type CommandReply = (Value, Option<Vec<u8>>);

impl DeviceState {
    fn command(&mut self, msg_id: u8, body: &[u8]) -> Option<CommandReply> {
        let request = Reply::parse(body).ok()?;
        let (op, args) = request.json.as_object()?.iter().next()?;
        let (op, args) = (op.clone(), args.clone());
        trace!(msg_id, %op, "Simulated device command");
        self.requests.push(op.clone());

        if op == "session" && msg_id == HANDSHAKE_ID {
            let sid = self.next_sid;
            self.next_sid += 1;
            self.session = Some(sid);
            let (min, max) = self.window;
            return Some((json!({ "^session": { "sid": sid, "midMin": min, "midMax": max } }), None));
        }

        if self.session.is_none() {
            return Some((json!({ "^error": { "reason": "session" } }), None));
        }

        if self.drop_replies > 0 {
            self.drop_replies -= 1;
            return None;
        }

        let (body, binary) = match self.injected_failure(&op, &args) {
            Some(status) => (json!({ "err": status.code() }), None),
            None => self.filesystem(&op, &args, request.binary),
        };
        let mut reply = serde_json::Map::new();
        reply.insert(format!("^{op}"), body);
        Some((Value::Object(reply), binary))
    }

    fn injected_failure(&self, op: &str, args: &Value) -> Option<DeviceStatus> {
        let path = str_arg(args, "path").or_else(|| str_arg(args, "from")).map(normalize);
        self.failures
            .iter()
            .find(|f| f.op == op && (f.path.is_none() || f.path == path))
            .map(|f| f.status)
    }

    fn filesystem(&mut self, op: &str, args: &Value, binary: Option<Vec<u8>>) -> CommandReply {
        let result = match op {
            "dir" => self.dir(args),
            "open" => self.open_file(args),
            "read" => return self.read(args),
            "write" => self.write(args, binary.unwrap_or_default()),
            "close" => self.close(args),
            "delete" => self.delete(args),
            "rename" | "move" => self.rename(args),
            "mkdir" => self.mkdir(args),
            _ => Err(DeviceStatus::InvalidParameter),
        };
        match result {
            Ok(mut body) => {
                body["err"] = json!(0);
                (body, None)
            }
            Err(status) => (json!({ "err": status.code() }), None),
        }
    }

    fn dir(&self, args: &Value) -> Result<Value, DeviceStatus> {
        let path = normalize(str_arg(args, "path").ok_or(DeviceStatus::InvalidParameter)?);
        if !matches!(self.nodes.get(&path), Some(Node::Dir)) {
            return Err(DeviceStatus::NoPath);
        }
        let offset = u64_arg(args, "offset") as usize;
        let lines = u64_arg(args, "lines") as usize;

        let list: Vec<Value> = self
            .nodes
            .iter()
            .filter(|(key, _)| key.as_str() != "/" && parent(key) == path)
            .skip(offset)
            .take(lines)
            .map(|(key, node)| {
                let name = key.rsplit('/').next().unwrap_or_default();
                match node {
                    Node::Dir => json!({ "name": name, "size": 0, "attr": Attributes::DIRECTORY }),
                    Node::File { data, date, time } => json!({
                        "name": name,
                        "size": data.len(),
                        "date": date,
                        "time": time,
                        "attr": Attributes::ARCHIVE,
                    }),
                }
            })
            .collect();
        Ok(json!({ "list": list }))
    }

    fn open_file(&mut self, args: &Value) -> Result<Value, DeviceStatus> {
        let path = normalize(str_arg(args, "path").ok_or(DeviceStatus::InvalidParameter)?);
        let mode = str_arg(args, "mode").unwrap_or("read");

        // None: absent, Some(None): directory, Some(Some(len)): file
        let existing = self.nodes.get(&path).map(|node| match node {
            Node::File { data, .. } => Some(data.len()),
            Node::Dir => None,
        });

        let size = match (mode, existing) {
            ("read", Some(Some(len))) => len,
            ("read", Some(None)) => return Err(DeviceStatus::Denied),
            ("read", None) => return Err(DeviceStatus::NoFile),
            (_, Some(None)) => return Err(DeviceStatus::Exist),
            ("create_new", Some(_)) => return Err(DeviceStatus::Exist),
            ("create_always" | "create_new", _) => {
                if !matches!(self.nodes.get(&parent(&path)), Some(Node::Dir)) {
                    return Err(DeviceStatus::NoPath);
                }
                let date = u64_arg(args, "date") as u16;
                let time = u64_arg(args, "time") as u16;
                self.nodes.insert(path.clone(), Node::File { data: Vec::new(), date, time });
                0
            }
            _ => return Err(DeviceStatus::InvalidParameter),
        };

        let fid = self.next_fid;
        self.next_fid += 1;
        self.open.insert(fid, OpenFile { path, writable: mode != "read" });
        Ok(json!({ "fid": fid, "size": size }))
    }

    fn read(&self, args: &Value) -> CommandReply {
        let fid = u64_arg(args, "fid") as u32;
        let data = self
            .open
            .get(&fid)
            .and_then(|file| match self.nodes.get(&file.path) {
                Some(Node::File { data, .. }) => Some(data),
                _ => None,
            });
        let Some(data) = data else {
            return (json!({ "err": DeviceStatus::InvalidObject.code() }), None);
        };

        let addr = (u64_arg(args, "addr") as usize).min(data.len());
        let end = (addr + u64_arg(args, "size") as usize).min(data.len());
        let chunk = data[addr..end].to_vec();
        (json!({ "fid": fid, "addr": addr, "size": chunk.len(), "err": 0 }), Some(chunk))
    }

    fn write(&mut self, args: &Value, chunk: Vec<u8>) -> Result<Value, DeviceStatus> {
        let fid = u64_arg(args, "fid") as u32;
        let file = self.open.get(&fid).ok_or(DeviceStatus::InvalidObject)?;
        if !file.writable {
            return Err(DeviceStatus::Denied);
        }
        if u64_arg(args, "size") as usize != chunk.len() {
            return Err(DeviceStatus::InvalidParameter);
        }
        let Some(Node::File { data, .. }) = self.nodes.get_mut(&file.path) else {
            return Err(DeviceStatus::InvalidObject);
        };

        let addr = u64_arg(args, "addr") as usize;
        if data.len() < addr + chunk.len() {
            data.resize(addr + chunk.len(), 0);
        }
        data[addr..addr + chunk.len()].copy_from_slice(&chunk);
        Ok(json!({ "fid": fid, "size": chunk.len() }))
    }

    fn close(&mut self, args: &Value) -> Result<Value, DeviceStatus> {
        let fid = u64_arg(args, "fid") as u32;
        self.open.remove(&fid).ok_or(DeviceStatus::InvalidObject)?;
        Ok(json!({ "fid": fid }))
    }

    fn delete(&mut self, args: &Value) -> Result<Value, DeviceStatus> {
        let path = normalize(str_arg(args, "path").ok_or(DeviceStatus::InvalidParameter)?);
        match self.nodes.get(&path) {
            None => return Err(DeviceStatus::NoFile),
            Some(Node::Dir) if path == "/" || self.nodes.keys().any(|k| parent(k) == path && k != "/") => {
                return Err(DeviceStatus::Denied);
            }
            Some(_) => {}
        }
        self.nodes.remove(&path);
        Ok(json!({}))
    }

    fn rename(&mut self, args: &Value) -> Result<Value, DeviceStatus> {
        let from = normalize(str_arg(args, "from").ok_or(DeviceStatus::InvalidParameter)?);
        let to = normalize(str_arg(args, "to").ok_or(DeviceStatus::InvalidParameter)?);
        if from == "/" || !self.nodes.contains_key(&from) {
            return Err(DeviceStatus::NoFile);
        }
        if self.nodes.contains_key(&to) {
            return Err(DeviceStatus::Exist);
        }
        if !matches!(self.nodes.get(&parent(&to)), Some(Node::Dir)) {
            return Err(DeviceStatus::NoPath);
        }

        let prefix = format!("{from}/");
        let moved: Vec<String> = self
            .nodes
            .keys()
            .filter(|k| **k == from || k.starts_with(&prefix))
            .cloned()
            .collect();
        for key in moved {
            if let Some(node) = self.nodes.remove(&key) {
                let renamed = format!("{to}{}", &key[from.len()..]);
                self.nodes.insert(renamed, node);
            }
        }
        for file in self.open.values_mut() {
            if file.path == from || file.path.starts_with(&prefix) {
                file.path = format!("{to}{}", &file.path[from.len()..]);
            }
        }
        Ok(json!({}))
    }

    fn mkdir(&mut self, args: &Value) -> Result<Value, DeviceStatus> {
        let path = normalize(str_arg(args, "path").ok_or(DeviceStatus::InvalidParameter)?);
        if self.nodes.contains_key(&path) {
            return Err(DeviceStatus::Exist);
        }
        if !matches!(self.nodes.get(&parent(&path)), Some(Node::Dir)) {
            return Err(DeviceStatus::NoPath);
        }
        self.nodes.insert(path, Node::Dir);
        Ok(json!({}))
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn u64_arg(args: &Value, key: &str) -> u64 {
    args.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn parent(path: &str) -> String {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((dir, _)) => dir.to_string(),
    }
}
