//! Debug console text from the device

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Lines buffered per subscriber before slow subscribers start missing lines.
const BROADCAST_CAPACITY: usize = 256;

/// One completed line of debug output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugLine {
    /// Time since the connection opened.
    pub elapsed: Duration,
    pub text: String,
}

#[derive(Default)]
struct ConsoleState {
    partial: String,
    history: VecDeque<DebugLine>,
}

/// Splits debug text chunks into timestamped lines.
///
/// Text after the last newline of a chunk is held until a later chunk completes it.
pub struct DebugConsole {
    started: Instant,
    capacity: usize,
    state: Mutex<ConsoleState>,
    tx: broadcast::Sender<DebugLine>,
}

impl DebugConsole {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { started: Instant::now(), capacity, state: Mutex::new(ConsoleState::default()), tx }
    }

    /// Append a chunk of device text; returns the lines it completed.
    pub fn push(&self, text: &str) -> Vec<DebugLine> {
        let elapsed = self.started.elapsed();
        let mut completed = Vec::new();
        {
            let mut state = self.state();
            state.partial.push_str(text);
            while let Some(pos) = state.partial.find('\n') {
                let line: String = state.partial.drain(..=pos).collect();
                let text = line.trim_end_matches(['\n', '\r']).to_string();
                completed.push(DebugLine { elapsed, text });
            }
            for line in &completed {
                if state.history.len() == self.capacity {
                    state.history.pop_front();
                }
                state.history.push_back(line.clone());
            }
        }

        for line in &completed {
            // No subscribers is fine
            let _ = self.tx.send(line.clone());
        }
        completed
    }

    /// The retained lines, oldest first.
    pub fn history(&self) -> Vec<DebugLine> {
        self.state().history.iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DebugLine> {
        self.tx.subscribe()
    }

    /// Drop history and any incomplete line.
    pub fn clear(&self) {
        *self.state() = ConsoleState::default();
    }

    fn state(&self) -> MutexGuard<'_, ConsoleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
