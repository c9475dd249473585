//! The transport-facing half of a session: at most one open
//! server-to-client event stream.
//!
//! Each attached stream gets a generation number. Replacing a stream or
//! closing the transport drops its sender, which ends the stream; only the
//! stream holding the current generation may report itself as detached.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

use crate::error::BridgeError;

/// Events buffered per stream before new ones are dropped.
const STREAM_BUFFER: usize = 64;

struct StreamSlot {
    generation: u64,
    tx: mpsc::Sender<Value>,
}

pub struct SessionTransport {
    stream: Mutex<Option<StreamSlot>>,
    generation: AtomicU64,
    closed: AtomicBool,
}

impl SessionTransport {
    pub fn new() -> Self {
        Self {
            stream: Mutex::new(None),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<StreamSlot>> {
        self.stream.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a stream, replacing (and thereby ending) any existing one.
    pub fn attach(&self) -> Result<(u64, mpsc::Receiver<Value>), BridgeError> {
        let mut slot = self.slot();
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::ShutdownInProgress);
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        if slot.replace(StreamSlot { generation, tx }).is_some() {
            tracing::debug!(generation, "Replacing existing event stream");
        }
        Ok((generation, rx))
    }

    /// Forget the stream if `generation` is still current.
    ///
    /// Returns `false` when the stream was already replaced or closed.
    pub fn detach(&self, generation: u64) -> bool {
        let mut slot = self.slot();
        match slot.as_ref() {
            Some(current) if current.generation == generation => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub fn has_stream(&self) -> bool {
        self.slot().as_ref().is_some_and(|s| !s.tx.is_closed())
    }

    /// Queue an event on the open stream. Returns `false` if there is no
    /// stream or its buffer is full.
    pub fn send(&self, event: Value) -> bool {
        let slot = self.slot();
        let Some(stream) = slot.as_ref() else {
            return false;
        };
        match stream.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(generation = stream.generation, "Event stream full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// End the stream and refuse new ones.
    pub fn close(&self) {
        let mut slot = self.slot();
        self.closed.store(true, Ordering::SeqCst);
        slot.take();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for SessionTransport {
    fn default() -> Self {
        Self::new()
    }
}
