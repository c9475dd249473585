//! A session and its lifecycle.
//!
//! # State Transitions
//! ```text
//! Open ──idle──▶ Draining ──grace delay elapsed──▶ Closed
//!   ▲               │
//!   └────reused─────┘
//! ```
//!
//! A session is idle once it has neither an event stream nor an exchange in
//! progress. It is reused when a stream attaches, an exchange begins, or the
//! registry hands it out again. Every `Open ⇄ Draining` flip bumps an epoch;
//! a deferred removal only proceeds if the epoch it captured is still current.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use serde_json::Value;

use crate::error::BridgeError;
use crate::session::endpoint::ServerEndpoint;
use crate::session::transport::SessionTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Draining,
    Closed,
}

#[derive(Debug)]
struct Lifecycle {
    state: SessionState,
    epoch: u64,
    exchanges: usize,
}

impl Lifecycle {
    fn reopen(&mut self) -> bool {
        if self.state != SessionState::Draining {
            return false;
        }
        self.state = SessionState::Open;
        self.epoch += 1;
        true
    }

    fn drain(&mut self) -> Option<u64> {
        if self.state != SessionState::Open || self.exchanges > 0 {
            return None;
        }
        self.state = SessionState::Draining;
        self.epoch += 1;
        Some(self.epoch)
    }
}

pub struct Session {
    id: String,
    endpoint: ServerEndpoint,
    transport: SessionTransport,
    created_at: Instant,
    lifecycle: Mutex<Lifecycle>,
}

impl Session {
    pub fn new(id: impl Into<String>, endpoint: ServerEndpoint) -> Self {
        Self {
            id: id.into(),
            endpoint,
            transport: SessionTransport::new(),
            created_at: Instant::now(),
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Open,
                epoch: 0,
                exchanges: 0,
            }),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    pub fn transport(&self) -> &SessionTransport {
        &self.transport
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle().state
    }

    /// Attach a new event stream, cancelling any pending drain.
    pub fn open_stream(&self) -> Result<(u64, mpsc::Receiver<Value>), BridgeError> {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state == SessionState::Closed {
            return Err(BridgeError::ShutdownInProgress);
        }
        let stream = self.transport.attach()?;
        if lifecycle.reopen() {
            tracing::debug!(session_id = %self.id, "Stream re-attached, drain cancelled");
        }
        Ok(stream)
    }

    /// Record that stream `generation` ended. Returns the drain epoch when
    /// this moved the session to `Draining`.
    pub fn stream_ended(&self, generation: u64) -> Option<u64> {
        let mut lifecycle = self.lifecycle();
        if !self.transport.detach(generation) {
            return None;
        }
        lifecycle.drain()
    }

    /// Cancel a pending drain without attaching anything.
    pub fn touch(&self) {
        self.lifecycle().reopen();
    }

    /// Mark a request/response exchange as in progress.
    pub fn begin_exchange(&self) -> Result<(), BridgeError> {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state == SessionState::Closed {
            return Err(BridgeError::ShutdownInProgress);
        }
        lifecycle.exchanges += 1;
        lifecycle.reopen();
        Ok(())
    }

    /// Record that an exchange finished. Returns the drain epoch when this
    /// left the session idle.
    pub fn end_exchange(&self) -> Option<u64> {
        let mut lifecycle = self.lifecycle();
        lifecycle.exchanges = lifecycle.exchanges.saturating_sub(1);
        if self.transport.has_stream() {
            return None;
        }
        lifecycle.drain()
    }

    /// True if the session is still draining from the given epoch.
    pub fn draining_since(&self, epoch: u64) -> bool {
        let lifecycle = self.lifecycle();
        lifecycle.state == SessionState::Draining && lifecycle.epoch == epoch
    }

    /// Close the transport, then the server endpoint.
    pub fn close(&self) {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state == SessionState::Closed {
            return;
        }
        self.transport.close();
        self.endpoint.close();
        lifecycle.state = SessionState::Closed;
        tracing::info!(
            session_id = %self.id,
            age_ms = self.age().as_millis() as u64,
            "Session closed"
        );
    }
}
