//! Session registry.
//!
//! Owns every [`Session`]. All sessions share one [`BackendConnection`];
//! creating a session never starts a child. Sessions left idle (no stream,
//! no exchange) are removed after the grace delay.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use crate::backend::BackendConnection;
use crate::error::BridgeError;
use crate::observability::metrics;
use crate::session::endpoint::ServerEndpoint;
use crate::session::state::Session;

pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    backend: Arc<BackendConnection>,
    grace_delay: Duration,
    closing: AtomicBool,
}

impl SessionRegistry {
    pub fn new(backend: Arc<BackendConnection>, grace_delay: Duration) -> Arc<Self> {
        let registry = Arc::new(Self {
            sessions: DashMap::new(),
            backend,
            grace_delay,
            closing: AtomicBool::new(false),
        });
        registry.spawn_notification_relay();
        registry
    }

    pub fn backend(&self) -> &Arc<BackendConnection> {
        &self.backend
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    /// Return the open session for `id`, creating it if needed.
    pub fn get_or_create(&self, id: &str) -> Result<Arc<Session>, BridgeError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(BridgeError::ShutdownInProgress);
        }

        let session = match self.sessions.entry(id.to_string()) {
            Entry::Occupied(entry) => {
                let session = entry.get();
                session.touch();
                return Ok(session.clone());
            }
            Entry::Vacant(entry) => {
                let session = Arc::new(Session::new(
                    id,
                    ServerEndpoint::new(self.backend.clone()),
                ));
                entry.insert(session.clone());
                session
            }
        };

        tracing::info!(session_id = %id, "Session created");
        metrics::set_active_sessions(self.sessions.len());
        Ok(session)
    }

    /// Close and remove the session. Removing an absent id is a no-op.
    pub fn remove(&self, id: &str) -> bool {
        let removed = match self.sessions.entry(id.to_string()) {
            Entry::Occupied(entry) => {
                entry.get().close();
                entry.remove();
                true
            }
            Entry::Vacant(_) => false,
        };
        if removed {
            metrics::set_active_sessions(self.sessions.len());
        }
        removed
    }

    /// Remove `session` only if it is still the one registered under its id
    /// and is still draining from `epoch`.
    fn remove_drained(&self, session: &Arc<Session>, epoch: u64) -> bool {
        match self.sessions.entry(session.id().to_string()) {
            Entry::Occupied(entry)
                if Arc::ptr_eq(entry.get(), session) && session.draining_since(epoch) =>
            {
                entry.get().close();
                entry.remove();
                metrics::set_active_sessions(self.sessions.len());
                true
            }
            _ => false,
        }
    }

    /// Called when one of `session`'s event streams ends. If that moves the
    /// session to `Draining`, removal is scheduled after the grace delay.
    pub fn stream_ended(self: &Arc<Self>, session: &Arc<Session>, generation: u64) {
        if let Some(epoch) = session.stream_ended(generation) {
            tracing::debug!(session_id = %session.id(), "Stream closed, session draining");
            self.schedule_removal(session, epoch);
        }
    }

    /// Called when a request/response exchange on `session` finishes. A
    /// session left with no stream and no exchange is drained like one whose
    /// stream closed.
    pub fn exchange_ended(self: &Arc<Self>, session: &Arc<Session>) {
        if let Some(epoch) = session.end_exchange() {
            tracing::debug!(session_id = %session.id(), "Session idle, draining");
            self.schedule_removal(session, epoch);
        }
    }

    fn schedule_removal(self: &Arc<Self>, session: &Arc<Session>, epoch: u64) {
        if tokio::runtime::Handle::try_current().is_err() {
            self.remove_drained(session, epoch);
            return;
        }

        let registry: Weak<Self> = Arc::downgrade(self);
        let session = session.clone();
        let delay = self.grace_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(registry) = registry.upgrade() else {
                return;
            };
            if registry.remove_drained(&session, epoch) {
                tracing::info!(
                    session_id = %session.id(),
                    grace_ms = delay.as_millis() as u64,
                    "Drained session removed"
                );
            }
        });
    }

    /// Close every session and refuse new ones. Individual failures cannot
    /// stop the sweep.
    pub fn close_all(&self) {
        self.closing.store(true, Ordering::SeqCst);
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        tracing::info!(sessions = ids.len(), "Closing all sessions");
        for id in ids {
            self.remove(&id);
        }
    }

    /// Push a server-initiated message to every open stream.
    pub fn broadcast(&self, message: &Value) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().transport().send(message.clone()))
            .count()
    }

    fn spawn_notification_relay(self: &Arc<Self>) {
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        let mut rx = self.backend.subscribe();
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let message = match rx.recv().await {
                    Ok(message) => message,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Notification relay lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let delivered = registry.broadcast(&message);
                tracing::debug!(delivered, "Relayed backend notification");
            }
        });
    }
}
