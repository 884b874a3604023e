//! Viewer-side handle to the synchronization engine
//!
//! Everything here is read-only with respect to acquisition data: the
//! viewer reads planes, mirrored properties and session summaries, and
//! registers callbacks. Callbacks run on the engine thread and must return
//! quickly; heavy work belongs on the viewer side after [`ViewerBridge::drain`].

use super::preview::preview_interval;
use super::{EngineShared, EngineStats, EngineStatus};
use crate::buffer;
use crate::error::{BridgeError, Result};
use crate::notify::Notification;
use crate::session::{SequenceSession, SessionId, SessionSummary};
use crate::state::{StateMirror, StateSnapshot, SubscriptionId};
use crate::types::{Coordinate, FramePlane, PropertyValue, StagePosition};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Viewer handle for reads, subscriptions and notifications
///
/// Clones share the same notification queue, so each notification is
/// delivered to exactly one clone.
#[derive(Debug, Clone)]
pub struct ViewerBridge {
    shared: Arc<EngineShared>,
    notifications: Receiver<Notification>,
}

impl ViewerBridge {
    pub(crate) fn new(shared: Arc<EngineShared>, notifications: Receiver<Notification>) -> Self {
        Self {
            shared,
            notifications,
        }
    }

    // ==================== Notifications ====================

    /// Try to receive a notification without blocking
    ///
    /// Notifications held back by a full queue follow the queued ones.
    pub fn try_recv(&self) -> Option<Notification> {
        self.notifications
            .try_recv()
            .ok()
            .or_else(|| self.shared.notifier.take_backlog())
    }

    /// Wait up to `timeout` for the next notification
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Notification> {
        if let Some(n) = self.try_recv() {
            return Some(n);
        }
        match self.notifications.recv_timeout(timeout) {
            Ok(n) => Some(n),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                self.shared.notifier.take_backlog()
            }
        }
    }

    /// Receive all pending notifications
    pub fn drain(&self) -> Vec<Notification> {
        let mut notifications = Vec::new();
        while let Some(n) = self.try_recv() {
            notifications.push(n);
        }
        notifications
    }

    // ==================== Subscriptions ====================

    /// Call `callback` with each coordinate written into `session_id`
    ///
    /// The plane is readable by the time the callback runs.
    pub fn subscribe_region_updates<F>(&self, session_id: SessionId, callback: F) -> SubscriptionId
    where
        F: Fn(&Coordinate) + Send + Sync + 'static,
    {
        self.shared.notifier.subscribe_region(session_id, callback)
    }

    pub fn unsubscribe_region_updates(&self, id: SubscriptionId) -> bool {
        self.shared.notifier.unsubscribe_region(id)
    }

    /// Call `callback` with `(name, value, revision)` for every property change
    pub fn subscribe_state_changes<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&str, &PropertyValue, u64) + Send + Sync + 'static,
    {
        self.shared.mirror.subscribe_all(callback)
    }

    pub fn unsubscribe_state_changes(&self, id: SubscriptionId) -> bool {
        self.shared.mirror.unsubscribe(id)
    }

    // ==================== Reads ====================

    /// Plane at `coord` in `session_id`, or `None` if absent or not yet acquired
    pub fn get_frame(&self, session_id: SessionId, coord: &Coordinate) -> Option<Arc<FramePlane>> {
        self.shared.registry.get(session_id)?.read(coord)
    }

    /// Current value of a mirrored property
    pub fn get_state(&self, name: &str) -> Option<PropertyValue> {
        self.shared.mirror.get_value(name)
    }

    /// Current value of a mirrored property and the revision that set it
    ///
    /// A viewer holding an older revision for `name` has missed an update.
    pub fn get_state_with_revision(&self, name: &str) -> Option<(PropertyValue, u64)> {
        self.shared.mirror.get(name)
    }

    pub fn state_revision(&self) -> u64 {
        self.shared.mirror.revision()
    }

    pub fn state_snapshot(&self) -> StateSnapshot {
        self.shared.mirror.snapshot()
    }

    pub fn state_mirror(&self) -> &StateMirror {
        &self.shared.mirror
    }

    pub fn stage_position_at(&self, session_id: SessionId, coord: &Coordinate) -> Option<StagePosition> {
        self.shared.registry.get(session_id)?.stage_position_at(coord)
    }

    // ==================== Sessions ====================

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        self.shared.registry.list()
    }

    /// Shared handle to a session; keeps its buffer alive after release
    pub fn session(&self, session_id: SessionId) -> Option<Arc<SequenceSession>> {
        self.shared.registry.get(session_id)
    }

    /// Session of the most recent sequence start, if still registered
    pub fn active_session(&self) -> Option<Arc<SequenceSession>> {
        self.status()
            .active_session
            .and_then(|id| self.shared.registry.get(id))
    }

    /// Every layer of the most recent sequence start, in partition order
    pub fn active_sessions(&self) -> Vec<Arc<SequenceSession>> {
        self.status()
            .sessions
            .into_iter()
            .filter_map(|id| self.shared.registry.get(id))
            .collect()
    }

    /// Keep a session when the next sequence starts
    pub fn retain_session(&self, session_id: SessionId) -> bool {
        self.shared.registry.retain(session_id)
    }

    /// Drop a finished session from the registry
    pub fn discard_session(&self, session_id: SessionId) -> bool {
        let removed = self.shared.registry.discard(session_id);
        if removed {
            self.shared.notifier.forget_session(session_id);
        }
        removed
    }

    /// Write a session's planes to a file; see [`buffer::persist`]
    pub fn save_session(&self, session_id: SessionId, path: impl AsRef<Path>) -> Result<usize> {
        let session = self
            .shared
            .registry
            .get(session_id)
            .ok_or(BridgeError::UnknownSession(session_id))?;
        buffer::save_to_file(path, session.buffer(), &session.metadata())
    }

    // ==================== Live preview ====================

    /// Most recent snapped image
    pub fn preview(&self) -> Option<Arc<FramePlane>> {
        self.shared.preview.latest()
    }

    pub fn is_live(&self) -> bool {
        self.shared.preview.is_live()
    }

    /// How often to poll [`preview`](Self::preview) while live
    pub fn preview_interval(&self) -> Duration {
        preview_interval(&self.shared.mirror)
    }

    // ==================== Engine ====================

    pub fn status(&self) -> EngineStatus {
        self.shared.status()
    }

    pub fn stats(&self) -> EngineStats {
        self.shared.stats()
    }
}
