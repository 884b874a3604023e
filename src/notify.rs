//! Notifications from the engine to viewers
//!
//! Two delivery paths exist side by side:
//!
//! - A bounded [`Notification`] queue the viewer drains at its own pace,
//!   the same way a UI drains backend messages each frame. When the queue is
//!   full, wake-ups (region, state, preview) are dropped and counted; buffer
//!   and mirror data are never lost. Session lifecycle and error
//!   notifications instead wait in a backlog behind the queue and are
//!   delivered in publish order once the viewer drains.
//! - Region callbacks registered per session, invoked on the engine thread
//!   after the plane is visible in the buffer.

use crate::buffer::WriteOutcome;
use crate::error::ErrorKind;
use crate::session::{SessionId, SessionStatus};
use crate::state::SubscriptionId;
use crate::types::{AcquisitionShape, Coordinate, PropertyValue};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Message sent from the engine to viewers
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A new session began
    SessionStarted {
        session_id: SessionId,
        shape: AcquisitionShape,
    },
    /// A plane was written; the region is readable
    RegionUpdated {
        session_id: SessionId,
        coordinate: Coordinate,
        outcome: WriteOutcome,
    },
    /// A mirrored property changed
    StateChanged {
        name: String,
        value: PropertyValue,
        revision: u64,
    },
    /// A session changed status
    SessionStatusChanged {
        session_id: SessionId,
        status: SessionStatus,
    },
    /// An event was rejected; processing continues
    RecoverableError {
        session_id: Option<SessionId>,
        kind: ErrorKind,
        message: String,
    },
    /// A fatal error ended a session, or prevented one from starting
    SessionFailed {
        session_id: Option<SessionId>,
        kind: ErrorKind,
        message: String,
    },
    /// A finished session was written to `path`
    SessionSaved {
        session_id: SessionId,
        path: PathBuf,
        planes: usize,
    },
    /// A session was dropped from the registry
    SessionReleased(SessionId),
    /// The live preview holds a new image
    PreviewUpdated { width: u32, height: u32 },
    /// Live mode toggled
    LiveModeChanged(bool),
    /// The engine stopped
    Shutdown,
}

impl Notification {
    /// Lifecycle notifications are never dropped on a full queue
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Notification::SessionStarted { .. }
                | Notification::SessionStatusChanged { .. }
                | Notification::SessionFailed { .. }
                | Notification::SessionSaved { .. }
                | Notification::SessionReleased(_)
                | Notification::Shutdown
        )
    }

    /// Whether a full queue may drop this notification
    fn is_droppable(&self) -> bool {
        !self.is_lifecycle() && !matches!(self, Notification::RecoverableError { .. })
    }
}

/// Callback invoked with the coordinate of each updated region
pub type RegionCallback = Arc<dyn Fn(&Coordinate) + Send + Sync>;

#[derive(Default)]
struct RegionSubscribers {
    next_id: u64,
    by_session: HashMap<SessionId, Vec<(SubscriptionId, RegionCallback)>>,
}

/// Engine-side fan-out for notifications and region callbacks
pub struct Notifier {
    tx: Sender<Notification>,
    /// Undroppable notifications waiting for queue space, oldest first
    backlog: Mutex<VecDeque<Notification>>,
    /// Recoverable errors held in the backlog at most
    backlog_errors: usize,
    regions: Mutex<RegionSubscribers>,
    dropped: AtomicU64,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("queued", &self.tx.len())
            .field("backlog", &self.backlog_len())
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl Notifier {
    /// Create a notifier and the receiver viewers drain
    pub fn new(capacity: usize) -> (Self, Receiver<Notification>) {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        let notifier = Self {
            tx,
            backlog: Mutex::new(VecDeque::new()),
            backlog_errors: capacity,
            regions: Mutex::new(RegionSubscribers::default()),
            dropped: AtomicU64::new(0),
        };
        (notifier, rx)
    }

    /// Queue a notification without blocking
    ///
    /// While the backlog is non-empty nothing overtakes it: droppable
    /// notifications are dropped and the rest join the backlog.
    pub fn publish(&self, notification: Notification) {
        let mut backlog = self.backlog.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.flush(&mut backlog) {
            return;
        }

        let notification = if backlog.is_empty() {
            match self.tx.try_send(notification) {
                Ok(()) => return,
                // Every viewer bridge was dropped; nobody is listening
                Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(n)) => n,
            }
        } else {
            notification
        };

        let errors = backlog
            .iter()
            .filter(|n| matches!(n, Notification::RecoverableError { .. }))
            .count();
        let keep = notification.is_lifecycle()
            || (!notification.is_droppable() && errors < self.backlog_errors);
        if keep {
            tracing::debug!("Notification queue full, holding {:?}", notification);
            backlog.push_back(notification);
        } else {
            self.count_drop(&notification);
        }
    }

    /// Move backlog entries into the queue while it has room.
    /// Returns `false` if every receiver is gone.
    fn flush(&self, backlog: &mut VecDeque<Notification>) -> bool {
        while let Some(front) = backlog.pop_front() {
            match self.tx.try_send(front) {
                Ok(()) => {}
                Err(TrySendError::Full(n)) => {
                    backlog.push_front(n);
                    break;
                }
                Err(TrySendError::Disconnected(_)) => {
                    backlog.clear();
                    return false;
                }
            }
        }
        true
    }

    fn count_drop(&self, notification: &Notification) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if dropped.is_power_of_two() {
            tracing::warn!(
                "Notification queue full, {} dropped so far (latest: {:?})",
                dropped,
                notification
            );
        }
    }

    /// Oldest backlog entry; viewers read it once the queue is empty
    pub(crate) fn take_backlog(&self) -> Option<Notification> {
        self.backlog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Notifications waiting behind a full queue
    pub fn backlog_len(&self) -> usize {
        self.backlog.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Notifications dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn subscribe_region<F>(&self, session_id: SessionId, callback: F) -> SubscriptionId
    where
        F: Fn(&Coordinate) + Send + Sync + 'static,
    {
        let mut subs = self.regions.lock().unwrap_or_else(PoisonError::into_inner);
        subs.next_id += 1;
        let id = SubscriptionId(subs.next_id);
        subs.by_session
            .entry(session_id)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe_region(&self, id: SubscriptionId) -> bool {
        let mut subs = self.regions.lock().unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;
        for callbacks in subs.by_session.values_mut() {
            let before = callbacks.len();
            callbacks.retain(|(sub, _)| *sub != id);
            removed |= callbacks.len() != before;
        }
        subs.by_session.retain(|_, callbacks| !callbacks.is_empty());
        removed
    }

    /// Drop all region callbacks for a session
    pub fn forget_session(&self, session_id: SessionId) {
        self.regions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_session
            .remove(&session_id);
    }

    /// Run region callbacks for `session_id` outside the subscriber lock
    pub fn region_updated(&self, session_id: SessionId, coordinate: &Coordinate) {
        let callbacks: Vec<RegionCallback> = {
            let subs = self.regions.lock().unwrap_or_else(PoisonError::into_inner);
            match subs.by_session.get(&session_id) {
                Some(callbacks) => callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
                None => return,
            }
        };
        for callback in callbacks {
            callback(coordinate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_full_queue_drops_and_counts() {
        let (notifier, rx) = Notifier::new(2);
        for _ in 0..5 {
            notifier.publish(Notification::LiveModeChanged(true));
        }
        assert_eq!(rx.len(), 2);
        assert_eq!(notifier.dropped(), 3);
    }

    #[test]
    fn test_lifecycle_notifications_survive_full_queue() {
        let (notifier, rx) = Notifier::new(2);
        notifier.publish(Notification::LiveModeChanged(true));
        notifier.publish(Notification::LiveModeChanged(false));
        notifier.publish(Notification::SessionFailed {
            session_id: Some(SessionId(1)),
            kind: ErrorKind::HardwareReportedError,
            message: "camera timeout".to_string(),
        });
        // Droppable notifications never overtake the backlog
        notifier.publish(Notification::LiveModeChanged(true));
        notifier.publish(Notification::SessionReleased(SessionId(1)));

        assert_eq!(notifier.dropped(), 1);
        assert_eq!(notifier.backlog_len(), 2);

        assert_eq!(rx.try_recv().unwrap(), Notification::LiveModeChanged(true));
        notifier.publish(Notification::LiveModeChanged(false));
        // The freed slot went to the backlog head
        assert_eq!(notifier.backlog_len(), 1);
        assert_eq!(notifier.dropped(), 2);

        let rest: Vec<Notification> = rx.try_iter().collect();
        assert!(matches!(rest[1], Notification::SessionFailed { .. }));
        assert_eq!(
            notifier.take_backlog(),
            Some(Notification::SessionReleased(SessionId(1)))
        );
    }

    #[test]
    fn test_recoverable_errors_in_backlog_are_bounded() {
        let (notifier, _rx) = Notifier::new(1);
        notifier.publish(Notification::Shutdown);
        for _ in 0..5 {
            notifier.publish(Notification::RecoverableError {
                session_id: None,
                kind: ErrorKind::UnexpectedEvent,
                message: "late frame".to_string(),
            });
        }
        assert_eq!(notifier.backlog_len(), 1);
        assert_eq!(notifier.dropped(), 4);
    }

    #[test]
    fn test_region_callbacks_per_session() {
        let (notifier, _rx) = Notifier::new(4);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let id = notifier.subscribe_region(SessionId(1), move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        let coord = Coordinate::new().with("t", 0);
        notifier.region_updated(SessionId(1), &coord);
        notifier.region_updated(SessionId(2), &coord);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(notifier.unsubscribe_region(id));
        notifier.region_updated(SessionId(1), &coord);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_can_subscribe_reentrantly() {
        let (notifier, _rx) = Notifier::new(4);
        let notifier = Arc::new(notifier);
        let n = Arc::clone(&notifier);
        notifier.subscribe_region(SessionId(1), move |_| {
            n.subscribe_region(SessionId(2), |_| {});
        });
        notifier.region_updated(SessionId(1), &Coordinate::new());
    }
}
