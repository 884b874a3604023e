//! Revisioned mirror of hardware properties
//!
//! The engine is the only writer. Every applied change bumps a global
//! revision counter and records that revision on the changed entry, so a
//! viewer can compare revisions to detect stale reads:
//!
//! ```ignore
//! let before = mirror.revision();
//! let exposure = mirror.get_value("exposure");
//! if mirror.revision() != before {
//!     // something changed while reading; read again
//! }
//! ```
//!
//! Updates carry the send stamp of the event that produced them. An update
//! whose stamp is older than the one last applied to that property is
//! discarded, which keeps coalesced side-band values from replacing newer
//! queued ones.

use crate::types::PropertyValue;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Handle returned by a subscription, used to unsubscribe
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

/// Persistent callback: `(name, value, revision)`
pub type StateCallback = Arc<dyn Fn(&str, &PropertyValue, u64) + Send + Sync>;

/// One-shot callback: `(value, revision)`
pub type OnceCallback = Box<dyn FnOnce(&PropertyValue, u64) + Send>;

/// A mirrored property
#[derive(Debug, Clone, PartialEq)]
pub struct StateEntry {
    pub value: PropertyValue,
    /// Revision at which this property last changed
    pub revision: u64,
    stamp: u64,
}

/// Consistent copy of the whole mirror
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSnapshot {
    pub revision: u64,
    pub entries: BTreeMap<String, (PropertyValue, u64)>,
}

impl StateSnapshot {
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.entries.get(name).map(|(value, _)| value)
    }
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    persistent: Vec<(SubscriptionId, StateCallback)>,
    once: HashMap<String, Vec<OnceCallback>>,
}

/// Revisioned key/value mirror of hardware state
pub struct StateMirror {
    entries: RwLock<HashMap<String, StateEntry>>,
    revision: AtomicU64,
    subscribers: Mutex<Subscribers>,
}

impl Default for StateMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateMirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMirror")
            .field("revision", &self.revision())
            .field("len", &self.len())
            .finish()
    }
}

impl StateMirror {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            revision: AtomicU64::new(0),
            subscribers: Mutex::new(Subscribers::default()),
        }
    }

    /// Current global revision
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Value and last-change revision of a property
    pub fn get(&self, name: &str) -> Option<(PropertyValue, u64)> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|e| (e.value.clone(), e.revision))
    }

    pub fn get_value(&self, name: &str) -> Option<PropertyValue> {
        self.get(name).map(|(value, _)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        StateSnapshot {
            revision: self.revision(),
            entries: entries
                .iter()
                .map(|(name, e)| (name.clone(), (e.value.clone(), e.revision)))
                .collect(),
        }
    }

    /// Call `callback` once, on the next change to `name`
    pub fn subscribe<F>(&self, name: impl Into<String>, callback: F)
    where
        F: FnOnce(&PropertyValue, u64) + Send + 'static,
    {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .once
            .entry(name.into())
            .or_default()
            .push(Box::new(callback));
    }

    /// Call `callback` on every change until unsubscribed
    pub fn subscribe_all<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&str, &PropertyValue, u64) + Send + Sync + 'static,
    {
        let mut subs = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subs.next_id += 1;
        let id = SubscriptionId(subs.next_id);
        subs.persistent.push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = subs.persistent.len();
        subs.persistent.retain(|(sub, _)| *sub != id);
        subs.persistent.len() != before
    }

    /// Apply a change stamped with its send order.
    ///
    /// Returns the new revision, or `None` if a newer update to the same
    /// property was already applied. Subscribers run after the entry is
    /// visible, outside all locks.
    pub(crate) fn apply(&self, name: &str, value: PropertyValue, stamp: u64) -> Option<u64> {
        let revision = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            if entries.get(name).is_some_and(|e| e.stamp > stamp) {
                tracing::debug!("Discarding stale update to '{}' (stamp {})", name, stamp);
                return None;
            }
            let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
            entries.insert(
                name.to_string(),
                StateEntry {
                    value: value.clone(),
                    revision,
                    stamp,
                },
            );
            revision
        };

        let (once, persistent) = {
            let mut subs = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
            let once = subs.once.remove(name).unwrap_or_default();
            let persistent: Vec<StateCallback> =
                subs.persistent.iter().map(|(_, cb)| Arc::clone(cb)).collect();
            (once, persistent)
        };

        for callback in once {
            callback(&value, revision);
        }
        for callback in persistent {
            callback(name, &value, revision);
        }

        Some(revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_revision_tracks_changes() {
        let mirror = StateMirror::new();
        assert_eq!(mirror.apply("exposure", 50.0.into(), 1), Some(1));
        assert_eq!(mirror.apply("exposure", 75.0.into(), 2), Some(2));

        assert_eq!(mirror.get("exposure"), Some((PropertyValue::Float(75.0), 2)));
        assert_eq!(mirror.revision(), 2);
    }

    #[test]
    fn test_stale_update_discarded() {
        let mirror = StateMirror::new();
        mirror.apply("exposure", 75.0.into(), 9);
        assert_eq!(mirror.apply("exposure", 50.0.into(), 3), None);
        assert_eq!(mirror.get_value("exposure"), Some(PropertyValue::Float(75.0)));
        assert_eq!(mirror.revision(), 1);
    }

    #[test]
    fn test_entry_revision_is_last_change() {
        let mirror = StateMirror::new();
        mirror.apply("exposure", 10.0.into(), 1);
        mirror.apply("binning", 2i64.into(), 2);
        mirror.apply("gain", 1i64.into(), 3);

        let snapshot = mirror.snapshot();
        assert_eq!(snapshot.revision, 3);
        assert_eq!(snapshot.entries["exposure"].1, 1);
        assert_eq!(snapshot.entries["gain"].1, 3);
        assert_eq!(snapshot.get("binning"), Some(&PropertyValue::Int(2)));
    }

    #[test]
    fn test_one_shot_subscription() {
        let mirror = StateMirror::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        mirror.subscribe("exposure", move |value, revision| {
            assert_eq!(value, &PropertyValue::Float(50.0));
            assert_eq!(revision, 1);
            c.fetch_add(1, Ordering::SeqCst);
        });

        mirror.apply("binning", 1i64.into(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        mirror.apply("exposure", 50.0.into(), 2);
        mirror.apply("exposure", 60.0.into(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_persistent_subscription_and_unsubscribe() {
        let mirror = StateMirror::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let id = mirror.subscribe_all(move |name, _, revision| {
            s.lock().unwrap().push((name.to_string(), revision));
        });

        mirror.apply("exposure", 50.0.into(), 1);
        mirror.apply("exposure", 75.0.into(), 2);
        assert!(mirror.unsubscribe(id));
        mirror.apply("exposure", 90.0.into(), 3);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("exposure".to_string(), 1), ("exposure".to_string(), 2)]
        );
        assert!(!mirror.unsubscribe(id));
    }

    #[test]
    fn test_callback_may_read_mirror() {
        let mirror = Arc::new(StateMirror::new());
        let m = Arc::clone(&mirror);
        let observed = Arc::new(Mutex::new(None));
        let o = Arc::clone(&observed);
        mirror.subscribe_all(move |name, _, _| {
            *o.lock().unwrap() = m.get_value(name);
        });
        mirror.apply("exposure", 20.0.into(), 1);
        assert_eq!(*observed.lock().unwrap(), Some(PropertyValue::Float(20.0)));
    }
}
