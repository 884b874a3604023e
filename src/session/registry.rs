//! Registry of live and retained sessions

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::buffer::FrameBuffer;
use crate::config::BufferSettings;
use crate::error::Result;
use crate::types::AcquisitionShape;

use super::sequence::SequenceSession;
use super::types::{SessionId, SessionMetadata, SessionSummary};

/// Sessions visible to viewers, keyed by id
///
/// Releasing a session only drops the registry's reference; a viewer that
/// still holds the `Arc` keeps the buffer alive.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<BTreeMap<SessionId, Arc<SequenceSession>>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a buffer and register a new running session
    pub(crate) fn create(
        &self,
        shape: AcquisitionShape,
        metadata: SessionMetadata,
        settings: BufferSettings,
    ) -> Result<Arc<SequenceSession>> {
        let buffer = FrameBuffer::new(shape, settings)?;
        let id = SessionId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let session = Arc::new(SequenceSession::new(id, buffer, metadata));

        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&session));
        Ok(session)
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<SequenceSession>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Summaries of all registered sessions, oldest first
    pub fn list(&self) -> Vec<SessionSummary> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|s| s.summary())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark a session to survive the next sequence start
    pub fn retain(&self, id: SessionId) -> bool {
        match self.get(id) {
            Some(session) => {
                session.set_retained(true);
                true
            }
            None => false,
        }
    }

    /// Remove a finished session. Running sessions cannot be discarded.
    pub fn discard(&self, id: SessionId) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        match sessions.get(&id) {
            Some(session) if session.is_running() => false,
            Some(_) => sessions.remove(&id).is_some(),
            None => false,
        }
    }

    /// Drop every finished session that was not retained. Returns the released ids.
    pub(crate) fn release_unretained(&self) -> Vec<SessionId> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let released: Vec<SessionId> = sessions
            .values()
            .filter(|s| !s.is_running() && !s.is_retained())
            .map(|s| s.id())
            .collect();
        for id in &released {
            sessions.remove(id);
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;

    fn shape() -> AcquisitionShape {
        AcquisitionShape::from_pairs([("t", Some(2))]).unwrap()
    }

    fn create(registry: &SessionRegistry, name: &str) -> Arc<SequenceSession> {
        registry
            .create(shape(), SessionMetadata::new(name), BufferSettings::default())
            .unwrap()
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = SessionRegistry::new();
        let a = create(&registry, "a");
        let b = create(&registry, "b");
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn test_release_keeps_running_and_retained() {
        let registry = SessionRegistry::new();
        let done = create(&registry, "done");
        let kept = create(&registry, "kept");
        let live = create(&registry, "live");
        done.finish(SessionStatus::Completed);
        kept.finish(SessionStatus::Errored);
        assert!(registry.retain(kept.id()));

        let released = registry.release_unretained();
        assert_eq!(released, vec![done.id()]);
        assert!(registry.get(kept.id()).is_some());
        assert!(registry.get(live.id()).is_some());

        // The released session stays readable through an outstanding handle
        assert_eq!(done.status(), SessionStatus::Completed);
    }

    #[test]
    fn test_discard_refuses_running() {
        let registry = SessionRegistry::new();
        let s = create(&registry, "s");
        assert!(!registry.discard(s.id()));
        s.finish(SessionStatus::Completed);
        assert!(registry.discard(s.id()));
        assert!(registry.is_empty());
    }
}
