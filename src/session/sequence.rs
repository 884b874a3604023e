//! A single acquisition sequence and its frame buffer

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::buffer::FrameBuffer;
use crate::types::{AcquisitionShape, Coordinate, FramePlane, StagePosition};

use super::types::{SessionId, SessionMetadata, SessionStatus, SessionSummary};

/// Binds one shape, one buffer and a status flag for the lifetime of a sequence
///
/// Viewers hold `Arc<SequenceSession>` read-only; only the engine changes
/// status or writes into the buffer.
#[derive(Debug)]
pub struct SequenceSession {
    id: SessionId,
    buffer: FrameBuffer,
    metadata: RwLock<SessionMetadata>,
    status: RwLock<SessionStatus>,
    failure: RwLock<Option<String>>,
    retained: AtomicBool,
    /// Stage position reported with each frame, keyed by coordinate
    positions: RwLock<HashMap<Coordinate, StagePosition>>,
}

impl SequenceSession {
    pub(crate) fn new(id: SessionId, buffer: FrameBuffer, metadata: SessionMetadata) -> Self {
        Self {
            id,
            buffer,
            metadata: RwLock::new(metadata),
            status: RwLock::new(SessionStatus::Running),
            failure: RwLock::new(None),
            retained: AtomicBool::new(false),
            positions: RwLock::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn shape(&self) -> &AcquisitionShape {
        self.buffer.shape()
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    pub fn metadata(&self) -> SessionMetadata {
        self.metadata
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    /// Cause of the fatal error that ended this session, if any
    pub fn failure(&self) -> Option<String> {
        self.failure
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_retained(&self) -> bool {
        self.retained.load(Ordering::SeqCst)
    }

    /// Keep this session in the registry when the next sequence starts
    pub fn set_retained(&self, retained: bool) {
        self.retained.store(retained, Ordering::SeqCst);
    }

    /// Plane at `coord`, or `None` if not yet acquired
    pub fn read(&self, coord: &Coordinate) -> Option<Arc<FramePlane>> {
        self.buffer.read(coord)
    }

    /// Stage position recorded with the frame at `coord`
    pub fn stage_position_at(&self, coord: &Coordinate) -> Option<StagePosition> {
        self.positions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(coord)
            .copied()
    }

    /// All recorded stage positions
    pub fn stage_positions(&self) -> Vec<(Coordinate, StagePosition)> {
        let mut positions: Vec<_> = self
            .positions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(c, p)| (c.clone(), *p))
            .collect();
        positions.sort_by(|a, b| a.0.cmp(&b.0));
        positions
    }

    pub fn summary(&self) -> SessionSummary {
        let metadata = self.metadata();
        SessionSummary {
            id: self.id,
            name: metadata.name,
            shape: self.shape().clone(),
            status: self.status(),
            frames: self.buffer.written_count(),
            capacity: self.buffer.capacity(),
            retained: self.is_retained(),
            failure: self.failure(),
            layer: metadata.layer,
        }
    }

    /// Move out of `Running`. Returns false if the session had already left it.
    pub(crate) fn finish(&self, status: SessionStatus) -> bool {
        let mut current = self.status.write().unwrap_or_else(PoisonError::into_inner);
        if current.is_terminal() {
            return false;
        }
        *current = status;
        drop(current);

        self.metadata
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .finished_at = Some(chrono::Utc::now());
        true
    }

    /// Mark the session errored with a cause
    pub(crate) fn fail(&self, cause: impl Into<String>) -> bool {
        let changed = self.finish(SessionStatus::Errored);
        if changed {
            *self.failure.write().unwrap_or_else(PoisonError::into_inner) = Some(cause.into());
        }
        changed
    }

    pub(crate) fn record_position(&self, coord: &Coordinate, position: StagePosition) {
        self.positions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(coord.clone(), position);
    }
}
