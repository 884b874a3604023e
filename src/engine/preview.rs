//! Live preview slot
//!
//! Holds the most recent snapped image outside any session buffer. The
//! viewer polls it at the preview interval, which follows the camera
//! exposure.

use crate::state::StateMirror;
use crate::types::FramePlane;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Property name carrying the camera exposure in milliseconds
pub const EXPOSURE_PROPERTY: &str = "exposure";

/// Poll interval when the exposure is unknown
pub const DEFAULT_PREVIEW_INTERVAL: Duration = Duration::from_millis(100);

/// Latest snapped image and live-mode flag
#[derive(Debug, Default)]
pub struct PreviewSlot {
    latest: RwLock<Option<Arc<FramePlane>>>,
    live: AtomicBool,
    updates: AtomicU64,
}

impl PreviewSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<Arc<FramePlane>> {
        self.latest.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Number of images stored since creation
    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::SeqCst)
    }

    pub(crate) fn store(&self, plane: Arc<FramePlane>) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(plane);
        self.updates.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns whether the flag changed
    pub(crate) fn set_live(&self, live: bool) -> bool {
        self.live.swap(live, Ordering::SeqCst) != live
    }
}

/// Preview poll interval derived from the mirrored exposure
pub fn preview_interval(mirror: &StateMirror) -> Duration {
    mirror
        .get_value(EXPOSURE_PROPERTY)
        .and_then(|v| v.as_f64())
        .filter(|ms| ms.is_finite() && *ms >= 1.0)
        .map(|ms| Duration::from_millis(ms as u64))
        .unwrap_or(DEFAULT_PREVIEW_INTERVAL)
}
