//! Synchronization engine
//!
//! The engine consumes hardware events on its own thread and keeps session
//! buffers and the state mirror up to date for viewers.
//!
//! # Architecture
//!
//! - [`EventSender`] - producer handle (hardware callbacks, simulator)
//! - [`SyncEngine`] - owns the channel receiver and spawns the worker thread
//! - [`EngineWorker`] - event loop and session state machine
//! - [`ViewerBridge`] - viewer-side handle: reads, subscriptions, notifications
//! - [`HardwareCore`] - query interface used at sequence start
//! - [`SequenceLayout`] - splits a sequence into per-channel/position sessions
//!
//! # Example
//!
//! ```ignore
//! use mda_bridge::config::BridgeConfig;
//! use mda_bridge::engine::SyncEngine;
//!
//! let (engine, sender, bridge) = SyncEngine::new(BridgeConfig::default());
//! let handle = engine.spawn()?;
//!
//! sender.sequence_started(descriptor)?;
//! sender.frame_ready(coordinate, plane)?;
//!
//! for notification in bridge.drain() {
//!     // redraw regions, refresh properties
//! }
//! ```

pub mod bridge;
pub mod hardware;
pub mod layout;
pub mod preview;
pub mod simulator;
pub mod worker;

pub use bridge::ViewerBridge;
pub use hardware::{DetachedCore, HardwareCore};
pub use layout::{Partition, SequenceLayout};
pub use preview::{preview_interval, PreviewSlot, DEFAULT_PREVIEW_INTERVAL, EXPOSURE_PROPERTY};
pub use simulator::{PlanePattern, SimulatedAcquisition, SimulatedCore};
pub use worker::EngineWorker;

use crate::channel::{event_channel, EventReceiver, EventSender};
use crate::config::BridgeConfig;
use crate::notify::Notifier;
use crate::session::{SessionId, SessionRegistry, SessionStatus};
use crate::state::StateMirror;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::JoinHandle;

/// Engine-level state derived from the active session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnginePhase {
    #[default]
    Idle,
    Running,
    Completed,
    Aborted,
    Errored,
}

impl From<SessionStatus> for EnginePhase {
    fn from(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Running => EnginePhase::Running,
            SessionStatus::Completed => EnginePhase::Completed,
            SessionStatus::Aborted => EnginePhase::Aborted,
            SessionStatus::Errored => EnginePhase::Errored,
        }
    }
}

impl fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnginePhase::Idle => write!(f, "Idle"),
            EnginePhase::Running => write!(f, "Running"),
            EnginePhase::Completed => write!(f, "Completed"),
            EnginePhase::Aborted => write!(f, "Aborted"),
            EnginePhase::Errored => write!(f, "Errored"),
        }
    }
}

/// Phase and the sessions it refers to
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineStatus {
    pub phase: EnginePhase,
    /// First layer of the most recent sequence
    pub active_session: Option<SessionId>,
    /// Every layer of the most recent sequence, in partition order
    pub sessions: Vec<SessionId>,
}

/// Statistics for the engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Events taken off the queue
    pub events_processed: u64,
    pub sessions_started: u64,
    /// Sessions that ended in `Errored`, or failed to allocate
    pub sessions_failed: u64,
    /// Planes written, including overwrites
    pub frames_written: u64,
    pub frames_overwritten: u64,
    /// Re-acquisitions ignored under the keep-first policy
    pub frames_rejected: u64,
    pub malformed_coordinates: u64,
    /// Events the current state could not accept
    pub unexpected_events: u64,
    pub property_updates: u64,
    /// Property updates older than the mirrored value
    pub stale_property_updates: u64,
    pub channel_overflows: u64,
    pub preview_updates: u64,
    /// Notifications lost to a full queue
    pub notifications_dropped: u64,
}

impl EngineStats {
    /// Percentage of received frames that were written
    pub fn write_rate(&self) -> f64 {
        let total = self.frames_written + self.frames_rejected + self.malformed_coordinates;
        if total == 0 {
            100.0
        } else {
            (self.frames_written as f64 / total as f64) * 100.0
        }
    }
}

/// State shared between the worker and viewer bridges
#[derive(Debug)]
pub(crate) struct EngineShared {
    pub(crate) registry: SessionRegistry,
    pub(crate) mirror: StateMirror,
    pub(crate) notifier: Notifier,
    pub(crate) preview: PreviewSlot,
    stats: RwLock<EngineStats>,
    status: RwLock<EngineStatus>,
}

impl EngineShared {
    pub(crate) fn update_stats(&self, f: impl FnOnce(&mut EngineStats)) {
        f(&mut self.stats.write().unwrap_or_else(PoisonError::into_inner));
    }

    pub(crate) fn stats(&self) -> EngineStats {
        let mut stats = self
            .stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        stats.notifications_dropped = self.notifier.dropped();
        stats
    }

    pub(crate) fn set_status(&self, status: EngineStatus) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = status;
    }

    pub(crate) fn status(&self) -> EngineStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// The synchronization engine, run on its own thread
pub struct SyncEngine {
    config: BridgeConfig,
    receiver: EventReceiver,
    shared: Arc<EngineShared>,
    core: Box<dyn HardwareCore>,
    running: Arc<AtomicBool>,
}

impl SyncEngine {
    /// Create an engine with its producer and viewer handles
    pub fn new(config: BridgeConfig) -> (Self, EventSender, ViewerBridge) {
        let (sender, receiver) = event_channel(&config.channel);
        let (notifier, notifications) = Notifier::new(config.engine.notification_capacity);

        let shared = Arc::new(EngineShared {
            registry: SessionRegistry::new(),
            mirror: StateMirror::new(),
            notifier,
            preview: PreviewSlot::new(),
            stats: RwLock::new(EngineStats::default()),
            status: RwLock::new(EngineStatus::default()),
        });

        let engine = Self {
            config,
            receiver,
            shared: Arc::clone(&shared),
            core: Box::new(DetachedCore),
            running: Arc::new(AtomicBool::new(true)),
        };
        let bridge = ViewerBridge::new(shared, notifications);

        (engine, sender, bridge)
    }

    /// Attach the hardware core queried at sequence start
    pub fn with_core(mut self, core: Box<dyn HardwareCore>) -> Self {
        self.core = core;
        self
    }

    /// Run the engine loop on the current thread
    pub fn run(self) {
        let mut worker = EngineWorker::new(
            self.config,
            self.receiver,
            self.shared,
            self.core,
            self.running,
        );
        worker.run();
    }

    /// Run the engine loop on a dedicated thread
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("mda-sync-engine".to_string())
            .spawn(move || self.run())
    }

    /// Get a handle to stop the engine; it exits within one idle tick
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }
}
