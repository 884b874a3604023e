//! Synchronization engine worker loop
//!
//! The worker is the only consumer of the event channel and the only writer
//! of session buffers and the state mirror. It processes events strictly in
//! arrival order:
//!
//! - **SequenceStarted**: release unretained sessions, allocate one buffer per layer
//! - **FrameReady**: route to a layer, resolve, grow if needed, write, then notify
//! - **PropertyChanged**: update the mirror, then notify
//! - **SequenceFinished / Abort / SequenceError**: end the running sessions;
//!   a completed sequence with a save path is written out on a separate thread
//!
//! Side-band entries (overflow marks, coalesced properties) are applied
//! before the first queued event stamped after them, and whenever the queue
//! runs dry.
//!
//! # State machine
//!
//! ```text
//! Idle --SequenceStarted--> Running --Finished--> Completed
//!                             |  \----Abort-----> Aborted
//!                             \--fatal error----> Errored
//! ```
//!
//! A terminal state returns to Running on the next SequenceStarted.

use super::hardware::HardwareCore;
use super::layout::SequenceLayout;
use super::preview::EXPOSURE_PROPERTY;
use super::{EnginePhase, EngineShared, EngineStatus};
use crate::buffer::{self, WriteOutcome};
use crate::channel::{
    AcquisitionEvent, Envelope, EventReceiver, FinishStatus, SequenceDescriptor, SideBandBatch,
};
use crate::config::{BridgeConfig, OverwritePolicy};
use crate::error::{BridgeError, ErrorKind};
use crate::notify::Notification;
use crate::session::{SequenceSession, SessionId, SessionMetadata, SessionStatus};
use crate::types::{AcquisitionShape, Coordinate, FramePlane, PropertyValue};
use crossbeam_channel::{RecvTimeoutError, TryRecvError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Whether the loop should keep going after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Entry taken from the side band
enum SideEntry {
    Overflow,
    Property(String, PropertyValue),
}

/// Sessions created by one SequenceStarted, one per layer
struct Acquisition {
    layout: SequenceLayout,
    sessions: Vec<Arc<SequenceSession>>,
    save_path: Option<PathBuf>,
}

impl Acquisition {
    fn is_running(&self) -> bool {
        self.sessions.iter().any(|s| s.is_running())
    }

    fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|s| s.id()).collect()
    }
}

/// The engine worker that runs the event loop
pub struct EngineWorker {
    config: BridgeConfig,
    receiver: EventReceiver,
    shared: Arc<EngineShared>,
    core: Box<dyn HardwareCore>,
    running: Arc<AtomicBool>,
    /// Sessions of the last successful SequenceStarted
    active: Option<Acquisition>,
    /// Save-on-finish threads, joined before shutdown
    saves: Vec<JoinHandle<()>>,
}

impl EngineWorker {
    pub(crate) fn new(
        config: BridgeConfig,
        receiver: EventReceiver,
        shared: Arc<EngineShared>,
        core: Box<dyn HardwareCore>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            receiver,
            shared,
            core,
            running,
            active: None,
            saves: Vec::new(),
        }
    }

    /// Run the main worker loop until shutdown, stop or producer disconnect
    pub fn run(&mut self) {
        tracing::info!(
            "Synchronization engine started (capacity {}, overwrite policy: {})",
            self.receiver.capacity(),
            self.config.engine.overwrite_policy
        );
        let idle_tick = self.config.engine.idle_tick();

        while self.running.load(Ordering::SeqCst) {
            let envelope = match self.receiver.try_recv() {
                Ok(envelope) => Some(envelope),
                Err(TryRecvError::Empty) => {
                    self.apply_side_band(None);
                    match self.receiver.recv_timeout(idle_tick) {
                        Ok(envelope) => Some(envelope),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => {
                            tracing::debug!("All event senders dropped");
                            break;
                        }
                    }
                }
                Err(TryRecvError::Disconnected) => {
                    tracing::debug!("All event senders dropped");
                    break;
                }
            };

            if let Some(envelope) = envelope {
                self.apply_side_band(Some(envelope.seq));
                if self.handle(envelope) == Flow::Stop {
                    break;
                }
            }
        }

        self.apply_side_band(None);

        let running = self.running_sessions();
        if !running.is_empty() {
            tracing::warn!("Engine stopping with {} session(s) still running", running.len());
            self.end_sessions(&running, SessionStatus::Aborted);
        }

        for handle in self.saves.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Session save thread panicked");
            }
        }

        self.running.store(false, Ordering::SeqCst);
        self.shared.notifier.publish(Notification::Shutdown);
        tracing::info!("Synchronization engine stopped");
    }

    fn handle(&mut self, envelope: Envelope) -> Flow {
        self.shared.update_stats(|s| s.events_processed += 1);
        tracing::trace!("Event {} ({})", envelope.seq, envelope.event.label());

        match envelope.event {
            AcquisitionEvent::SequenceStarted(descriptor) => self.start_sequence(descriptor),
            AcquisitionEvent::FrameReady { coordinate, plane } => {
                self.write_frame(coordinate, plane)
            }
            AcquisitionEvent::PropertyChanged { name, value } => {
                self.apply_property(&name, value, envelope.seq)
            }
            AcquisitionEvent::SequenceFinished(status) => {
                let status = match status {
                    FinishStatus::Completed => SessionStatus::Completed,
                    FinishStatus::Aborted => SessionStatus::Aborted,
                };
                self.finish_sequence(status);
            }
            AcquisitionEvent::Abort => self.finish_sequence(SessionStatus::Aborted),
            AcquisitionEvent::SequenceError(cause) => self.hardware_error(cause),
            AcquisitionEvent::ImageSnapped(plane) => self.update_preview(plane),
            AcquisitionEvent::LiveModeChanged(live) => {
                if self.shared.preview.set_live(live) {
                    tracing::info!("Live mode {}", if live { "on" } else { "off" });
                    self.shared
                        .notifier
                        .publish(Notification::LiveModeChanged(live));
                }
            }
            AcquisitionEvent::Shutdown => {
                tracing::info!("Shutdown requested by producer");
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    /// Sessions of the active acquisition that still accept frames
    fn running_sessions(&self) -> Vec<Arc<SequenceSession>> {
        self.active
            .iter()
            .flat_map(|a| a.sessions.iter())
            .filter(|s| s.is_running())
            .cloned()
            .collect()
    }

    fn active_id(&self) -> Option<SessionId> {
        self.active
            .as_ref()
            .and_then(|a| a.sessions.first())
            .map(|s| s.id())
    }

    fn set_status(&self, phase: EnginePhase) {
        let sessions = self.active.as_ref().map(Acquisition::ids).unwrap_or_default();
        self.shared.set_status(EngineStatus {
            phase,
            active_session: sessions.first().copied(),
            sessions,
        });
    }

    fn recoverable(&self, session_id: Option<SessionId>, kind: ErrorKind, message: String) {
        tracing::warn!("{}", message);
        self.shared.notifier.publish(Notification::RecoverableError {
            session_id,
            kind,
            message,
        });
    }

    fn start_sequence(&mut self, descriptor: SequenceDescriptor) {
        let running = self.running_sessions();
        if !running.is_empty() {
            tracing::warn!(
                "Sequence started while session {} was running; aborting it",
                running[0].id()
            );
            self.end_sessions(&running, SessionStatus::Aborted);
        }

        if !self.config.engine.retain_previous_sessions {
            for id in self.shared.registry.release_unretained() {
                tracing::debug!("Released session {}", id);
                self.shared.notifier.forget_session(id);
                self.shared.notifier.publish(Notification::SessionReleased(id));
            }
        }

        let Some(shape) = descriptor.shape.clone().or_else(|| self.core.sequence_shape()) else {
            self.active = None;
            self.set_status(EnginePhase::Idle);
            self.recoverable(
                None,
                ErrorKind::UnexpectedEvent,
                format!("Sequence '{}' started without a declared shape", descriptor.name),
            );
            return;
        };

        let layout = match SequenceLayout::plan(&shape, &descriptor) {
            Ok(layout) => layout,
            Err(e) => {
                self.start_failed(&shape, e);
                return;
            }
        };

        let metadata = SessionMetadata {
            image_width: self.core.image_width(),
            image_height: self.core.image_height(),
            bit_depth: self.core.bit_depth(),
            pixel_size_um: self.core.pixel_size_um(),
            exposure_ms: self.core.exposure_ms(),
            z_step_um: descriptor.z_step_um,
            ..SessionMetadata::new(descriptor.name)
        };

        let mut sessions = Vec::with_capacity(layout.partitions().len());
        for partition in layout.partitions() {
            let metadata = SessionMetadata {
                layer: partition.label.clone(),
                ..metadata.clone()
            };
            match self
                .shared
                .registry
                .create(partition.shape.clone(), metadata, self.config.buffer.clone())
            {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    for session in &sessions {
                        session.fail(e.to_string());
                        self.shared.registry.discard(session.id());
                    }
                    self.start_failed(&partition.shape, e);
                    return;
                }
            }
        }

        self.shared
            .update_stats(|s| s.sessions_started += sessions.len() as u64);
        self.active = Some(Acquisition {
            layout,
            sessions: sessions.clone(),
            save_path: descriptor.save_path,
        });
        self.set_status(EnginePhase::Running);

        for session in sessions {
            let shape = session.shape().clone();
            match session.metadata().layer {
                Some(layer) => tracing::info!("Session {} ({}) started with shape {}", session.id(), layer, shape),
                None => tracing::info!("Session {} started with shape {}", session.id(), shape),
            }
            self.shared.notifier.publish(Notification::SessionStarted {
                session_id: session.id(),
                shape,
            });
        }
    }

    fn start_failed(&mut self, shape: &AcquisitionShape, error: BridgeError) {
        tracing::error!("Failed to start sequence with shape {}: {}", shape, error);
        self.active = None;
        self.set_status(EnginePhase::Errored);
        self.shared.update_stats(|s| s.sessions_failed += 1);
        self.shared.notifier.publish(Notification::SessionFailed {
            session_id: None,
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    fn write_frame(&mut self, coordinate: Coordinate, plane: FramePlane) {
        let routed = match &self.active {
            Some(acquisition) if acquisition.is_running() => acquisition
                .layout
                .route(&coordinate)
                .map(|(index, local)| (Arc::clone(&acquisition.sessions[index]), local)),
            active => {
                self.shared.update_stats(|s| s.unexpected_events += 1);
                let message = match active.as_ref().and_then(|a| a.sessions.first()) {
                    None => format!("Frame at {} arrived with no running sequence", coordinate),
                    Some(s) => format!(
                        "Frame at {} arrived after session {} ended ({})",
                        coordinate,
                        s.id(),
                        s.status()
                    ),
                };
                self.recoverable(self.active_id(), ErrorKind::UnexpectedEvent, message);
                return;
            }
        };

        let (session, coordinate) = match routed {
            Ok(routed) => routed,
            Err(e) => {
                self.shared.update_stats(|s| s.malformed_coordinates += 1);
                let error = BridgeError::from(e);
                self.recoverable(
                    self.active_id(),
                    error.kind(),
                    format!("Frame at {} rejected: {}", coordinate, error),
                );
                return;
            }
        };
        let id = session.id();
        let buffer = session.buffer();

        match buffer.ensure_capacity(&coordinate) {
            Ok(true) => tracing::debug!("Session {} buffer grew to {:?}", id, buffer.capacity()),
            Ok(false) => {}
            Err(e) if e.is_fatal() => {
                self.fail_sessions(e);
                return;
            }
            Err(e) => {
                self.shared.update_stats(|s| s.malformed_coordinates += 1);
                self.recoverable(Some(id), e.kind(), format!("Frame at {} rejected: {}", coordinate, e));
                return;
            }
        }

        let policy = self.config.engine.overwrite_policy;
        if policy == OverwritePolicy::KeepFirst && buffer.contains(&coordinate) {
            self.shared.update_stats(|s| s.frames_rejected += 1);
            self.recoverable(
                Some(id),
                ErrorKind::OverwriteAnomaly,
                format!("Re-acquisition at {} ignored; keeping first plane", coordinate),
            );
            return;
        }

        let stage = plane.metadata.stage;
        let outcome = match buffer.write(&coordinate, plane) {
            Ok(outcome) => outcome,
            Err(e) if e.is_fatal() => {
                self.fail_sessions(e);
                return;
            }
            Err(e) => {
                self.recoverable(Some(id), e.kind(), format!("Frame at {} not written: {}", coordinate, e));
                return;
            }
        };

        if let Some(stage) = stage {
            session.record_position(&coordinate, stage);
        }

        self.shared.update_stats(|s| {
            s.frames_written += 1;
            if outcome.is_overwrite() {
                s.frames_overwritten += 1;
            }
        });

        if outcome == WriteOutcome::Overwrite && policy == OverwritePolicy::FlagAnomaly {
            self.recoverable(
                Some(id),
                ErrorKind::OverwriteAnomaly,
                format!("Plane at {} replaced by re-acquisition", coordinate),
            );
        }

        self.shared.notifier.region_updated(id, &coordinate);
        self.shared.notifier.publish(Notification::RegionUpdated {
            session_id: id,
            coordinate,
            outcome,
        });
    }

    fn apply_property(&mut self, name: &str, value: PropertyValue, stamp: u64) {
        match self.shared.mirror.apply(name, value.clone(), stamp) {
            Some(revision) => {
                self.shared.update_stats(|s| s.property_updates += 1);
                if name == EXPOSURE_PROPERTY {
                    tracing::debug!("Exposure now {} (revision {})", value, revision);
                }
                self.shared.notifier.publish(Notification::StateChanged {
                    name: name.to_string(),
                    value,
                    revision,
                });
            }
            None => self.shared.update_stats(|s| s.stale_property_updates += 1),
        }
    }

    fn finish_sequence(&mut self, status: SessionStatus) {
        let running = self.running_sessions();
        if running.is_empty() {
            self.shared.update_stats(|s| s.unexpected_events += 1);
            tracing::debug!("{} with no running sequence ignored", status);
            return;
        }
        self.end_sessions(&running, status);
        if status == SessionStatus::Completed {
            self.save_finished();
        }
    }

    fn hardware_error(&mut self, cause: String) {
        let error = BridgeError::HardwareReportedError(cause);
        if self.running_sessions().is_empty() {
            tracing::error!("{}", error);
            self.shared.notifier.publish(Notification::SessionFailed {
                session_id: None,
                kind: error.kind(),
                message: error.to_string(),
            });
        } else {
            self.fail_sessions(error);
        }
    }

    fn update_preview(&mut self, plane: FramePlane) {
        let (width, height) = (plane.width, plane.height);
        self.shared.preview.store(Arc::new(plane));
        self.shared.update_stats(|s| s.preview_updates += 1);
        self.shared
            .notifier
            .publish(Notification::PreviewUpdated { width, height });
    }

    /// Leave `Running` with a non-error status
    fn end_sessions(&self, sessions: &[Arc<SequenceSession>], status: SessionStatus) {
        self.set_status(status.into());
        for session in sessions {
            if !session.finish(status) {
                continue;
            }
            tracing::info!(
                "Session {} {} with {} frames",
                session.id(),
                status,
                session.buffer().written_count()
            );
            self.shared.notifier.publish(Notification::SessionStatusChanged {
                session_id: session.id(),
                status,
            });
        }
    }

    /// Move every running session of the acquisition to `Errored`; buffers stay readable
    fn fail_sessions(&self, error: BridgeError) {
        let sessions = self.running_sessions();
        if sessions.is_empty() {
            return;
        }
        let message = error.to_string();
        self.set_status(EnginePhase::Errored);
        for session in sessions {
            if !session.fail(message.clone()) {
                continue;
            }
            tracing::error!("Session {} failed: {}", session.id(), message);
            self.shared.update_stats(|s| s.sessions_failed += 1);
            self.shared.notifier.publish(Notification::SessionStatusChanged {
                session_id: session.id(),
                status: SessionStatus::Errored,
            });
            self.shared.notifier.publish(Notification::SessionFailed {
                session_id: Some(session.id()),
                kind: error.kind(),
                message: message.clone(),
            });
        }
    }

    /// Write the completed acquisition to its save path off the engine thread
    fn save_finished(&mut self) {
        let targets: Vec<(Arc<SequenceSession>, PathBuf)> = match &self.active {
            Some(Acquisition {
                sessions,
                save_path: Some(path),
                ..
            }) => sessions
                .iter()
                .map(|s| {
                    let target = match s.metadata().layer {
                        Some(layer) => layer_path(path, &layer),
                        None => path.clone(),
                    };
                    (Arc::clone(s), target)
                })
                .collect(),
            _ => return,
        };

        self.saves.retain(|handle| !handle.is_finished());
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("mda-session-save".to_string())
            .spawn(move || save_sessions(&shared, targets));
        match spawned {
            Ok(handle) => self.saves.push(handle),
            Err(e) => self.recoverable(
                self.active_id(),
                ErrorKind::PersistenceFailure,
                format!("Could not start session save: {}", e),
            ),
        }
    }

    fn channel_overflow(&mut self, stamp: u64) {
        self.shared.update_stats(|s| s.channel_overflows += 1);
        let error = BridgeError::ChannelOverflow {
            capacity: self.receiver.capacity(),
        };
        if self.running_sessions().is_empty() {
            self.recoverable(
                self.active_id(),
                ErrorKind::ChannelOverflow,
                format!("Frame {} lost to overflow with no running sequence", stamp),
            );
        } else {
            self.fail_sessions(error);
        }
    }

    /// Apply side-band entries stamped before `before` (all when `None`) in stamp order
    fn apply_side_band(&mut self, before: Option<u64>) {
        let SideBandBatch {
            overflows,
            properties,
        } = self.receiver.take_side_band(before);

        let mut entries: Vec<(u64, SideEntry)> = overflows
            .into_iter()
            .map(|seq| (seq, SideEntry::Overflow))
            .chain(
                properties
                    .into_iter()
                    .map(|(seq, name, value)| (seq, SideEntry::Property(name, value))),
            )
            .collect();
        if entries.is_empty() {
            return;
        }
        entries.sort_by_key(|(seq, _)| *seq);

        for (seq, entry) in entries {
            match entry {
                SideEntry::Overflow => self.channel_overflow(seq),
                SideEntry::Property(name, value) => self.apply_property(&name, value, seq),
            }
        }
    }
}

fn save_sessions(shared: &EngineShared, targets: Vec<(Arc<SequenceSession>, PathBuf)>) {
    for (session, path) in targets {
        match buffer::save_to_file(&path, session.buffer(), &session.metadata()) {
            Ok(planes) => shared.notifier.publish(Notification::SessionSaved {
                session_id: session.id(),
                path,
                planes,
            }),
            Err(e) => {
                let message = format!("Saving session {} to {:?} failed: {}", session.id(), path, e);
                tracing::error!("{}", message);
                shared.notifier.publish(Notification::RecoverableError {
                    session_id: Some(session.id()),
                    kind: ErrorKind::PersistenceFailure,
                    message,
                });
            }
        }
    }
}

/// `run.mda` with layer `Pos000` becomes `run_Pos000.mda`
fn layer_path(path: &Path, layer: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, layer, ext.to_string_lossy()),
        None => format!("{}_{}", stem, layer),
    };
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_path_keeps_extension() {
        assert_eq!(
            layer_path(Path::new("/data/run.mda"), "Pos000_DAPI_000"),
            PathBuf::from("/data/run_Pos000_DAPI_000.mda")
        );
        assert_eq!(layer_path(Path::new("run"), "Ch001"), PathBuf::from("run_Ch001"));
    }
}
