//! Bounded event channel between the acquisition producer and the engine
//!
//! The channel is a crossbeam bounded queue with a small side band for the
//! cases where the queue is full:
//!
//! - **Frames** block for up to `frame_send_timeout_ms`. If the queue is still
//!   full the send fails with [`BridgeError::ChannelOverflow`] and an overflow
//!   mark is recorded so the engine can fail the active session.
//! - **Property changes** never block. A full queue coalesces the value into
//!   the side band, keeping only the newest value per property name.
//! - **Control events** block, optionally bounded by `control_send_timeout_ms`.
//!
//! Every event and side-band entry carries a stamp from one shared counter.
//! The engine applies side-band entries in stamp order relative to queued
//! events, so frames sent before an overflow are still written.
//!
//! # Example
//!
//! ```ignore
//! use mda_bridge::channel::event_channel;
//! use mda_bridge::config::ChannelSettings;
//!
//! let (sender, receiver) = event_channel(&ChannelSettings::default());
//! sender.property_changed("exposure", 20.0)?;
//! let envelope = receiver.try_recv();
//! ```

pub mod events;

pub use events::{AcquisitionEvent, Envelope, FinishStatus, PositionPlan, SequenceDescriptor};

use crate::config::ChannelSettings;
use crate::error::{BridgeError, Result};
use crate::types::{Coordinate, FramePlane, PropertyValue};
use crossbeam_channel::{
    bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError, TrySendError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Entries held outside the queue while it was full
#[derive(Debug, Default)]
struct SideBand {
    overflows: Vec<u64>,
    coalesced: HashMap<String, (u64, PropertyValue)>,
}

impl SideBand {
    fn len(&self) -> usize {
        self.overflows.len() + self.coalesced.len()
    }
}

/// Entries taken from the side band, in stamp order
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SideBandBatch {
    /// Stamps of frames that could not be enqueued
    pub overflows: Vec<u64>,
    /// Coalesced property values with their stamps
    pub properties: Vec<(u64, String, PropertyValue)>,
}

impl SideBandBatch {
    pub fn is_empty(&self) -> bool {
        self.overflows.is_empty() && self.properties.is_empty()
    }
}

/// Counters describing channel pressure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Events accepted into the queue
    pub sent: u64,
    /// Frames rejected with an overflow
    pub overflows: u64,
    /// Property changes coalesced into the side band
    pub coalesced: u64,
}

#[derive(Debug)]
struct Shared {
    capacity: usize,
    next_seq: AtomicU64,
    side: Mutex<SideBand>,
    side_len: AtomicUsize,
    sent: AtomicU64,
    overflows: AtomicU64,
    coalesced: AtomicU64,
}

impl Shared {
    fn stamp(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn with_side<T>(&self, f: impl FnOnce(&mut SideBand) -> T) -> T {
        let mut side = self.side.lock().unwrap_or_else(PoisonError::into_inner);
        let out = f(&mut side);
        self.side_len.store(side.len(), Ordering::SeqCst);
        out
    }
}

/// Create a connected sender/receiver pair
pub fn event_channel(settings: &ChannelSettings) -> (EventSender, EventReceiver) {
    let capacity = settings.capacity.max(1);
    let (tx, rx) = bounded(capacity);
    let shared = Arc::new(Shared {
        capacity,
        next_seq: AtomicU64::new(0),
        side: Mutex::new(SideBand::default()),
        side_len: AtomicUsize::new(0),
        sent: AtomicU64::new(0),
        overflows: AtomicU64::new(0),
        coalesced: AtomicU64::new(0),
    });

    let sender = EventSender {
        tx,
        shared: Arc::clone(&shared),
        frame_timeout: settings.frame_send_timeout(),
        control_timeout: settings.control_send_timeout(),
    };
    let receiver = EventReceiver { rx, shared };
    (sender, receiver)
}

/// Producer half of the event channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<Envelope>,
    shared: Arc<Shared>,
    frame_timeout: Duration,
    control_timeout: Option<Duration>,
}

impl EventSender {
    /// Send any event with the backpressure policy of its kind
    pub fn send(&self, event: AcquisitionEvent) -> Result<()> {
        match event {
            AcquisitionEvent::FrameReady { .. } => self.send_frame(event),
            AcquisitionEvent::PropertyChanged { name, value } => self.send_property(name, value),
            other => self.send_control(other),
        }
    }

    pub fn sequence_started(&self, descriptor: SequenceDescriptor) -> Result<()> {
        self.send_control(AcquisitionEvent::SequenceStarted(descriptor))
    }

    pub fn frame_ready(&self, coordinate: Coordinate, plane: FramePlane) -> Result<()> {
        self.send_frame(AcquisitionEvent::FrameReady { coordinate, plane })
    }

    pub fn property_changed(&self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Result<()> {
        self.send_property(name.into(), value.into())
    }

    pub fn sequence_finished(&self, status: FinishStatus) -> Result<()> {
        self.send_control(AcquisitionEvent::SequenceFinished(status))
    }

    pub fn sequence_error(&self, cause: impl Into<String>) -> Result<()> {
        self.send_control(AcquisitionEvent::SequenceError(cause.into()))
    }

    pub fn abort(&self) -> Result<()> {
        self.send_control(AcquisitionEvent::Abort)
    }

    pub fn image_snapped(&self, plane: FramePlane) -> Result<()> {
        self.send_control(AcquisitionEvent::ImageSnapped(plane))
    }

    pub fn live_mode_changed(&self, enabled: bool) -> Result<()> {
        self.send_control(AcquisitionEvent::LiveModeChanged(enabled))
    }

    /// Ask the engine to stop once it reaches this event
    pub fn shutdown(&self) -> Result<()> {
        self.send_control(AcquisitionEvent::Shutdown)
    }

    /// Number of events currently queued
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.tx.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn stats(&self) -> ChannelStats {
        stats_of(&self.shared)
    }

    fn envelope(&self, event: AcquisitionEvent) -> Envelope {
        Envelope {
            seq: self.shared.stamp(),
            event,
        }
    }

    fn accepted(&self) -> Result<()> {
        self.shared.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn closed(&self) -> BridgeError {
        BridgeError::ChannelClosed("synchronization engine has stopped".to_string())
    }

    fn send_frame(&self, event: AcquisitionEvent) -> Result<()> {
        let envelope = self.envelope(event);
        let seq = envelope.seq;

        let full = if self.frame_timeout.is_zero() {
            match self.tx.try_send(envelope) {
                Ok(()) => return self.accepted(),
                Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Disconnected(_)) => false,
            }
        } else {
            match self.tx.send_timeout(envelope, self.frame_timeout) {
                Ok(()) => return self.accepted(),
                Err(SendTimeoutError::Timeout(_)) => true,
                Err(SendTimeoutError::Disconnected(_)) => false,
            }
        };

        if !full {
            return Err(self.closed());
        }

        self.shared.overflows.fetch_add(1, Ordering::Relaxed);
        self.shared.with_side(|side| side.overflows.push(seq));
        tracing::error!(
            "Event channel full for {:?}, frame {} dropped",
            self.frame_timeout,
            seq
        );
        Err(BridgeError::ChannelOverflow {
            capacity: self.shared.capacity,
        })
    }

    fn send_property(&self, name: String, value: PropertyValue) -> Result<()> {
        let envelope = self.envelope(AcquisitionEvent::PropertyChanged { name, value });

        match self.tx.try_send(envelope) {
            Ok(()) => self.accepted(),
            Err(TrySendError::Disconnected(_)) => Err(self.closed()),
            Err(TrySendError::Full(envelope)) => {
                let seq = envelope.seq;
                if let AcquisitionEvent::PropertyChanged { name, value } = envelope.event {
                    tracing::debug!("Event channel full, coalescing property '{}'", name);
                    self.shared.coalesced.fetch_add(1, Ordering::Relaxed);
                    self.shared.with_side(|side| {
                        side.coalesced.insert(name, (seq, value));
                    });
                }
                Ok(())
            }
        }
    }

    fn send_control(&self, event: AcquisitionEvent) -> Result<()> {
        let envelope = self.envelope(event);

        match self.control_timeout {
            None => match self.tx.send(envelope) {
                Ok(()) => self.accepted(),
                Err(_) => Err(self.closed()),
            },
            Some(timeout) => match self.tx.send_timeout(envelope, timeout) {
                Ok(()) => self.accepted(),
                Err(SendTimeoutError::Timeout(envelope)) => {
                    tracing::warn!("Event channel full, {} not delivered", envelope.event.label());
                    Err(BridgeError::ChannelFull {
                        capacity: self.shared.capacity,
                    })
                }
                Err(SendTimeoutError::Disconnected(_)) => Err(self.closed()),
            },
        }
    }
}

/// Consumer half of the event channel, owned by the engine
#[derive(Debug)]
pub struct EventReceiver {
    rx: Receiver<Envelope>,
    shared: Arc<Shared>,
}

impl EventReceiver {
    pub fn try_recv(&self) -> std::result::Result<Envelope, TryRecvError> {
        self.rx.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> std::result::Result<Envelope, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Whether the side band holds anything
    pub fn has_side_band(&self) -> bool {
        self.shared.side_len.load(Ordering::SeqCst) > 0
    }

    /// Take side-band entries stamped before `before`, or all entries when `None`
    pub fn take_side_band(&self, before: Option<u64>) -> SideBandBatch {
        if !self.has_side_band() {
            return SideBandBatch::default();
        }
        let due = |seq: u64| before.map_or(true, |limit| seq < limit);

        self.shared.with_side(|side| {
            let mut overflows: Vec<u64> = Vec::new();
            side.overflows.retain(|&seq| {
                if due(seq) {
                    overflows.push(seq);
                    false
                } else {
                    true
                }
            });
            overflows.sort_unstable();

            let names: Vec<String> = side
                .coalesced
                .iter()
                .filter(|(_, (seq, _))| due(*seq))
                .map(|(name, _)| name.clone())
                .collect();
            let mut properties: Vec<(u64, String, PropertyValue)> = names
                .into_iter()
                .filter_map(|name| {
                    side.coalesced
                        .remove(&name)
                        .map(|(seq, value)| (seq, name, value))
                })
                .collect();
            properties.sort_by_key(|(seq, _, _)| *seq);

            SideBandBatch {
                overflows,
                properties,
            }
        })
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn stats(&self) -> ChannelStats {
        stats_of(&self.shared)
    }
}

fn stats_of(shared: &Shared) -> ChannelStats {
    ChannelStats {
        sent: shared.sent.load(Ordering::Relaxed),
        overflows: shared.overflows.load(Ordering::Relaxed),
        coalesced: shared.coalesced.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelData;

    fn settings(capacity: usize) -> ChannelSettings {
        ChannelSettings {
            capacity,
            frame_send_timeout_ms: 0,
            control_send_timeout_ms: Some(0),
        }
    }

    fn plane() -> FramePlane {
        FramePlane::new(2, 2, PixelData::U8(vec![0; 4])).unwrap()
    }

    #[test]
    fn test_stamps_are_ordered() {
        let (tx, rx) = event_channel(&settings(8));
        tx.abort().unwrap();
        tx.property_changed("exposure", 10.0).unwrap();
        let a = rx.try_recv().unwrap();
        let b = rx.try_recv().unwrap();
        assert!(a.seq < b.seq);
        assert_eq!(b.event, AcquisitionEvent::property("exposure", 10.0));
    }

    #[test]
    fn test_frame_overflow_records_mark() {
        let (tx, rx) = event_channel(&settings(1));
        tx.frame_ready(Coordinate::new().with("t", 0), plane()).unwrap();

        let err = tx
            .frame_ready(Coordinate::new().with("t", 1), plane())
            .unwrap_err();
        assert!(matches!(err, BridgeError::ChannelOverflow { capacity: 1 }));
        assert_eq!(tx.stats().overflows, 1);

        let queued = rx.try_recv().unwrap();
        assert!(rx.has_side_band());
        // The mark comes after the queued frame
        assert!(rx.take_side_band(Some(queued.seq)).is_empty());
        let batch = rx.take_side_band(None);
        assert_eq!(batch.overflows.len(), 1);
        assert!(batch.overflows[0] > queued.seq);
        assert!(!rx.has_side_band());
    }

    #[test]
    fn test_property_coalesces_when_full() {
        let (tx, rx) = event_channel(&settings(1));
        tx.abort().unwrap();
        tx.property_changed("exposure", 10.0).unwrap();
        tx.property_changed("exposure", 20.0).unwrap();
        tx.property_changed("binning", 2i64).unwrap();
        assert_eq!(tx.stats().coalesced, 3);

        let batch = rx.take_side_band(None);
        assert_eq!(batch.properties.len(), 2);
        assert_eq!(batch.properties[0].1, "exposure");
        assert_eq!(batch.properties[0].2, PropertyValue::Float(20.0));
        assert_eq!(batch.properties[1].1, "binning");
        assert!(batch.properties[0].0 < batch.properties[1].0);
    }

    #[test]
    fn test_control_timeout_reports_full() {
        let (tx, _rx) = event_channel(&settings(1));
        tx.abort().unwrap();
        assert!(matches!(
            tx.shutdown(),
            Err(BridgeError::ChannelFull { capacity: 1 })
        ));
    }

    #[test]
    fn test_closed_channel() {
        let (tx, rx) = event_channel(&settings(4));
        drop(rx);
        assert!(matches!(tx.abort(), Err(BridgeError::ChannelClosed(_))));
        assert!(matches!(
            tx.frame_ready(Coordinate::new(), plane()),
            Err(BridgeError::ChannelClosed(_))
        ));
    }

    #[test]
    fn test_send_dispatches_by_kind() {
        let (tx, rx) = event_channel(&settings(1));
        tx.send(AcquisitionEvent::Abort).unwrap();
        // Property on a full queue coalesces instead of failing
        tx.send(AcquisitionEvent::property("gain", 1i64)).unwrap();
        assert!(tx
            .send(AcquisitionEvent::frame(Coordinate::new(), plane()))
            .is_err());
        assert_eq!(rx.len(), 1);
    }
}
