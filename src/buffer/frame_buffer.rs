//! Growable multi-dimensional plane store
//!
//! A [`FrameBuffer`] is an arena of slots addressed by the row-major offset
//! of a coordinate over the buffer's current extents. Growth along unbounded
//! dimensions is an explicit step ([`FrameBuffer::ensure_capacity`]) separate
//! from [`FrameBuffer::write`], and is geometric so that an open-ended time
//! series does not reallocate on every frame.
//!
//! # Concurrency
//!
//! One writer (the engine thread) and any number of readers. Slots hold
//! `Arc<FramePlane>`; a write swaps the pointer under a short write lock and
//! readers clone the pointer under a read lock, so a reader observes either
//! the previous plane or the new one.

use super::indexer::{self, Resolution};
use crate::config::BufferSettings;
use crate::error::{BridgeError, Result};
use crate::types::{AcquisitionShape, Coordinate, FramePlane};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Whether a write landed in an empty slot or replaced a plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Fresh,
    Overwrite,
}

impl WriteOutcome {
    pub fn is_overwrite(&self) -> bool {
        matches!(self, WriteOutcome::Overwrite)
    }
}

#[derive(Debug)]
struct Slots {
    extents: Vec<usize>,
    slots: Vec<Option<Arc<FramePlane>>>,
    written: usize,
}

/// Sparse, growable store of planes for one acquisition sequence
#[derive(Debug)]
pub struct FrameBuffer {
    shape: AcquisitionShape,
    settings: BufferSettings,
    inner: RwLock<Slots>,
}

impl FrameBuffer {
    /// Allocate a buffer at the shape's starting extents
    pub fn new(shape: AcquisitionShape, settings: BufferSettings) -> Result<Self> {
        let extents: Vec<usize> = shape
            .dims()
            .iter()
            .map(|d| {
                d.length
                    .bound()
                    .unwrap_or_else(|| settings.initial_unbounded_extent.max(1))
            })
            .collect();
        let slots = allocate_slots(&extents, settings.max_slots)?;

        Ok(Self {
            shape,
            settings,
            inner: RwLock::new(Slots {
                extents,
                slots,
                written: 0,
            }),
        })
    }

    pub fn shape(&self) -> &AcquisitionShape {
        &self.shape
    }

    /// Current extents along each dimension, in shape order
    pub fn capacity(&self) -> Vec<usize> {
        self.read_slots().extents.clone()
    }

    /// Number of allocated slots
    pub fn slot_count(&self) -> usize {
        self.read_slots().slots.len()
    }

    /// Number of occupied slots
    pub fn written_count(&self) -> usize {
        self.read_slots().written
    }

    pub fn is_empty(&self) -> bool {
        self.written_count() == 0
    }

    /// Grow along unbounded dimensions so that `coord` fits.
    ///
    /// Returns `true` if the buffer grew. Capacity never shrinks.
    pub fn ensure_capacity(&self, coord: &Coordinate) -> Result<bool> {
        let mut inner = self.write_slots();

        let required = match indexer::resolve(&self.shape, &inner.extents, coord)? {
            Resolution::Slot { .. } => return Ok(false),
            Resolution::Grow { required, .. } => required,
        };

        let new_extents = grown_extents(
            &inner.extents,
            &required,
            self.settings.growth_factor,
            self.settings.max_slots,
        );

        let mut new_slots = allocate_slots(&new_extents, self.settings.max_slots)?;
        let state = &mut *inner;
        for (old_linear, slot) in state.slots.iter_mut().enumerate() {
            if let Some(plane) = slot.take() {
                let position = unravel(old_linear, &state.extents);
                // Extents only grow, so every old position fits
                if let Some(new_linear) = indexer::linear_offset(&position, &new_extents) {
                    new_slots[new_linear] = Some(plane);
                }
            }
        }

        tracing::debug!(
            "Frame buffer grew {:?} -> {:?} ({} slots)",
            state.extents,
            new_extents,
            new_slots.len()
        );
        state.extents = new_extents;
        state.slots = new_slots;
        Ok(true)
    }

    /// Store a plane, replacing any plane already at `coord`.
    ///
    /// Capacity must have been reserved with [`ensure_capacity`](Self::ensure_capacity).
    pub fn write(&self, coord: &Coordinate, plane: impl Into<Arc<FramePlane>>) -> Result<WriteOutcome> {
        let mut inner = self.write_slots();
        let linear = match indexer::resolve(&self.shape, &inner.extents, coord)? {
            Resolution::Slot { linear, .. } => linear,
            Resolution::Grow { .. } => return Err(BridgeError::CapacityNotReserved(coord.clone())),
        };

        let previous = inner.slots[linear].replace(plane.into());
        if previous.is_some() {
            Ok(WriteOutcome::Overwrite)
        } else {
            inner.written += 1;
            Ok(WriteOutcome::Fresh)
        }
    }

    /// Plane at `coord`, or `None` if not yet written (or outside the shape)
    pub fn read(&self, coord: &Coordinate) -> Option<Arc<FramePlane>> {
        let inner = self.read_slots();
        match indexer::resolve(&self.shape, &inner.extents, coord) {
            Ok(Resolution::Slot { linear, .. }) => inner.slots[linear].clone(),
            _ => None,
        }
    }

    pub fn contains(&self, coord: &Coordinate) -> bool {
        self.read(coord).is_some()
    }

    /// All written coordinates with their planes, in slot order
    pub fn written(&self) -> Vec<(Coordinate, Arc<FramePlane>)> {
        let inner = self.read_slots();
        inner
            .slots
            .iter()
            .enumerate()
            .filter_map(|(linear, slot)| {
                slot.as_ref().map(|plane| {
                    let position = unravel(linear, &inner.extents);
                    (self.shape.coordinate_at(&position), Arc::clone(plane))
                })
            })
            .collect()
    }

    fn read_slots(&self) -> RwLockReadGuard<'_, Slots> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slots(&self) -> RwLockWriteGuard<'_, Slots> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Extents after growing to fit `required`.
///
/// Growing dimensions target the geometric extent. When that would exceed
/// `max_slots` they are trimmed back towards `required`, never below it; if
/// `required` itself does not fit, it is returned as is and allocation fails.
fn grown_extents(current: &[usize], required: &[usize], growth_factor: f64, max_slots: usize) -> Vec<usize> {
    let minimal: Vec<usize> = current.iter().zip(required).map(|(&c, &r)| c.max(r)).collect();
    let geometric: Vec<usize> = current
        .iter()
        .zip(&minimal)
        .map(|(&c, &needed)| {
            if needed <= c {
                c
            } else {
                let scaled = (c as f64 * growth_factor).ceil();
                // Float to int casts saturate
                needed.max(scaled as usize)
            }
        })
        .collect();

    if indexer::slot_count(&geometric).is_some_and(|n| n <= max_slots) {
        return geometric;
    }
    let Some(mut total) = indexer::slot_count(&minimal).filter(|&n| n <= max_slots) else {
        return minimal;
    };

    let mut extents = minimal;
    for axis in 0..extents.len() {
        if geometric[axis] == extents[axis] || extents[axis] == 0 {
            continue;
        }
        let others = total / extents[axis];
        let fits = if others == 0 { geometric[axis] } else { max_slots / others };
        extents[axis] = geometric[axis].min(fits).max(extents[axis]);
        total = others * extents[axis];
    }
    extents
}

fn allocate_slots(extents: &[usize], max_slots: usize) -> Result<Vec<Option<Arc<FramePlane>>>> {
    let count = indexer::slot_count(extents).ok_or_else(|| BridgeError::BufferGrowthFailure {
        requested: usize::MAX,
        reason: format!("slot count for extents {:?} overflows", extents),
    })?;
    if count > max_slots {
        return Err(BridgeError::BufferGrowthFailure {
            requested: count,
            reason: format!("exceeds configured maximum of {} slots", max_slots),
        });
    }

    let mut slots = Vec::new();
    slots
        .try_reserve_exact(count)
        .map_err(|e| BridgeError::BufferGrowthFailure {
            requested: count,
            reason: e.to_string(),
        })?;
    slots.resize(count, None);
    Ok(slots)
}

/// Inverse of the row-major offset
fn unravel(mut linear: usize, extents: &[usize]) -> Vec<usize> {
    let mut position = vec![0; extents.len()];
    for (axis, &extent) in extents.iter().enumerate().rev() {
        position[axis] = linear % extent;
        linear /= extent;
    }
    position
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelData;

    fn plane(value: u16) -> FramePlane {
        FramePlane::new(2, 2, PixelData::U16(vec![value; 4])).unwrap()
    }

    fn settings() -> BufferSettings {
        BufferSettings::default()
    }

    #[test]
    fn test_write_then_read() {
        let shape = AcquisitionShape::from_pairs([("t", Some(3)), ("c", Some(2))]).unwrap();
        let buffer = FrameBuffer::new(shape, settings()).unwrap();
        let coord = Coordinate::from_pairs([("t", 1), ("c", 1)]);

        assert!(buffer.read(&coord).is_none());
        assert_eq!(buffer.write(&coord, plane(7)).unwrap(), WriteOutcome::Fresh);
        assert_eq!(buffer.read(&coord).unwrap().pixels.sample(0), Some(7));
        assert_eq!(buffer.written_count(), 1);
    }

    #[test]
    fn test_overwrite_is_not_an_error() {
        let shape = AcquisitionShape::from_pairs([("t", Some(1))]).unwrap();
        let buffer = FrameBuffer::new(shape, settings()).unwrap();
        let coord = Coordinate::new();

        buffer.write(&coord, plane(1)).unwrap();
        assert_eq!(buffer.write(&coord, plane(2)).unwrap(), WriteOutcome::Overwrite);
        assert_eq!(buffer.read(&coord).unwrap().pixels.sample(0), Some(2));
        assert_eq!(buffer.written_count(), 1);
    }

    #[test]
    fn test_write_requires_capacity() {
        let shape = AcquisitionShape::from_pairs([("t", None)]).unwrap();
        let buffer = FrameBuffer::new(shape, settings()).unwrap();
        let coord = Coordinate::new().with("t", 4);

        let err = buffer.write(&coord, plane(1)).unwrap_err();
        assert!(matches!(err, BridgeError::CapacityNotReserved(_)));

        assert!(buffer.ensure_capacity(&coord).unwrap());
        assert!(!buffer.ensure_capacity(&coord).unwrap());
        buffer.write(&coord, plane(1)).unwrap();
    }

    #[test]
    fn test_growth_is_geometric_and_preserves_planes() {
        let shape = AcquisitionShape::from_pairs([("t", None), ("c", Some(2))]).unwrap();
        let buffer = FrameBuffer::new(shape, settings()).unwrap();

        for t in 0..5 {
            for c in 0..2 {
                let coord = Coordinate::from_pairs([("t", t), ("c", c)]);
                buffer.ensure_capacity(&coord).unwrap();
                buffer.write(&coord, plane((t * 10 + c) as u16)).unwrap();
            }
        }

        // 1 -> 2 -> 4 -> 8
        assert_eq!(buffer.capacity(), vec![8, 2]);
        for t in 0..5 {
            for c in 0..2 {
                let coord = Coordinate::from_pairs([("t", t), ("c", c)]);
                assert_eq!(
                    buffer.read(&coord).unwrap().pixels.sample(0),
                    Some((t * 10 + c) as u32)
                );
            }
        }
    }

    #[test]
    fn test_capacity_never_shrinks() {
        let shape = AcquisitionShape::from_pairs([("t", None)]).unwrap();
        let buffer = FrameBuffer::new(shape, settings()).unwrap();
        let mut last = buffer.capacity()[0];
        for t in [3, 1, 9, 2, 20, 0] {
            buffer.ensure_capacity(&Coordinate::new().with("t", t)).unwrap();
            let now = buffer.capacity()[0];
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn test_growth_limit_is_reported() {
        let shape = AcquisitionShape::from_pairs([("t", None)]).unwrap();
        let limited = BufferSettings {
            max_slots: 16,
            ..BufferSettings::default()
        };
        let buffer = FrameBuffer::new(shape, limited).unwrap();
        buffer.write(&Coordinate::new(), plane(1)).unwrap();

        let err = buffer.ensure_capacity(&Coordinate::new().with("t", 100)).unwrap_err();
        assert!(matches!(err, BridgeError::BufferGrowthFailure { .. }));
        // Existing data untouched
        assert_eq!(buffer.capacity(), vec![1]);
        assert!(buffer.read(&Coordinate::new()).is_some());
    }

    #[test]
    fn test_growth_clamps_to_slot_limit() {
        let shape = AcquisitionShape::from_pairs([("t", None)]).unwrap();
        let limited = BufferSettings {
            max_slots: 10,
            ..BufferSettings::default()
        };
        let buffer = FrameBuffer::new(shape, limited).unwrap();
        for t in 0..8 {
            let coord = Coordinate::new().with("t", t);
            buffer.ensure_capacity(&coord).unwrap();
            buffer.write(&coord, plane(t as u16)).unwrap();
        }
        assert_eq!(buffer.capacity(), vec![8]);

        // Doubling would need 16 slots; the remaining room is used instead
        assert!(buffer.ensure_capacity(&Coordinate::new().with("t", 8)).unwrap());
        assert_eq!(buffer.capacity(), vec![10]);
        buffer.ensure_capacity(&Coordinate::new().with("t", 9)).unwrap();
        buffer.write(&Coordinate::new().with("t", 9), plane(9)).unwrap();
        assert_eq!(buffer.read(&Coordinate::new().with("t", 3)).unwrap().pixels.sample(0), Some(3));

        let err = buffer.ensure_capacity(&Coordinate::new().with("t", 10)).unwrap_err();
        assert!(matches!(err, BridgeError::BufferGrowthFailure { requested: 11, .. }));
        assert_eq!(buffer.capacity(), vec![10]);
    }

    #[test]
    fn test_growth_clamps_with_bounded_dimensions() {
        let shape = AcquisitionShape::from_pairs([("t", None), ("c", Some(2)), ("z", Some(10))]).unwrap();
        assert_eq!(grown_extents(&[32768, 2, 10], &[32769, 2, 10], 2.0, 1 << 20), vec![52428, 2, 10]);
        assert_eq!(grown_extents(&[4, 2, 10], &[5, 2, 10], 2.0, 1 << 20), vec![8, 2, 10]);

        let limited = BufferSettings {
            max_slots: 100,
            ..BufferSettings::default()
        };
        let buffer = FrameBuffer::new(shape, limited).unwrap();
        buffer
            .ensure_capacity(&Coordinate::from_pairs([("t", 4), ("c", 1), ("z", 9)]))
            .unwrap();
        assert_eq!(buffer.capacity(), vec![5, 2, 10]);
    }

    #[test]
    fn test_written_lists_coordinates() {
        let shape = AcquisitionShape::from_pairs([("t", Some(2)), ("c", Some(2))]).unwrap();
        let buffer = FrameBuffer::new(shape, settings()).unwrap();
        let a = Coordinate::from_pairs([("t", 0), ("c", 1)]);
        let b = Coordinate::from_pairs([("t", 1), ("c", 0)]);
        buffer.write(&a, plane(1)).unwrap();
        buffer.write(&b, plane(2)).unwrap();

        let coords: Vec<Coordinate> = buffer.written().into_iter().map(|(c, _)| c).collect();
        assert_eq!(coords, vec![a, b]);
    }

    #[test]
    fn test_unravel_inverts_offset() {
        let extents = [3, 4, 5];
        for linear in 0..60 {
            let pos = unravel(linear, &extents);
            assert_eq!(indexer::linear_offset(&pos, &extents), Some(linear));
        }
    }

    #[test]
    fn test_concurrent_readers_see_whole_planes() {
        let shape = AcquisitionShape::from_pairs([("t", Some(1))]).unwrap();
        let buffer = Arc::new(FrameBuffer::new(shape, settings()).unwrap());
        buffer.write(&Coordinate::new(), plane(0)).unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let p = buffer.read(&Coordinate::new()).unwrap();
                        let first = p.pixels.sample(0);
                        assert!((0..4).all(|i| p.pixels.sample(i) == first));
                    }
                })
            })
            .collect();

        for v in 1..500u16 {
            buffer.write(&Coordinate::new(), plane(v)).unwrap();
        }
        for r in readers {
            r.join().unwrap();
        }
    }
}
