//! Simulated microscope for demos and tests
//!
//! Provides a [`HardwareCore`] with fixed camera parameters and a producer
//! that plays a whole multi-dimensional acquisition into an [`EventSender`].
//!
//! # Pixel Patterns
//!
//! - [`PlanePattern::Constant`] - every sample has the same value
//! - [`PlanePattern::Gradient`] - horizontal ramp offset by the frame index
//! - [`PlanePattern::FrameIndex`] - every sample holds the frame's linear index
//!
//! # Example
//!
//! ```ignore
//! use mda_bridge::engine::{SimulatedAcquisition, SimulatedCore};
//!
//! let core = SimulatedCore::default();
//! let acquisition = SimulatedAcquisition::new("demo", shape, &core)
//!     .with_unbounded_length(10);
//! let frames = acquisition.run(&sender)?;
//! ```

use super::hardware::HardwareCore;
use super::preview::EXPOSURE_PROPERTY;
use crate::channel::{EventSender, FinishStatus, SequenceDescriptor};
use crate::error::{BridgeError, Result};
use crate::types::{axis, AcquisitionShape, Coordinate, FramePlane, PixelData, StagePosition};
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;

/// Hardware core with fixed camera parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedCore {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub pixel_size_um: f64,
    pub exposure_ms: f64,
    /// Shape reported for sequences started without one
    pub shape: Option<AcquisitionShape>,
}

impl Default for SimulatedCore {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            bit_depth: 16,
            pixel_size_um: 0.65,
            exposure_ms: 10.0,
            shape: None,
        }
    }
}

impl HardwareCore for SimulatedCore {
    fn image_width(&self) -> u32 {
        self.width
    }

    fn image_height(&self) -> u32 {
        self.height
    }

    fn bit_depth(&self) -> u8 {
        self.bit_depth
    }

    fn pixel_size_um(&self) -> f64 {
        self.pixel_size_um
    }

    fn exposure_ms(&self) -> f64 {
        self.exposure_ms
    }

    fn sequence_shape(&self) -> Option<AcquisitionShape> {
        self.shape.clone()
    }
}

/// How simulated planes are filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanePattern {
    Constant(u32),
    #[default]
    Gradient,
    FrameIndex,
}

/// Plays a complete acquisition into an event channel
#[derive(Debug, Clone)]
pub struct SimulatedAcquisition {
    name: String,
    shape: AcquisitionShape,
    width: u32,
    height: u32,
    bit_depth: u8,
    exposure_ms: f64,
    pattern: PlanePattern,
    /// Frames produced along unbounded dimensions
    unbounded_length: usize,
    z_step_um: f64,
    frame_interval: Duration,
    split_channels: bool,
    save_path: Option<PathBuf>,
}

impl SimulatedAcquisition {
    /// Acquisition of `shape` with the camera geometry of `core`
    pub fn new(name: impl Into<String>, shape: AcquisitionShape, core: &SimulatedCore) -> Self {
        Self {
            name: name.into(),
            shape,
            width: core.width,
            height: core.height,
            bit_depth: core.bit_depth,
            exposure_ms: core.exposure_ms,
            pattern: PlanePattern::default(),
            unbounded_length: 1,
            z_step_um: 1.0,
            frame_interval: Duration::ZERO,
            split_channels: false,
            save_path: None,
        }
    }

    pub fn with_pattern(mut self, pattern: PlanePattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Number of indices to acquire along each unbounded dimension
    pub fn with_unbounded_length(mut self, length: usize) -> Self {
        self.unbounded_length = length.max(1);
        self
    }

    pub fn with_z_step(mut self, z_step_um: f64) -> Self {
        self.z_step_um = z_step_um;
        self
    }

    /// Pause between frames, to mimic camera readout
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Ask the engine for one session per channel
    pub fn with_split_channels(mut self, split: bool) -> Self {
        self.split_channels = split;
        self
    }

    /// Ask the engine to save the sequence when it completes
    pub fn with_save_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.save_path = Some(path.into());
        self
    }

    fn descriptor(&self) -> SequenceDescriptor {
        let mut descriptor = SequenceDescriptor::new(self.name.clone(), self.shape.clone())
            .with_z_step(self.z_step_um);
        if self.split_channels {
            descriptor = descriptor.with_split_channels();
        }
        if let Some(path) = &self.save_path {
            descriptor = descriptor.with_save_path(path.clone());
        }
        descriptor
    }

    /// Extents iterated by the simulation
    pub fn extents(&self) -> Vec<usize> {
        self.shape
            .dims()
            .iter()
            .map(|d| d.length.bound().unwrap_or(self.unbounded_length))
            .collect()
    }

    /// Every coordinate in acquisition order (last dimension fastest)
    pub fn coordinates(&self) -> Vec<Coordinate> {
        let extents = self.extents();
        let total: usize = extents.iter().product();
        let mut position = vec![0usize; extents.len()];
        let mut coordinates = Vec::with_capacity(total);

        for _ in 0..total {
            coordinates.push(self.shape.coordinate_at(&position));
            for dim in (0..position.len()).rev() {
                position[dim] += 1;
                if position[dim] < extents[dim] {
                    break;
                }
                position[dim] = 0;
            }
        }
        coordinates
    }

    /// Build the plane for the `index`-th frame at `coord`
    pub fn plane(&self, index: usize, coord: &Coordinate) -> Result<FramePlane> {
        let len = self.width as usize * self.height as usize;
        let width = self.width.max(1) as usize;
        let max = if self.bit_depth >= 32 {
            u32::MAX
        } else {
            (1u32 << self.bit_depth.max(1)) - 1
        };
        let value_at = |i: usize| -> u32 {
            let v = match self.pattern {
                PlanePattern::Constant(v) => v,
                PlanePattern::Gradient => ((i % width) + index) as u32,
                PlanePattern::FrameIndex => index as u32,
            };
            v.min(max)
        };

        let pixels = match self.bit_depth {
            0..=8 => PixelData::U8((0..len).map(|i| value_at(i) as u8).collect()),
            9..=16 => PixelData::U16((0..len).map(|i| value_at(i) as u16).collect()),
            _ => PixelData::U32((0..len).map(value_at).collect()),
        };

        let z = coord.get(axis::Z).unwrap_or(0) as f64 * self.z_step_um;
        let p = coord.get(axis::POSITION).unwrap_or(0) as f64 * 100.0;
        Ok(FramePlane::new(self.width, self.height, pixels)?
            .with_exposure(self.exposure_ms)
            .with_stage(StagePosition::xyz(p, p, z)))
    }

    /// Send the whole sequence. Returns the number of frames delivered.
    ///
    /// A frame overflow is not fatal to the producer; the engine fails the
    /// session and the remaining frames are still offered.
    pub fn run(&self, sender: &EventSender) -> Result<usize> {
        tracing::info!("Simulating '{}' with shape {}", self.name, self.shape);

        sender.property_changed(EXPOSURE_PROPERTY, self.exposure_ms)?;
        sender.sequence_started(self.descriptor())?;

        let mut delivered = 0;
        for (index, coord) in self.coordinates().into_iter().enumerate() {
            let plane = self.plane(index, &coord)?;
            match sender.frame_ready(coord, plane) {
                Ok(()) => delivered += 1,
                Err(BridgeError::ChannelOverflow { .. }) => {}
                Err(e) => return Err(e),
            }
            if !self.frame_interval.is_zero() {
                std::thread::sleep(self.frame_interval);
            }
        }

        sender.sequence_finished(FinishStatus::Completed)?;
        tracing::info!("Simulation '{}' delivered {} frames", self.name, delivered);
        Ok(delivered)
    }

    /// Run on a dedicated producer thread
    pub fn spawn(self, sender: EventSender) -> std::io::Result<JoinHandle<Result<usize>>> {
        std::thread::Builder::new()
            .name("mda-simulator".to_string())
            .spawn(move || self.run(&sender))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{event_channel, AcquisitionEvent};
    use crate::config::ChannelSettings;

    fn shape() -> AcquisitionShape {
        AcquisitionShape::from_pairs([("t", None), ("c", Some(2))]).unwrap()
    }

    fn core() -> SimulatedCore {
        SimulatedCore {
            width: 4,
            height: 2,
            bit_depth: 8,
            ..Default::default()
        }
    }

    #[test]
    fn test_coordinates_row_major() {
        let acq = SimulatedAcquisition::new("s", shape(), &core()).with_unbounded_length(2);
        let coords = acq.coordinates();
        assert_eq!(coords.len(), 4);
        assert_eq!(coords[0], Coordinate::from_pairs([("t", 0), ("c", 0)]));
        assert_eq!(coords[1], Coordinate::from_pairs([("t", 0), ("c", 1)]));
        assert_eq!(coords[3], Coordinate::from_pairs([("t", 1), ("c", 1)]));
    }

    #[test]
    fn test_plane_patterns() {
        let acq = SimulatedAcquisition::new("s", shape(), &core());
        let coord = Coordinate::new();

        let gradient = acq.plane(3, &coord).unwrap();
        assert_eq!(gradient.pixels.sample(0), Some(3));
        assert_eq!(gradient.pixels.sample(1), Some(4));
        assert_eq!(gradient.pixels.bit_depth(), 8);

        let constant = acq
            .clone()
            .with_pattern(PlanePattern::Constant(1000))
            .plane(0, &coord)
            .unwrap();
        // Clamped to the 8-bit range
        assert_eq!(constant.pixels.sample(5), Some(255));

        let indexed = acq.with_pattern(PlanePattern::FrameIndex).plane(7, &coord).unwrap();
        assert_eq!(indexed.pixels.sample(7), Some(7));
    }

    #[test]
    fn test_sample_width_follows_bit_depth() {
        let coord = Coordinate::new();
        for (bit_depth, width, max) in [(8u8, 8u8, 255u32), (12, 16, 4095), (16, 16, 65535), (32, 32, u32::MAX)] {
            let core = SimulatedCore {
                bit_depth,
                ..core()
            };
            let plane = SimulatedAcquisition::new("s", shape(), &core)
                .with_pattern(PlanePattern::Constant(u32::MAX))
                .plane(0, &coord)
                .unwrap();
            assert_eq!(plane.pixels.bit_depth(), width);
            assert_eq!(plane.pixels.sample(0), Some(max));
        }
    }

    #[test]
    fn test_stage_follows_z() {
        let shape = AcquisitionShape::from_pairs([("z", Some(3))]).unwrap();
        let acq = SimulatedAcquisition::new("s", shape, &core()).with_z_step(2.5);
        let plane = acq.plane(0, &Coordinate::new().with("z", 2)).unwrap();
        assert_eq!(plane.metadata.stage.and_then(|s| s.z), Some(5.0));
    }

    #[test]
    fn test_run_emits_full_sequence() {
        let (tx, rx) = event_channel(&ChannelSettings::default());
        let acq = SimulatedAcquisition::new("s", shape(), &core()).with_unbounded_length(3);
        assert_eq!(acq.run(&tx).unwrap(), 6);

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.event)
            .collect();
        assert_eq!(events.len(), 9);
        assert!(matches!(events[0], AcquisitionEvent::PropertyChanged { .. }));
        assert!(matches!(events[1], AcquisitionEvent::SequenceStarted(_)));
        assert_eq!(
            events[8],
            AcquisitionEvent::SequenceFinished(FinishStatus::Completed)
        );
    }

    #[test]
    fn test_descriptor_carries_layout_options() {
        let descriptor = SimulatedAcquisition::new("s", shape(), &core())
            .with_split_channels(true)
            .with_save_path("out.mdajsonl")
            .descriptor();
        assert!(descriptor.split_channels);
        assert!(!descriptor.split_positions);
        assert_eq!(descriptor.save_path, Some(PathBuf::from("out.mdajsonl")));
        assert_eq!(descriptor.z_step_um, Some(1.0));
    }

    #[test]
    fn test_core_reports_parameters() {
        let core = SimulatedCore::default();
        assert_eq!(core.image_width(), 64);
        assert_eq!(core.bit_depth(), 16);
        assert!(core.sequence_shape().is_none());
    }
}
