//! Events emitted by the acquisition producer

use crate::types::{AcquisitionShape, Coordinate, FramePlane, PropertyValue};
use std::path::PathBuf;

/// How a sequence ended, as reported by the hardware layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishStatus {
    Completed,
    Aborted,
}

/// Describes a sequence at the moment it starts
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceDescriptor {
    /// Display name of the sequence
    pub name: String,
    /// Declared shape; queried from the hardware core when absent
    pub shape: Option<AcquisitionShape>,
    /// Focus step between z planes in micrometers
    pub z_step_um: Option<f64>,
    /// One session per channel instead of a channel axis
    pub split_channels: bool,
    /// One session per stage position instead of a position axis
    pub split_positions: bool,
    /// Channel configuration names, used to label split layers
    pub channel_names: Vec<String>,
    /// Per-position names and grid sizes, in position index order
    pub positions: Vec<PositionPlan>,
    /// Save every session here once the sequence completes
    pub save_path: Option<PathBuf>,
}

/// A stage position's own layout within a split position sequence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionPlan {
    pub name: Option<String>,
    /// Tiles in this position's grid; overrides the shared `g` length
    pub grid_size: Option<usize>,
}

impl PositionPlan {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            grid_size: None,
        }
    }

    pub fn with_grid(mut self, grid_size: usize) -> Self {
        self.grid_size = Some(grid_size);
        self
    }
}

impl SequenceDescriptor {
    pub fn new(name: impl Into<String>, shape: AcquisitionShape) -> Self {
        Self {
            shape: Some(shape),
            ..Self::from_core(name)
        }
    }

    /// A descriptor whose shape must be queried from the hardware core
    pub fn from_core(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shape: None,
            z_step_um: None,
            split_channels: false,
            split_positions: false,
            channel_names: Vec::new(),
            positions: Vec::new(),
            save_path: None,
        }
    }

    pub fn with_z_step(mut self, z_step_um: f64) -> Self {
        self.z_step_um = Some(z_step_um);
        self
    }

    pub fn with_split_channels(mut self) -> Self {
        self.split_channels = true;
        self
    }

    pub fn with_split_positions(mut self) -> Self {
        self.split_positions = true;
        self
    }

    pub fn with_channel_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channel_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_positions(mut self, positions: Vec<PositionPlan>) -> Self {
        self.positions = positions;
        self
    }

    /// Save the finished sequence to `path`; split layers get a suffix per layer
    pub fn with_save_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.save_path = Some(path.into());
        self
    }
}

/// Hardware-originated event consumed by the synchronization engine
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionEvent {
    /// A new sequence begins with the given shape
    SequenceStarted(SequenceDescriptor),
    /// A plane was acquired at a coordinate
    FrameReady {
        coordinate: Coordinate,
        plane: FramePlane,
    },
    /// A hardware property changed value
    PropertyChanged { name: String, value: PropertyValue },
    /// The running sequence ended
    SequenceFinished(FinishStatus),
    /// The hardware reported a fatal acquisition error
    SequenceError(String),
    /// Cancel the running sequence
    Abort,
    /// A single snapped image for the live preview
    ImageSnapped(FramePlane),
    /// Live preview mode toggled
    LiveModeChanged(bool),
    /// Stop the engine after this event
    Shutdown,
}

impl AcquisitionEvent {
    pub fn frame(coordinate: Coordinate, plane: FramePlane) -> Self {
        AcquisitionEvent::FrameReady { coordinate, plane }
    }

    pub fn property(name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        AcquisitionEvent::PropertyChanged {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Short label for logging
    pub fn label(&self) -> &'static str {
        match self {
            AcquisitionEvent::SequenceStarted(_) => "SequenceStarted",
            AcquisitionEvent::FrameReady { .. } => "FrameReady",
            AcquisitionEvent::PropertyChanged { .. } => "PropertyChanged",
            AcquisitionEvent::SequenceFinished(_) => "SequenceFinished",
            AcquisitionEvent::SequenceError(_) => "SequenceError",
            AcquisitionEvent::Abort => "Abort",
            AcquisitionEvent::ImageSnapped(_) => "ImageSnapped",
            AcquisitionEvent::LiveModeChanged(_) => "LiveModeChanged",
            AcquisitionEvent::Shutdown => "Shutdown",
        }
    }
}

/// An event stamped with its send order
///
/// Stamps are allocated from one counter shared by every sender clone, so
/// they totally order events and side-band marks.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub seq: u64,
    pub event: AcquisitionEvent,
}
