//! Session data types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{axis, AcquisitionShape};

/// Identifier of a sequence session, unique for the lifetime of an engine
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl SessionId {
    #[inline]
    pub fn index(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle status of a sequence session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Frames are being accepted
    Running,
    /// The hardware reported the sequence finished
    Completed,
    /// The sequence was cancelled
    Aborted,
    /// A fatal error ended the sequence; partial data is retained
    Errored,
}

impl SessionStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, SessionStatus::Running)
    }

    /// Whether the session will accept no further frames
    pub fn is_terminal(&self) -> bool {
        !self.is_running()
    }

    /// Display name for the status
    pub fn display_name(&self) -> &'static str {
        match self {
            SessionStatus::Running => "Running",
            SessionStatus::Completed => "Completed",
            SessionStatus::Aborted => "Aborted",
            SessionStatus::Errored => "Errored",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Metadata describing a recorded sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Name/title of the sequence
    pub name: String,
    /// When the sequence started
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// When the sequence left the running state
    #[serde(default)]
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Plane width in pixels, as reported by the hardware core
    #[serde(default)]
    pub image_width: u32,
    /// Plane height in pixels
    #[serde(default)]
    pub image_height: u32,
    /// Bits per pixel
    #[serde(default)]
    pub bit_depth: u8,
    /// Pixel size in micrometers (0 when uncalibrated)
    #[serde(default)]
    pub pixel_size_um: f64,
    /// Focus step between z planes in micrometers
    #[serde(default)]
    pub z_step_um: Option<f64>,
    /// Exposure at sequence start in milliseconds
    #[serde(default)]
    pub exposure_ms: f64,
    /// Layer label when the acquisition is split by position or channel
    #[serde(default)]
    pub layer: Option<String>,
}

impl Default for SessionMetadata {
    fn default() -> Self {
        Self {
            name: String::from("Untitled Sequence"),
            started_at: chrono::Utc::now(),
            finished_at: None,
            image_width: 0,
            image_height: 0,
            bit_depth: 0,
            pixel_size_um: 0.0,
            z_step_um: None,
            exposure_ms: 0.0,
            layer: None,
        }
    }
}

impl SessionMetadata {
    /// Create new metadata with a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Axis labels for a viewer: the acquisition dimensions followed by `y`, `x`
    pub fn axis_labels(&self, shape: &AcquisitionShape) -> Vec<String> {
        shape
            .names()
            .into_iter()
            .map(str::to_string)
            .chain([axis::Y.to_string(), axis::X.to_string()])
            .collect()
    }

    /// Per-axis display scale matching [`axis_labels`](Self::axis_labels).
    ///
    /// Acquisition axes scale 1.0 except `z`, which takes the z step. The
    /// image axes take the pixel size when the camera is calibrated.
    pub fn scale(&self, shape: &AcquisitionShape) -> Vec<f64> {
        let pixel = if self.pixel_size_um != 0.0 {
            self.pixel_size_um
        } else {
            1.0
        };
        shape
            .dims()
            .iter()
            .map(|d| match (d.name.as_str(), self.z_step_um) {
                (axis::Z, Some(step)) if self.pixel_size_um != 0.0 => step,
                _ => 1.0,
            })
            .chain([pixel, pixel])
            .collect()
    }
}

/// Summary of a session for listing in the viewer
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub id: SessionId,
    pub name: String,
    pub shape: AcquisitionShape,
    pub status: SessionStatus,
    /// Number of written planes
    pub frames: usize,
    /// Current extents of the buffer
    pub capacity: Vec<usize>,
    /// Whether the session survives the start of the next sequence
    pub retained: bool,
    /// Cause of a fatal error, if the session errored
    pub failure: Option<String>,
    /// Layer label of a split acquisition
    pub layer: Option<String>,
}
