//! Query interface to the hardware control layer
//!
//! The engine only reads from the hardware core, and only when a sequence
//! starts: image geometry and calibration go into the session metadata, and
//! the declared shape is fetched when the start event does not carry one.

use crate::types::AcquisitionShape;

/// Read-only view of the microscope control core
#[cfg_attr(test, mockall::automock)]
pub trait HardwareCore: Send {
    /// Camera image width in pixels
    fn image_width(&self) -> u32;

    /// Camera image height in pixels
    fn image_height(&self) -> u32;

    /// Bits per pixel of acquired images
    fn bit_depth(&self) -> u8;

    /// Calibrated pixel size in micrometers, 0 when uncalibrated
    fn pixel_size_um(&self) -> f64;

    /// Current exposure in milliseconds
    fn exposure_ms(&self) -> f64;

    /// Shape of the sequence the core is about to run, if known
    fn sequence_shape(&self) -> Option<AcquisitionShape>;
}

/// Stand-in used when no hardware core is attached
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedCore;

impl HardwareCore for DetachedCore {
    fn image_width(&self) -> u32 {
        0
    }

    fn image_height(&self) -> u32 {
        0
    }

    fn bit_depth(&self) -> u8 {
        0
    }

    fn pixel_size_um(&self) -> f64 {
        0.0
    }

    fn exposure_ms(&self) -> f64 {
        0.0
    }

    fn sequence_shape(&self) -> Option<AcquisitionShape> {
        None
    }
}
