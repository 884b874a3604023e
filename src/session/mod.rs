//! Acquisition sequence sessions
//!
//! A session is created when a sequence starts and binds the declared
//! [`AcquisitionShape`](crate::types::AcquisitionShape) to a fresh
//! [`FrameBuffer`](crate::buffer::FrameBuffer) and a status flag.
//!
//! # Lifecycle
//!
//! - `Running` while frames are accepted
//! - `Completed`, `Aborted` or `Errored` once the sequence ends; the buffer
//!   remains readable
//! - Released from the [`SessionRegistry`] when the next sequence starts,
//!   unless retained

pub mod registry;
pub mod sequence;
pub mod types;

pub use registry::SessionRegistry;
pub use sequence::SequenceSession;
pub use types::{SessionId, SessionMetadata, SessionStatus, SessionSummary};
