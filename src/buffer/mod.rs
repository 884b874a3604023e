//! Frame storage for acquisition sequences
//!
//! - [`indexer`] - Pure coordinate → slot resolution
//! - [`FrameBuffer`] - Growable arena of planes for one sequence
//! - [`persist`] - Sparse JSON Lines serialization of a buffer

pub mod frame_buffer;
pub mod indexer;
pub mod persist;

pub use frame_buffer::{FrameBuffer, WriteOutcome};
pub use indexer::{canonical_extents, resolve, Resolution};
pub use persist::{load_from_file, save_to_file};
