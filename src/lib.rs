//! # mda-bridge: Acquisition Synchronization Engine
//!
//! Keeps a multi-dimensional viewer in sync with a running microscope
//! acquisition. Hardware callbacks push events onto a bounded channel; a
//! single engine thread resolves each frame's coordinate, grows the session
//! buffer when unbounded dimensions need it, writes the plane and then
//! notifies viewers.
//!
//! ## Architecture
//!
//! - **Channel**: bounded crossbeam queue with overflow marks and property
//!   coalescing for when it is full
//! - **Engine**: event loop and session state machine on its own thread
//! - **Buffer**: sparse arena of planes indexed by acquisition coordinates
//! - **State mirror**: revisioned copy of hardware properties
//! - **Viewer bridge**: read-only access, subscriptions and a drainable
//!   notification queue
//!
//! ## Configuration
//!
//! Engine settings are read from `config.toml` in the platform data
//! directory under `dev.mda-bridge`, or from any TOML/JSON file:
//!
//! - **Linux**: `~/.local/share/dev.mda-bridge/`
//! - **macOS**: `~/Library/Application Support/dev.mda-bridge/`
//! - **Windows**: `%APPDATA%\dev.mda-bridge\`
//!
//! ## Example
//!
//! ```ignore
//! use mda_bridge::{
//!     channel::SequenceDescriptor,
//!     config::BridgeConfig,
//!     engine::SyncEngine,
//!     types::{AcquisitionShape, Coordinate},
//! };
//!
//! let (engine, sender, bridge) = SyncEngine::new(BridgeConfig::load_or_default(None));
//! let handle = engine.spawn()?;
//!
//! let shape = AcquisitionShape::from_pairs([("t", None), ("c", Some(2))])?;
//! sender.sequence_started(SequenceDescriptor::new("timelapse", shape))?;
//! sender.frame_ready(Coordinate::from_pairs([("t", 0), ("c", 1)]), plane)?;
//!
//! for notification in bridge.drain() {
//!     // redraw the updated region
//! }
//! ```

pub mod buffer;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod notify;
pub mod session;
pub mod state;
pub mod types;

// Re-export commonly used types
pub use buffer::{FrameBuffer, WriteOutcome};
pub use channel::{AcquisitionEvent, EventSender, FinishStatus, SequenceDescriptor};
pub use config::BridgeConfig;
pub use engine::{EnginePhase, EngineStats, HardwareCore, SyncEngine, ViewerBridge};
pub use error::{BridgeError, ErrorKind, Result};
pub use notify::Notification;
pub use session::{SequenceSession, SessionId, SessionStatus};
pub use state::StateMirror;
pub use types::{AcquisitionShape, Coordinate, FramePlane, PixelData, PropertyValue};
