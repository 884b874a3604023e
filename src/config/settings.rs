//! Tunable settings for each part of the bridge
//!
//! These are the sections of [`BridgeConfig`](super::BridgeConfig). Every
//! field has a default so partial configuration files are accepted.
//!
//! # Main Types
//!
//! - [`ChannelSettings`] - Event channel capacity and backpressure timeouts
//! - [`BufferSettings`] - Frame buffer growth policy and size limit
//! - [`EngineSettings`] - Overwrite policy, session retention, notifications
//! - [`LoggingSettings`] - Log filter and optional log directory

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default event channel capacity
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default time a frame producer may stall on a full channel
pub const DEFAULT_FRAME_SEND_TIMEOUT_MS: u64 = 50;

/// Default ceiling on slots per buffer (about a million planes)
pub const DEFAULT_MAX_SLOTS: usize = 1 << 20;

/// Default notification queue capacity.
/// 10,000 notifications ≈ 10s of region updates at 1kHz.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 10_000;

/// Event channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Maximum number of queued events
    pub capacity: usize,

    /// How long a `FrameReady` producer blocks on a full channel before the
    /// frame is reported as an overflow
    pub frame_send_timeout_ms: u64,

    /// How long control events block on a full channel; `None` blocks indefinitely
    pub control_send_timeout_ms: Option<u64>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CHANNEL_CAPACITY,
            frame_send_timeout_ms: DEFAULT_FRAME_SEND_TIMEOUT_MS,
            control_send_timeout_ms: None,
        }
    }
}

impl ChannelSettings {
    pub fn frame_send_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_send_timeout_ms)
    }

    pub fn control_send_timeout(&self) -> Option<Duration> {
        self.control_send_timeout_ms.map(Duration::from_millis)
    }
}

/// Frame buffer growth settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSettings {
    /// Multiplier applied to an unbounded extent when it must grow
    pub growth_factor: f64,

    /// Starting extent of unbounded dimensions
    pub initial_unbounded_extent: usize,

    /// Upper bound on allocated slots; growing past it is a fatal error
    pub max_slots: usize,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            growth_factor: 2.0,
            initial_unbounded_extent: 1,
            max_slots: DEFAULT_MAX_SLOTS,
        }
    }
}

/// What to do when a frame arrives for an already-written coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OverwritePolicy {
    /// Re-acquisition replaces the plane
    #[default]
    LastWriteWins,
    /// Replace the plane and report a recoverable anomaly
    FlagAnomaly,
    /// Keep the first plane and report a recoverable anomaly
    KeepFirst,
}

impl std::fmt::Display for OverwritePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverwritePolicy::LastWriteWins => write!(f, "last write wins"),
            OverwritePolicy::FlagAnomaly => write!(f, "flag anomaly"),
            OverwritePolicy::KeepFirst => write!(f, "keep first"),
        }
    }
}

/// Synchronization engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub overwrite_policy: OverwritePolicy,

    /// Keep finished sessions in the registry when a new sequence starts
    pub retain_previous_sessions: bool,

    /// Capacity of the drainable notification queue
    pub notification_capacity: usize,

    /// How often the idle engine wakes to apply side-band updates
    pub idle_tick_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            overwrite_policy: OverwritePolicy::default(),
            retain_previous_sessions: false,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            idle_tick_ms: 100,
        }
    }
}

impl EngineSettings {
    pub fn idle_tick(&self) -> Duration {
        Duration::from_millis(self.idle_tick_ms.max(1))
    }
}

/// Logging settings used by the binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,

    /// Directory for daily rolling log files; console only when unset
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info,mda_bridge=debug".to_string(),
            log_dir: None,
        }
    }
}
