//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use mda_bridge::channel::EventSender;
use mda_bridge::config::BridgeConfig;
use mda_bridge::engine::{SyncEngine, ViewerBridge};
use mda_bridge::notify::Notification;
use std::thread::JoinHandle;
use std::time::Duration;

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Config with a short idle tick so stop handles react quickly
pub fn test_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.engine.idle_tick_ms = 5;
    config
}

/// A running engine with its producer and viewer handles
pub struct Harness {
    pub sender: EventSender,
    pub bridge: ViewerBridge,
    handle: Option<JoinHandle<()>>,
}

impl Harness {
    pub fn start(config: BridgeConfig) -> Self {
        let (engine, sender, bridge) = SyncEngine::new(config);
        let handle = engine.spawn().expect("spawn engine thread");
        Self {
            sender,
            bridge,
            handle: Some(handle),
        }
    }

    /// Send Shutdown and wait until every queued event has been processed
    pub fn finish(&mut self) -> Vec<Notification> {
        self.sender.shutdown().expect("send shutdown");
        if let Some(handle) = self.handle.take() {
            handle.join().expect("engine thread panicked");
        }
        self.bridge.drain()
    }
}

/// Wait until `predicate` holds for a drained notification, collecting everything seen
pub fn wait_for(
    bridge: &ViewerBridge,
    mut predicate: impl FnMut(&Notification) -> bool,
) -> Vec<Notification> {
    let deadline = std::time::Instant::now() + test_timeout();
    let mut seen = Vec::new();
    while std::time::Instant::now() < deadline {
        if let Some(n) = bridge.recv_timeout(Duration::from_millis(10)) {
            let done = predicate(&n);
            seen.push(n);
            if done {
                return seen;
            }
        }
    }
    panic!("timed out waiting for notification; saw {:?}", seen);
}

/// Count region updates in a notification list
pub fn region_updates(notifications: &[Notification]) -> usize {
    notifications
        .iter()
        .filter(|n| matches!(n, Notification::RegionUpdated { .. }))
        .count()
}
