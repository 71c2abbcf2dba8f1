// tests/common/mod.rs
//! Common test utilities for relay integration tests.

pub mod mock_transport;

pub use mock_transport::{MockSink, MockStream, MockTransport};

use playwatch_lib::bus::{EventPayload, Notification, ProcessEvent, ProcessInfo, TimeLimit};
use playwatch_lib::config::RelayConfig;

/// Config with ephemeral ports so tests can bind in parallel.
pub fn test_config() -> RelayConfig {
    RelayConfig {
        push_addr: "127.0.0.1:0".parse().unwrap(),
        control_addr: "127.0.0.1:0".parse().unwrap(),
        ..RelayConfig::default()
    }
}

pub fn roblox_started(pid: u32) -> EventPayload {
    ProcessEvent::RobloxStarted(ProcessInfo {
        pid,
        name: "RobloxPlayerBeta.exe".to_string(),
    })
    .into()
}

pub fn time_limit_exceeded() -> EventPayload {
    Notification::TimeLimitExceeded(TimeLimit {
        child_profile: "kid".to_string(),
        limit_minutes: 60,
        elapsed_minutes: 61,
    })
    .into()
}
