//! Events emitted by the rollout engine for UI consumption.

use serde::{Deserialize, Serialize};

use crate::host::HostState;

/// One engine-to-UI notification.
///
/// `HostChanged` fires on every host-state or timer mutation; `RunStarted`
/// and `RunFinished` bracket a rollout run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    HostChanged {
        hostname: String,
        state: HostState,
        /// Base-copy elapsed seconds; -1 until a copy targets the host.
        timer: i64,
    },
    RunStarted,
    RunFinished {
        /// True when the run ended via `stop()` rather than completion.
        cancelled: bool,
        elapsed_secs: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_roundtrip() {
        let event = FleetEvent::HostChanged {
            hostname: "web-01".to_string(),
            state: HostState::BaseDst,
            timer: 17,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: FleetEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn tagged_representation() {
        let json = serde_json::to_string(&FleetEvent::RunStarted).unwrap();
        assert_eq!(json, r#"{"type":"run_started"}"#);
    }
}
