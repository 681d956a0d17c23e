//! Inter-context wire protocol
//!
//! Every message exchanged between presentation clients, the
//! Coordinator, and the Session Engine's host context is a
//! JSON-shaped envelope discriminated by `type`. Contexts share no
//! memory; these envelopes are the only way state and commands cross
//! the boundary.

use crate::state::{SessionState, StatePatch};
use serde::{Deserialize, Serialize};

/// A typed cross-context message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    /// Client requests an immediate state snapshot (late joiners)
    #[serde(rename = "GET_STATE")]
    GetState,

    /// Client asks the engine to start capturing
    #[serde(rename = "START_RECORDING")]
    StartRecording,

    /// Client asks the engine to stop capturing
    #[serde(rename = "STOP_RECORDING")]
    StopRecording,

    /// Client asks the engine to rebuild the model connection
    #[serde(rename = "RESET_SESSION")]
    ResetSession,

    /// Coordinator broadcasts the full canonical state on every change
    #[serde(rename = "STATE_UPDATE")]
    StateUpdate { state: SessionState },

    /// Engine reports a partial state change to be merged and rebroadcast
    #[serde(rename = "SESSION_STATE_CHANGED")]
    SessionStateChanged { state: StatePatch },

    /// High-frequency audio level snapshot, best-effort delivery (~60/s)
    #[serde(rename = "FREQUENCY_DATA_UPDATE")]
    FrequencyDataUpdate {
        #[serde(rename = "inputLevels")]
        input_levels: Vec<u8>,
        #[serde(rename = "outputLevels")]
        output_levels: Vec<u8>,
    },

    /// Client persists the subscription flag; triggers an engine reset
    #[serde(rename = "SET_SUBSCRIBED")]
    SetSubscribed { subscribed: bool },

    /// Liveness probe sent before forwarding high-frequency payloads
    #[serde(rename = "PING")]
    Ping,

    /// Probe answer; gates frequency forwarding for the answering client
    #[serde(rename = "PONG")]
    Pong {
        #[serde(rename = "readyForFrequency")]
        ready_for_frequency: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StatePatch;

    #[test]
    fn test_type_discriminant_on_wire() {
        let json = serde_json::to_value(&Envelope::StartRecording).unwrap();
        assert_eq!(json["type"], "START_RECORDING");

        let json = serde_json::to_value(&Envelope::GetState).unwrap();
        assert_eq!(json["type"], "GET_STATE");
    }

    #[test]
    fn test_state_changed_round_trip() {
        let envelope = Envelope::SessionStateChanged {
            state: StatePatch::status("Listening...").with_recording(true),
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("SESSION_STATE_CHANGED"));
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn test_frequency_update_wire_names() {
        let envelope = Envelope::FrequencyDataUpdate {
            input_levels: vec![0, 128, 255],
            output_levels: vec![64; 16],
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "FREQUENCY_DATA_UPDATE");
        assert!(json.get("inputLevels").is_some());
        assert!(json.get("outputLevels").is_some());
    }

    #[test]
    fn test_pong_wire_name() {
        let json = serde_json::to_value(&Envelope::Pong {
            ready_for_frequency: true,
        })
        .unwrap();
        assert_eq!(json["readyForFrequency"], true);
    }
}
