//! Messages exchanged with the arm's HTTP backend.
//!
//! Everything the backend sees is in the firmware frame; conversion to and
//! from the operator frame happens on the console side.

use harvestar_geom::{FirmwarePose, Pose};
use serde::{Deserialize, Deserializer, Serialize};

pub const ARM_READY_PATH: &str = "/api/arm-ready";
pub const MOVE_ARM_PATH: &str = "/api/move-arm";
pub const START_REPLAY_PATH: &str = "/api/start-replay";
pub const REPLAY_STATUS_PATH: &str = "/api/replay-status";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReadyReply {
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of a move command: the four fields of a firmware-frame pose.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MoveRequest(pub FirmwarePose);

impl From<FirmwarePose> for MoveRequest {
    fn from(p: FirmwarePose) -> Self {
        MoveRequest(p)
    }
}

/// Where the arm says it went. The effector isn't reported.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundsDetail {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MoveReply {
    Update {
        data: Position,
    },
    Bounds {
        #[serde(default)]
        data: Option<BoundsDetail>,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
    },
}

impl MoveReply {
    pub fn bounds_message(&self) -> Option<&str> {
        match self {
            MoveReply::Bounds { data } => Some(
                data.as_ref()
                    .and_then(|d| d.message.as_deref())
                    .unwrap_or("Out of bounds."),
            ),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartReplayRequest {
    pub index: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StartReplayReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One status update emitted by the backend while a replay runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TelemetryEvent {
    /// Firmware-frame `[x, y, z]`, possibly followed by the effector.
    /// Read in the operator frame that's `[y, x, z]`.
    Position { data: Vec<f64> },
    Bounds {
        #[serde(default)]
        message: Option<String>,
    },
    Done {
        #[serde(default)]
        message: Option<String>,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    // Anything else the arm chatters about during a run.
    #[serde(other)]
    Other,
}

impl TelemetryEvent {
    /// The reported pose, if this is a position event with at least three
    /// coordinates. A missing effector reads as zero.
    pub fn firmware_pose(&self) -> Option<FirmwarePose> {
        match self {
            TelemetryEvent::Position { data } if data.len() >= 3 => Some(FirmwarePose(Pose::new(
                data[0],
                data[1],
                data[2],
                data.get(3).copied().unwrap_or_default(),
            ))),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            TelemetryEvent::Bounds { message }
            | TelemetryEvent::Done { message }
            | TelemetryEvent::Error { message } => message.as_deref(),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayStatus {
    #[serde(default, deserialize_with = "lenient_events")]
    pub messages: Vec<TelemetryEvent>,
    pub done: bool,
}

// The backend relays whatever the arm says verbatim, so one malformed message
// must not spoil the rest of the batch. Those decode as `Other`.
fn lenient_events<'de, D>(de: D) -> Result<Vec<TelemetryEvent>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<serde_json::Value>>::deserialize(de)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|v| TelemetryEvent::deserialize(v).unwrap_or(TelemetryEvent::Other))
        .collect())
}
