//! Session Configuration
//!
//! Figment-deserialized from defaults / stagelink.toml / env vars.
//!
//! Three equivalent ways to configure:
//!
//!   stagelink.toml:  [connection]
//!                    url = "wss://relay.example.org/v2/ws"
//!
//!   env var:         STAGELINK_CONNECTION__URL=wss://...   (double underscore
//!                    = nesting; single underscore stays within field names)

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::protocol::Pose;

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub spectate: SpectateConfig,
}

/// Relay connection settings (lives under `[connection]` in stagelink.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_url")]
    pub url: String,
    /// Room to join on connect.
    #[serde(default)]
    pub room_id: String,
    /// Opaque bearer token, forwarded to the handshake unmodified.
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            room_id: String::new(),
            token: String::new(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

impl ConnectionConfig {
    /// Full WebSocket URL with the room and token appended as
    /// percent-encoded query parameters.
    pub fn room_url(&self) -> Result<String, SessionError> {
        let mut url = url::Url::parse(&self.url)
            .map_err(|e| SessionError::InvalidUrl(format!("{}: {}", self.url, e)))?;
        url.query_pairs_mut()
            .append_pair("room", &self.room_id)
            .append_pair("token", &self.token);
        Ok(url.into())
    }
}

/// Broadcast pacing hints (lives under `[sync]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How often the embedder should call the position tick, in milliseconds.
    /// A hint, not enforced here; the embedder owns the frame loop.
    #[serde(default = "default_position_tick_ms")]
    pub position_tick_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            position_tick_ms: default_position_tick_ms(),
        }
    }
}

/// Camera calibration for dome and multi-projector installations
/// (lives under `[spectate]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpectateConfig {
    #[serde(default)]
    pub calibration_translation: [f32; 3],
    /// Calibration rotation quaternion as [x, y, z, w].
    #[serde(default = "default_calibration_rotation")]
    pub calibration_rotation: [f32; 4],
}

impl Default for SpectateConfig {
    fn default() -> Self {
        Self {
            calibration_translation: [0.0; 3],
            calibration_rotation: default_calibration_rotation(),
        }
    }
}

impl SpectateConfig {
    /// The calibration offset as a pose, composed onto remote camera poses.
    pub fn calibration_pose(&self) -> Pose {
        let [x, y, z] = self.calibration_translation;
        let [qx, qy, qz, qw] = self.calibration_rotation;
        Pose {
            position: Vec3::new(x, y, z),
            quaternion: Quat::from_xyzw(qx, qy, qz, qw),
        }
    }
}

fn default_url() -> String {
    "ws://localhost:4444/v2/vr".to_string()
}

fn default_outbound_capacity() -> usize {
    64
}

fn default_position_tick_ms() -> u64 {
    // 10 Hz matches the relay's forwarding cadence.
    100
}

fn default_calibration_rotation() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

/// Layer defaults -> `stagelink.toml` in `config_dir` -> `STAGELINK_*` env.
pub fn load_config(config_dir: &Path) -> Result<SessionConfig, SessionError> {
    Figment::from(Serialized::defaults(SessionConfig::default()))
        .merge(Toml::file(config_dir.join("stagelink.toml")))
        .merge(Env::prefixed("STAGELINK_").split("__"))
        .extract()
        .map_err(|e| SessionError::Config(e.to_string()))
}
