//! Spectate State Machine
//!
//! Lets the local user follow a remote user's camera. Activation saves the
//! local pose exactly once per spectate session and hands camera control to
//! the remote feed; deactivation restores it. Both transitions broadcast a
//! `spectating_update` so other clients can show who is watching whom.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::protocol::{ClientEvent, Pose};
use crate::transport::SessionTransport;

/// Embedder camera hook. While spectating, the controller drives the rig and
/// user input is disabled.
pub trait CameraRig: Send + Sync {
    fn pose(&self) -> Pose;
    fn set_pose(&self, pose: &Pose);
    /// Enable or disable local camera input.
    fn set_control_enabled(&self, enabled: bool);
    /// Push the projection parameters to the renderer. Called every tick
    /// while spectating; projection state is never cached across frames.
    fn apply_projection(&self);
}

enum SpectateState {
    Idle,
    Spectating {
        target_user_id: String,
        /// Local pose at first activation; restored on deactivate.
        saved_pose: Pose,
    },
}

pub struct SpectateController {
    transport: SessionTransport,
    rig: Arc<dyn CameraRig>,
    /// Per-client pose offset for dome and multi-projector installations,
    /// composed onto every remote pose.
    calibration: Pose,
    state: Mutex<SpectateState>,
}

impl SpectateController {
    pub fn new(transport: SessionTransport, rig: Arc<dyn CameraRig>, calibration: Pose) -> Self {
        Self {
            transport,
            rig,
            calibration,
            state: Mutex::new(SpectateState::Idle),
        }
    }

    pub async fn is_spectating(&self) -> bool {
        matches!(&*self.state.lock().await, SpectateState::Spectating { .. })
    }

    /// User currently being spectated, if any.
    pub async fn target(&self) -> Option<String> {
        match &*self.state.lock().await {
            SpectateState::Spectating { target_user_id, .. } => Some(target_user_id.clone()),
            SpectateState::Idle => None,
        }
    }

    /// Start (or retarget) spectating `target_user_id`.
    ///
    /// The local pose is recorded only on the Idle -> Spectating edge;
    /// switching targets mid-session keeps the original saved pose so a
    /// later deactivate returns the user to where they actually stood.
    pub async fn activate(&self, target_user_id: &str) {
        {
            let mut state = self.state.lock().await;
            match &mut *state {
                SpectateState::Idle => {
                    *state = SpectateState::Spectating {
                        target_user_id: target_user_id.to_string(),
                        saved_pose: self.rig.pose(),
                    };
                    self.rig.set_control_enabled(false);
                }
                SpectateState::Spectating {
                    target_user_id: current,
                    ..
                } => {
                    *current = target_user_id.to_string();
                }
            }
        }
        info!("[SPECTATE] Now spectating {}", target_user_id);

        self.transport
            .send(&ClientEvent::SpectatingUpdate {
                is_spectating: true,
                user_id: Some(target_user_id.to_string()),
            })
            .await;
    }

    /// Stop spectating. No-op when idle: no pose write, no frame.
    pub async fn deactivate(&self) {
        {
            let mut state = self.state.lock().await;
            let SpectateState::Spectating { saved_pose, .. } = &*state else {
                return;
            };
            self.rig.set_pose(saved_pose);
            self.rig.set_control_enabled(true);
            *state = SpectateState::Idle;
        }
        info!("[SPECTATE] Stopped spectating");

        self.transport
            .send(&ClientEvent::SpectatingUpdate {
                is_spectating: false,
                user_id: None,
            })
            .await;
    }

    /// Per-frame update. While spectating, copies the target's latest known
    /// camera pose into the rig (composed with the calibration offset) and
    /// re-applies the projection parameters.
    pub async fn tick(&self, remote_poses: &HashMap<String, Pose>) {
        let state = self.state.lock().await;
        let SpectateState::Spectating { target_user_id, .. } = &*state else {
            return;
        };
        if let Some(remote) = remote_poses.get(target_user_id) {
            self.rig.set_pose(&Pose {
                position: remote.position + self.calibration.position,
                quaternion: remote.quaternion * self.calibration.quaternion,
            });
        }
        self.rig.apply_projection();
    }
}
