//! User Registry
//!
//! Tracks the local user plus every remote user the relay has announced:
//! identity, latest camera pose, and who (if anyone) each of them is
//! spectating. Remote identity is stable for the lifetime of a membership;
//! a reconnecting user arrives as a fresh `user_connected`.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::protocol::{Pose, UserDescriptor};

/// A remote room member as this client currently sees them.
#[derive(Debug, Clone)]
pub struct RemoteUser {
    pub descriptor: UserDescriptor,
    pub camera: Pose,
    /// `Some(target)` while this user is spectating someone.
    pub spectating: Option<String>,
}

impl RemoteUser {
    fn new(descriptor: UserDescriptor) -> Self {
        Self {
            descriptor,
            camera: Pose::IDENTITY,
            spectating: None,
        }
    }
}

pub struct UserRegistry {
    local: UserDescriptor,
    remote: RwLock<HashMap<String, RemoteUser>>,
}

impl UserRegistry {
    pub fn new(local: UserDescriptor) -> Self {
        Self {
            local,
            remote: RwLock::new(HashMap::new()),
        }
    }

    pub fn local(&self) -> &UserDescriptor {
        &self.local
    }

    /// Seed the registry from a room-join bootstrap payload.
    pub async fn bootstrap(&self, users: Vec<UserDescriptor>) {
        let mut remote = self.remote.write().await;
        for user in users {
            if user.user_id == self.local.user_id {
                continue;
            }
            remote.insert(user.user_id.clone(), RemoteUser::new(user));
        }
        info!("[USERS] Bootstrapped {} remote users", remote.len());
    }

    pub async fn on_user_connected(&self, user: UserDescriptor) {
        info!("[USERS] {} ({}) joined", user.display_name, user.user_id);
        let mut remote = self.remote.write().await;
        remote.insert(user.user_id.clone(), RemoteUser::new(user));
    }

    pub async fn on_user_disconnected(&self, user_id: &str) {
        let mut remote = self.remote.write().await;
        if remote.remove(user_id).is_some() {
            info!("[USERS] {} left", user_id);
        } else {
            warn!("[USERS] Disconnect for unknown user {}", user_id);
        }
    }

    pub async fn on_user_positions(&self, user_id: &str, camera: Pose) {
        let mut remote = self.remote.write().await;
        match remote.get_mut(user_id) {
            Some(user) => user.camera = camera,
            // Pose frames can race the connect notification on join.
            None => debug!("[USERS] Pose for unknown user {}", user_id),
        }
    }

    pub async fn on_spectating_update(
        &self,
        user_id: &str,
        is_spectating: bool,
        spectated_user: Option<String>,
    ) {
        let mut remote = self.remote.write().await;
        if let Some(user) = remote.get_mut(user_id) {
            user.spectating = if is_spectating { spectated_user } else { None };
        }
    }

    /// Snapshot of every remote camera pose, keyed by user id.
    pub async fn camera_poses(&self) -> HashMap<String, Pose> {
        self.remote
            .read()
            .await
            .iter()
            .map(|(id, user)| (id.clone(), user.camera))
            .collect()
    }

    pub async fn remote_users(&self) -> Vec<RemoteUser> {
        self.remote.read().await.values().cloned().collect()
    }

    pub async fn contains(&self, user_id: &str) -> bool {
        self.remote.read().await.contains_key(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    fn user(id: &str) -> UserDescriptor {
        UserDescriptor {
            user_id: id.into(),
            display_name: format!("User {id}"),
            color: 0x00ff_8800,
        }
    }

    #[tokio::test]
    async fn bootstrap_skips_the_local_user() {
        let registry = UserRegistry::new(user("me"));
        registry
            .bootstrap(vec![user("me"), user("u1"), user("u2")])
            .await;

        assert!(!registry.contains("me").await);
        assert!(registry.contains("u1").await);
        assert_eq!(registry.remote_users().await.len(), 2);
    }

    #[tokio::test]
    async fn connect_and_disconnect_track_membership() {
        let registry = UserRegistry::new(user("me"));
        registry.on_user_connected(user("u1")).await;
        assert!(registry.contains("u1").await);

        registry.on_user_disconnected("u1").await;
        assert!(!registry.contains("u1").await);

        // Unknown disconnects are logged, never panic.
        registry.on_user_disconnected("u1").await;
    }

    #[tokio::test]
    async fn pose_updates_land_in_the_snapshot() {
        let registry = UserRegistry::new(user("me"));
        registry.on_user_connected(user("u1")).await;

        let pose = Pose {
            position: Vec3::new(1.0, 2.0, 3.0),
            quaternion: Quat::IDENTITY,
        };
        registry.on_user_positions("u1", pose).await;
        // Poses racing the connect notification are dropped silently.
        registry.on_user_positions("u-unknown", pose).await;

        let poses = registry.camera_poses().await;
        assert_eq!(poses.len(), 1);
        assert_eq!(poses["u1"], pose);
    }

    #[tokio::test]
    async fn spectating_flag_sets_and_clears() {
        let registry = UserRegistry::new(user("me"));
        registry.on_user_connected(user("u1")).await;

        registry
            .on_spectating_update("u1", true, Some("u2".into()))
            .await;
        let watching = registry.remote_users().await;
        assert_eq!(watching[0].spectating.as_deref(), Some("u2"));

        registry.on_spectating_update("u1", false, None).await;
        assert!(registry.remote_users().await[0].spectating.is_none());
    }
}
