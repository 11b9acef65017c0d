//! Detached Menu Distributor
//!
//! Mirrors detached 3D menus (and their 2D popup equivalents) between
//! clients. Outbound: registers a locally detached menu with the relay and
//! hands back the server-assigned shared id. Inbound: validates remote
//! spawn/close notifications against the local scene and forwards them to
//! the embedder through the factory trait.

use std::sync::Arc;

use glam::{Quat, Vec3};
use tracing::{debug, warn};

use crate::protocol::{
    ClientEvent, RespondableRequest, SerializedDetachedMenu, SerializedPopup, ServerEvent,
};
use crate::room::{MenuAnchor, MenuSpawn, RestorePlan};
use crate::transport::{SendOutcome, SessionTransport};

/// A menu the local user just detached, before the relay knows about it.
#[derive(Debug, Clone)]
pub struct MenuDetachRequest {
    pub detach_id: String,
    pub entity_type: String,
    pub position: Vec3,
    pub quaternion: Quat,
    pub scale: Vec3,
}

impl MenuDetachRequest {
    /// A detach request with a fresh client-side id.
    pub fn new(entity_type: impl Into<String>, position: Vec3, quaternion: Quat, scale: Vec3) -> Self {
        Self {
            detach_id: uuid::Uuid::new_v4().to_string(),
            entity_type: entity_type.into(),
            position,
            quaternion,
            scale,
        }
    }
}

/// Scene-side validation hook: does the entity a remote menu points at
/// exist in the locally loaded landscape?
pub trait EntityLookup: Send + Sync {
    fn has_entity(&self, entity_id: &str) -> bool;
}

/// Embedder hook that materializes menu state changes in the UI.
pub trait MenuFactory: Send + Sync {
    /// Create a 3D menu from a spawn directive.
    fn spawn_menu(&self, spawn: &MenuSpawn);
    /// Remove the 3D menu with the given shared id.
    fn remove_menu(&self, object_id: &str);
    /// Reopen a batch of popups in the 2D view (browser-mode restore).
    fn restore_popups(&self, popups: &[SerializedPopup]);
}

pub struct MenuDistributor {
    transport: SessionTransport,
    factory: Arc<dyn MenuFactory>,
    entities: Arc<dyn EntityLookup>,
}

impl MenuDistributor {
    pub fn new(
        transport: SessionTransport,
        factory: Arc<dyn MenuFactory>,
        entities: Arc<dyn EntityLookup>,
    ) -> Self {
        Self {
            transport,
            factory,
            entities,
        }
    }

    /// Register a locally detached menu with the relay.
    ///
    /// Returns the server-assigned shared id, or `None` when offline or when
    /// the relay rejects the request. A `None` menu stays purely local; the
    /// caller must not broadcast moves or closes for it.
    pub async fn share_menu(&self, request: MenuDetachRequest) -> Option<String> {
        let outcome = self
            .transport
            .send_respondable(RespondableRequest::MenuDetached {
                detach_id: request.detach_id.clone(),
                entity_type: request.entity_type,
                position: request.position,
                quaternion: request.quaternion,
                scale: request.scale,
            })
            .await;

        let future = match outcome {
            SendOutcome::Sent(future) => future,
            SendOutcome::Offline => {
                debug!("[MENU] Offline, menu {} stays local", request.detach_id);
                return None;
            }
        };

        match future.recv().await {
            Ok(ServerEvent::MenuDetachedResponse { object_id, .. }) => Some(object_id),
            Ok(other) => {
                warn!("[MENU] Unexpected response to menu_detached: {:?}", other);
                None
            }
            Err(e) => {
                warn!("[MENU] menu_detached request failed: {}", e);
                None
            }
        }
    }

    /// Tell the room a shared menu was closed locally. Only meaningful for
    /// menus that got a shared id from [`MenuDistributor::share_menu`].
    pub async fn close_shared_menu(&self, object_id: &str) {
        self.transport
            .send(&ClientEvent::DetachedMenuClosed {
                object_id: object_id.to_string(),
            })
            .await;
    }

    /// A remote client shared a detached menu. Spawn it locally if its
    /// target entity exists in the loaded landscape; otherwise drop it.
    pub fn on_menu_detached(&self, menu: &SerializedDetachedMenu) {
        if !self.entities.has_entity(&menu.entity_id) {
            warn!(
                "[MENU] Dropping remote menu for unknown entity {}",
                menu.entity_id
            );
            return;
        }
        self.factory.spawn_menu(&MenuSpawn {
            object_id: menu.object_id.clone(),
            entity_id: menu.entity_id.clone(),
            entity_type: Some(menu.entity_type.clone()),
            user_id: menu.user_id.clone(),
            anchor: MenuAnchor::World {
                position: menu.position,
                quaternion: menu.quaternion,
                scale: menu.scale,
            },
        });
    }

    /// A remote client closed a shared menu.
    pub fn on_menu_closed(&self, object_id: &str) {
        self.factory.remove_menu(object_id);
    }

    /// Apply a restore plan from a room-join bootstrap or a loaded snapshot.
    /// Spawn directives for entities missing from the landscape are skipped.
    pub fn apply_restore(&self, plan: &RestorePlan) {
        if !plan.popups.is_empty() {
            self.factory.restore_popups(&plan.popups);
        }
        for spawn in &plan.menus {
            if !self.entities.has_entity(&spawn.entity_id) {
                warn!(
                    "[MENU] Skipping restore of menu for unknown entity {}",
                    spawn.entity_id
                );
                continue;
            }
            self.factory.spawn_menu(spawn);
        }
    }
}
