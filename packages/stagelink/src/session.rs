//! Room Session
//!
//! The wiring layer: owns the transport, the grab coordinator, the menu
//! distributor, the spectate controller, and the user registry, and drives
//! the inbound event loop. Each unsolicited event is dispatched to
//! completion before the next is read; everything this core does not own
//! (highlights, remote object transforms, annotations) is forwarded to the
//! embedding application over the update channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use glam::{Quat, Vec3};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::grab::{GrabCoordinator, TransformSource};
use crate::menus::{EntityLookup, MenuDistributor, MenuFactory};
use crate::protocol::{SerializedRoom, ServerEvent, UserDescriptor};
use crate::room::{VisualizationMode, plan_restore};
use crate::spectate::{CameraRig, SpectateController};
use crate::transport::SessionTransport;
use crate::users::UserRegistry;

/// Capacity of the channel carrying updates to the embedding application.
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Room state changes this core does not apply itself, forwarded to the
/// embedder.
#[derive(Debug, Clone)]
pub enum RoomUpdate {
    /// Room-join bootstrap arrived. Popups and detached menus have already
    /// been restored through the menu factory; the embedder applies the
    /// rest (landscape, highlights, closed components, annotations).
    RoomJoined { room: SerializedRoom },
    UserJoined { user: UserDescriptor },
    UserLeft { user_id: String },
    /// A remote client moved an object it holds.
    ObjectMoved {
        object_id: String,
        position: Vec3,
        quaternion: Quat,
        scale: Vec3,
    },
    HighlightingChanged {
        user_id: String,
        entity_id: String,
        is_highlighted: bool,
    },
}

pub struct RoomSession {
    transport: SessionTransport,
    grabs: GrabCoordinator,
    menus: MenuDistributor,
    spectate: SpectateController,
    users: Arc<UserRegistry>,
    mode: VisualizationMode,
    /// Set by the first bootstrap; a reconnect replay must not restore the
    /// room twice.
    restored: AtomicBool,
    updates: mpsc::Sender<RoomUpdate>,
}

impl RoomSession {
    /// Wire up a session for `local_user`. Returns the session and the
    /// update channel the embedder consumes.
    pub fn new(
        config: &SessionConfig,
        local_user: UserDescriptor,
        mode: VisualizationMode,
        rig: Arc<dyn CameraRig>,
        menu_factory: Arc<dyn MenuFactory>,
        entities: Arc<dyn EntityLookup>,
    ) -> (Self, mpsc::Receiver<RoomUpdate>) {
        let transport = SessionTransport::new();
        let (update_tx, update_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);

        let session = Self {
            grabs: GrabCoordinator::new(transport.clone()),
            menus: MenuDistributor::new(transport.clone(), menu_factory, entities),
            spectate: SpectateController::new(
                transport.clone(),
                rig,
                config.spectate.calibration_pose(),
            ),
            users: Arc::new(UserRegistry::new(local_user)),
            transport,
            mode,
            restored: AtomicBool::new(false),
            updates: update_tx,
        };
        (session, update_rx)
    }

    pub fn grabs(&self) -> &GrabCoordinator {
        &self.grabs
    }

    pub fn menus(&self) -> &MenuDistributor {
        &self.menus
    }

    pub fn spectate(&self) -> &SpectateController {
        &self.spectate
    }

    pub fn users(&self) -> &UserRegistry {
        &self.users
    }

    pub fn transport(&self) -> &SessionTransport {
        &self.transport
    }

    /// Connect to the relay and return the inbound event stream for
    /// [`RoomSession::run`].
    pub async fn connect(
        &self,
        config: &SessionConfig,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ServerEvent>, SessionError> {
        self.transport
            .connect(
                &config.connection.room_url()?,
                config.connection.outbound_capacity,
                cancel,
            )
            .await
    }

    /// Consume inbound events until the stream closes. Each event is
    /// dispatched run-to-completion in arrival order.
    pub async fn run(&self, mut events: mpsc::Receiver<ServerEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event).await;
        }
        info!("[SESSION] Event stream closed");
    }

    /// Per-frame update: push held-object transforms and follow the
    /// spectate target. The embedder calls this at its own tick rate.
    pub async fn tick(&self, transforms: &dyn TransformSource) {
        self.grabs.send_object_positions(transforms).await;
        self.spectate.tick(&self.users.camera_poses().await).await;
    }

    async fn dispatch(&self, event: ServerEvent) {
        match event {
            ServerEvent::Landscape { room, users } => {
                self.users.bootstrap(users).await;
                self.restore_room(room).await;
            }
            ServerEvent::UserConnected { user } => {
                self.users.on_user_connected(user.clone()).await;
                self.forward(RoomUpdate::UserJoined { user }).await;
            }
            ServerEvent::UserDisconnected { user_id } => {
                self.users.on_user_disconnected(&user_id).await;
                // A departed spectate target leaves us with no feed to follow.
                if self.spectate.target().await.as_deref() == Some(user_id.as_str()) {
                    self.spectate.deactivate().await;
                }
                self.forward(RoomUpdate::UserLeft { user_id }).await;
            }
            ServerEvent::UserPositions { user_id, camera } => {
                self.users.on_user_positions(&user_id, camera).await;
            }
            ServerEvent::ObjectMoved {
                object_id,
                position,
                quaternion,
                scale,
            } => {
                self.forward(RoomUpdate::ObjectMoved {
                    object_id,
                    position,
                    quaternion,
                    scale,
                })
                .await;
            }
            ServerEvent::MenuDetached { menu } => self.menus.on_menu_detached(&menu),
            ServerEvent::DetachedMenuClosed { object_id } => self.menus.on_menu_closed(&object_id),
            ServerEvent::SpectatingUpdate {
                user_id,
                is_spectating,
                spectated_user,
            } => {
                self.users
                    .on_spectating_update(&user_id, is_spectating, spectated_user)
                    .await;
            }
            ServerEvent::HighlightingUpdate {
                user_id,
                entity_id,
                is_highlighted,
            } => {
                self.forward(RoomUpdate::HighlightingChanged {
                    user_id,
                    entity_id,
                    is_highlighted,
                })
                .await;
            }
            // The transport resolves responses by nonce before events reach
            // this loop; one here means its request is long gone.
            ServerEvent::ObjectGrabbedResponse { nonce, .. }
            | ServerEvent::MenuDetachedResponse { nonce, .. } => {
                warn!("[SESSION] Stray response for nonce {}", nonce);
            }
        }
    }

    /// Apply the bootstrap room state exactly once per session.
    async fn restore_room(&self, room: SerializedRoom) {
        if self.restored.swap(true, Ordering::SeqCst) {
            info!("[SESSION] Ignoring repeated room bootstrap");
            return;
        }
        let plan = plan_restore(&room.popups, &room.detached_menus, self.mode);
        self.menus.apply_restore(&plan);
        self.forward(RoomUpdate::RoomJoined { room }).await;
    }

    async fn forward(&self, update: RoomUpdate) {
        if self.updates.send(update).await.is_err() {
            warn!("[SESSION] Update receiver dropped");
        }
    }
}
