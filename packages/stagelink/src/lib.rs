//! Collaborative session synchronization core.
//!
//! Keeps one 3D/VR visualization client in sync with the other members of a
//! shared room over a single relayed WebSocket: exclusive grab ownership of
//! shared objects, detached menu distribution, room state snapshots, remote
//! user presence, and spectate mode.
//!
//! The embedding application supplies the scene-facing hooks
//! ([`CameraRig`], [`MenuFactory`], [`EntityLookup`], [`TransformSource`],
//! and the room state stores) and drives [`RoomSession::run`] plus a
//! periodic [`RoomSession::tick`]; everything on the wire is handled here.

pub mod config;
pub mod error;
pub mod grab;
pub mod menus;
mod pending;
pub mod protocol;
pub mod room;
pub mod session;
pub mod spectate;
pub mod transport;
pub mod users;

pub use config::{SessionConfig, load_config};
pub use error::{RequestError, SessionError};
pub use grab::{GrabCoordinator, GrabTarget, ObjectTransform, TransformSource};
pub use menus::{EntityLookup, MenuDetachRequest, MenuDistributor, MenuFactory};
pub use protocol::{
    ClientEvent, Pose, RespondableRequest, SerializedRoom, ServerEvent, UserDescriptor,
};
pub use room::{RestorePlan, RoomSerializer, VisualizationMode, plan_restore};
pub use session::{RoomSession, RoomUpdate};
pub use spectate::{CameraRig, SpectateController};
pub use transport::{SendOutcome, SessionTransport};
pub use users::{RemoteUser, UserRegistry};
