//! Wire Protocol Types
//!
//! Message types for the relayed session WebSocket. Every frame is a JSON
//! object tagged by its `event` name; responses to respondable requests carry
//! the `nonce` of the request they answer.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// World transform of a shared object as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub quaternion: Quat,
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: Vec3::ZERO,
        quaternion: Quat::IDENTITY,
    };
}

/// A remote user as announced by the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDescriptor {
    pub user_id: String,
    pub display_name: String,
    /// Packed RGB, assigned by the relay so every client agrees.
    pub color: u32,
}

/// Messages sent FROM this client TO the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Ask the authority for exclusive manipulation rights over an object.
    ObjectGrabbed { object_id: String, nonce: u64 },
    /// Last local holder released the object.
    ObjectReleased { object_id: String },
    /// Live transform broadcast for an object this client holds.
    ObjectMoved {
        object_id: String,
        position: Vec3,
        quaternion: Quat,
        scale: Vec3,
    },
    /// Register a menu detached from a 2D panel as a shared 3D object.
    MenuDetached {
        detach_id: String,
        entity_type: String,
        position: Vec3,
        quaternion: Quat,
        scale: Vec3,
        nonce: u64,
    },
    /// Remove a previously shared detached menu.
    DetachedMenuClosed { object_id: String },
    /// Broadcast whether this client is spectating, and whom.
    SpectatingUpdate {
        is_spectating: bool,
        user_id: Option<String>,
    },
    /// Entity highlight toggled by the local user.
    HighlightingUpdate {
        user_id: String,
        entity_id: String,
        is_highlighted: bool,
    },
}

/// The requests that receive a correlated response. Narrower than
/// [`ClientEvent`] so the transport's respondable path cannot be handed a
/// fire-and-forget event; the nonce is stamped when the request becomes a
/// wire frame.
#[derive(Debug, Clone)]
pub enum RespondableRequest {
    ObjectGrabbed {
        object_id: String,
    },
    MenuDetached {
        detach_id: String,
        entity_type: String,
        position: Vec3,
        quaternion: Quat,
        scale: Vec3,
    },
}

impl RespondableRequest {
    /// Response kind this request registers for.
    pub(crate) fn expected_response(&self) -> ResponseKind {
        match self {
            RespondableRequest::ObjectGrabbed { .. } => ResponseKind::ObjectGrabbed,
            RespondableRequest::MenuDetached { .. } => ResponseKind::MenuDetached,
        }
    }

    /// The wire event for this request, carrying `nonce`.
    pub(crate) fn into_event(self, nonce: u64) -> ClientEvent {
        match self {
            RespondableRequest::ObjectGrabbed { object_id } => {
                ClientEvent::ObjectGrabbed { object_id, nonce }
            }
            RespondableRequest::MenuDetached {
                detach_id,
                entity_type,
                position,
                quaternion,
                scale,
            } => ClientEvent::MenuDetached {
                detach_id,
                entity_type,
                position,
                quaternion,
                scale,
                nonce,
            },
        }
    }
}

/// Messages sent FROM the relay TO this client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Authority decision for an `object_grabbed` request.
    ObjectGrabbedResponse { nonce: u64, is_success: bool },
    /// Server-assigned shared id for a `menu_detached` request.
    MenuDetachedResponse { nonce: u64, object_id: String },

    /// Room-join bootstrap: the full shared room state.
    Landscape {
        room: SerializedRoom,
        #[serde(default)]
        users: Vec<UserDescriptor>,
    },

    /// Another client joined the room.
    UserConnected { user: UserDescriptor },
    /// A client left the room.
    UserDisconnected { user_id: String },
    /// Periodic camera pose update for a remote user.
    UserPositions {
        user_id: String,
        camera: Pose,
    },

    /// Another client moved an object it holds.
    ObjectMoved {
        object_id: String,
        position: Vec3,
        quaternion: Quat,
        scale: Vec3,
    },
    /// Another client shared a detached menu.
    MenuDetached { menu: SerializedDetachedMenu },
    /// A shared detached menu was removed.
    DetachedMenuClosed { object_id: String },
    /// A remote user toggled spectate mode.
    SpectatingUpdate {
        user_id: String,
        is_spectating: bool,
        spectated_user: Option<String>,
    },
    /// A remote user toggled an entity highlight.
    HighlightingUpdate {
        user_id: String,
        entity_id: String,
        is_highlighted: bool,
    },
}

/// Kind of response a pending request expects. Used to verify that the frame
/// answering a nonce is the variant the request registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    ObjectGrabbed,
    MenuDetached,
}

impl ServerEvent {
    /// The nonce carried by this frame, if it is a response variant.
    pub fn response_nonce(&self) -> Option<u64> {
        match self {
            ServerEvent::ObjectGrabbedResponse { nonce, .. } => Some(*nonce),
            ServerEvent::MenuDetachedResponse { nonce, .. } => Some(*nonce),
            _ => None,
        }
    }

    /// The response kind of this frame, if it is a response variant.
    pub fn response_kind(&self) -> Option<ResponseKind> {
        match self {
            ServerEvent::ObjectGrabbedResponse { .. } => Some(ResponseKind::ObjectGrabbed),
            ServerEvent::MenuDetachedResponse { .. } => Some(ResponseKind::MenuDetached),
            _ => None,
        }
    }
}

// =============================================================================
// Serialized room state
// =============================================================================

/// Full collaborative room state: produced fresh on every serialize call,
/// consumed once per room join or snapshot load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SerializedRoom {
    pub landscape: SerializedLandscape,
    pub closed_component_ids: Vec<String>,
    pub highlighted_entities: Vec<SerializedHighlight>,
    pub popups: Vec<SerializedPopup>,
    pub annotations: Vec<SerializedAnnotation>,
    pub detached_menus: Vec<SerializedDetachedMenu>,
}

/// Which software landscape the room is looking at.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SerializedLandscape {
    pub token: String,
    /// Epoch millis of the selected analysis timestamp.
    pub timestamp: i64,
}

impl SerializedLandscape {
    /// A landscape selection stamped with the current wall clock.
    pub fn now(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedHighlight {
    pub user_id: String,
    pub entity_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedPopup {
    pub entity_id: String,
    /// User that shared the popup into the room, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedAnnotation {
    pub annotation_id: String,
    /// Anchored entity; annotations can also float free.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub owner_id: String,
    pub content: String,
    pub shared: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedDetachedMenu {
    /// Shared object id assigned by the relay; None while only local.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    pub entity_id: String,
    pub entity_type: String,
    pub position: Vec3,
    pub quaternion: Quat,
    pub scale: Vec3,
    /// Owning user; None for menus that outlived their owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_tag_is_snake_case() {
        let event = ClientEvent::ObjectReleased {
            object_id: "obj-1".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event":"object_released""#));
        assert!(json.contains(r#""object_id":"obj-1""#));
    }

    #[test]
    fn spectating_update_serializes_null_target() {
        let event = ClientEvent::SpectatingUpdate {
            is_spectating: false,
            user_id: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        // The target must be an explicit null, not omitted; the relay
        // broadcasts the field verbatim to every other client.
        assert!(json.contains(r#""user_id":null"#));
    }

    #[test]
    fn grab_response_decodes_with_nonce() {
        let json = r#"{"event":"object_grabbed_response","nonce":7,"is_success":true}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.response_nonce(), Some(7));
        assert_eq!(event.response_kind(), Some(ResponseKind::ObjectGrabbed));
        match event {
            ServerEvent::ObjectGrabbedResponse { is_success, .. } => assert!(is_success),
            _ => panic!("Expected ObjectGrabbedResponse"),
        }
    }

    #[test]
    fn landscape_bootstrap_decodes_without_users() {
        let json = r#"{
            "event": "landscape",
            "room": {
                "landscape": {"token": "tok-1", "timestamp": 1700000000000},
                "closed_component_ids": ["c1"],
                "highlighted_entities": [],
                "popups": [],
                "annotations": [],
                "detached_menus": []
            }
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        match event {
            ServerEvent::Landscape { room, users } => {
                assert_eq!(room.landscape.token, "tok-1");
                assert_eq!(room.closed_component_ids, vec!["c1".to_string()]);
                assert!(users.is_empty());
            }
            _ => panic!("Expected Landscape"),
        }
    }

    #[test]
    fn unsolicited_event_has_no_response_nonce() {
        let event = ServerEvent::UserDisconnected {
            user_id: "u1".into(),
        };
        assert!(event.response_nonce().is_none());
        assert!(event.response_kind().is_none());
    }

    #[test]
    fn respondable_request_stamps_nonce_into_wire_event() {
        let request = RespondableRequest::ObjectGrabbed {
            object_id: "obj-1".into(),
        };
        assert_eq!(request.expected_response(), ResponseKind::ObjectGrabbed);

        let json = serde_json::to_string(&request.into_event(42)).unwrap();
        assert!(json.contains(r#""event":"object_grabbed""#));
        assert!(json.contains(r#""nonce":42"#));
    }
}
