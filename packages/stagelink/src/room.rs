//! Room State Serializer
//!
//! Captures the full collaborative room state into a [`SerializedRoom`]
//! snapshot and plans its restoration. Serialization is a pure function of
//! the injected stores, with no network I/O and no caching; every call sees the
//! stores as they are at that moment. Restoration is split the same way: a
//! pure planner here, the applied side effects in the menu distributor.

use std::sync::Arc;

use glam::{Quat, Vec3};

use crate::protocol::{
    SerializedAnnotation, SerializedDetachedMenu, SerializedHighlight, SerializedLandscape,
    SerializedPopup, SerializedRoom,
};

/// Vertical offset applied to popup-derived menus restored in VR: popups
/// have no 3D anchor of their own, so they hover above their entity.
pub const POPUP_RESTORE_HEIGHT_OFFSET: f32 = 0.3;

// =============================================================================
// Injected state stores
//
// The UI singletons of the original client become explicit repositories so
// the serializer stays a pure function of its inputs.
// =============================================================================

/// Landscape selection, closed components, and highlights.
pub trait VisualizationStore: Send + Sync {
    fn landscape(&self) -> SerializedLandscape;
    fn closed_component_ids(&self) -> Vec<String>;
    fn highlighted_entities(&self) -> Vec<SerializedHighlight>;
}

/// A popup as the popup panel currently shows it.
#[derive(Debug, Clone)]
pub struct PopupState {
    pub entity_id: String,
    pub pinned: bool,
    /// User that shared the popup into the room, if any.
    pub shared_by: Option<String>,
}

pub trait PopupStore: Send + Sync {
    fn popups(&self) -> Vec<PopupState>;
}

/// An annotation as the annotation panel currently holds it.
#[derive(Debug, Clone)]
pub struct AnnotationState {
    pub annotation_id: String,
    pub entity_id: Option<String>,
    pub owner_id: String,
    pub content: String,
    pub shared: bool,
}

pub trait AnnotationStore: Send + Sync {
    fn annotations(&self) -> Vec<AnnotationState>;
}

/// Currently detached menus. The store only reports menus whose underlying
/// object supports detaching, with world transforms at call time.
pub trait DetachedMenuStore: Send + Sync {
    fn detached_menus(&self) -> Vec<SerializedDetachedMenu>;
}

// =============================================================================
// Serialization
// =============================================================================

/// Builds [`SerializedRoom`] snapshots from the injected stores.
pub struct RoomSerializer {
    visualization: Arc<dyn VisualizationStore>,
    popups: Arc<dyn PopupStore>,
    annotations: Arc<dyn AnnotationStore>,
    detached_menus: Arc<dyn DetachedMenuStore>,
}

impl RoomSerializer {
    pub fn new(
        visualization: Arc<dyn VisualizationStore>,
        popups: Arc<dyn PopupStore>,
        annotations: Arc<dyn AnnotationStore>,
        detached_menus: Arc<dyn DetachedMenuStore>,
    ) -> Self {
        Self {
            visualization,
            popups,
            annotations,
            detached_menus,
        }
    }

    /// Capture the room. `snapshot` selects the private-export rules: a
    /// snapshot additionally keeps pinned-but-unshared popups and unshared
    /// annotations, and strips the live `shared` flag from annotations, since a
    /// snapshot is a private copy, not a live share.
    pub fn serialize(&self, snapshot: bool) -> SerializedRoom {
        SerializedRoom {
            landscape: self.visualization.landscape(),
            closed_component_ids: self.visualization.closed_component_ids(),
            highlighted_entities: self.visualization.highlighted_entities(),
            popups: serialize_popups(&self.popups.popups(), snapshot),
            annotations: serialize_annotations(&self.annotations.annotations(), snapshot),
            detached_menus: self.detached_menus.detached_menus(),
        }
    }
}

/// Pinned popups only: shared ones always, unshared ones only in snapshots.
/// Transient unpinned popups are never persisted.
fn serialize_popups(popups: &[PopupState], snapshot: bool) -> Vec<SerializedPopup> {
    popups
        .iter()
        .filter(|popup| popup.pinned && (popup.shared_by.is_some() || snapshot))
        .map(|popup| SerializedPopup {
            entity_id: popup.entity_id.clone(),
            shared_by: popup.shared_by.clone(),
        })
        .collect()
}

fn serialize_annotations(
    annotations: &[AnnotationState],
    snapshot: bool,
) -> Vec<SerializedAnnotation> {
    annotations
        .iter()
        .filter(|annotation| annotation.shared || snapshot)
        .map(|annotation| SerializedAnnotation {
            annotation_id: annotation.annotation_id.clone(),
            entity_id: annotation.entity_id.clone(),
            owner_id: annotation.owner_id.clone(),
            content: annotation.content.clone(),
            shared: if snapshot { false } else { annotation.shared },
        })
        .collect()
}

// =============================================================================
// Restore planning
// =============================================================================

/// How the local client visualizes the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualizationMode {
    /// Non-immersive 2D/browser view: no 3D menu surface exists.
    Browser,
    /// Immersive VR view: menus are real 3D objects.
    Vr,
}

/// Where a restored menu is placed.
#[derive(Debug, Clone, PartialEq)]
pub enum MenuAnchor {
    /// At its serialized world transform (true detached menus).
    World {
        position: Vec3,
        quaternion: Quat,
        scale: Vec3,
    },
    /// Hovering above the target entity (popup-derived menus, which carry
    /// no transform of their own).
    AboveEntity { offset_y: f32 },
}

/// Directive to reconstruct one 3D menu.
#[derive(Debug, Clone, PartialEq)]
pub struct MenuSpawn {
    pub object_id: Option<String>,
    pub entity_id: String,
    /// Entity type hint from the serialized menu; popup-derived spawns have
    /// none and the factory resolves the entity itself.
    pub entity_type: Option<String>,
    pub user_id: Option<String>,
    pub anchor: MenuAnchor,
}

/// The computed restoration of a snapshot. Applying it is the menu
/// distributor's job; building it has no side effects.
#[derive(Debug, Clone, Default)]
pub struct RestorePlan {
    /// Browser mode: one combined popup batch (explicit popups plus
    /// flattened detached menus).
    pub popups: Vec<SerializedPopup>,
    /// VR mode: 3D menus to spawn.
    pub menus: Vec<MenuSpawn>,
}

/// Plan the restoration of serialized popups and detached menus.
///
/// Not idempotent by design: planning twice and applying both plans
/// duplicates menus. The session layer guards against double-restore.
pub fn plan_restore(
    popups: &[SerializedPopup],
    detached_menus: &[SerializedDetachedMenu],
    mode: VisualizationMode,
) -> RestorePlan {
    match mode {
        VisualizationMode::Browser => {
            // No 3D surface: flatten menus into popup descriptors and merge
            // them with the explicit popups into a single restore batch.
            let mut combined: Vec<SerializedPopup> = popups.to_vec();
            combined.extend(detached_menus.iter().map(|menu| SerializedPopup {
                entity_id: menu.entity_id.clone(),
                shared_by: menu.user_id.clone(),
            }));
            RestorePlan {
                popups: combined,
                menus: Vec::new(),
            }
        }
        VisualizationMode::Vr => {
            let mut menus: Vec<MenuSpawn> = detached_menus
                .iter()
                .map(|menu| MenuSpawn {
                    object_id: menu.object_id.clone(),
                    entity_id: menu.entity_id.clone(),
                    entity_type: Some(menu.entity_type.clone()),
                    user_id: menu.user_id.clone(),
                    anchor: MenuAnchor::World {
                        position: menu.position,
                        quaternion: menu.quaternion,
                        scale: menu.scale,
                    },
                })
                .collect();
            menus.extend(popups.iter().map(|popup| MenuSpawn {
                object_id: None,
                entity_id: popup.entity_id.clone(),
                entity_type: None,
                user_id: popup.shared_by.clone(),
                anchor: MenuAnchor::AboveEntity {
                    offset_y: POPUP_RESTORE_HEIGHT_OFFSET,
                },
            }));
            RestorePlan {
                popups: Vec::new(),
                menus,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeVisualization;

    impl VisualizationStore for FakeVisualization {
        fn landscape(&self) -> SerializedLandscape {
            SerializedLandscape {
                token: "tok-1".into(),
                timestamp: 1_700_000_000_000,
            }
        }
        fn closed_component_ids(&self) -> Vec<String> {
            vec!["comp-1".into()]
        }
        fn highlighted_entities(&self) -> Vec<SerializedHighlight> {
            vec![SerializedHighlight {
                user_id: "u1".into(),
                entity_id: "e1".into(),
            }]
        }
    }

    struct FakePopups(Mutex<Vec<PopupState>>);

    impl PopupStore for FakePopups {
        fn popups(&self) -> Vec<PopupState> {
            self.0.lock().unwrap().clone()
        }
    }

    struct FakeAnnotations(Vec<AnnotationState>);

    impl AnnotationStore for FakeAnnotations {
        fn annotations(&self) -> Vec<AnnotationState> {
            self.0.clone()
        }
    }

    struct FakeMenus(Vec<SerializedDetachedMenu>);

    impl DetachedMenuStore for FakeMenus {
        fn detached_menus(&self) -> Vec<SerializedDetachedMenu> {
            self.0.clone()
        }
    }

    fn sample_popups() -> Vec<PopupState> {
        vec![
            PopupState {
                entity_id: "e1".into(),
                pinned: true,
                shared_by: Some("u1".into()),
            },
            PopupState {
                entity_id: "e2".into(),
                pinned: true,
                shared_by: None,
            },
            PopupState {
                entity_id: "e3".into(),
                pinned: false,
                shared_by: Some("u2".into()),
            },
        ]
    }

    fn menu(entity_id: &str, user_id: Option<&str>) -> SerializedDetachedMenu {
        SerializedDetachedMenu {
            object_id: Some(format!("m-{entity_id}")),
            entity_id: entity_id.into(),
            entity_type: "component".into(),
            position: Vec3::new(1.0, 1.0, 1.0),
            quaternion: Quat::IDENTITY,
            scale: Vec3::ONE,
            user_id: user_id.map(String::from),
        }
    }

    fn serializer(popups: Vec<PopupState>, annotations: Vec<AnnotationState>) -> RoomSerializer {
        RoomSerializer::new(
            Arc::new(FakeVisualization),
            Arc::new(FakePopups(Mutex::new(popups))),
            Arc::new(FakeAnnotations(annotations)),
            Arc::new(FakeMenus(vec![menu("e9", Some("u1"))])),
        )
    }

    #[test]
    fn live_share_keeps_only_pinned_shared_popups() {
        let room = serializer(sample_popups(), Vec::new()).serialize(false);
        assert_eq!(room.popups.len(), 1);
        assert_eq!(room.popups[0].entity_id, "e1");
        assert_eq!(room.popups[0].shared_by.as_deref(), Some("u1"));
    }

    #[test]
    fn snapshot_keeps_pinned_unshared_popups_too() {
        let room = serializer(sample_popups(), Vec::new()).serialize(true);
        let ids: Vec<&str> = room.popups.iter().map(|p| p.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e2"]);
    }

    #[test]
    fn snapshot_forces_annotation_shared_flag_off() {
        let annotations = vec![
            AnnotationState {
                annotation_id: "a1".into(),
                entity_id: Some("e1".into()),
                owner_id: "u1".into(),
                content: "shared note".into(),
                shared: true,
            },
            AnnotationState {
                annotation_id: "a2".into(),
                entity_id: None,
                owner_id: "u1".into(),
                content: "private note".into(),
                shared: false,
            },
        ];

        let live = serializer(Vec::new(), annotations.clone()).serialize(false);
        assert_eq!(live.annotations.len(), 1);
        assert!(live.annotations[0].shared);

        let snapshot = serializer(Vec::new(), annotations).serialize(true);
        assert_eq!(snapshot.annotations.len(), 2);
        // A snapshot is a private copy, never a live share.
        assert!(snapshot.annotations.iter().all(|a| !a.shared));
    }

    #[test]
    fn serialize_is_fresh_on_every_call() {
        let popups = Arc::new(FakePopups(Mutex::new(Vec::new())));
        let serializer = RoomSerializer::new(
            Arc::new(FakeVisualization),
            popups.clone(),
            Arc::new(FakeAnnotations(Vec::new())),
            Arc::new(FakeMenus(Vec::new())),
        );

        assert!(serializer.serialize(false).popups.is_empty());

        popups.0.lock().unwrap().push(PopupState {
            entity_id: "e1".into(),
            pinned: true,
            shared_by: Some("u1".into()),
        });
        assert_eq!(serializer.serialize(false).popups.len(), 1);
    }

    #[test]
    fn serialize_carries_landscape_and_highlights() {
        let room = serializer(Vec::new(), Vec::new()).serialize(false);
        assert_eq!(room.landscape.token, "tok-1");
        assert_eq!(room.closed_component_ids, vec!["comp-1".to_string()]);
        assert_eq!(room.highlighted_entities.len(), 1);
        assert_eq!(room.detached_menus.len(), 1);
    }

    #[test]
    fn browser_restore_flattens_menus_into_one_popup_batch() {
        let popups = vec![SerializedPopup {
            entity_id: "e1".into(),
            shared_by: Some("u1".into()),
        }];
        let menus = vec![menu("e2", Some("u2"))];

        let plan = plan_restore(&popups, &menus, VisualizationMode::Browser);
        assert!(plan.menus.is_empty());
        let ids: Vec<&str> = plan.popups.iter().map(|p| p.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e2"]);
        assert_eq!(plan.popups[1].shared_by.as_deref(), Some("u2"));
    }

    #[test]
    fn vr_restore_anchors_menus_and_offsets_popups() {
        let popups = vec![SerializedPopup {
            entity_id: "e1".into(),
            shared_by: None,
        }];
        let menus = vec![menu("e2", Some("u2"))];

        let plan = plan_restore(&popups, &menus, VisualizationMode::Vr);
        assert!(plan.popups.is_empty());
        assert_eq!(plan.menus.len(), 2);

        // Detached menus keep their serialized world transform.
        assert_eq!(
            plan.menus[0].anchor,
            MenuAnchor::World {
                position: Vec3::new(1.0, 1.0, 1.0),
                quaternion: Quat::IDENTITY,
                scale: Vec3::ONE,
            }
        );
        // Popup-derived menus hover above their entity.
        assert_eq!(
            plan.menus[1].anchor,
            MenuAnchor::AboveEntity {
                offset_y: POPUP_RESTORE_HEIGHT_OFFSET
            }
        );
        assert!(plan.menus[1].entity_type.is_none());
    }
}
