//! Grab Ownership Coordinator
//!
//! Arbitrates exclusive manipulation of shared objects. Any number of local
//! input sources (two VR controllers, a mouse ray) may hold the same object
//! concurrently; arbitration only happens against the remote authority, and
//! exactly one authority request is issued per epoch: the span from the
//! first grab while the counter was 0 until it returns to 0. All local
//! holders share that one decision.

use std::collections::HashMap;

use glam::{Quat, Vec3};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};

use crate::error::RequestError;
use crate::protocol::{ClientEvent, RespondableRequest, ServerEvent};
use crate::transport::{SendOutcome, SessionTransport};

/// Identity of a grabbable object as seen by the coordinator.
///
/// `grab_id` is the shared id the authority arbitrates on. Objects without
/// one need no server arbitration and always grab successfully.
#[derive(Debug, Clone)]
pub struct GrabTarget {
    pub object_id: String,
    pub grab_id: Option<String>,
}

/// Live world transform of a held object, polled on the position tick.
#[derive(Debug, Clone, Copy)]
pub struct ObjectTransform {
    pub position: Vec3,
    pub quaternion: Quat,
    pub scale: Vec3,
}

/// Supplies current transforms for held objects. Implemented by the
/// embedding application's scene layer.
pub trait TransformSource: Send + Sync {
    fn transform_of(&self, object_id: &str) -> Option<ObjectTransform>;
}

/// One authority decision per object per epoch.
enum GrabDecision {
    /// Request in flight; later holders park here and share the result.
    Requesting(Vec<oneshot::Sender<bool>>),
    Granted,
    Denied,
}

struct GrabEntry {
    grab_id: Option<String>,
    /// Concurrent local holders. The entry exists iff this is > 0, except
    /// transiently inside a locked section.
    count: u32,
    decision: GrabDecision,
    /// Authority confirmed the grab and the object is still tracked.
    grabbed: bool,
    /// An `object_grabbed` request actually went to the authority this
    /// epoch, so the release notification is owed.
    authority_contacted: bool,
}

/// Coordinates grab ownership across local input sources and the authority.
pub struct GrabCoordinator {
    transport: SessionTransport,
    objects: Mutex<HashMap<String, GrabEntry>>,
}

impl GrabCoordinator {
    pub fn new(transport: SessionTransport) -> Self {
        Self {
            transport,
            objects: Mutex::new(HashMap::new()),
        }
    }

    /// Take (another) local hold on an object. Resolves `true` when the
    /// caller may manipulate it.
    ///
    /// The first holder of an epoch issues the authority request; objects
    /// without a `grab_id`, and grabs attempted while offline, succeed
    /// locally without a frame. A denial stays cached for the rest of the
    /// epoch; re-grabbing while any holder remains reuses it.
    pub async fn grab_object(&self, target: &GrabTarget) -> bool {
        let waiter = {
            let mut objects = self.objects.lock().await;
            if let Some(entry) = objects.get_mut(&target.object_id) {
                entry.count += 1;
                match &mut entry.decision {
                    GrabDecision::Granted => return true,
                    GrabDecision::Denied => return false,
                    GrabDecision::Requesting(waiters) => {
                        let (tx, rx) = oneshot::channel();
                        waiters.push(tx);
                        rx
                    }
                }
            } else {
                objects.insert(
                    target.object_id.clone(),
                    GrabEntry {
                        grab_id: target.grab_id.clone(),
                        count: 1,
                        decision: GrabDecision::Requesting(Vec::new()),
                        grabbed: false,
                        // Marked atomically with the insert: a release that
                        // wins the lock before the authority request resolves
                        // still owes the notification. The offline branch
                        // unmarks.
                        authority_contacted: target.grab_id.is_some(),
                    },
                );
                drop(objects);
                return self.request_authority(target).await;
            }
        };

        // Parked holder: the epoch's single request resolves us. A dropped
        // sender means the object was fully released mid-flight; treat that
        // as not grabbed.
        waiter.await.unwrap_or(false)
    }

    /// Issue the epoch's one authority request and fan the decision out.
    async fn request_authority(&self, target: &GrabTarget) -> bool {
        let granted = match &target.grab_id {
            // No shared id: nothing to arbitrate, always succeeds.
            None => true,
            Some(grab_id) => {
                let outcome = self
                    .transport
                    .send_respondable(RespondableRequest::ObjectGrabbed {
                        object_id: grab_id.clone(),
                    })
                    .await;
                match outcome {
                    // Offline: default to local success, no frame was sent.
                    SendOutcome::Offline => {
                        self.set_authority_contacted(&target.object_id, false).await;
                        true
                    }
                    SendOutcome::Sent(future) => {
                        match future.recv().await {
                            Ok(ServerEvent::ObjectGrabbedResponse { is_success, .. }) => is_success,
                            Ok(other) => {
                                warn!("[GRAB] Unexpected response variant: {:?}", other);
                                false
                            }
                            // Connection died mid-request: same default as
                            // being offline at call time.
                            Err(RequestError::ConnectionClosed) => true,
                            Err(RequestError::ResponseMismatch) => false,
                        }
                    }
                }
            }
        };

        let mut objects = self.objects.lock().await;
        match objects.get_mut(&target.object_id) {
            Some(entry) => {
                entry.grabbed = granted;
                let waiters = match std::mem::replace(
                    &mut entry.decision,
                    if granted {
                        GrabDecision::Granted
                    } else {
                        GrabDecision::Denied
                    },
                ) {
                    GrabDecision::Requesting(waiters) => waiters,
                    _ => Vec::new(),
                };
                for waiter in waiters {
                    let _ = waiter.send(granted);
                }
            }
            None => {
                // Fully released while the request was in flight: the object
                // is no longer tracked, so it never enters the grabbed set.
                debug!(
                    "[GRAB] Decision for {} arrived after full release",
                    target.object_id
                );
            }
        }
        granted
    }

    async fn set_authority_contacted(&self, object_id: &str, contacted: bool) {
        let mut objects = self.objects.lock().await;
        if let Some(entry) = objects.get_mut(object_id) {
            entry.authority_contacted = contacted;
        }
    }

    /// Drop one local hold. The last holder releasing ends the epoch: the
    /// authority is notified (only if it was contacted this epoch) and all
    /// tracking for the object is deleted. Releasing an untracked object is
    /// a no-op; the counter never goes negative.
    pub async fn release_object(&self, object_id: &str) {
        let released = {
            let mut objects = self.objects.lock().await;
            let Some(entry) = objects.get_mut(object_id) else {
                return;
            };
            entry.count -= 1;
            if entry.count > 0 {
                return;
            }
            objects.remove(object_id)
        };

        if let Some(entry) = released {
            debug!("[GRAB] Last holder released {}", object_id);
            if entry.authority_contacted {
                if let Some(grab_id) = entry.grab_id {
                    self.transport
                        .send(&ClientEvent::ObjectReleased { object_id: grab_id })
                        .await;
                }
            }
        }
    }

    /// Number of concurrent local holders of an object. 0 when untracked.
    pub async fn grab_count(&self, object_id: &str) -> u32 {
        self.objects
            .lock()
            .await
            .get(object_id)
            .map(|entry| entry.count)
            .unwrap_or(0)
    }

    /// Broadcast live transforms for every confirmed-grabbed shared object.
    /// Called from the embedder's fixed tick, not event-driven.
    pub async fn send_object_positions(&self, source: &dyn TransformSource) {
        let held: Vec<(String, String)> = {
            let objects = self.objects.lock().await;
            objects
                .iter()
                .filter(|(_, entry)| entry.grabbed)
                .filter_map(|(object_id, entry)| {
                    entry
                        .grab_id
                        .as_ref()
                        .map(|grab_id| (object_id.clone(), grab_id.clone()))
                })
                .collect()
        };

        for (object_id, grab_id) in held {
            let Some(transform) = source.transform_of(&object_id) else {
                continue;
            };
            self.transport
                .send(&ClientEvent::ObjectMoved {
                    object_id: grab_id,
                    position: transform.position,
                    quaternion: transform.quaternion,
                    scale: transform.scale,
                })
                .await;
        }
    }
}
