//! Node-local directory of running device actors.

use std::sync::Arc;

use dashmap::DashMap;
use devplane_core::ids::{DeviceId, TenantId};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::actor::{DeviceActor, DeviceActorHandle};
use crate::error::ActorError;
use crate::messages::DeviceMsg;
use crate::services::ActorServices;

/// Per-device slot. Filled once by whichever caller initializes the actor.
type Slot = Arc<OnceCell<DeviceActorHandle>>;

/// Starts actors on first use and routes messages to them.
pub struct DeviceRegistry {
    services: Arc<ActorServices>,
    actors: DashMap<DeviceId, Slot>,
}

impl DeviceRegistry {
    pub fn new(services: Arc<ActorServices>) -> Self {
        Self {
            services,
            actors: DashMap::new(),
        }
    }

    /// Handle of the running actor for `device_id`, starting one if needed.
    ///
    /// The device's slot is claimed before initialization, so concurrent
    /// callers wait on a single start and share its handle. A failed start
    /// leaves no entry behind.
    pub async fn get_or_start(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
    ) -> Result<DeviceActorHandle, ActorError> {
        let slot = self.claim_slot(device_id);
        let started = slot
            .get_or_try_init(|| async {
                let handle =
                    DeviceActor::start(Arc::clone(&self.services), tenant_id.clone(), device_id.clone())
                        .await?;
                debug!(device_id = %device_id, "device actor registered");
                Ok::<_, ActorError>(handle)
            })
            .await;
        match started {
            Ok(handle) if self.holds(device_id, &slot) => Ok(handle.clone()),
            Ok(handle) => {
                // Stopped through the registry while starting.
                handle.stop();
                Err(ActorError::MailboxClosed(device_id.clone()))
            }
            Err(e) => {
                let _ = self.actors.remove_if(device_id, |_, current| {
                    Arc::ptr_eq(current, &slot) && current.get().is_none()
                });
                Err(e)
            }
        }
    }

    /// Current slot for `device_id`, replacing one whose actor has exited.
    fn claim_slot(&self, device_id: &DeviceId) -> Slot {
        let mut slot = self.actors.entry(device_id.clone()).or_default();
        if slot.get().is_some_and(DeviceActorHandle::is_stopped) {
            *slot = Slot::default();
        }
        Arc::clone(slot.value())
    }

    fn holds(&self, device_id: &DeviceId, slot: &Slot) -> bool {
        self.actors
            .get(device_id)
            .is_some_and(|current| Arc::ptr_eq(current.value(), slot))
    }

    /// Route a message, starting the actor if it is not running.
    pub async fn tell(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
        msg: DeviceMsg,
    ) -> Result<(), ActorError> {
        self.get_or_start(tenant_id, device_id).await?.tell(msg)
    }

    /// Running actor for `device_id`, if any.
    pub fn get(&self, device_id: &DeviceId) -> Option<DeviceActorHandle> {
        self.actors
            .get(device_id)
            .and_then(|slot| slot.get().cloned())
            .filter(|handle| !handle.is_stopped())
    }

    /// Stop and forget an actor. Returns whether one was registered.
    pub fn stop(&self, device_id: &DeviceId) -> bool {
        match self.actors.remove(device_id) {
            Some((_, slot)) => {
                if let Some(handle) = slot.get() {
                    handle.stop();
                }
                true
            }
            None => false,
        }
    }

    /// Forget every actor whose task has exited. Returns how many went away.
    pub fn remove_stopped(&self) -> usize {
        let before = self.actors.len();
        self.actors
            .retain(|_, slot| !slot.get().is_some_and(DeviceActorHandle::is_stopped));
        before - self.actors.len()
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}
