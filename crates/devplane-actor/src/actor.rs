//! Actor task wrapping a [`DeviceProcessor`] and the handle used to talk to it.

use std::sync::Arc;
use std::time::Duration;

use devplane_core::ids::{DeviceId, TenantId};
use devplane_core::messages::TransportToDeviceMsg;
use devplane_core::rpc::ToDeviceRpcRequest;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ActorError;
use crate::messages::{DeviceMsg, Envelope, InternalMsg, SelfMailbox};
use crate::processor::DeviceProcessor;
use crate::services::ActorServices;

/// Entry point for spawning device actors.
pub struct DeviceActor;

impl DeviceActor {
    /// Initialize the device's state and spawn its actor task.
    ///
    /// Fails when the device cannot be loaded; nothing is spawned then.
    pub async fn start(
        services: Arc<ActorServices>,
        tenant_id: TenantId,
        device_id: DeviceId,
    ) -> Result<DeviceActorHandle, ActorError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let sweep_period = Duration::from_millis(services.settings.session_sweep_interval_ms.max(1));
        let processor =
            DeviceProcessor::init(services, tenant_id, device_id.clone(), SelfMailbox::new(&tx)).await?;
        let cancel = CancellationToken::new();
        drop(tokio::spawn(run(
            device_id.clone(),
            processor,
            rx,
            sweep_period,
            cancel.clone(),
        )));
        Ok(DeviceActorHandle {
            device_id,
            tx,
            cancel,
        })
    }
}

/// Process the mailbox one message at a time until stopped.
async fn run(
    device_id: DeviceId,
    mut processor: DeviceProcessor,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    sweep_period: Duration,
    cancel: CancellationToken,
) {
    let mut sweep = time::interval_at(Instant::now() + sweep_period, sweep_period);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                processor.handle_envelope(envelope);
                if processor.is_stopped() {
                    break;
                }
            }
            _ = sweep.tick() => processor.handle_internal(InternalMsg::SweepSessions),
        }
    }

    processor.shutdown();
    rx.close();
    while let Ok(envelope) = rx.try_recv() {
        if let Envelope::Flush(done) = envelope {
            processor.flush_writes(done);
        }
    }
    info!(device_id = %device_id, "device actor stopped");
}

/// Cheap, cloneable handle to a running device actor.
#[derive(Clone, Debug)]
pub struct DeviceActorHandle {
    device_id: DeviceId,
    tx: mpsc::UnboundedSender<Envelope>,
    cancel: CancellationToken,
}

impl DeviceActorHandle {
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Enqueue a message. Never blocks.
    pub fn tell(&self, msg: DeviceMsg) -> Result<(), ActorError> {
        self.tx
            .send(Envelope::External(msg))
            .map_err(|_| ActorError::MailboxClosed(self.device_id.clone()))
    }

    pub fn submit_rpc(&self, request: ToDeviceRpcRequest) -> Result<(), ActorError> {
        self.tell(DeviceMsg::SubmitRpc(request))
    }

    pub fn on_transport(&self, msg: TransportToDeviceMsg) -> Result<(), ActorError> {
        self.tell(DeviceMsg::Transport(msg))
    }

    /// Resolve once every message enqueued before this call has been
    /// processed and its durable writes have landed.
    pub async fn flush(&self) -> Result<(), ActorError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Envelope::Flush(done_tx))
            .map_err(|_| ActorError::MailboxClosed(self.device_id.clone()))?;
        done_rx
            .await
            .map_err(|_| ActorError::MailboxClosed(self.device_id.clone()))
    }

    /// Ask the actor to stop. Messages still queued are dropped.
    pub fn stop(&self) {
        debug!(device_id = %self.device_id, "stopping device actor");
        self.cancel.cancel();
    }

    /// Whether the actor task has exited.
    pub fn is_stopped(&self) -> bool {
        self.tx.is_closed()
    }
}
