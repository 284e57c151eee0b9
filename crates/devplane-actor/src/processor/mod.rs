//! Single-writer state machine of one device.
//!
//! The processor owns the session table, both subscription registries and the
//! pending RPC queue. Every handler is synchronous: lookups run on spawned
//! tasks that post their result back through the mailbox, and durable writes
//! are handed to the [`DurableWriter`].

mod attributes;
mod rpc;
mod sessions;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use devplane_core::ids::{DeviceId, EdgeId, NodeId, SessionId, TenantId};
use devplane_core::messages::{ToTransportMsg, ToTransportPayload, TransportEvent, TransportToDeviceMsg};
use devplane_core::rpc::{RpcResponse, RpcStatus, RpcSubmitStrategy};
use devplane_core::session::SessionInfo;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::ActorError;
use crate::messages::{DeviceMsg, Envelope, InternalMsg, SelfMailbox};
use crate::pending::{PendingQueue, PendingRpc};
use crate::services::ActorServices;
use crate::session_table::{SessionMd, SessionTable};
use crate::subscriptions::{SubscriptionKind, SubscriptionRegistry};
use crate::timers::RpcTimers;
use crate::writer::DurableWriter;

const METADATA_DEVICE_NAME: &str = "deviceName";
const METADATA_DEVICE_TYPE: &str = "deviceType";

pub(crate) struct DeviceProcessor {
    tenant_id: TenantId,
    device_id: DeviceId,
    device_name: String,
    device_type: String,
    edge_id: Option<EdgeId>,
    /// Default outgoing metadata attached to edge events.
    metadata: BTreeMap<String, String>,
    services: Arc<ActorServices>,
    strategy: RpcSubmitStrategy,
    sessions: SessionTable,
    subscriptions: SubscriptionRegistry,
    pending: PendingQueue,
    timers: RpcTimers,
    writer: DurableWriter,
    mailbox: SelfMailbox,
    stopped: bool,
}

impl DeviceProcessor {
    /// Load the device and rebuild whatever state survived a restart.
    ///
    /// Fails only when the device itself cannot be loaded. Edge lookup,
    /// session restore and RPC replay failures are logged and skipped.
    pub async fn init(
        services: Arc<ActorServices>,
        tenant_id: TenantId,
        device_id: DeviceId,
        mailbox: SelfMailbox,
    ) -> Result<Self, ActorError> {
        let device = services
            .directory
            .find_device(&tenant_id, &device_id)
            .await?
            .ok_or_else(|| ActorError::DeviceNotFound(device_id.clone()))?;

        let edge_id = if services.settings.edges_enabled {
            match services.directory.find_edge(&tenant_id, &device_id).await {
                Ok(edge_id) => edge_id,
                Err(e) => {
                    warn!(device_id = %device_id, error = %e, "failed to load edge relation");
                    None
                }
            }
        } else {
            None
        };

        let writer = DurableWriter::spawn(
            device_id.clone(),
            services.audit_log.clone(),
            services.session_cache.clone(),
            services.responder.clone(),
        );

        let mut metadata = BTreeMap::new();
        let _ = metadata.insert(METADATA_DEVICE_NAME.to_owned(), device.name.clone());
        let _ = metadata.insert(METADATA_DEVICE_TYPE.to_owned(), device.device_type.clone());

        let mut processor = Self {
            tenant_id,
            device_id,
            device_name: device.name,
            device_type: device.device_type,
            edge_id,
            metadata,
            strategy: services.settings.rpc_submit_strategy,
            sessions: SessionTable::new(services.settings.max_concurrent_sessions_per_device),
            subscriptions: SubscriptionRegistry::default(),
            pending: PendingQueue::default(),
            timers: RpcTimers::default(),
            writer,
            mailbox,
            services,
            stopped: false,
        };

        if processor.services.settings.session_cache_enabled {
            processor.restore_sessions().await;
        }
        processor.restore_pending_rpcs().await;

        for (session_id, info) in processor.subscriptions.subscribers(SubscriptionKind::Rpc) {
            processor.flush_to(&session_id, &info);
        }

        info!(
            device_id = %processor.device_id,
            device_name = %processor.device_name,
            sessions = processor.sessions.len(),
            pending_rpcs = processor.pending.len(),
            strategy = %processor.strategy,
            "device actor initialized"
        );
        Ok(processor)
    }

    async fn restore_sessions(&mut self) {
        let snapshot = match self.services.session_cache.get(&self.device_id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return,
            Err(e) => {
                warn!(device_id = %self.device_id, error = %e, "failed to restore sessions");
                return;
            }
        };
        for entry in snapshot.sessions {
            let info = SessionInfo::persistent(entry.node_id);
            let mut md = SessionMd::new(info.clone(), entry.last_activity_time);
            md.subscribed_to_attributes = entry.subscribed_to_attributes;
            md.subscribed_to_rpc = entry.subscribed_to_rpc;
            if let Some((evicted, _)) = self.sessions.insert(entry.session_id.clone(), md) {
                self.subscriptions.remove_session(&evicted);
            }
            if entry.subscribed_to_attributes {
                self.subscriptions
                    .subscribe(SubscriptionKind::Attributes, entry.session_id.clone(), info.clone());
            }
            if entry.subscribed_to_rpc {
                self.subscriptions
                    .subscribe(SubscriptionKind::Rpc, entry.session_id, info);
            }
        }
        debug!(device_id = %self.device_id, sessions = self.sessions.len(), "sessions restored");
    }

    async fn restore_pending_rpcs(&mut self) {
        let records = match self
            .services
            .audit_log
            .find_by_status(&self.tenant_id, &self.device_id, RpcStatus::Queued)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(device_id = %self.device_id, error = %e, "failed to load queued rpcs");
                return;
            }
        };
        let now = self.now();
        for record in records {
            let remaining = record.request.remaining_ms(now);
            if remaining <= 0 {
                debug!(device_id = %self.device_id, rpc_id = %record.id, "queued rpc expired while offline");
                self.writer.update_rpc(record.id, RpcStatus::Expired, None);
                continue;
            }
            let request_id = self.pending.next_request_id();
            self.insert_pending(request_id, PendingRpc::new(record.request, false), remaining);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Cancel every timer. Called once the actor loop exits.
    pub fn shutdown(&mut self) {
        self.timers.cancel_all();
    }

    /// Reply on `done` after every durable write issued so far has landed.
    pub fn flush_writes(&self, done: oneshot::Sender<()>) {
        self.writer.flush(done);
    }

    pub fn handle_envelope(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Flush(done) => self.flush_writes(done),
            _ if self.stopped => debug!(device_id = %self.device_id, "actor stopped, dropping message"),
            Envelope::External(msg) => self.handle(msg),
            Envelope::Internal(msg) => self.handle_internal(msg),
        }
    }

    pub fn handle(&mut self, msg: DeviceMsg) {
        match msg {
            DeviceMsg::Transport(msg) => self.on_transport(msg),
            DeviceMsg::SubmitRpc(request) => self.submit_rpc(request),
            DeviceMsg::RemoveRpc(rpc_id) => self.remove_rpc(&rpc_id),
            DeviceMsg::AttributesUpdated { scope, values } => self.on_attributes_updated(scope, values),
            DeviceMsg::AttributesDeleted { scope, keys } => self.on_attributes_deleted(scope, keys),
            DeviceMsg::CredentialsUpdated(credentials) => self.on_credentials_updated(credentials),
            DeviceMsg::EdgeChanged(edge_id) => {
                debug!(device_id = %self.device_id, edge_id = ?edge_id, "edge affiliation changed");
                self.edge_id = edge_id;
            }
            DeviceMsg::DeviceRenamed { name, device_type } => self.on_renamed(name, device_type),
            DeviceMsg::NodeRemoved(node_id) => {
                let removed = self.subscriptions.remove_node(&node_id);
                debug!(device_id = %self.device_id, node_id = %node_id, removed, "cleared subscriptions of removed node");
            }
            DeviceMsg::DeviceDeleted => self.on_device_deleted(),
        }
    }

    pub(crate) fn handle_internal(&mut self, msg: InternalMsg) {
        match msg {
            InternalMsg::SubmitTimeout { request_id } => self.on_submit_timeout(request_id),
            InternalMsg::AwaitTimeout {
                request_id,
                generation,
            } => self.on_await_timeout(request_id, generation),
            InternalMsg::SweepSessions => self.sweep_sessions(),
            InternalMsg::AttributesFetched {
                session_id,
                node_id,
                request_id,
                result,
            } => self.on_attributes_fetched(&session_id, &node_id, request_id, result),
            InternalMsg::EdgeChecked {
                request_id,
                edge_id,
                result,
            } => self.on_edge_checked(request_id, edge_id, result),
        }
    }

    fn on_transport(&mut self, msg: TransportToDeviceMsg) {
        let TransportToDeviceMsg {
            session_id,
            session_info,
            event,
        } = msg;
        match event {
            TransportEvent::SessionOpened => self.open_session(session_id, &session_info),
            TransportEvent::SessionClosed => self.close_session(&session_id),
            TransportEvent::SubscribeToAttributes { unsubscribe } => {
                self.subscribe(SubscriptionKind::Attributes, session_id, session_info, unsubscribe);
            }
            TransportEvent::SubscribeToRpc { unsubscribe } => {
                self.subscribe(SubscriptionKind::Rpc, session_id, session_info, unsubscribe);
            }
            TransportEvent::SendPendingRpc => self.flush_to(&session_id, &session_info),
            TransportEvent::GetAttributes {
                request_id,
                client_keys,
                shared_keys,
            } => self.get_attributes(session_id, session_info.node_id, request_id, client_keys, shared_keys),
            TransportEvent::RpcResponse {
                request_id,
                payload,
                error,
            } => self.on_application_response(request_id, payload, error),
            TransportEvent::SubscriptionInfo {
                last_activity_time,
                subscribed_to_attributes,
                subscribed_to_rpc,
            } => self.on_activity(
                session_id,
                &session_info,
                last_activity_time,
                subscribed_to_attributes,
                subscribed_to_rpc,
            ),
            TransportEvent::ClaimDevice {
                secret_key,
                duration_ms,
            } => self.claim_device(secret_key, duration_ms),
            TransportEvent::RpcDeliveryStatus { request_id, status } => {
                self.on_delivery_status(request_id, status);
            }
            TransportEvent::UplinkNotification { uplink_ts } => {
                self.relay_uplink(&session_id, &session_info.node_id, uplink_ts);
            }
        }
    }

    fn on_renamed(&mut self, name: String, device_type: String) {
        debug!(device_id = %self.device_id, name = %name, device_type = %device_type, "device renamed");
        let _ = self
            .metadata
            .insert(METADATA_DEVICE_NAME.to_owned(), name.clone());
        let _ = self
            .metadata
            .insert(METADATA_DEVICE_TYPE.to_owned(), device_type.clone());
        self.device_name = name;
        self.device_type = device_type;
    }

    // ─── Shared helpers ─────────────────────────────────────────────────

    fn now(&self) -> i64 {
        self.services.clock.now_ms()
    }

    fn send(&self, session_id: &SessionId, node_id: &NodeId, payload: ToTransportPayload) {
        self.services.transport.send(
            node_id,
            ToTransportMsg {
                session_id: session_id.clone(),
                node_id: node_id.clone(),
                payload,
            },
        );
    }

    fn respond(&self, response: RpcResponse) {
        self.services.responder.respond(response);
    }

    /// Checkpoint the persistent sessions when affinity is enabled.
    fn dump_sessions(&self) {
        if self.services.settings.session_cache_enabled {
            self.writer.put_sessions(self.sessions.snapshot());
        }
    }

    fn millis(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }
}
