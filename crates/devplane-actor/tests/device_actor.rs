//! End-to-end device actor behavior over the SQLite store.

use std::sync::Arc;

use async_trait::async_trait;
use devplane_actor::{ActorServices, DeviceActor, DeviceActorHandle, DeviceMsg, DeviceRegistry};
use devplane_core::attributes::{AttributeKv, AttributeScope};
use devplane_core::ids::{DeviceId, EdgeId, NodeId, RpcId, SessionId, TenantId};
use devplane_core::messages::{
    ToTransportMsg, ToTransportPayload, TransportEvent, TransportToDeviceMsg,
};
use devplane_core::ports::{
    AttributeStore, ClaimService, DeviceDirectory, DeviceInfo, DeviceStateReporter, EdgeGateway,
    EdgeRpcEvent, RpcResponder, TransportDispatcher,
};
use devplane_core::rpc::{DeliveryStatus, RpcBody, RpcResponse, RpcStatus, ToDeviceRpcRequest};
use devplane_core::session::SessionInfo;
use devplane_core::{Clock, PortError, RpcError, SystemClock};
use devplane_settings::ActorSettings;
use devplane_store::{Database, RpcRepo, SessionCacheRepo};
use parking_lot::Mutex;

struct Directory;

#[async_trait]
impl DeviceDirectory for Directory {
    async fn find_device(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
    ) -> Result<Option<DeviceInfo>, PortError> {
        Ok(Some(DeviceInfo {
            tenant_id: tenant_id.clone(),
            device_id: device_id.clone(),
            name: "meter".into(),
            device_type: "default".into(),
        }))
    }

    async fn find_edge(&self, _: &TenantId, _: &DeviceId) -> Result<Option<EdgeId>, PortError> {
        Ok(None)
    }
}

struct NoAttributes;

#[async_trait]
impl AttributeStore for NoAttributes {
    async fn find(
        &self,
        _: &TenantId,
        _: &DeviceId,
        _: AttributeScope,
        _: Option<&[String]>,
    ) -> Result<Vec<AttributeKv>, PortError> {
        Ok(Vec::new())
    }
}

struct NoEdges;

#[async_trait]
impl EdgeGateway for NoEdges {
    async fn is_reachable(&self, _: &TenantId, _: &EdgeId) -> Result<bool, PortError> {
        Ok(false)
    }

    async fn enqueue_rpc(&self, _: &TenantId, _: &EdgeId, _: EdgeRpcEvent) -> Result<(), PortError> {
        Err(PortError::Unavailable("no edges".into()))
    }
}

struct NoClaims;

#[async_trait]
impl ClaimService for NoClaims {
    async fn register_claiming_info(&self, _: &TenantId, _: &DeviceId, _: &str, _: i64) -> Result<(), PortError> {
        Ok(())
    }
}

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<ToTransportMsg>>,
    responses: Mutex<Vec<RpcResponse>>,
    queued: Mutex<Vec<RpcId>>,
    connects: Mutex<u32>,
}

impl Outbox {
    fn pushes(&self) -> Vec<(SessionId, u64)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match &m.payload {
                ToTransportPayload::RpcRequest(push) => Some((m.session_id.clone(), push.request_id)),
                _ => None,
            })
            .collect()
    }

    fn outcome(&self, id: &RpcId) -> Option<RpcResponse> {
        self.responses.lock().iter().find(|r| &r.id == id).cloned()
    }
}

impl TransportDispatcher for Outbox {
    fn send(&self, _: &NodeId, msg: ToTransportMsg) {
        self.sent.lock().push(msg);
    }
}

impl RpcResponder for Outbox {
    fn queued(&self, rpc_id: &RpcId) {
        self.queued.lock().push(rpc_id.clone());
    }

    fn respond(&self, response: RpcResponse) {
        self.responses.lock().push(response);
    }
}

impl DeviceStateReporter for Outbox {
    fn on_connect(&self, _: &TenantId, _: &DeviceId) {
        *self.connects.lock() += 1;
    }

    fn on_disconnect(&self, _: &TenantId, _: &DeviceId) {}

    fn on_activity(&self, _: &TenantId, _: &DeviceId, _: i64) {}
}

struct Node {
    db: Database,
    outbox: Arc<Outbox>,
    services: Arc<ActorServices>,
}

impl Node {
    fn new(db: Database, settings: ActorSettings) -> Self {
        let outbox = Arc::new(Outbox::default());
        let services = Arc::new(ActorServices {
            settings,
            clock: Arc::new(SystemClock),
            directory: Arc::new(Directory),
            attributes: Arc::new(NoAttributes),
            audit_log: Arc::new(RpcRepo::new(db.clone())),
            session_cache: Arc::new(SessionCacheRepo::new(db.clone())),
            edges: Arc::new(NoEdges),
            claims: Arc::new(NoClaims),
            transport: outbox.clone(),
            responder: outbox.clone(),
            device_state: outbox.clone(),
        });
        Self {
            db,
            outbox,
            services,
        }
    }

    async fn start(&self, device: &DeviceId) -> DeviceActorHandle {
        DeviceActor::start(self.services.clone(), tenant(), device.clone())
            .await
            .unwrap()
    }

    fn status_of(&self, id: &RpcId) -> RpcStatus {
        RpcRepo::new(self.db.clone()).get(id).unwrap().status
    }
}

fn tenant() -> TenantId {
    TenantId::from_raw("tenant_it")
}

fn persisted_rpc(device: &DeviceId) -> ToDeviceRpcRequest {
    ToDeviceRpcRequest {
        id: RpcId::new(),
        tenant_id: tenant(),
        device_id: device.clone(),
        oneway: false,
        expiration_time: SystemClock.now_ms() + 60_000,
        body: RpcBody {
            method: "reboot".into(),
            params: "{}".into(),
        },
        persisted: true,
        retries: None,
        additional_info: Some(r#"{"source":"it"}"#.into()),
    }
}

fn session_event(session: &SessionId, event: TransportEvent) -> TransportToDeviceMsg {
    TransportToDeviceMsg::new(
        session.clone(),
        SessionInfo::persistent(NodeId::from_raw("node-1")),
        event,
    )
}

#[tokio::test]
async fn queued_rpc_survives_actor_restart() {
    let db = Database::in_memory().unwrap();
    let device = DeviceId::new();
    let request = persisted_rpc(&device);

    let first = Node::new(db.clone(), ActorSettings::default());
    let handle = first.start(&device).await;
    handle.submit_rpc(request.clone()).unwrap();
    handle.flush().await.unwrap();
    assert_eq!(first.status_of(&request.id), RpcStatus::Queued);
    assert_eq!(first.outbox.queued.lock().clone(), vec![request.id.clone()]);
    handle.stop();

    let second = Node::new(db, ActorSettings::default());
    let handle = second.start(&device).await;
    let session = SessionId::new();
    handle
        .on_transport(session_event(&session, TransportEvent::SessionOpened))
        .unwrap();
    handle
        .on_transport(session_event(
            &session,
            TransportEvent::SubscribeToRpc { unsubscribe: false },
        ))
        .unwrap();
    handle.flush().await.unwrap();
    assert_eq!(second.outbox.pushes(), vec![(session.clone(), 0)]);

    handle
        .on_transport(session_event(
            &session,
            TransportEvent::RpcDeliveryStatus {
                request_id: 0,
                status: DeliveryStatus::Delivered,
            },
        ))
        .unwrap();
    handle
        .on_transport(session_event(
            &session,
            TransportEvent::RpcResponse {
                request_id: 0,
                payload: Some(r#"{"rebooted":true}"#.into()),
                error: None,
            },
        ))
        .unwrap();
    handle.flush().await.unwrap();

    let record = RpcRepo::new(second.db.clone()).get(&request.id).unwrap();
    assert_eq!(record.status, RpcStatus::Successful);
    assert_eq!(record.response.unwrap()["rebooted"], true);
    assert_eq!(record.additional_info.unwrap()["source"], "it");
    assert!(second.outbox.outcome(&request.id).unwrap().is_success());
}

#[tokio::test]
async fn session_affinity_is_restored_from_cache() {
    let db = Database::in_memory().unwrap();
    let settings = ActorSettings {
        session_cache_enabled: true,
        ..ActorSettings::default()
    };
    let device = DeviceId::new();
    let session = SessionId::new();

    let first = Node::new(db.clone(), settings.clone());
    let handle = first.start(&device).await;
    handle
        .on_transport(session_event(&session, TransportEvent::SessionOpened))
        .unwrap();
    handle
        .on_transport(session_event(
            &session,
            TransportEvent::SubscribeToRpc { unsubscribe: false },
        ))
        .unwrap();
    handle.flush().await.unwrap();
    handle.stop();

    let second = Node::new(db, settings);
    let handle = second.start(&device).await;
    let request = ToDeviceRpcRequest {
        persisted: false,
        ..persisted_rpc(&device)
    };
    handle.submit_rpc(request).unwrap();
    handle.flush().await.unwrap();

    assert_eq!(second.outbox.pushes(), vec![(session, 0)]);
    assert_eq!(*second.outbox.connects.lock(), 0);
}

#[tokio::test]
async fn expired_submission_is_audited_through_registry() {
    let db = Database::in_memory().unwrap();
    let node = Node::new(db, ActorSettings::default());
    let registry = DeviceRegistry::new(node.services.clone());
    let device = DeviceId::new();
    let request = ToDeviceRpcRequest {
        expiration_time: SystemClock.now_ms() - 1,
        ..persisted_rpc(&device)
    };

    registry
        .tell(&tenant(), &device, DeviceMsg::SubmitRpc(request.clone()))
        .await
        .unwrap();
    registry.get(&device).unwrap().flush().await.unwrap();

    assert_eq!(node.status_of(&request.id), RpcStatus::Expired);
    assert_eq!(
        node.outbox.outcome(&request.id).unwrap().error,
        Some(RpcError::Expired)
    );
    assert!(node.outbox.queued.lock().is_empty());
    assert!(node.outbox.pushes().is_empty());
}
