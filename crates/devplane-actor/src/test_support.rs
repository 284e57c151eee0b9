//! Recording fakes and a synchronous harness for driving a processor
//! message by message.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use devplane_core::attributes::{AttributeKv, AttributeScope};
use devplane_core::ids::{DeviceId, EdgeId, NodeId, RpcId, SessionId, TenantId};
use devplane_core::messages::{ToTransportMsg, ToTransportPayload, TransportEvent, TransportToDeviceMsg};
use devplane_core::ports::{
    AttributeStore, ClaimService, DeviceDirectory, DeviceInfo, DeviceStateReporter, EdgeGateway,
    EdgeRpcEvent, RpcAuditLog, RpcResponder, SessionSnapshotCache, TransportDispatcher,
};
use devplane_core::rpc::{RpcBody, RpcRecord, RpcResponse, RpcStatus, ToDeviceRpcRequest};
use devplane_core::session::{SessionInfo, SessionSnapshot};
use devplane_core::{ManualClock, PortError};
use devplane_settings::ActorSettings;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::messages::{DeviceMsg, Envelope, SelfMailbox};
use crate::processor::DeviceProcessor;
use crate::services::ActorServices;

/// Wall-clock start of every harness.
pub const T0: i64 = 1_700_000_000_000;

pub fn tenant() -> TenantId {
    TenantId::from_raw("tenant_test")
}

pub fn device() -> DeviceId {
    DeviceId::from_raw("dev_test")
}

pub fn node(n: &str) -> NodeId {
    NodeId::from_raw(n)
}

pub fn sid(n: &str) -> SessionId {
    SessionId::from_raw(n)
}

/// Two-way, non-persisted request expiring a minute after [`T0`].
pub fn rpc_request() -> ToDeviceRpcRequest {
    ToDeviceRpcRequest {
        id: RpcId::new(),
        tenant_id: tenant(),
        device_id: device(),
        oneway: false,
        expiration_time: T0 + 60_000,
        body: RpcBody {
            method: "setGpio".into(),
            params: r#"{"pin":4,"value":1}"#.into(),
        },
        persisted: false,
        retries: None,
        additional_info: None,
    }
}

pub fn oneway_request() -> ToDeviceRpcRequest {
    ToDeviceRpcRequest {
        oneway: true,
        ..rpc_request()
    }
}

pub fn persisted_request() -> ToDeviceRpcRequest {
    ToDeviceRpcRequest {
        persisted: true,
        ..rpc_request()
    }
}

pub fn transport(session: &str, info: SessionInfo, event: TransportEvent) -> DeviceMsg {
    DeviceMsg::Transport(TransportToDeviceMsg::new(sid(session), info, event))
}

type Journal = Arc<Mutex<Vec<String>>>;

// ─── Fakes ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<ToTransportMsg>>,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<ToTransportMsg> {
        self.sent.lock().clone()
    }

    pub fn take(&self) -> Vec<ToTransportMsg> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Request ids pushed to `session`, in push order.
    pub fn rpc_pushes_to(&self, session: &str) -> Vec<u64> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.session_id.as_str() == session)
            .filter_map(|m| match &m.payload {
                ToTransportPayload::RpcRequest(push) => Some(push.request_id),
                _ => None,
            })
            .collect()
    }

    pub fn rpc_push_count(&self) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|m| matches!(m.payload, ToTransportPayload::RpcRequest(_)))
            .count()
    }

    /// Sessions that were sent a close, with the reason.
    pub fn closes(&self) -> Vec<(String, devplane_core::session::SessionCloseReason)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match &m.payload {
                ToTransportPayload::SessionClose { reason, .. } => {
                    Some((m.session_id.to_string(), *reason))
                }
                _ => None,
            })
            .collect()
    }
}

impl TransportDispatcher for RecordingTransport {
    fn send(&self, _node_id: &NodeId, msg: ToTransportMsg) {
        self.sent.lock().push(msg);
    }
}

pub struct RecordingResponder {
    responses: Mutex<Vec<RpcResponse>>,
    queued: Mutex<Vec<RpcId>>,
    journal: Journal,
}

impl RecordingResponder {
    pub fn responses(&self) -> Vec<RpcResponse> {
        self.responses.lock().clone()
    }

    pub fn queued_ids(&self) -> Vec<RpcId> {
        self.queued.lock().clone()
    }

    /// Every outcome delivered for `id`.
    pub fn outcomes(&self, id: &RpcId) -> Vec<RpcResponse> {
        self.responses
            .lock()
            .iter()
            .filter(|r| &r.id == id)
            .cloned()
            .collect()
    }

    pub fn single_outcome(&self, id: &RpcId) -> RpcResponse {
        let outcomes = self.outcomes(id);
        assert_eq!(outcomes.len(), 1, "expected one outcome for {id}, got {outcomes:?}");
        outcomes.into_iter().next().unwrap()
    }
}

impl RpcResponder for RecordingResponder {
    fn queued(&self, rpc_id: &RpcId) {
        self.journal.lock().push(format!("queued:{rpc_id}"));
        self.queued.lock().push(rpc_id.clone());
    }

    fn respond(&self, response: RpcResponse) {
        self.responses.lock().push(response);
    }
}

#[derive(Default)]
pub struct RecordingDeviceState {
    events: Mutex<Vec<String>>,
}

impl RecordingDeviceState {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.split(':').next() == Some(kind))
            .count()
    }
}

impl DeviceStateReporter for RecordingDeviceState {
    fn on_connect(&self, _tenant_id: &TenantId, _device_id: &DeviceId) {
        self.events.lock().push("connect".into());
    }

    fn on_disconnect(&self, _tenant_id: &TenantId, _device_id: &DeviceId) {
        self.events.lock().push("disconnect".into());
    }

    fn on_activity(&self, _tenant_id: &TenantId, _device_id: &DeviceId, ts: i64) {
        self.events.lock().push(format!("activity:{ts}"));
    }
}

pub struct MemoryAuditLog {
    records: Mutex<HashMap<RpcId, RpcRecord>>,
    history: Mutex<HashMap<RpcId, Vec<RpcStatus>>>,
    fail: AtomicBool,
    journal: Journal,
}

impl MemoryAuditLog {
    pub fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn seed(&self, record: RpcRecord) {
        let _ = self.records.lock().insert(record.id.clone(), record);
    }

    pub fn status_of(&self, id: &RpcId) -> Option<RpcStatus> {
        self.records.lock().get(id).map(|r| r.status)
    }

    pub fn response_of(&self, id: &RpcId) -> Option<Value> {
        self.records.lock().get(id).and_then(|r| r.response.clone())
    }

    pub fn history(&self, id: &RpcId) -> Vec<RpcStatus> {
        self.history.lock().get(id).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }
}

#[async_trait]
impl RpcAuditLog for MemoryAuditLog {
    async fn create(&self, record: RpcRecord) -> Result<(), PortError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("audit log down".into()));
        }
        self.journal
            .lock()
            .push(format!("create:{}:{}", record.id, record.status));
        self.history
            .lock()
            .entry(record.id.clone())
            .or_default()
            .push(record.status);
        let _ = self.records.lock().insert(record.id.clone(), record);
        Ok(())
    }

    async fn update_status(
        &self,
        rpc_id: &RpcId,
        status: RpcStatus,
        response: Option<Value>,
    ) -> Result<(), PortError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("audit log down".into()));
        }
        let mut records = self.records.lock();
        let record = records
            .get_mut(rpc_id)
            .ok_or_else(|| PortError::NotFound(rpc_id.to_string()))?;
        record.status = status;
        if response.is_some() {
            record.response = response;
        }
        self.history
            .lock()
            .entry(rpc_id.clone())
            .or_default()
            .push(status);
        Ok(())
    }

    async fn find_by_status(
        &self,
        _tenant_id: &TenantId,
        device_id: &DeviceId,
        status: RpcStatus,
    ) -> Result<Vec<RpcRecord>, PortError> {
        let mut found: Vec<RpcRecord> = self
            .records
            .lock()
            .values()
            .filter(|r| &r.device_id == device_id && r.status == status)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_time);
        Ok(found)
    }
}

#[derive(Default)]
pub struct MemoryCache {
    snapshots: Mutex<HashMap<DeviceId, SessionSnapshot>>,
    puts: Mutex<usize>,
}

impl MemoryCache {
    pub fn seed(&self, device_id: DeviceId, snapshot: SessionSnapshot) {
        let _ = self.snapshots.lock().insert(device_id, snapshot);
    }

    pub fn puts(&self) -> usize {
        *self.puts.lock()
    }

    pub fn last(&self, device_id: &DeviceId) -> Option<SessionSnapshot> {
        self.snapshots.lock().get(device_id).cloned()
    }
}

#[async_trait]
impl SessionSnapshotCache for MemoryCache {
    async fn get(&self, device_id: &DeviceId) -> Result<Option<SessionSnapshot>, PortError> {
        Ok(self.snapshots.lock().get(device_id).cloned())
    }

    async fn put(&self, device_id: &DeviceId, snapshot: SessionSnapshot) -> Result<(), PortError> {
        *self.puts.lock() += 1;
        let _ = self.snapshots.lock().insert(device_id.clone(), snapshot);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeDirectory {
    pub missing: AtomicBool,
    /// Yield once inside `find_device`, so concurrent starts interleave.
    pub slow_lookup: AtomicBool,
    pub edge: Mutex<Option<EdgeId>>,
}

#[async_trait]
impl DeviceDirectory for FakeDirectory {
    async fn find_device(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
    ) -> Result<Option<DeviceInfo>, PortError> {
        if self.slow_lookup.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        if self.missing.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(DeviceInfo {
            tenant_id: tenant_id.clone(),
            device_id: device_id.clone(),
            name: "thermostat-1".into(),
            device_type: "thermostat".into(),
        }))
    }

    async fn find_edge(
        &self,
        _tenant_id: &TenantId,
        _device_id: &DeviceId,
    ) -> Result<Option<EdgeId>, PortError> {
        Ok(self.edge.lock().clone())
    }
}

#[derive(Default)]
pub struct FakeAttributes {
    values: Mutex<HashMap<AttributeScope, Vec<AttributeKv>>>,
    fail: AtomicBool,
}

impl FakeAttributes {
    pub fn set(&self, scope: AttributeScope, values: Vec<AttributeKv>) {
        let _ = self.values.lock().insert(scope, values);
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AttributeStore for FakeAttributes {
    async fn find(
        &self,
        _tenant_id: &TenantId,
        _device_id: &DeviceId,
        scope: AttributeScope,
        keys: Option<&[String]>,
    ) -> Result<Vec<AttributeKv>, PortError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Backend("attribute store down".into()));
        }
        let all = self.values.lock().get(&scope).cloned().unwrap_or_default();
        Ok(match keys {
            Some(keys) => all.into_iter().filter(|kv| keys.contains(&kv.key)).collect(),
            None => all,
        })
    }
}

#[derive(Default)]
pub struct FakeEdges {
    pub reachable: AtomicBool,
    events: Mutex<Vec<(EdgeId, EdgeRpcEvent)>>,
}

impl FakeEdges {
    pub fn events(&self) -> Vec<(EdgeId, EdgeRpcEvent)> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EdgeGateway for FakeEdges {
    async fn is_reachable(&self, _tenant_id: &TenantId, _edge_id: &EdgeId) -> Result<bool, PortError> {
        Ok(self.reachable.load(Ordering::SeqCst))
    }

    async fn enqueue_rpc(
        &self,
        _tenant_id: &TenantId,
        edge_id: &EdgeId,
        event: EdgeRpcEvent,
    ) -> Result<(), PortError> {
        self.events.lock().push((edge_id.clone(), event));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingClaims {
    claims: Mutex<Vec<(String, i64)>>,
}

impl RecordingClaims {
    pub fn claims(&self) -> Vec<(String, i64)> {
        self.claims.lock().clone()
    }
}

#[async_trait]
impl ClaimService for RecordingClaims {
    async fn register_claiming_info(
        &self,
        _tenant_id: &TenantId,
        _device_id: &DeviceId,
        secret_key: &str,
        duration_ms: i64,
    ) -> Result<(), PortError> {
        self.claims.lock().push((secret_key.to_owned(), duration_ms));
        Ok(())
    }
}

/// Every fake, sharing one journal of durable writes and queued-acks.
pub struct Fakes {
    pub clock: Arc<ManualClock>,
    pub transport: Arc<RecordingTransport>,
    pub responder: Arc<RecordingResponder>,
    pub device_state: Arc<RecordingDeviceState>,
    pub audit: Arc<MemoryAuditLog>,
    pub cache: Arc<MemoryCache>,
    pub directory: Arc<FakeDirectory>,
    pub attributes: Arc<FakeAttributes>,
    pub edges: Arc<FakeEdges>,
    pub claims: Arc<RecordingClaims>,
    journal: Journal,
}

impl Default for Fakes {
    fn default() -> Self {
        let journal: Journal = Arc::default();
        Self {
            clock: Arc::new(ManualClock::new(T0)),
            transport: Arc::default(),
            responder: Arc::new(RecordingResponder {
                responses: Mutex::default(),
                queued: Mutex::default(),
                journal: journal.clone(),
            }),
            device_state: Arc::default(),
            audit: Arc::new(MemoryAuditLog {
                records: Mutex::default(),
                history: Mutex::default(),
                fail: AtomicBool::new(false),
                journal: journal.clone(),
            }),
            cache: Arc::default(),
            directory: Arc::default(),
            attributes: Arc::default(),
            edges: Arc::default(),
            claims: Arc::default(),
            journal,
        }
    }
}

impl Fakes {
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    pub fn services(&self, settings: ActorSettings) -> Arc<ActorServices> {
        Arc::new(ActorServices {
            settings,
            clock: self.clock.clone(),
            directory: self.directory.clone(),
            attributes: self.attributes.clone(),
            audit_log: self.audit.clone(),
            session_cache: self.cache.clone(),
            edges: self.edges.clone(),
            claims: self.claims.clone(),
            transport: self.transport.clone(),
            responder: self.responder.clone(),
            device_state: self.device_state.clone(),
        })
    }
}

// ─── Harness ───────────────────────────────────────────────────────────────

/// A processor driven directly, without the actor loop. Self-posted
/// messages (timer fires, async completions) queue up in `rx` until
/// [`Harness::drain`] feeds them back.
pub struct Harness {
    pub fakes: Fakes,
    pub processor: DeviceProcessor,
    rx: mpsc::UnboundedReceiver<Envelope>,
    _tx: mpsc::UnboundedSender<Envelope>,
}

impl Harness {
    pub async fn new(settings: ActorSettings) -> Self {
        Self::with_fakes(Fakes::default(), settings).await
    }

    pub async fn with_fakes(fakes: Fakes, settings: ActorSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let processor = DeviceProcessor::init(
            fakes.services(settings),
            tenant(),
            device(),
            SelfMailbox::new(&tx),
        )
        .await
        .expect("processor init");
        Self {
            fakes,
            processor,
            rx,
            _tx: tx,
        }
    }

    pub fn tell(&mut self, msg: DeviceMsg) {
        self.processor.handle(msg);
    }

    pub fn open(&mut self, session: &str, node_id: &str) {
        self.tell(transport(
            session,
            SessionInfo::persistent(node(node_id)),
            TransportEvent::SessionOpened,
        ));
    }

    pub fn close(&mut self, session: &str) {
        self.tell(transport(
            session,
            SessionInfo::persistent(node("node-a")),
            TransportEvent::SessionClosed,
        ));
    }

    pub fn subscribe_rpc(&mut self, session: &str, info: SessionInfo) {
        self.tell(transport(
            session,
            info,
            TransportEvent::SubscribeToRpc { unsubscribe: false },
        ));
    }

    pub fn subscribe_attributes(&mut self, session: &str, info: SessionInfo) {
        self.tell(transport(
            session,
            info,
            TransportEvent::SubscribeToAttributes { unsubscribe: false },
        ));
    }

    /// Open an ASYNC session on `node-a` and subscribe it to RPC.
    pub fn rpc_session(&mut self, session: &str) {
        self.open(session, "node-a");
        self.subscribe_rpc(session, SessionInfo::persistent(node("node-a")));
    }

    pub fn submit(&mut self, request: ToDeviceRpcRequest) {
        self.tell(DeviceMsg::SubmitRpc(request));
    }

    pub fn delivery(&mut self, session: &str, request_id: u64, status: devplane_core::rpc::DeliveryStatus) {
        self.tell(transport(
            session,
            SessionInfo::persistent(node("node-a")),
            TransportEvent::RpcDeliveryStatus { request_id, status },
        ));
    }

    pub fn respond(&mut self, session: &str, request_id: u64, payload: Option<&str>, error: Option<&str>) {
        self.tell(transport(
            session,
            SessionInfo::persistent(node("node-a")),
            TransportEvent::RpcResponse {
                request_id,
                payload: payload.map(str::to_owned),
                error: error.map(str::to_owned),
            },
        ));
    }

    /// Feed every queued self-message back into the processor.
    pub fn drain(&mut self) {
        while let Ok(envelope) = self.rx.try_recv() {
            self.processor.handle_envelope(envelope);
        }
    }

    /// Let spawned tasks run, then drain what they posted.
    pub async fn settle(&mut self) {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        self.drain();
    }

    /// Wait for the durable writer to apply everything queued so far.
    pub async fn flush_writes(&self) {
        let (tx, rx) = oneshot::channel();
        self.processor.flush_writes(tx);
        rx.await.expect("writer flushed");
    }

    /// Advance virtual time (and the wall clock) then process what fired.
    pub async fn advance(&mut self, ms: u64) {
        // Let freshly spawned timer tasks register their sleeps first.
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        self.fakes.clock.advance(i64::try_from(ms).unwrap());
        tokio::time::advance(std::time::Duration::from_millis(ms)).await;
        self.settle().await;
    }
}
