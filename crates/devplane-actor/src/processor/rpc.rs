//! Server-to-device RPC lifecycle: submit, delivery feedback, device
//! answers, timeouts, removal and backlog flushing.

use devplane_core::ids::{EdgeId, RpcId, SessionId};
use devplane_core::messages::{ToDeviceRpcPush, ToTransportPayload};
use devplane_core::ports::EdgeRpcEvent;
use devplane_core::rpc::{
    response_to_json, DeliveryStatus, RpcRecord, RpcResponse, RpcStatus, RpcSubmitStrategy,
    ToDeviceRpcRequest,
};
use devplane_core::session::{SessionCloseReason, SessionInfo};
use devplane_core::RpcError;
use metrics::{counter, gauge};
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::DeviceProcessor;
use crate::messages::InternalMsg;
use crate::pending::PendingRpc;
use crate::strategy::{Selection, SubmitPolicy};
use crate::subscriptions::SubscriptionKind;

impl DeviceProcessor {
    pub(super) fn submit_rpc(&mut self, request: ToDeviceRpcRequest) {
        let now = self.now();
        let remaining = request.remaining_ms(now);
        if remaining <= 0 {
            debug!(device_id = %self.device_id, rpc_id = %request.id, "rpc expired before dispatch");
            if request.persisted {
                self.writer
                    .create_rpc(RpcRecord::new(&request, RpcStatus::Expired, now), false);
            }
            self.respond(RpcResponse::failure(request.id, RpcError::Expired));
            return;
        }

        counter!("device_rpc_submitted_total").increment(1);
        let request_id = self.pending.next_request_id();
        if request.persisted {
            self.writer
                .create_rpc(RpcRecord::new(&request, RpcStatus::Queued, now), true);
        }

        let mut sent = false;
        let edge_id = self
            .edge_id
            .clone()
            .filter(|_| self.services.settings.edges_enabled);
        if let Some(edge_id) = edge_id {
            self.check_edge(request_id, edge_id);
        } else if self.strategy.may_submit_new(&self.pending) {
            sent = self.push_to_subscribers(request_id, &request);
        }
        debug!(device_id = %self.device_id, rpc_id = %request.id, request_id, sent, "rpc submitted");

        if !request.persisted && request.oneway && sent {
            self.respond(RpcResponse::success(request.id, None));
            return;
        }
        self.insert_pending(request_id, PendingRpc::new(request, sent), remaining);
    }

    /// Queue a request and arm its submit timeout.
    pub(super) fn insert_pending(&mut self, request_id: u64, rpc: PendingRpc, remaining_ms: i64) {
        self.pending.insert(request_id, rpc);
        let delay = Self::millis(u64::try_from(remaining_ms).unwrap_or(0));
        self.timers.arm_submit(&self.mailbox, request_id, delay);
        gauge!("device_rpc_pending").increment(1.0);
    }

    /// Drop a request from the queue together with its submit timer.
    fn remove_pending(&mut self, request_id: u64) -> Option<PendingRpc> {
        let rpc = self.pending.remove(request_id)?;
        self.timers.cancel_submit(request_id);
        gauge!("device_rpc_pending").decrement(1.0);
        Some(rpc)
    }

    /// Push a request to every RPC subscriber. One-shot subscribers are
    /// consumed. Returns whether anyone received it.
    fn push_to_subscribers(&mut self, request_id: u64, request: &ToDeviceRpcRequest) -> bool {
        let subscribers = self.subscriptions.subscribers(SubscriptionKind::Rpc);
        for (session_id, info) in &subscribers {
            self.push(session_id, info, request_id, request);
            if info.is_sync() {
                let _ = self.subscriptions.unsubscribe(SubscriptionKind::Rpc, session_id);
            }
        }
        !subscribers.is_empty()
    }

    fn push(&self, session_id: &SessionId, info: &SessionInfo, request_id: u64, request: &ToDeviceRpcRequest) {
        self.send(
            session_id,
            &info.node_id,
            ToTransportPayload::RpcRequest(ToDeviceRpcPush::from_request(request_id, request)),
        );
    }

    /// Push a queued entry and mark it sent. A non-persisted one-way entry is
    /// complete once pushed; returns whether that happened.
    fn push_pending(&mut self, session_id: &SessionId, info: &SessionInfo, request_id: u64) -> bool {
        let Some(rpc) = self.pending.get_mut(request_id) else {
            return false;
        };
        rpc.sent = true;
        let request = rpc.request.clone();
        self.push(session_id, info, request_id, &request);
        if request.oneway && !request.persisted {
            let _ = self.remove_pending(request_id);
            self.respond(RpcResponse::success(request.id, None));
            return true;
        }
        false
    }

    /// Push whatever backlog the strategy allows to one session.
    pub(super) fn flush_to(&mut self, session_id: &SessionId, info: &SessionInfo) {
        if self.strategy.is_sequential() {
            loop {
                match self.strategy.select_next(&self.pending) {
                    Selection::One(request_id) => {
                        let completed = self.push_pending(session_id, info, request_id);
                        if info.is_sync() {
                            let _ = self.subscriptions.unsubscribe(SubscriptionKind::Rpc, session_id);
                            break;
                        }
                        if !completed {
                            break;
                        }
                    }
                    Selection::AwaitResponse(request_id) => {
                        let timeout = Self::millis(self.services.settings.rpc_response_timeout_ms);
                        let _ = self.timers.arm_await(&self.mailbox, request_id, timeout);
                        break;
                    }
                    Selection::All(_) | Selection::Nothing => break,
                }
            }
            return;
        }

        let Selection::All(mut request_ids) = self.strategy.select_next(&self.pending) else {
            return;
        };
        if info.is_sync() {
            request_ids.truncate(1);
        }
        debug!(device_id = %self.device_id, session_id = %session_id, count = request_ids.len(), "flushing rpc backlog");
        for request_id in request_ids {
            let _ = self.push_pending(session_id, info, request_id);
        }
        if info.is_sync() {
            let _ = self.subscriptions.unsubscribe(SubscriptionKind::Rpc, session_id);
        }
    }

    /// Move a sequential queue forward toward every RPC subscriber. Nothing
    /// is gated under burst submission, so there is nothing to advance.
    fn advance(&mut self) {
        if !self.strategy.is_sequential() {
            return;
        }
        for (session_id, info) in self.subscriptions.subscribers(SubscriptionKind::Rpc) {
            self.flush_to(&session_id, &info);
        }
    }

    fn check_edge(&self, request_id: u64, edge_id: EdgeId) {
        let edges = self.services.edges.clone();
        let tenant_id = self.tenant_id.clone();
        let mailbox = self.mailbox.clone();
        drop(tokio::spawn(async move {
            let result = edges
                .is_reachable(&tenant_id, &edge_id)
                .await
                .map_err(|e| e.to_string());
            mailbox.post(InternalMsg::EdgeChecked {
                request_id,
                edge_id,
                result,
            });
        }));
    }

    pub(super) fn on_edge_checked(&mut self, request_id: u64, edge_id: EdgeId, result: Result<bool, String>) {
        match result {
            Ok(true) => {
                let Some(rpc) = self.pending.get(request_id) else {
                    debug!(device_id = %self.device_id, request_id, "rpc resolved before edge check completed");
                    return;
                };
                let event = EdgeRpcEvent {
                    request_id,
                    request: rpc.request.clone(),
                    metadata: self.metadata.clone(),
                };
                let edges = self.services.edges.clone();
                let tenant_id = self.tenant_id.clone();
                let device_id = self.device_id.clone();
                drop(tokio::spawn(async move {
                    if let Err(e) = edges.enqueue_rpc(&tenant_id, &edge_id, event).await {
                        warn!(device_id = %device_id, edge_id = %edge_id, request_id, error = %e, "failed to forward rpc to edge");
                    }
                }));
            }
            Ok(false) => {
                error!(device_id = %self.device_id, edge_id = %edge_id, request_id, "edge is not reachable, rpc stays queued until it expires");
            }
            Err(e) => {
                error!(device_id = %self.device_id, edge_id = %edge_id, request_id, error = %e, "edge reachability check failed");
            }
        }
    }

    pub(super) fn on_delivery_status(&mut self, request_id: u64, status: DeliveryStatus) {
        let Some(rpc) = self.pending.get_mut(request_id) else {
            info!(device_id = %self.device_id, request_id, ?status, "delivery status for unknown rpc");
            return;
        };
        let rpc_id = rpc.request.id.clone();
        let persisted = rpc.request.persisted;
        debug!(device_id = %self.device_id, rpc_id = %rpc_id, request_id, ?status, "rpc delivery status");

        match status {
            DeliveryStatus::Sent => {
                rpc.sent = true;
                if persisted {
                    self.writer.update_rpc(rpc_id, status.as_rpc_status(), None);
                }
                return;
            }
            DeliveryStatus::Delivered if rpc.request.oneway => {
                let _ = self.remove_pending(request_id);
                if persisted {
                    self.writer.update_rpc(rpc_id.clone(), RpcStatus::Successful, None);
                }
                self.respond(RpcResponse::success(rpc_id, None));
            }
            DeliveryStatus::Delivered => {
                rpc.delivered = true;
                if persisted {
                    self.writer.update_rpc(rpc_id, status.as_rpc_status(), None);
                }
                if self.strategy == RpcSubmitStrategy::SequentialOnResponseFromDevice {
                    let timeout = Self::millis(self.services.settings.rpc_response_timeout_ms);
                    let _ = self.timers.arm_await(&self.mailbox, request_id, timeout);
                }
            }
            DeliveryStatus::Timeout => self.on_delivery_timeout(request_id),
        }
        self.advance();
    }

    fn on_delivery_timeout(&mut self, request_id: u64) {
        let system_max = self.services.settings.rpc_max_retries;
        let close_sessions = self.services.settings.close_sessions_on_rpc_delivery_timeout;
        let Some(rpc) = self.pending.get_mut(request_id) else {
            return;
        };
        let max_retries = rpc.request.retries.map_or(system_max, |r| r.min(system_max));
        let rpc_id = rpc.request.id.clone();
        let persisted = rpc.request.persisted;

        if rpc.retries < max_retries {
            rpc.retries += 1;
            let request = rpc.request.clone();
            debug!(device_id = %self.device_id, rpc_id = %rpc_id, retry = rpc.retries, max_retries, "rpc delivery timed out, retrying");
            if persisted {
                self.writer.update_rpc(rpc_id, RpcStatus::Timeout, None);
            }
            if !self.strategy.is_sequential() {
                let _ = self.push_to_subscribers(request_id, &request);
            }
            return;
        }

        if close_sessions {
            rpc.retries = 0;
            rpc.sent = false;
            info!(device_id = %self.device_id, rpc_id = %rpc_id, "rpc retries exhausted, closing sessions");
            if persisted {
                self.writer.update_rpc(rpc_id, RpcStatus::Queued, None);
            }
            self.close_all_sessions(SessionCloseReason::RpcDeliveryTimeout);
        } else {
            let _ = self.remove_pending(request_id);
            let err = RpcError::RetriesExhausted(max_retries);
            info!(device_id = %self.device_id, rpc_id = %rpc_id, max_retries, "rpc retries exhausted");
            if persisted {
                self.writer.update_rpc(
                    rpc_id.clone(),
                    RpcStatus::Failed,
                    Some(json!({ "error": err.to_string() })),
                );
            }
            self.respond(RpcResponse::failure(rpc_id, err));
        }
    }

    pub(super) fn on_application_response(
        &mut self,
        request_id: u64,
        payload: Option<String>,
        error: Option<String>,
    ) {
        let Some(rpc) = self.remove_pending(request_id) else {
            info!(device_id = %self.device_id, request_id, "response for unknown rpc");
            return;
        };
        let rpc_id = rpc.request.id.clone();
        debug!(device_id = %self.device_id, rpc_id = %rpc_id, request_id, failed = error.is_some(), "rpc response");

        if rpc.request.persisted {
            match &error {
                Some(err) => self.writer.update_rpc(
                    rpc_id.clone(),
                    RpcStatus::Failed,
                    Some(json!({ "error": err })),
                ),
                None => self.writer.update_rpc(
                    rpc_id.clone(),
                    RpcStatus::Successful,
                    payload.as_deref().map(response_to_json),
                ),
            }
        }
        let response = match error {
            Some(err) => RpcResponse::failure(rpc_id, RpcError::Device(err)),
            None => RpcResponse::success(rpc_id, payload),
        };
        self.respond(response);

        if self.strategy == RpcSubmitStrategy::SequentialOnResponseFromDevice {
            self.timers.cancel_await();
            self.advance();
        } else if !rpc.delivered {
            self.advance();
        }
    }

    pub(super) fn on_await_timeout(&mut self, request_id: u64, generation: u64) {
        if !self.timers.take_fired_await(generation) {
            debug!(device_id = %self.device_id, request_id, generation, "stale await-response timeout");
            return;
        }
        if let Some(rpc) = self.remove_pending(request_id) {
            let err = RpcError::NoResponse;
            info!(device_id = %self.device_id, rpc_id = %rpc.request.id, request_id, "no response from device");
            if rpc.request.persisted {
                self.writer.update_rpc(
                    rpc.request.id.clone(),
                    RpcStatus::Failed,
                    Some(json!({ "error": err.to_string() })),
                );
            }
            self.respond(RpcResponse::failure(rpc.request.id, err));
        }
        self.advance();
    }

    pub(super) fn on_submit_timeout(&mut self, request_id: u64) {
        let Some(rpc) = self.remove_pending(request_id) else {
            debug!(device_id = %self.device_id, request_id, "submit timeout for resolved rpc");
            return;
        };
        let err = if rpc.sent {
            RpcError::Timeout
        } else {
            RpcError::NoActiveConnection
        };
        counter!("device_rpc_timeouts_total").increment(1);
        debug!(device_id = %self.device_id, rpc_id = %rpc.request.id, request_id, error_kind = err.error_kind(), "rpc timed out");
        if rpc.request.persisted {
            self.writer
                .update_rpc(rpc.request.id.clone(), RpcStatus::Expired, None);
        }
        self.respond(RpcResponse::failure(rpc.request.id, err));

        if !rpc.delivered || self.strategy == RpcSubmitStrategy::SequentialOnResponseFromDevice {
            self.timers.cancel_await_for(request_id);
            self.advance();
        }
    }

    pub(super) fn remove_rpc(&mut self, rpc_id: &RpcId) {
        let Some(request_id) = self.pending.find_by_rpc_id(rpc_id) else {
            debug!(device_id = %self.device_id, rpc_id = %rpc_id, "removal of unknown rpc");
            return;
        };
        let was_head = self.pending.head().map(|(id, _)| id) == Some(request_id);
        let Some(rpc) = self.remove_pending(request_id) else {
            return;
        };
        debug!(device_id = %self.device_id, rpc_id = %rpc_id, request_id, "rpc removed");
        if rpc.request.persisted {
            self.writer.update_rpc(rpc_id.clone(), RpcStatus::Deleted, None);
        }
        self.respond(RpcResponse::failure(rpc_id.clone(), RpcError::Deleted));

        if rpc.delivered {
            if self.strategy == RpcSubmitStrategy::SequentialOnResponseFromDevice {
                self.timers.cancel_await_for(request_id);
                self.advance();
            }
        } else if was_head {
            self.advance();
        }
    }

    /// Close every session, resolve every pending request and stop.
    pub(super) fn on_device_deleted(&mut self) {
        info!(device_id = %self.device_id, pending = self.pending.len(), "device deleted, stopping actor");
        self.close_all_sessions(SessionCloseReason::Unknown);
        let drained = self.pending.drain();
        gauge!("device_rpc_pending").decrement(drained.len() as f64);
        for (_, rpc) in drained {
            let err = if rpc.sent {
                RpcError::Timeout
            } else {
                RpcError::NoActiveConnection
            };
            self.respond(RpcResponse::failure(rpc.request.id, err));
        }
        self.timers.cancel_all();
        self.stopped = true;
    }
}
