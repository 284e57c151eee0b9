//! Durable writer: linearized fire-and-forget writes via MPSC serialization.
//!
//! Every durable side effect of a device actor (RPC audit records, session
//! snapshots) goes through one worker task, so writes land in the order the
//! actor issued them and the actor itself never awaits storage.

use std::sync::Arc;

use devplane_core::ids::{DeviceId, RpcId};
use devplane_core::ports::{RpcAuditLog, RpcResponder, SessionSnapshotCache};
use devplane_core::rpc::{RpcRecord, RpcStatus};
use devplane_core::session::SessionSnapshot;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// Job sent to the write worker.
enum WriteJob {
    CreateRpc {
        record: RpcRecord,
        /// Tell the caller the request is queued once the record exists.
        ack: bool,
    },
    UpdateRpc {
        rpc_id: RpcId,
        status: RpcStatus,
        response: Option<Value>,
    },
    PutSessions(SessionSnapshot),
    Flush(oneshot::Sender<()>),
}

pub(crate) struct DurableWriter {
    tx: mpsc::UnboundedSender<WriteJob>,
}

impl DurableWriter {
    /// Spawn the worker. It exits once the writer is dropped and the queue
    /// is drained.
    pub fn spawn(
        device_id: DeviceId,
        audit_log: Arc<dyn RpcAuditLog>,
        cache: Arc<dyn SessionSnapshotCache>,
        responder: Arc<dyn RpcResponder>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(tokio::spawn(write_worker(rx, device_id, audit_log, cache, responder)));
        Self { tx }
    }

    fn submit(&self, job: WriteJob) {
        if self.tx.send(job).is_err() {
            tracing::warn!("durable write dropped: worker exited");
        }
    }

    pub fn create_rpc(&self, record: RpcRecord, ack: bool) {
        self.submit(WriteJob::CreateRpc { record, ack });
    }

    pub fn update_rpc(&self, rpc_id: RpcId, status: RpcStatus, response: Option<Value>) {
        self.submit(WriteJob::UpdateRpc {
            rpc_id,
            status,
            response,
        });
    }

    pub fn put_sessions(&self, snapshot: SessionSnapshot) {
        self.submit(WriteJob::PutSessions(snapshot));
    }

    /// Reply on `done` once every write queued before it has been applied.
    pub fn flush(&self, done: oneshot::Sender<()>) {
        self.submit(WriteJob::Flush(done));
    }
}

async fn write_worker(
    mut rx: mpsc::UnboundedReceiver<WriteJob>,
    device_id: DeviceId,
    audit_log: Arc<dyn RpcAuditLog>,
    cache: Arc<dyn SessionSnapshotCache>,
    responder: Arc<dyn RpcResponder>,
) {
    while let Some(job) = rx.recv().await {
        match job {
            WriteJob::CreateRpc { record, ack } => {
                let rpc_id = record.id.clone();
                let status = record.status;
                match audit_log.create(record).await {
                    Ok(()) => {
                        if ack {
                            responder.queued(&rpc_id);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(device_id = %device_id, rpc_id = %rpc_id, %status, error = %e, "failed to save rpc");
                    }
                }
            }
            WriteJob::UpdateRpc {
                rpc_id,
                status,
                response,
            } => {
                if let Err(e) = audit_log.update_status(&rpc_id, status, response).await {
                    tracing::warn!(device_id = %device_id, rpc_id = %rpc_id, %status, error = %e, "failed to update rpc status");
                }
            }
            WriteJob::PutSessions(snapshot) => {
                if let Err(e) = cache.put(&device_id, snapshot).await {
                    tracing::warn!(device_id = %device_id, error = %e, "failed to checkpoint sessions");
                }
            }
            WriteJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
