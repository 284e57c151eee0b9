//! Durable RPC audit log.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::instrument;

use devplane_core::ids::{DeviceId, RpcId, TenantId};
use devplane_core::ports::RpcAuditLog;
use devplane_core::rpc::{RpcRecord, RpcStatus, ToDeviceRpcRequest};
use devplane_core::PortError;

use crate::database::Database;
use crate::error::StoreError;

const SELECT_COLUMNS: &str = "SELECT id, tenant_id, device_id, request, status, expiration_time,
        response, additional_info, created_time
     FROM rpc_requests";

/// `rpc_requests` table access.
pub struct RpcRepo {
    db: Database,
}

impl RpcRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new record. Re-inserting an existing id replaces it.
    #[instrument(skip(self, record), fields(rpc_id = %record.id, status = %record.status))]
    pub fn insert(&self, record: &RpcRecord) -> Result<(), StoreError> {
        let request = serde_json::to_string(&record.request)?;
        let response = record.response.as_ref().map(Value::to_string);
        let additional_info = record.additional_info.as_ref().map(Value::to_string);
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT OR REPLACE INTO rpc_requests
                    (id, tenant_id, device_id, request, status, expiration_time,
                     response, additional_info, created_time, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    record.id.as_str(),
                    record.tenant_id.as_str(),
                    record.device_id.as_str(),
                    request,
                    record.status.to_string(),
                    record.expiration_time,
                    response,
                    additional_info,
                    record.created_time,
                    now,
                ],
            )?;
            Ok(())
        })
    }

    /// Move a record to `status`, replacing the stored response when one is given.
    #[instrument(skip(self, response), fields(rpc_id = %id, status = %status))]
    pub fn set_status(
        &self,
        id: &RpcId,
        status: RpcStatus,
        response: Option<&Value>,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let changed = self.db.with_conn(|conn| {
            let changed = match response {
                Some(resp) => conn.execute(
                    "UPDATE rpc_requests SET status = ?1, response = ?2, updated_at = ?3 WHERE id = ?4",
                    rusqlite::params![status.to_string(), resp.to_string(), now, id.as_str()],
                )?,
                None => conn.execute(
                    "UPDATE rpc_requests SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![status.to_string(), now, id.as_str()],
                )?,
            };
            Ok(changed)
        })?;

        if changed == 0 {
            return Err(StoreError::NotFound(format!("rpc {id}")));
        }
        Ok(())
    }

    /// Get a record by id.
    #[instrument(skip(self), fields(rpc_id = %id))]
    pub fn get(&self, id: &RpcId) -> Result<RpcRecord, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_record(row),
                None => Err(StoreError::NotFound(format!("rpc {id}"))),
            }
        })
    }

    /// Records of one device in `status`, oldest first.
    #[instrument(skip(self), fields(device_id = %device_id, status = %status))]
    pub fn list_by_status(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
        status: RpcStatus,
    ) -> Result<Vec<RpcRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} WHERE tenant_id = ?1 AND device_id = ?2 AND status = ?3
                 ORDER BY created_time ASC, rowid ASC"
            ))?;
            let mut rows = stmt.query(rusqlite::params![
                tenant_id.as_str(),
                device_id.as_str(),
                status.to_string(),
            ])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_record(row)?);
            }
            Ok(results)
        })
    }
}

fn column<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table: "rpc_requests",
        column,
        detail: e.to_string(),
    })
}

fn json_column(raw: Option<String>, column: &'static str) -> Result<Option<Value>, StoreError> {
    raw.map(|text| {
        serde_json::from_str(&text).map_err(|e| StoreError::CorruptRow {
            table: "rpc_requests",
            column,
            detail: format!("invalid JSON: {e}"),
        })
    })
    .transpose()
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<RpcRecord, StoreError> {
    let id: String = column(row, 0, "id")?;
    let tenant_id: String = column(row, 1, "tenant_id")?;
    let device_id: String = column(row, 2, "device_id")?;
    let request_raw: String = column(row, 3, "request")?;
    let status_raw: String = column(row, 4, "status")?;

    let request: ToDeviceRpcRequest =
        serde_json::from_str(&request_raw).map_err(|e| StoreError::CorruptRow {
            table: "rpc_requests",
            column: "request",
            detail: e.to_string(),
        })?;
    let status = status_raw.parse::<RpcStatus>().map_err(|detail| StoreError::CorruptRow {
        table: "rpc_requests",
        column: "status",
        detail,
    })?;

    Ok(RpcRecord {
        id: RpcId::from_raw(id),
        tenant_id: TenantId::from_raw(tenant_id),
        device_id: DeviceId::from_raw(device_id),
        request,
        status,
        expiration_time: column(row, 5, "expiration_time")?,
        response: json_column(column(row, 6, "response")?, "response")?,
        additional_info: json_column(column(row, 7, "additional_info")?, "additional_info")?,
        created_time: column(row, 8, "created_time")?,
    })
}

#[async_trait]
impl RpcAuditLog for RpcRepo {
    async fn create(&self, record: RpcRecord) -> Result<(), PortError> {
        Ok(self.insert(&record)?)
    }

    async fn update_status(
        &self,
        rpc_id: &RpcId,
        status: RpcStatus,
        response: Option<Value>,
    ) -> Result<(), PortError> {
        Ok(self.set_status(rpc_id, status, response.as_ref())?)
    }

    async fn find_by_status(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
        status: RpcStatus,
    ) -> Result<Vec<RpcRecord>, PortError> {
        Ok(self.list_by_status(tenant_id, device_id, status)?)
    }
}
