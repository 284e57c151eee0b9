//! Session snapshot cache backed by the `device_sessions` table.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::instrument;

use devplane_core::ids::DeviceId;
use devplane_core::ports::SessionSnapshotCache;
use devplane_core::session::SessionSnapshot;
use devplane_core::PortError;

use crate::database::Database;
use crate::error::StoreError;

pub struct SessionCacheRepo {
    db: Database,
}

impl SessionCacheRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Replace the stored snapshot of a device.
    #[instrument(skip(self, snapshot), fields(device_id = %device_id, sessions = snapshot.sessions.len()))]
    pub fn upsert(&self, device_id: &DeviceId, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        let json = serde_json::to_string(snapshot)?;
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO device_sessions (device_id, snapshot, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(device_id) DO UPDATE SET snapshot = excluded.snapshot, updated_at = excluded.updated_at",
                rusqlite::params![device_id.as_str(), json, now],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(device_id = %device_id))]
    pub fn load(&self, device_id: &DeviceId) -> Result<Option<SessionSnapshot>, StoreError> {
        let raw: Option<String> = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT snapshot FROM device_sessions WHERE device_id = ?1",
                    [device_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        raw.map(|text| {
            serde_json::from_str(&text).map_err(|e| StoreError::CorruptRow {
                table: "device_sessions",
                column: "snapshot",
                detail: e.to_string(),
            })
        })
        .transpose()
    }
}

#[async_trait]
impl SessionSnapshotCache for SessionCacheRepo {
    async fn get(&self, device_id: &DeviceId) -> Result<Option<SessionSnapshot>, PortError> {
        Ok(self.load(device_id)?)
    }

    async fn put(&self, device_id: &DeviceId, snapshot: SessionSnapshot) -> Result<(), PortError> {
        Ok(self.upsert(device_id, &snapshot)?)
    }
}
