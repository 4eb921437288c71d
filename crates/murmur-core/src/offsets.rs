//! Durable bookkeeping of how far into each log file the aggregator has
//! already parsed, plus the single-writer lock that keeps two passes from
//! double-advancing the same file.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use murmur_db::entities::log_file_offsets as offsets;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Select, Set,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogKind {
    Server,
    Client,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Server => "server",
            LogKind::Client => "client",
        }
    }
}

/// Identity of one tracked log file: (experiment, kind, client).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OffsetKey {
    pub experiment_id: Uuid,
    pub kind: LogKind,
    pub client_id: Option<Uuid>,
}

impl OffsetKey {
    pub fn server(experiment_id: Uuid) -> Self {
        Self {
            experiment_id,
            kind: LogKind::Server,
            client_id: None,
        }
    }

    pub fn client(experiment_id: Uuid, client_id: Uuid) -> Self {
        Self {
            experiment_id,
            kind: LogKind::Client,
            client_id: Some(client_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetAdvance {
    Advanced,
    /// The new offset was behind the stored one (rotation); reset to 0.
    Reset,
}

pub struct LogOffsetTracker {
    db: Arc<DatabaseConnection>,
    locks: Mutex<HashMap<OffsetKey, Arc<Mutex<()>>>>,
}

impl LogOffsetTracker {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn db(&self) -> &Arc<DatabaseConnection> {
        &self.db
    }

    /// Serialize aggregator passes over one file. The guard is held for the
    /// whole read-aggregate-commit cycle; two concurrent passes over the
    /// same offset would double-count.
    pub async fn lock(&self, key: OffsetKey) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .await
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    fn select(key: OffsetKey) -> Select<offsets::Entity> {
        let q = offsets::Entity::find()
            .filter(offsets::Column::ExperimentId.eq(key.experiment_id))
            .filter(offsets::Column::Kind.eq(key.kind.as_str()));
        match key.client_id {
            Some(id) => q.filter(offsets::Column::ClientId.eq(id)),
            None => q.filter(offsets::Column::ClientId.is_null()),
        }
    }

    pub async fn find<C: ConnectionTrait>(
        &self,
        conn: &C,
        key: OffsetKey,
    ) -> Result<Option<offsets::Model>, CoreError> {
        Ok(Self::select(key).one(conn).await?)
    }

    /// Last known offset; a file never seen before reads as 0.
    pub async fn get_offset<C: ConnectionTrait>(
        &self,
        conn: &C,
        key: OffsetKey,
    ) -> Result<u64, CoreError> {
        Ok(self
            .find(conn, key)
            .await?
            .map(|m| m.byte_offset.max(0) as u64)
            .unwrap_or(0))
    }

    /// Upsert the offset. A regression (new < stored) means the file was
    /// rotated or truncated: the offset resets to 0 so the next pass
    /// re-parses from the start instead of erroring.
    pub async fn advance_offset<C: ConnectionTrait>(
        &self,
        conn: &C,
        key: OffsetKey,
        path: &str,
        new_offset: u64,
    ) -> Result<OffsetAdvance, CoreError> {
        match self.find(conn, key).await? {
            None => {
                self.insert(conn, key, path, new_offset as i64).await?;
                Ok(OffsetAdvance::Advanced)
            }
            Some(existing) => {
                let regressed = (new_offset as i64) < existing.byte_offset;
                let value = if regressed { 0 } else { new_offset as i64 };
                let mut active: offsets::ActiveModel = existing.into();
                active.path = Set(path.to_string());
                active.byte_offset = Set(value);
                active.updated_at = Set(Utc::now().into());
                active.update(conn).await?;
                if regressed {
                    Ok(OffsetAdvance::Reset)
                } else {
                    Ok(OffsetAdvance::Advanced)
                }
            }
        }
    }

    /// Force the offset back to 0 (rotation detected at read time). Done
    /// eagerly so an aggregation pass that later fails still restarts from
    /// the top of the file.
    pub async fn reset_offset<C: ConnectionTrait>(
        &self,
        conn: &C,
        key: OffsetKey,
        path: &str,
    ) -> Result<(), CoreError> {
        match self.find(conn, key).await? {
            None => self.insert(conn, key, path, 0).await,
            Some(existing) => {
                let mut active: offsets::ActiveModel = existing.into();
                active.path = Set(path.to_string());
                active.byte_offset = Set(0);
                active.updated_at = Set(Utc::now().into());
                active.update(conn).await?;
                Ok(())
            }
        }
    }

    async fn insert<C: ConnectionTrait>(
        &self,
        conn: &C,
        key: OffsetKey,
        path: &str,
        byte_offset: i64,
    ) -> Result<(), CoreError> {
        offsets::ActiveModel {
            id: Set(Uuid::new_v4()),
            experiment_id: Set(key.experiment_id),
            kind: Set(key.kind.as_str().to_string()),
            client_id: Set(key.client_id),
            path: Set(path.to_string()),
            byte_offset: Set(byte_offset),
            updated_at: Set(Utc::now().into()),
        }
        .insert(conn)
        .await?;
        Ok(())
    }
}
