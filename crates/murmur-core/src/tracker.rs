//! Authoritative read/update path for a client's simulation progress.
//!
//! The -1/-1 day/hour sentinel means "not yet started" and is distinct from
//! (0, 0), which means the first tick already happened. One-time driver
//! setup (participant registration) is gated strictly on the sentinel.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use murmur_db::entities::{client_execution_states as exec_states, clients};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::CoreError;

pub const HOURS_PER_DAY: i64 = 24;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub current_round: i64,
    pub expected_rounds: i64,
    pub remaining_rounds: i64,
    pub percent: i32,
}

impl Progress {
    /// `day * 24 + hour`, clamped so the -1/-1 sentinel displays as round 0
    /// rather than -25.
    pub fn compute(last_active_day: i32, last_active_hour: i32, expected_rounds: i32) -> Self {
        let raw = last_active_day as i64 * HOURS_PER_DAY + last_active_hour as i64;
        let current_round = raw.max(0);
        let expected_rounds = expected_rounds as i64;
        let remaining_rounds = (expected_rounds - current_round).max(0);
        let percent = if current_round <= 0 || expected_rounds <= 0 {
            0
        } else {
            let pct = (current_round as f64 / expected_rounds as f64 * 100.0).round() as i64;
            pct.min(100) as i32
        };
        Self {
            current_round,
            expected_rounds,
            remaining_rounds,
            percent,
        }
    }
}

pub struct ClientExecutionTracker {
    db: Arc<DatabaseConnection>,
}

impl ClientExecutionTracker {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Create the execution state at the sentinel. Initializing at (0, 0)
    /// would read as "first tick done" and skip one-time driver setup.
    pub async fn initialize(&self, client_id: Uuid, experiment_id: Uuid) -> Result<(), CoreError> {
        exec_states::ActiveModel {
            client_id: Set(client_id),
            experiment_id: Set(experiment_id),
            elapsed_time: Set(0),
            last_active_hour: Set(-1),
            last_active_day: Set(-1),
            updated_at: Set(Utc::now().into()),
        }
        .insert(self.db.as_ref())
        .await?;
        Ok(())
    }

    pub async fn state(&self, client_id: Uuid) -> Result<exec_states::Model, CoreError> {
        exec_states::Entity::find_by_id(client_id)
            .one(self.db.as_ref())
            .await?
            .ok_or(CoreError::UnknownClient(client_id))
    }

    /// True only while both day and hour are still at the sentinel.
    pub async fn is_first_run(&self, client_id: Uuid) -> Result<bool, CoreError> {
        let s = self.state(client_id).await?;
        Ok(s.last_active_hour == -1 && s.last_active_day == -1)
    }

    /// One tick: `elapsed_time += 1`, day/hour set, as a single durable
    /// statement targeting the row by key. The write never depends on a
    /// previously fetched copy of the row still being tracked; an in-memory
    /// mutation that is not re-asserted against the store would silently
    /// fail to persist under stricter backends.
    pub async fn advance(
        &self,
        client_id: Uuid,
        new_day: i32,
        new_hour: i32,
    ) -> Result<(), CoreError> {
        let res = exec_states::Entity::update_many()
            .col_expr(
                exec_states::Column::ElapsedTime,
                Expr::col(exec_states::Column::ElapsedTime).add(1),
            )
            .col_expr(exec_states::Column::LastActiveDay, Expr::value(new_day))
            .col_expr(exec_states::Column::LastActiveHour, Expr::value(new_hour))
            .col_expr(
                exec_states::Column::UpdatedAt,
                Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(Utc::now())),
            )
            .filter(exec_states::Column::ClientId.eq(client_id))
            .exec(self.db.as_ref())
            .await?;

        if res.rows_affected == 0 {
            return Err(CoreError::StaleWrite {
                entity: "client_execution_state",
                id: client_id,
            });
        }
        Ok(())
    }

    pub async fn get_progress(&self, client_id: Uuid) -> Result<Progress, CoreError> {
        let state = self.state(client_id).await?;
        let client = clients::Entity::find_by_id(client_id)
            .one(self.db.as_ref())
            .await?
            .ok_or(CoreError::UnknownClient(client_id))?;
        Ok(Progress::compute(
            state.last_active_day,
            state.last_active_hour,
            client.expected_duration_rounds,
        ))
    }

    /// Dashboard polling path: progress for every client of the given
    /// experiments in two batched queries, never one query per client.
    pub async fn get_progress_batch(
        &self,
        experiment_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Progress>, CoreError> {
        let states = exec_states::Entity::find()
            .filter(exec_states::Column::ExperimentId.is_in(experiment_ids.iter().copied()))
            .all(self.db.as_ref())
            .await?;
        let expected: HashMap<Uuid, i32> = clients::Entity::find()
            .filter(clients::Column::ExperimentId.is_in(experiment_ids.iter().copied()))
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|c| (c.id, c.expected_duration_rounds))
            .collect();

        Ok(states
            .into_iter()
            .filter_map(|s| {
                let rounds = expected.get(&s.client_id)?;
                Some((
                    s.client_id,
                    Progress::compute(s.last_active_day, s.last_active_hour, *rounds),
                ))
            })
            .collect())
    }
}
