//! Top-level coordinator: experiment/client lifecycle, progress polling
//! with health classification, metrics refresh, and cascading cleanup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use murmur_db::entities::{
    client_execution_states as exec_states, client_metrics, clients, experiments, log_file_offsets,
    server_metrics,
};
use murmur_process::{self as process, ProcessKind, SpawnSpec};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::CoreError;
use crate::metrics::{LogMetricsAggregator, RefreshSummary};
use crate::offsets::LogOffsetTracker;
use crate::registry::ExperimentRegistry;
use crate::tracker::{ClientExecutionTracker, Progress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Created,
    Running,
    Stopped,
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Created => "created",
            ExperimentStatus::Running => "running",
            ExperimentStatus::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(ExperimentStatus::Created),
            "running" => Some(ExperimentStatus::Running),
            "stopped" => Some(ExperimentStatus::Stopped),
            _ => None,
        }
    }
}

/// What the dashboard needs to tell apart: a client that never started, one
/// that is ticking, one whose process is alive but whose progress froze,
/// one that finished, and one whose process is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressHealth {
    NotStarted,
    Active,
    Stalled,
    Completed,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientProgress {
    pub client_id: Uuid,
    pub progress: Progress,
    pub health: ProgressHealth,
}

/// Recorded status reconciled against actual process liveness.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentState {
    pub experiment_id: Uuid,
    pub status: ExperimentStatus,
    pub server_alive: bool,
    pub crashed: bool,
}

struct Observation {
    elapsed_time: i64,
    since: Instant,
}

pub struct Orchestrator {
    db: Arc<DatabaseConnection>,
    config: OrchestratorConfig,
    registry: Arc<ExperimentRegistry>,
    tracker: ClientExecutionTracker,
    aggregator: LogMetricsAggregator,
    observations: Mutex<HashMap<Uuid, Observation>>,
}

impl Orchestrator {
    pub fn new(db: Arc<DatabaseConnection>, config: OrchestratorConfig) -> Self {
        let registry = Arc::new(ExperimentRegistry::new());
        let offsets = Arc::new(LogOffsetTracker::new(db.clone()));
        let tracker = ClientExecutionTracker::new(db.clone());
        let aggregator = LogMetricsAggregator::new(db.clone(), offsets, config.clone());
        Self {
            db,
            config,
            registry,
            tracker,
            aggregator,
            observations: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ExperimentRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &ClientExecutionTracker {
        &self.tracker
    }

    pub fn aggregator(&self) -> &LogMetricsAggregator {
        &self.aggregator
    }

    pub async fn create_experiment(
        &self,
        name: &str,
        store_url: &str,
        server_port: i32,
        config_path: Option<String>,
    ) -> Result<experiments::Model, CoreError> {
        let now = Utc::now();
        let model = experiments::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            status: Set(ExperimentStatus::Created.as_str().to_string()),
            store_url: Set(store_url.to_string()),
            server_pid: Set(None),
            server_port: Set(server_port),
            config_path: Set(config_path),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(self.db.as_ref())
        .await?;
        tracing::info!(experiment_id = %model.id, name, "experiment created");
        Ok(model)
    }

    pub async fn add_client(
        &self,
        experiment_id: Uuid,
        name: &str,
        config_json: &str,
        expected_duration_rounds: i32,
    ) -> Result<clients::Model, CoreError> {
        self.experiment(experiment_id).await?;
        let now = Utc::now();
        let model = clients::ActiveModel {
            id: Set(Uuid::new_v4()),
            experiment_id: Set(experiment_id),
            name: Set(name.to_string()),
            config_json: Set(config_json.to_string()),
            pid: Set(None),
            expected_duration_rounds: Set(expected_duration_rounds),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(self.db.as_ref())
        .await?;
        Ok(model)
    }

    async fn experiment(&self, id: Uuid) -> Result<experiments::Model, CoreError> {
        experiments::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or(CoreError::UnknownExperiment(id))
    }

    async fn client(&self, id: Uuid) -> Result<clients::Model, CoreError> {
        clients::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or(CoreError::UnknownClient(id))
    }

    /// Launch the experiment's server process and flip the experiment to
    /// running. The status is only persisted after a successful spawn, so a
    /// spawn failure leaves the experiment exactly as it was.
    pub async fn start_experiment(
        &self,
        experiment_id: Uuid,
    ) -> Result<experiments::Model, CoreError> {
        let exp = self.experiment(experiment_id).await?;

        if let Some(pid) = exp.server_pid {
            if process::is_alive(pid as u32) {
                return Err(CoreError::AlreadyRunning {
                    entity: "experiment",
                    id: experiment_id,
                    pid: pid as u32,
                });
            }
        }

        if !self.registry.is_active(experiment_id).await {
            self.registry.activate(experiment_id, &exp.store_url).await?;
        }

        let dir = self.config.experiment_dir(experiment_id);
        tokio::fs::create_dir_all(&dir).await?;

        let mut spec = SpawnSpec::new(ProcessKind::Server, &self.config.server_bin)
            .arg("--experiment")
            .arg(experiment_id.to_string())
            .arg("--port")
            .arg(exp.server_port.to_string())
            .working_dir(&dir)
            .env("MURMUR_EXPERIMENT_ID", experiment_id.to_string());
        if let Some(cfg) = &exp.config_path {
            spec = spec.arg("--config").arg(cfg.clone());
        }

        let handle = process::spawn(&spec)?;

        let mut active: experiments::ActiveModel = exp.into();
        active.status = Set(ExperimentStatus::Running.as_str().to_string());
        active.server_pid = Set(Some(handle.pid as i64));
        active.updated_at = Set(Utc::now().into());
        match active.update(self.db.as_ref()).await {
            Ok(updated) => {
                tracing::info!(%experiment_id, pid = handle.pid, "experiment server started");
                Ok(updated)
            }
            Err(err) => {
                // No row points at this process; do not leave it running.
                process::terminate(handle.pid, Duration::from_secs(1)).await;
                Err(err.into())
            }
        }
    }

    /// Launch a client driver. First start initializes execution state at
    /// the sentinel; later starts resume from the last recorded tick.
    pub async fn start_client(&self, client_id: Uuid) -> Result<clients::Model, CoreError> {
        let client = self.client(client_id).await?;
        let exp = self.experiment(client.experiment_id).await?;
        if ExperimentStatus::parse(&exp.status) != Some(ExperimentStatus::Running) {
            return Err(CoreError::ExperimentNotRunning(exp.id));
        }

        if let Some(pid) = client.pid {
            if process::is_alive(pid as u32) {
                return Err(CoreError::AlreadyRunning {
                    entity: "client",
                    id: client_id,
                    pid: pid as u32,
                });
            }
        }

        let existing_state = exec_states::Entity::find_by_id(client_id)
            .one(self.db.as_ref())
            .await?;
        if existing_state.is_none() {
            self.tracker.initialize(client_id, client.experiment_id).await?;
        }

        let dir = self.config.experiment_dir(client.experiment_id);
        tokio::fs::create_dir_all(&dir).await?;

        let spec = SpawnSpec::new(ProcessKind::Client, &self.config.client_bin)
            .arg("--client")
            .arg(client_id.to_string())
            .arg("--experiment")
            .arg(client.experiment_id.to_string())
            .working_dir(&dir)
            .env("MURMUR_CLIENT_CONFIG", client.config_json.clone());

        let handle = process::spawn(&spec)?;

        let mut active: clients::ActiveModel = client.into();
        active.pid = Set(Some(handle.pid as i64));
        active.updated_at = Set(Utc::now().into());
        match active.update(self.db.as_ref()).await {
            Ok(updated) => {
                tracing::info!(%client_id, pid = handle.pid, "client driver started");
                Ok(updated)
            }
            Err(err) => {
                process::terminate(handle.pid, Duration::from_secs(1)).await;
                Err(err.into())
            }
        }
    }

    /// Graceful-then-forceful stop. Execution state survives: resuming the
    /// client continues from its last tick instead of restarting at the
    /// sentinel.
    pub async fn stop_client(&self, client_id: Uuid) -> Result<(), CoreError> {
        let client = self.client(client_id).await?;
        if let Some(pid) = client.pid {
            process::terminate(pid as u32, self.config.stop_timeout).await;
        }
        let mut active: clients::ActiveModel = client.into();
        active.pid = Set(None);
        active.updated_at = Set(Utc::now().into());
        active.update(self.db.as_ref()).await?;
        Ok(())
    }

    /// Stop the clients first so they quit ticking before their server goes
    /// away, then stop the server.
    pub async fn stop_experiment(
        &self,
        experiment_id: Uuid,
    ) -> Result<experiments::Model, CoreError> {
        let exp = self.experiment(experiment_id).await?;

        let experiment_clients = clients::Entity::find()
            .filter(clients::Column::ExperimentId.eq(experiment_id))
            .all(self.db.as_ref())
            .await?;
        for client in experiment_clients {
            if client.pid.is_some() {
                self.stop_client(client.id).await?;
            }
        }

        if let Some(pid) = exp.server_pid {
            process::terminate(pid as u32, self.config.stop_timeout).await;
        }

        let mut active: experiments::ActiveModel = exp.into();
        active.status = Set(ExperimentStatus::Stopped.as_str().to_string());
        active.server_pid = Set(None);
        active.updated_at = Set(Utc::now().into());
        let updated = active.update(self.db.as_ref()).await?;
        tracing::info!(%experiment_id, "experiment stopped");
        Ok(updated)
    }

    /// Recorded status reconciled with process liveness: a running
    /// experiment whose server pid is dead is reported as crashed and the
    /// row is repaired to stopped.
    pub async fn experiment_status(
        &self,
        experiment_id: Uuid,
    ) -> Result<ExperimentState, CoreError> {
        let exp = self.experiment(experiment_id).await?;
        let mut status = ExperimentStatus::parse(&exp.status).unwrap_or(ExperimentStatus::Created);
        let server_alive = exp
            .server_pid
            .is_some_and(|pid| process::is_alive(pid as u32));

        let mut crashed = false;
        if status == ExperimentStatus::Running && !server_alive {
            crashed = true;
            tracing::warn!(%experiment_id, "server process died without a stop request");
            let mut active: experiments::ActiveModel = exp.into();
            active.status = Set(ExperimentStatus::Stopped.as_str().to_string());
            active.server_pid = Set(None);
            active.updated_at = Set(Utc::now().into());
            active.update(self.db.as_ref()).await?;
            status = ExperimentStatus::Stopped;
        }

        Ok(ExperimentState {
            experiment_id,
            status,
            server_alive,
            crashed,
        })
    }

    /// Remove the experiment and every row scoped to it, one table at a
    /// time inside a single transaction, then drop the store binding. A
    /// running experiment is refused unless `force`, which stops it first.
    pub async fn delete_experiment(
        &self,
        experiment_id: Uuid,
        force: bool,
    ) -> Result<(), CoreError> {
        let exp = self.experiment(experiment_id).await?;
        if ExperimentStatus::parse(&exp.status) == Some(ExperimentStatus::Running) {
            if !force {
                return Err(CoreError::ExperimentRunning(experiment_id));
            }
            self.stop_experiment(experiment_id).await?;
        }

        let client_ids: Vec<Uuid> = clients::Entity::find()
            .filter(clients::Column::ExperimentId.eq(experiment_id))
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();

        let txn = self.db.begin().await?;
        client_metrics::Entity::delete_many()
            .filter(client_metrics::Column::ExperimentId.eq(experiment_id))
            .exec(&txn)
            .await?;
        server_metrics::Entity::delete_many()
            .filter(server_metrics::Column::ExperimentId.eq(experiment_id))
            .exec(&txn)
            .await?;
        log_file_offsets::Entity::delete_many()
            .filter(log_file_offsets::Column::ExperimentId.eq(experiment_id))
            .exec(&txn)
            .await?;
        exec_states::Entity::delete_many()
            .filter(exec_states::Column::ExperimentId.eq(experiment_id))
            .exec(&txn)
            .await?;
        clients::Entity::delete_many()
            .filter(clients::Column::ExperimentId.eq(experiment_id))
            .exec(&txn)
            .await?;
        experiments::Entity::delete_by_id(experiment_id)
            .exec(&txn)
            .await?;
        txn.commit().await?;

        self.registry.deactivate(experiment_id).await;
        self.observations
            .lock()
            .await
            .retain(|id, _| !client_ids.contains(id));

        tracing::info!(%experiment_id, "experiment deleted");
        Ok(())
    }

    pub async fn poll_progress(&self, client_id: Uuid) -> Result<ClientProgress, CoreError> {
        let client = self.client(client_id).await?;
        let state = exec_states::Entity::find_by_id(client_id)
            .one(self.db.as_ref())
            .await?;
        Ok(self.classify(&client, state.as_ref()).await)
    }

    /// Progress for every client of the given experiments: two batched
    /// queries, then in-memory classification. Clients with no execution
    /// state yet report as not started.
    pub async fn poll_all_progress(
        &self,
        experiment_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, ClientProgress>, CoreError> {
        let experiment_clients = clients::Entity::find()
            .filter(clients::Column::ExperimentId.is_in(experiment_ids.iter().copied()))
            .all(self.db.as_ref())
            .await?;
        let states: HashMap<Uuid, exec_states::Model> = exec_states::Entity::find()
            .filter(exec_states::Column::ExperimentId.is_in(experiment_ids.iter().copied()))
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|s| (s.client_id, s))
            .collect();

        let mut out = HashMap::new();
        for client in &experiment_clients {
            let progress = self.classify(client, states.get(&client.id)).await;
            out.insert(client.id, progress);
        }
        Ok(out)
    }

    /// Refresh server metrics plus every client's metrics for one
    /// experiment, merging the per-file summaries.
    pub async fn refresh_logs(&self, experiment_id: Uuid) -> Result<RefreshSummary, CoreError> {
        let mut summary = self.aggregator.update_server_metrics(experiment_id).await?;
        let experiment_clients = clients::Entity::find()
            .filter(clients::Column::ExperimentId.eq(experiment_id))
            .all(self.db.as_ref())
            .await?;
        for client in experiment_clients {
            let s = self.aggregator.update_client_metrics(client.id).await?;
            summary.merge(&s);
        }
        Ok(summary)
    }

    async fn classify(
        &self,
        client: &clients::Model,
        state: Option<&exec_states::Model>,
    ) -> ClientProgress {
        let (day, hour, elapsed) = state
            .map(|s| (s.last_active_day, s.last_active_hour, s.elapsed_time))
            .unwrap_or((-1, -1, 0));
        let progress = Progress::compute(day, hour, client.expected_duration_rounds);

        let health = if day == -1 && hour == -1 {
            ProgressHealth::NotStarted
        } else if progress.current_round >= progress.expected_rounds {
            ProgressHealth::Completed
        } else {
            let alive = client.pid.is_some_and(|pid| process::is_alive(pid as u32));
            let now = Instant::now();
            let mut observations = self.observations.lock().await;
            let unchanged_for = match observations.get(&client.id) {
                Some(o) if o.elapsed_time == elapsed => now.duration_since(o.since),
                _ => {
                    observations.insert(
                        client.id,
                        Observation {
                            elapsed_time: elapsed,
                            since: now,
                        },
                    );
                    Duration::ZERO
                }
            };
            drop(observations);

            if !alive {
                ProgressHealth::Stopped
            } else if unchanged_for >= self.config.stall_after && unchanged_for > Duration::ZERO {
                ProgressHealth::Stalled
            } else {
                ProgressHealth::Active
            }
        };

        ClientProgress {
            client_id: client.id,
            progress,
            health,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::{memory_db, seed_client, seed_experiment};
    use sea_orm::PaginatorTrait;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    fn write_stub(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn config_with_stubs(dir: &Path, server_body: &str, client_body: &str) -> OrchestratorConfig {
        OrchestratorConfig {
            data_root: dir.join("data"),
            server_bin: write_stub(dir, "server.sh", server_body),
            client_bin: write_stub(dir, "client.sh", client_body),
            stop_timeout: Duration::from_secs(2),
            stall_after: Duration::from_millis(50),
        }
    }

    async fn orchestrator_with(
        server_body: &str,
        client_body: &str,
    ) -> (tempfile::TempDir, Arc<DatabaseConnection>, Orchestrator) {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_stubs(dir.path(), server_body, client_body);
        let db = memory_db().await;
        let orch = Orchestrator::new(db.clone(), config);
        (dir, db, orch)
    }

    async fn wait_for_death(pid: u32) {
        for _ in 0..100 {
            if !process::is_alive(pid) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn start_experiment_spawns_and_records_the_server() {
        let (_dir, _db, orch) = orchestrator_with("sleep 30", "sleep 30").await;
        let exp = orch
            .create_experiment("demo", "sqlite::memory:", 8480, None)
            .await
            .unwrap();

        let started = orch.start_experiment(exp.id).await.unwrap();
        assert_eq!(started.status, "running");
        let pid = started.server_pid.unwrap() as u32;
        assert!(process::is_alive(pid));
        assert!(orch.registry().is_active(exp.id).await);

        // A second start while the server lives is refused.
        let err = orch.start_experiment(exp.id).await.unwrap_err();
        assert!(matches!(err, CoreError::AlreadyRunning { .. }));

        let stopped = orch.stop_experiment(exp.id).await.unwrap();
        assert_eq!(stopped.status, "stopped");
        assert!(stopped.server_pid.is_none());
        assert!(!process::is_alive(pid));
    }

    #[tokio::test]
    async fn spawn_failure_leaves_status_untouched() {
        let (_dir, _db, orch) = orchestrator_with("sleep 30", "sleep 30").await;
        let exp = orch
            .create_experiment("demo", "sqlite::memory:", 8480, None)
            .await
            .unwrap();

        // Break the server binary after creation.
        let mut orch = orch;
        orch.config.server_bin = PathBuf::from("/nonexistent/simulator");
        let err = orch.start_experiment(exp.id).await.unwrap_err();
        assert!(matches!(err, CoreError::Spawn(_)));

        let state = orch.experiment_status(exp.id).await.unwrap();
        assert_eq!(state.status, ExperimentStatus::Created);
        assert!(!state.crashed);
    }

    #[tokio::test]
    async fn start_client_requires_a_running_experiment() {
        let (_dir, db, orch) = orchestrator_with("sleep 30", "sleep 30").await;
        let exp = orch
            .create_experiment("demo", "sqlite::memory:", 8480, None)
            .await
            .unwrap();
        let client = seed_client(&db, exp.id, 240).await;

        let err = orch.start_client(client.id).await.unwrap_err();
        assert!(matches!(err, CoreError::ExperimentNotRunning(_)));
    }

    #[tokio::test]
    async fn client_state_survives_stop_and_resume() {
        let (_dir, _db, orch) = orchestrator_with("sleep 30", "sleep 30").await;
        let exp = orch
            .create_experiment("demo", "sqlite::memory:", 8480, None)
            .await
            .unwrap();
        orch.start_experiment(exp.id).await.unwrap();
        let client = orch.add_client(exp.id, "c0", "{}", 240).await.unwrap();

        let started = orch.start_client(client.id).await.unwrap();
        assert!(orch.tracker().is_first_run(client.id).await.unwrap());

        // The driver ticks a few times, then the client is paused.
        orch.tracker().advance(client.id, 0, 0).await.unwrap();
        orch.tracker().advance(client.id, 0, 1).await.unwrap();
        orch.stop_client(client.id).await.unwrap();
        wait_for_death(started.pid.unwrap() as u32).await;

        let state = orch.tracker().state(client.id).await.unwrap();
        assert_eq!(state.elapsed_time, 2);
        assert_eq!((state.last_active_day, state.last_active_hour), (0, 1));

        // Resume: no re-initialization back to the sentinel.
        let resumed = orch.start_client(client.id).await.unwrap();
        assert!(resumed.pid.is_some());
        let state = orch.tracker().state(client.id).await.unwrap();
        assert_eq!((state.last_active_day, state.last_active_hour), (0, 1));
        assert!(!orch.tracker().is_first_run(client.id).await.unwrap());

        orch.stop_experiment(exp.id).await.unwrap();
    }

    #[tokio::test]
    async fn crashed_server_is_detected_and_repaired() {
        // A server that exits immediately.
        let (_dir, _db, orch) = orchestrator_with("exit 0", "sleep 30").await;
        let exp = orch
            .create_experiment("demo", "sqlite::memory:", 8480, None)
            .await
            .unwrap();

        let started = orch.start_experiment(exp.id).await.unwrap();
        wait_for_death(started.server_pid.unwrap() as u32).await;

        let state = orch.experiment_status(exp.id).await.unwrap();
        assert!(state.crashed);
        assert_eq!(state.status, ExperimentStatus::Stopped);

        // Once repaired, subsequent polls are a plain stopped status.
        let state = orch.experiment_status(exp.id).await.unwrap();
        assert!(!state.crashed);
    }

    #[tokio::test]
    async fn delete_cascades_every_scoped_row() {
        let (_dir, db, orch) = orchestrator_with("sleep 30", "sleep 30").await;
        let exp = orch
            .create_experiment("demo", "sqlite::memory:", 8480, None)
            .await
            .unwrap();
        let c1 = orch.add_client(exp.id, "c1", "{}", 240).await.unwrap();
        let c2 = orch.add_client(exp.id, "c2", "{}", 240).await.unwrap();
        orch.tracker().initialize(c1.id, exp.id).await.unwrap();
        orch.tracker().initialize(c2.id, exp.id).await.unwrap();

        // 3 offset rows and 5 metric rows referencing the experiment.
        let offsets = LogOffsetTracker::new(db.clone());
        use crate::offsets::OffsetKey;
        offsets
            .advance_offset(db.as_ref(), OffsetKey::server(exp.id), "server.log", 10)
            .await
            .unwrap();
        offsets
            .advance_offset(db.as_ref(), OffsetKey::client(exp.id, c1.id), "c1.log", 10)
            .await
            .unwrap();
        offsets
            .advance_offset(db.as_ref(), OffsetKey::client(exp.id, c2.id), "c2.log", 10)
            .await
            .unwrap();

        let day = chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let now = Utc::now();
        for (granularity, hour, path) in [
            ("daily", None, "/feed"),
            ("hourly", Some(10), "/feed"),
            ("daily", None, "/post"),
        ] {
            server_metrics::ActiveModel {
                id: Set(Uuid::new_v4()),
                experiment_id: Set(exp.id),
                granularity: Set(granularity.to_string()),
                day: Set(day),
                hour: Set(hour),
                path: Set(path.to_string()),
                call_count: Set(1),
                total_duration: Set(1.0),
                min_ts: Set(now.into()),
                max_ts: Set(now.into()),
            }
            .insert(db.as_ref())
            .await
            .unwrap();
        }
        for client_id in [c1.id, c2.id] {
            client_metrics::ActiveModel {
                id: Set(Uuid::new_v4()),
                client_id: Set(client_id),
                experiment_id: Set(exp.id),
                granularity: Set("daily".to_string()),
                day: Set(day),
                hour: Set(None),
                method_name: Set("post_content".to_string()),
                call_count: Set(1),
                total_duration: Set(1.0),
                min_ts: Set(now.into()),
                max_ts: Set(now.into()),
            }
            .insert(db.as_ref())
            .await
            .unwrap();
        }

        orch.registry()
            .activate(exp.id, "sqlite::memory:")
            .await
            .unwrap();
        orch.delete_experiment(exp.id, false).await.unwrap();

        assert_eq!(
            experiments::Entity::find_by_id(exp.id)
                .count(db.as_ref())
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            clients::Entity::find()
                .filter(clients::Column::ExperimentId.eq(exp.id))
                .count(db.as_ref())
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            exec_states::Entity::find()
                .filter(exec_states::Column::ExperimentId.eq(exp.id))
                .count(db.as_ref())
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            log_file_offsets::Entity::find()
                .filter(log_file_offsets::Column::ExperimentId.eq(exp.id))
                .count(db.as_ref())
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            server_metrics::Entity::find()
                .filter(server_metrics::Column::ExperimentId.eq(exp.id))
                .count(db.as_ref())
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            client_metrics::Entity::find()
                .filter(client_metrics::Column::ExperimentId.eq(exp.id))
                .count(db.as_ref())
                .await
                .unwrap(),
            0
        );
        assert!(!orch.registry().is_active(exp.id).await);
    }

    #[tokio::test]
    async fn delete_refuses_a_running_experiment_without_force() {
        let (_dir, _db, orch) = orchestrator_with("sleep 30", "sleep 30").await;
        let exp = orch
            .create_experiment("demo", "sqlite::memory:", 8480, None)
            .await
            .unwrap();
        orch.start_experiment(exp.id).await.unwrap();

        let err = orch.delete_experiment(exp.id, false).await.unwrap_err();
        assert!(matches!(err, CoreError::ExperimentRunning(_)));

        // Force stops first, then deletes.
        orch.delete_experiment(exp.id, true).await.unwrap();
        let err = orch.experiment_status(exp.id).await.unwrap_err();
        assert!(matches!(err, CoreError::UnknownExperiment(_)));
    }

    #[tokio::test]
    async fn health_distinguishes_fresh_stalled_and_completed() {
        let (_dir, db, orch) = orchestrator_with("sleep 30", "sleep 30").await;
        let exp = seed_experiment(&db, "running").await;

        // Never started: still at the sentinel.
        let fresh = seed_client(&db, exp.id, 240).await;
        orch.tracker().initialize(fresh.id, exp.id).await.unwrap();
        let p = orch.poll_progress(fresh.id).await.unwrap();
        assert_eq!(p.health, ProgressHealth::NotStarted);
        assert_eq!(p.progress.percent, 0);

        // Completed: current round at/over the expected duration.
        let done = seed_client(&db, exp.id, 24).await;
        orch.tracker().initialize(done.id, exp.id).await.unwrap();
        orch.tracker().advance(done.id, 1, 0).await.unwrap();
        let p = orch.poll_progress(done.id).await.unwrap();
        assert_eq!(p.health, ProgressHealth::Completed);

        // Stalled: elapsed_time frozen across polls while the pid (ours,
        // very much alive) keeps running.
        let stuck = seed_client(&db, exp.id, 240).await;
        orch.tracker().initialize(stuck.id, exp.id).await.unwrap();
        for _ in 0..40 {
            orch.tracker().advance(stuck.id, 0, 2).await.unwrap();
        }
        let mut active: clients::ActiveModel = orch.client(stuck.id).await.unwrap().into();
        active.pid = Set(Some(std::process::id() as i64));
        active.update(db.as_ref()).await.unwrap();

        let p = orch.poll_progress(stuck.id).await.unwrap();
        assert_eq!(p.health, ProgressHealth::Active);
        tokio::time::sleep(Duration::from_millis(80)).await;
        let p = orch.poll_progress(stuck.id).await.unwrap();
        assert_eq!(p.health, ProgressHealth::Stalled);

        // A new tick clears the stall.
        orch.tracker().advance(stuck.id, 0, 3).await.unwrap();
        let p = orch.poll_progress(stuck.id).await.unwrap();
        assert_eq!(p.health, ProgressHealth::Active);
    }

    #[tokio::test]
    async fn poll_all_progress_covers_clients_without_state() {
        let (_dir, db, orch) = orchestrator_with("sleep 30", "sleep 30").await;
        let exp = seed_experiment(&db, "running").await;
        let with_state = seed_client(&db, exp.id, 240).await;
        let without_state = seed_client(&db, exp.id, 240).await;
        orch.tracker()
            .initialize(with_state.id, exp.id)
            .await
            .unwrap();
        orch.tracker().advance(with_state.id, 5, 12).await.unwrap();

        let all = orch.poll_all_progress(&[exp.id]).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[&with_state.id].progress.current_round, 132);
        assert_eq!(all[&with_state.id].progress.percent, 55);
        assert_eq!(all[&without_state.id].health, ProgressHealth::NotStarted);
    }
}
