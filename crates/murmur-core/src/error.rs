use uuid::Uuid;

/// Failure taxonomy of the orchestration core. Parse skips and offset
/// regressions are deliberately NOT here: both are recovered locally and
/// surfaced through `RefreshSummary`.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Spawn(#[from] murmur_process::ProcessError),

    #[error("{entity} {id} already has a live process (pid {pid})")]
    AlreadyRunning {
        entity: &'static str,
        id: Uuid,
        pid: u32,
    },

    #[error("unknown experiment: {0}")]
    UnknownExperiment(Uuid),

    #[error("unknown client: {0}")]
    UnknownClient(Uuid),

    #[error("experiment {0} is not running")]
    ExperimentNotRunning(Uuid),

    #[error("experiment {0} is running; stop it first or force-delete")]
    ExperimentRunning(Uuid),

    /// The targeted row was deleted out from under the write. The operation
    /// is abandoned, not retried: the entity no longer exists.
    #[error("{entity} {id} was deleted concurrently")]
    StaleWrite { entity: &'static str, id: Uuid },

    #[error(transparent)]
    Db(#[from] sea_orm::DbErr),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
