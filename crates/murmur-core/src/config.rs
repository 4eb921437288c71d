use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_STALL_AFTER_SECS: u64 = 5;

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse::<u64>().ok())
}

fn env_path(name: &str, default: &str) -> PathBuf {
    std::env::var(name)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

/// Runtime knobs for the orchestrator, read once from the environment.
/// Tests construct this directly with a temp dir and stub executables.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Base directory for per-experiment working dirs and log files.
    pub data_root: PathBuf,
    /// Simulator server executable.
    pub server_bin: PathBuf,
    /// Simulation client driver executable.
    pub client_bin: PathBuf,
    /// Graceful window before a stop escalates to SIGKILL.
    pub stop_timeout: Duration,
    /// How long `elapsed_time` may sit unchanged (with the process alive)
    /// before a client is reported as stalled.
    pub stall_after: Duration,
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        Self {
            data_root: env_path("MURMUR_DATA_ROOT", "./murmur-data"),
            server_bin: env_path("MURMUR_SERVER_BIN", "murmur-sim-server"),
            client_bin: env_path("MURMUR_CLIENT_BIN", "murmur-sim-client"),
            stop_timeout: Duration::from_secs(
                env_u64("MURMUR_STOP_TIMEOUT_SECS")
                    .map(|v| v.clamp(1, 300))
                    .unwrap_or(DEFAULT_STOP_TIMEOUT_SECS),
            ),
            stall_after: Duration::from_secs(
                env_u64("MURMUR_STALL_AFTER_SECS")
                    .map(|v| v.clamp(1, 3600))
                    .unwrap_or(DEFAULT_STALL_AFTER_SECS),
            ),
        }
    }

    pub fn experiment_dir(&self, experiment_id: Uuid) -> PathBuf {
        self.data_root.join(format!("exp_{experiment_id}"))
    }

    pub fn server_log_path(&self, experiment_id: Uuid) -> PathBuf {
        self.experiment_dir(experiment_id).join("server.log")
    }

    pub fn client_log_path(&self, experiment_id: Uuid, client_id: Uuid) -> PathBuf {
        self.experiment_dir(experiment_id)
            .join(format!("client_{client_id}.log"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_paths_are_scoped_per_experiment() {
        let cfg = OrchestratorConfig {
            data_root: PathBuf::from("/tmp/murmur"),
            server_bin: PathBuf::from("server"),
            client_bin: PathBuf::from("client"),
            stop_timeout: Duration::from_secs(10),
            stall_after: Duration::from_secs(5),
        };
        let exp = Uuid::new_v4();
        let client = Uuid::new_v4();

        let server = cfg.server_log_path(exp);
        let client_log = cfg.client_log_path(exp, client);
        assert!(server.starts_with(cfg.experiment_dir(exp)));
        assert!(client_log.starts_with(cfg.experiment_dir(exp)));
        assert_ne!(server, client_log);
    }
}
