use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use murmur_core::{Orchestrator, OrchestratorConfig};
use sea_orm_migration::MigratorTrait;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "murmur", version, about = "Simulation experiment orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new experiment with its own data store.
    CreateExperiment {
        name: String,
        #[arg(long)]
        store_url: String,
        #[arg(long, default_value_t = 8480)]
        port: i32,
        #[arg(long)]
        config: Option<String>,
    },
    /// Attach a client driver to an experiment.
    AddClient {
        experiment: Uuid,
        name: String,
        #[arg(long, default_value = "{}")]
        config_json: String,
        #[arg(long)]
        expected_rounds: i32,
    },
    /// Start an experiment's server process.
    Start { experiment: Uuid },
    /// Stop an experiment: clients first, then the server.
    Stop { experiment: Uuid },
    /// Start (or resume) a client driver.
    StartClient { client: Uuid },
    /// Stop a client driver; its progress is kept for resume.
    StopClient { client: Uuid },
    /// Recorded status reconciled against process liveness.
    Status { experiment: Uuid },
    /// Progress and health for one client.
    Progress { client: Uuid },
    /// Progress for every client of the given experiments.
    PollAll { experiments: Vec<Uuid> },
    /// Incrementally aggregate new log lines into the metrics tables.
    Refresh { experiment: Uuid },
    /// Delete an experiment and every row scoped to it.
    Delete {
        experiment: Uuid,
        #[arg(long)]
        force: bool,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
    let db = murmur_db::connect(&database_url)
        .await
        .context("connect control store")?;

    // Apply migrations on boot (idempotent).
    murmur_migration::Migrator::up(&db, None).await?;

    let orchestrator = Orchestrator::new(Arc::new(db), OrchestratorConfig::from_env());

    match cli.command {
        Commands::CreateExperiment {
            name,
            store_url,
            port,
            config,
        } => {
            let exp = orchestrator
                .create_experiment(&name, &store_url, port, config)
                .await?;
            println!("{}", exp.id);
        }
        Commands::AddClient {
            experiment,
            name,
            config_json,
            expected_rounds,
        } => {
            let client = orchestrator
                .add_client(experiment, &name, &config_json, expected_rounds)
                .await?;
            println!("{}", client.id);
        }
        Commands::Start { experiment } => {
            let exp = orchestrator.start_experiment(experiment).await?;
            tracing::info!(experiment_id = %exp.id, pid = ?exp.server_pid, "started");
            println!("running (pid {})", exp.server_pid.unwrap_or_default());
        }
        Commands::Stop { experiment } => {
            orchestrator.stop_experiment(experiment).await?;
            println!("stopped");
        }
        Commands::StartClient { client } => {
            let c = orchestrator.start_client(client).await?;
            println!("running (pid {})", c.pid.unwrap_or_default());
        }
        Commands::StopClient { client } => {
            orchestrator.stop_client(client).await?;
            println!("stopped");
        }
        Commands::Status { experiment } => {
            let state = orchestrator.experiment_status(experiment).await?;
            print_json(&state)?;
        }
        Commands::Progress { client } => {
            let progress = orchestrator.poll_progress(client).await?;
            print_json(&progress)?;
        }
        Commands::PollAll { experiments } => {
            let all = orchestrator.poll_all_progress(&experiments).await?;
            print_json(&all)?;
        }
        Commands::Refresh { experiment } => {
            let summary = orchestrator.refresh_logs(experiment).await?;
            print_json(&summary)?;
        }
        Commands::Delete { experiment, force } => {
            orchestrator.delete_experiment(experiment, force).await?;
            println!("deleted");
        }
    }

    Ok(())
}
