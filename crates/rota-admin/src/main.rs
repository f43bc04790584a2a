//! Operator CLI for rota.
//!
//! Connects to `PostgreSQL`, applies migrations and runs one command
//! against the [`Rotation`] service. Configuration comes from the YAML
//! file named by `--config`, then `ROTA_CONFIG`, then `rota.yaml`.

mod render;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rota_core::config::LoggingConfig;
use rota_core::{GenerateRequest, QueueStore, Rotation, RotationConfig};
use rota_db::{PgQueueStore, PostgresConfig, PostgresPool};
use rota_types::{ItemFlags, ParticipantId, SnapshotId};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::render::Format;

/// Config file used when neither `--config` nor `ROTA_CONFIG` is given.
const DEFAULT_CONFIG_PATH: &str = "rota.yaml";

#[derive(Parser)]
#[command(name = "rota-admin")]
#[command(about = "Weighted turn-order rotation: generate, edit and inspect queues", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (falls back to ROTA_CONFIG, then rota.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Draw a new turn order from the active roster
    Generate {
        /// Subject label, e.g. "lab 3"
        subject: String,

        /// Participant ids forced to the front, comma separated
        #[arg(short, long, value_delimiter = ',')]
        priority: Vec<i64>,

        /// Participant ids forced to the back, comma separated
        #[arg(short, long, value_delimiter = ',')]
        late: Vec<i64>,
    },

    /// Swap two regular items and cascade the weight change
    Swap {
        /// Snapshot id
        snapshot: i64,

        /// First position (1-based)
        a: u32,

        /// Second position (1-based)
        b: u32,
    },

    /// Remove an item and roll its participant's weight back
    Delete {
        /// Snapshot id
        snapshot: i64,

        /// Position to remove (1-based)
        position: u32,
    },

    /// Append a participant to an existing snapshot
    Add {
        /// Snapshot id
        snapshot: i64,

        /// Participant id
        participant: i64,

        /// Mark the item as priority
        #[arg(long, conflicts_with = "late")]
        priority: bool,

        /// Mark the item as late
        #[arg(long)]
        late: bool,
    },

    /// Show one snapshot
    Show {
        /// Snapshot id
        snapshot: i64,
    },

    /// List the newest snapshots
    Recent {
        /// Maximum number of snapshots (capped by recent_limit)
        #[arg(short = 'n', long, default_value = "5")]
        limit: usize,
    },

    /// Show every participant's live weight
    Weights,

    /// Show a participant's recent weight changes
    History {
        /// Participant id
        participant: i64,
    },

    /// Put every participant back to the default weight
    ResetWeights,

    /// Manage the participant roster
    Roster {
        #[command(subcommand)]
        command: RosterCommands,
    },

    /// Apply pending database migrations and exit
    Migrate,
}

#[derive(Subcommand)]
enum RosterCommands {
    /// Register a participant, or rename an existing one
    Add {
        /// Participant id
        id: i64,

        /// Display name
        name: String,
    },

    /// Include a participant in future draws
    Activate {
        /// Participant id
        id: i64,
    },

    /// Exclude a participant from future draws
    Deactivate {
        /// Participant id
        id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let path = config_path(cli.config.clone(), std::env::var_os("ROTA_CONFIG").map(PathBuf::from));
    let config = RotationConfig::load(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    init_tracing(&config.logging);

    info!(
        config = %path.display(),
        elasticity = config.elasticity,
        history_limit = config.history_limit,
        "Starting rota-admin"
    );

    let pool = PostgresPool::connect(&PostgresConfig::new(&config.database))
        .await
        .context("failed to connect to PostgreSQL")?;
    pool.run_migrations().await.context("failed to run migrations")?;

    let rotation = Rotation::new(PgQueueStore::new(pool.clone()), config);
    let result = run(&rotation, cli.command, Format::from_flag(cli.json)).await;
    pool.close().await;

    let output = result?;
    print!("{output}");
    Ok(())
}

/// Resolve the config file: explicit flag, then environment, then default.
fn config_path(flag: Option<PathBuf>, env: Option<PathBuf>) -> PathBuf {
    flag.or(env)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Install the global subscriber. `RUST_LOG` wins over the configured
/// level. Logs go to stderr so command output stays pipeable.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Run one command and return what should be printed.
async fn run(
    rotation: &Rotation<PgQueueStore>,
    command: Commands,
    format: Format,
) -> anyhow::Result<String> {
    match command {
        Commands::Generate {
            subject,
            priority,
            late,
        } => {
            let request = GenerateRequest::new(subject)
                .with_priority(participant_ids(&priority))
                .with_late(participant_ids(&late));
            let snapshot = rotation.generate(&request).await?;
            render::snapshot(&rotation.view(snapshot.id).await?, format)
        }
        Commands::Swap { snapshot, a, b } => {
            let outcome = rotation.swap(SnapshotId(snapshot), a, b).await?;
            let view = rotation.view(outcome.snapshot.id).await?;
            let mut out = render::snapshot(&view, format)?;
            if format == Format::Text {
                out.push_str(&render::cascade_summary(
                    outcome.changed.len(),
                    &outcome.cascade,
                ));
            }
            Ok(out)
        }
        Commands::Delete { snapshot, position } => {
            let outcome = rotation.delete(SnapshotId(snapshot), position).await?;
            let view = rotation.view(outcome.snapshot.id).await?;
            let mut out = render::snapshot(&view, format)?;
            if format == Format::Text {
                let rolled_back = usize::from(!outcome.cascade.touched.is_empty());
                out.push_str(&render::cascade_summary(rolled_back, &outcome.cascade));
            }
            Ok(out)
        }
        Commands::Add {
            snapshot,
            participant,
            priority,
            late,
        } => {
            let flags = ItemFlags {
                priority,
                late,
                ..ItemFlags::REGULAR
            };
            let item = rotation
                .add(SnapshotId(snapshot), ParticipantId(participant), flags)
                .await?;
            render::added(&item, format)
        }
        Commands::Show { snapshot } => {
            render::snapshot(&rotation.view(SnapshotId(snapshot)).await?, format)
        }
        Commands::Recent { limit } => render::snapshots(&rotation.recent(limit).await?, format),
        Commands::Weights => render::weights(&rotation.weights().await?, format),
        Commands::History { participant } => render::history(
            &rotation.weight_history(ParticipantId(participant)).await?,
            format,
        ),
        Commands::ResetWeights => {
            let count = rotation.reset_weights().await?;
            Ok(format!("reset {count} participant(s)\n"))
        }
        Commands::Roster { command } => roster(rotation, command).await,
        Commands::Migrate => Ok("migrations applied\n".to_owned()),
    }
}

/// Roster administration goes straight to the store; it never touches
/// snapshots or weights.
async fn roster<S: QueueStore>(
    rotation: &Rotation<S>,
    command: RosterCommands,
) -> anyhow::Result<String> {
    let store = rotation.store();
    match command {
        RosterCommands::Add { id, name } => {
            let participant = store
                .register_participant(ParticipantId(id), &name)
                .await?;
            Ok(format!(
                "registered {} as {} (weight {:.2})\n",
                participant.id, participant.name, participant.weight
            ))
        }
        RosterCommands::Activate { id } => {
            store.set_active(ParticipantId(id), true).await?;
            Ok(format!("participant {id} is active\n"))
        }
        RosterCommands::Deactivate { id } => {
            store.set_active(ParticipantId(id), false).await?;
            Ok(format!("participant {id} is inactive\n"))
        }
    }
}

fn participant_ids(raw: &[i64]) -> Vec<ParticipantId> {
    raw.iter().copied().map(ParticipantId).collect()
}
