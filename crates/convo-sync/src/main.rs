//! Maintenance tool for the synchronization layer's stores.

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use convo_sync::{telemetry, Channel, Config, PrimaryStore, SyncRuntime};

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "convo-sync", version, about = "Inspect and repair mirrored conversation stores")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Command {
    /// Session totals and outbox backlog
    Stats,
    /// Active sessions, most recently updated first
    Active {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Print the turns an agent would see for a contact
    Replay {
        contact: String,
        #[arg(long, default_value = "chat")]
        channel: String,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Run one outbox redelivery pass
    Drain {
        #[arg(long)]
        batch: Option<u32>,
    },
    /// List queued mirror writes
    Outbox {
        /// Include entries that exhausted their attempts
        #[arg(long)]
        dead: bool,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();
    let cfg = Config::from_env()?;
    let runtime = SyncRuntime::open(cfg)?;

    match cli.command {
        Command::Stats => {
            let stats = runtime.resolver.stats().await?;
            println!("sessions: {} total, {} active", stats.total_sessions, stats.active_sessions);
            println!("channels: {} chat, {} whatsapp", stats.chat_sessions, stats.whatsapp_sessions);
            let pending = runtime.primary().pending_mirror_count().await?;
            println!("outbox: {} pending", pending);
        }
        Command::Active { limit } => {
            for session in runtime.resolver.active_sessions(limit).await? {
                println!(
                    "{}  {:<9} {:<20} {}  updated {}",
                    session.id,
                    session.channel.as_str(),
                    session.contact_identity,
                    session.display_name,
                    session.updated_at.to_rfc3339()
                );
            }
        }
        Command::Replay { contact, channel, limit } => {
            let channel = Channel::from_str_opt(&channel)
                .ok_or_else(|| anyhow::anyhow!("unknown channel '{}'", channel))?;
            let limit = limit.unwrap_or(runtime.history.default_limit());
            for turn in runtime.history.replay(&contact, channel, limit).await? {
                println!("{}", serde_json::to_string(&turn)?);
            }
        }
        Command::Drain { batch } => {
            let batch = batch.unwrap_or(runtime.config.outbox.batch_size);
            let report = runtime.coordinator.drain_outbox(batch).await?;
            println!(
                "delivered {}, retried {}, dead {}",
                report.delivered, report.retried, report.dead
            );
        }
        Command::Outbox { dead, limit } => {
            for entry in runtime.primary().outbox_entries(dead, limit).await? {
                println!(
                    "#{} {:<16} attempts={} dead={} next={} error={}",
                    entry.id,
                    entry.operation,
                    entry.attempts,
                    entry.dead,
                    entry.next_attempt_at.to_rfc3339(),
                    entry.last_error.as_deref().unwrap_or("-")
                );
            }
        }
    }

    runtime.shutdown().await;
    Ok(())
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
