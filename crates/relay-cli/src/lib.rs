//! # Session-Relay CLI
//!
//! Command-line interface for driving session producer/consumer loops
//! against a session-partitioned queue.
//!
//! Commands:
//! - `produce` - run the work-sending loop into a session
//! - `consume` - drain a session until the shutdown sentinel arrives
//! - `shutdown` - send the sentinel into a session as a one-shot
//! - `demo` - producer, sentinel, and consumer end-to-end over the
//!   in-memory broker in one process
//! - `config` - validate and show the resolved configuration

pub mod config;

use crate::config::{ProviderKind, RelayConfig};
use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use relay_runtime::{QueueClient, QueueClientFactory, SessionClient};
use relay_worker::{
    LockRenewer, SessionConsumer, SessionConsumerConfig, SessionProducer, SessionProducerConfig,
    SettlementPolicy,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// Session-Relay - session-oriented queue producer/consumer loops
#[derive(Debug, Parser)]
#[command(name = "session-relay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Producer/consumer loops over a session-partitioned queue")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Send work messages into a session
    Produce {
        /// Session to send into (overrides configuration)
        #[arg(short, long)]
        session: Option<String>,

        /// Iterations to run before stopping (default: run until cancelled)
        #[arg(short, long)]
        iterations: Option<u32>,

        /// Send the shutdown sentinel instead of work messages
        #[arg(long)]
        shutdown: bool,
    },

    /// Drain a session until the shutdown sentinel arrives
    Consume {
        /// Session to drain (overrides configuration)
        #[arg(short, long)]
        session: Option<String>,

        /// End after this many consecutive empty receives
        #[arg(long)]
        max_idle_batches: Option<u32>,

        /// Disposition applied to every received message
        #[arg(long, value_enum, default_value = "complete")]
        settlement: SettlementArg,

        /// Reason recorded when settlement is dead-letter
        #[arg(long, default_value = "rejected by session-relay consumer")]
        dead_letter_reason: String,
    },

    /// Send the shutdown sentinel into a session as a one-shot
    Shutdown {
        /// Session to shut down (overrides configuration)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Run producer, sentinel, and consumer end-to-end in-process
    Demo {
        /// Producer iterations before the sentinel is sent
        #[arg(short, long, default_value = "1")]
        iterations: u32,
    },

    /// Validate configuration
    Config {
        /// Show resolved configuration
        #[arg(short, long)]
        show: bool,
    },
}

/// Settlement disposition selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SettlementArg {
    Complete,
    Abandon,
    Defer,
    DeadLetter,
}

impl SettlementArg {
    /// Convert to the worker-level policy
    pub fn to_policy(self, dead_letter_reason: &str) -> SettlementPolicy {
        match self {
            Self::Complete => SettlementPolicy::Complete,
            Self::Abandon => SettlementPolicy::Abandon,
            Self::Defer => SettlementPolicy::Defer,
            Self::DeadLetter => SettlementPolicy::DeadLetter {
                reason: dead_letter_reason.to_string(),
            },
        }
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Initialize tracing with an env-filter and optional JSON output
pub fn init_logging(level: &str, json: bool) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("invalid log level")?;

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    Ok(())
}

// ============================================================================
// Command dispatch
// ============================================================================

/// Execute the parsed command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config =
        RelayConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Produce {
            session,
            iterations,
            shutdown,
        } => {
            apply_session_override(&mut config, session)?;
            let producer_config = SessionProducerConfig {
                shutdown,
                iterations,
                idle_delay: Duration::from_secs(config.idle_delay_seconds),
                sentinel: config.sentinel.clone(),
                ..SessionProducerConfig::new(config.session_id())
            };
            run_producer(&config, producer_config).await
        }

        Commands::Consume {
            session,
            max_idle_batches,
            settlement,
            dead_letter_reason,
        } => {
            apply_session_override(&mut config, session)?;
            if max_idle_batches.is_some() {
                config.max_idle_batches = max_idle_batches;
            }
            run_consumer(&config, settlement.to_policy(&dead_letter_reason)).await
        }

        Commands::Shutdown { session } => {
            apply_session_override(&mut config, session)?;
            let producer_config = SessionProducerConfig {
                sentinel: config.sentinel.clone(),
                ..SessionProducerConfig::shutdown_only(config.session_id())
            };
            run_producer(&config, producer_config).await
        }

        Commands::Demo { iterations } => run_demo(&config, iterations).await,

        Commands::Config { show } => {
            if show {
                let rendered = serde_json::to_string_pretty(&config)
                    .unwrap_or_else(|_| format!("{config:?}"));
                println!("{rendered}");
            }
            println!("configuration is valid");
            Ok(())
        }
    }
}

fn apply_session_override(
    config: &mut RelayConfig,
    session: Option<String>,
) -> anyhow::Result<()> {
    if let Some(session) = session {
        config.session = session;
        config.validate().context("invalid session override")?;
    }
    Ok(())
}

async fn create_client(config: &RelayConfig) -> anyhow::Result<Box<dyn QueueClient>> {
    QueueClientFactory::create_client(config.to_queue_config())
        .await
        .context("failed to create queue client")
}

async fn run_producer(
    config: &RelayConfig,
    producer_config: SessionProducerConfig,
) -> anyhow::Result<()> {
    let client = create_client(config).await?;
    let queue = config.queue_name();

    let report = SessionProducer::new(producer_config)
        .run(client.as_ref(), &queue)
        .await
        .context("producer loop failed")?;

    info!(
        iterations = report.iterations,
        total_sent = report.total_sent(),
        sentinel_sent = report.sentinel_sent,
        "producer finished"
    );
    println!(
        "sent {} message(s) across {} iteration(s)",
        report.total_sent(),
        report.iterations
    );
    Ok(())
}

async fn run_consumer(config: &RelayConfig, settlement: SettlementPolicy) -> anyhow::Result<()> {
    let client = create_client(config).await?;
    let queue = config.queue_name();

    let session: Arc<dyn SessionClient> = Arc::from(
        client
            .accept_session(&queue, Some(config.session_id()))
            .await
            .context("failed to accept session")?,
    );

    // Keep the session lock alive independently of how long settlement of
    // any single batch takes.
    let renewer = LockRenewer::with_interval(Duration::from_secs(config.renewal_interval_seconds));
    renewer
        .register_session(
            Arc::clone(&session),
            Duration::from_secs(config.renewal_window_seconds),
        )
        .await
        .context("failed to register session for lock renewal")?;

    let consumer_config = SessionConsumerConfig {
        max_messages: config.max_messages,
        max_wait: chrono::Duration::seconds(config.max_wait_seconds as i64),
        max_idle_batches: config.max_idle_batches,
        settlement,
        sentinel: config.sentinel.clone(),
        ..Default::default()
    };

    let result = SessionConsumer::new(consumer_config)
        .run(session.as_ref())
        .await;
    renewer.close().await;
    let report = result.context("consumer loop failed")?;

    session
        .close_session()
        .await
        .context("failed to close session")?;

    info!(
        settled = report.settled,
        sentinel_seen = report.sentinel_seen,
        idle_batches = report.idle_batches,
        "consumer finished"
    );
    println!(
        "settled {} message(s); sentinel {}",
        report.settled,
        if report.sentinel_seen {
            "observed"
        } else {
            "not observed"
        }
    );
    Ok(())
}

/// End-to-end walkthrough over the in-memory broker: produce work, send the
/// sentinel, then drain the session.
async fn run_demo(config: &RelayConfig, iterations: u32) -> anyhow::Result<()> {
    let demo_config = RelayConfig {
        provider: ProviderKind::Memory,
        ..config.clone()
    };
    let client = create_client(&demo_config).await?;
    let queue = demo_config.queue_name();

    let work = SessionProducerConfig {
        iterations: Some(iterations),
        idle_delay: Duration::from_millis(10),
        sentinel: demo_config.sentinel.clone(),
        ..SessionProducerConfig::new(demo_config.session_id())
    };
    let produced = SessionProducer::new(work)
        .run(client.as_ref(), &queue)
        .await
        .context("demo producer failed")?;

    let shutdown = SessionProducerConfig {
        sentinel: demo_config.sentinel.clone(),
        ..SessionProducerConfig::shutdown_only(demo_config.session_id())
    };
    SessionProducer::new(shutdown)
        .run(client.as_ref(), &queue)
        .await
        .context("demo shutdown send failed")?;

    let session = client
        .accept_session(&queue, Some(demo_config.session_id()))
        .await
        .context("demo session accept failed")?;
    let consumer_config = SessionConsumerConfig {
        max_messages: demo_config.max_messages,
        max_wait: chrono::Duration::seconds(5),
        sentinel: demo_config.sentinel.clone(),
        ..Default::default()
    };
    let consumed = SessionConsumer::new(consumer_config)
        .run(session.as_ref())
        .await
        .context("demo consumer failed")?;
    session.close_session().await?;

    println!(
        "demo: produced {} message(s), consumer settled {} and {} the sentinel",
        produced.total_sent() + 1,
        consumed.settled,
        if consumed.sentinel_seen {
            "observed"
        } else {
            "missed"
        }
    );
    Ok(())
}
