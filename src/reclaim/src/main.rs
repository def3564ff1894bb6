//! Reclaim — outbound relationship-recovery messaging engine.
//!
//! Main entry point that wires the channel connection, delivery queue,
//! campaign engine, and response router together and runs them until
//! shutdown.

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use reclaim_campaign::CampaignEngine;
use reclaim_channel::{ChannelConnection, ChannelEvent, LogTransport};
use reclaim_core::alerts::tracing_sink;
use reclaim_core::config::AppConfig;
use reclaim_core::records::InMemoryRecords;
use reclaim_core::templates::StaticCatalog;
use reclaim_core::types::{CampaignType, Recipient, RecipientStatus};
use reclaim_delivery::{DeliveryQueue, QuotaTracker, SystemClock};
use reclaim_router::{KeywordClassifier, ResponseRouter};

#[derive(Parser, Debug)]
#[command(name = "reclaim")]
#[command(about = "Outbound relationship-recovery messaging engine")]
#[command(version)]
struct Cli {
    /// Session storage directory (overrides config)
    #[arg(long, env = "RECLAIM__CHANNEL__SESSION_PATH")]
    session_path: Option<String>,

    /// Delivery worker count (overrides config)
    #[arg(long, env = "RECLAIM__DELIVERY__WORKERS")]
    workers: Option<usize>,

    /// Seed a demo roster of recipients into the in-memory records
    #[arg(long, default_value_t = false)]
    seed_demo: bool,

    /// Run one eligibility scan immediately on startup
    #[arg(long, default_value_t = false)]
    scan_now: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reclaim=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Reclaim starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(session_path) = cli.session_path {
        config.channel.session_path = session_path;
    }
    if let Some(workers) = cli.workers {
        config.delivery.workers = workers;
    }

    info!(
        session_path = %config.channel.session_path,
        workers = config.delivery.workers,
        window_cap = config.quota.window_cap,
        cooldown_days = config.campaign.cooldown_days,
        "Configuration loaded"
    );

    let alerts = tracing_sink();
    let clock = Arc::new(SystemClock);

    // Channel connection over the development transport
    let (connection, inbound) =
        ChannelConnection::new(Arc::new(LogTransport), config.channel.clone(), alerts.clone());
    connection.connect().await?;
    tokio::spawn(connection.clone().run());

    // Surface lifecycle events for the operator
    let mut channel_events = connection.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = channel_events.recv().await {
            match event {
                ChannelEvent::AuthChallenge { code } => {
                    info!(code = %code, "pairing challenge, scan to authenticate")
                }
                ChannelEvent::Connected => info!("channel connected"),
                ChannelEvent::Disconnected => warn!("channel disconnected"),
                ChannelEvent::ConnectionLost { attempts } => {
                    error!(attempts, "channel connection lost, manual restart required")
                }
            }
        }
    });

    // Delivery queue and quota tracker
    let quota = Arc::new(QuotaTracker::new(
        &config.quota,
        clock.clone(),
        alerts.clone(),
    ));
    let queue = DeliveryQueue::new(config.delivery.clone(), clock.clone(), alerts.clone());

    // Business records and templates; in-memory for the standalone binary
    let records: Arc<InMemoryRecords> = Arc::new(InMemoryRecords::new());
    if cli.seed_demo {
        seed_demo(records.as_ref());
    }
    let catalog = Arc::new(StaticCatalog::builtin());

    // Campaign engine
    let engine = CampaignEngine::new(
        config.campaign.clone(),
        queue.clone(),
        records.clone(),
        catalog,
        quota.clone(),
        clock,
        alerts.clone(),
    );

    // Worker pool
    let _workers = queue.start(engine.clone(), connection.clone(), quota.clone());

    // Response router on the inbound channel
    let router = ResponseRouter::new(
        KeywordClassifier::default(),
        engine.clone(),
        records.clone(),
        alerts,
    );
    tokio::spawn(router.run(inbound));

    if cli.scan_now {
        engine.run_eligibility_scan();
    }

    // Periodic eligibility scan
    let scan_engine = engine.clone();
    let scan_interval = std::time::Duration::from_secs(config.campaign.scan_interval_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(scan_interval);
        interval.tick().await; // first tick is immediate, skip it
        loop {
            interval.tick().await;
            scan_engine.run_eligibility_scan();
        }
    });

    info!("Reclaim is running");

    tokio::signal::ctrl_c().await?;
    info!(
        active_instances = engine.active_count(),
        "Shutdown signal received, exiting"
    );
    Ok(())
}

/// Demo roster: one recipient per campaign entry path.
fn seed_demo(records: &InMemoryRecords) {
    let roster = [
        ("m-001", "5511988880001", "Maria Silva", CampaignType::Reactivation),
        ("m-002", "5511988880002", "João Pereira", CampaignType::Reactivation),
        ("v-001", "5511988880003", "Ana Souza", CampaignType::Nurturing),
        ("b-001", "5511988880004", "Carlos Lima", CampaignType::Billing),
    ];
    for (id, address, name, campaign) in roster {
        records.insert(
            Recipient {
                id: id.to_string(),
                address: address.to_string(),
                display_name: name.to_string(),
                status: RecipientStatus::Eligible,
            },
            &[campaign],
        );
    }
    info!(recipients = roster.len(), "demo roster seeded");
}
