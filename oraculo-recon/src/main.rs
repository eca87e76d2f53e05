//! oraculo-recon - listing reconciliation CLI
//!
//! Runs scraped batches through the reconciliation pipeline and exposes the
//! manual resolution and ledger actions an operator UI would call.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use oraculo_common::events::{EventBus, ReconEvent};
use oraculo_recon::config::ReconConfig;
use oraculo_recon::workflow::{run_sources, JsonFileProducer, RecordProducer};
use oraculo_recon::ReconContext;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "oraculo_recon=info,oraculo_common=info";

/// Command-line arguments for oraculo-recon
#[derive(Parser, Debug)]
#[command(name = "oraculo-recon")]
#[command(about = "Entity resolution and reconciliation for scraped product listings")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(short, long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile one or more JSON batch files (one source per file)
    Reconcile {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Rebuild token weights from the catalog
    RefreshWeights,
    /// List the Purgatory queue
    Pending,
    /// Link a Purgatory entry to a product
    MatchPending { pending_id: i64, product_id: i64 },
    /// Blacklist one or more Purgatory entries
    Discard {
        #[arg(required = true)]
        pending_ids: Vec<i64>,
        #[arg(short, long, default_value = "Manual discard")]
        reason: String,
    },
    /// Drop a Purgatory entry without blacklisting it
    Purge { pending_id: i64 },
    /// Link every Purgatory entry whose best match clears the threshold
    AutoLink {
        #[arg(short, long)]
        threshold: Option<f64>,
    },
    /// Send a confirmed offer back to Purgatory
    Unlink { offer_id: i64 },
    /// Move a confirmed offer to another product
    Relink { offer_id: i64, product_id: i64 },
    /// Revert a history entry
    Undo { entry_id: i64 },
    /// Show recent history, or the history of one URL
    History {
        #[arg(short, long, default_value = "20")]
        limit: i64,
        #[arg(short, long)]
        url: Option<String>,
    },
    /// Recompute per-product reference prices from current offers
    RecomputeStats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = oraculo_common::config::resolve_config_path(args.config.as_deref())
        .context("Failed to locate configuration")?;
    let config = ReconConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    // Initialize tracing: RUST_LOG, then [logging] level, then defaults
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        config
            .logging
            .level
            .as_deref()
            .unwrap_or(DEFAULT_LOG_FILTER)
            .into()
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting oraculo-recon {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config_path {
        info!("Config: {}", path.display());
    }

    let db_path = oraculo_common::config::resolve_database_path(
        args.database.as_deref(),
        config.database_path.as_deref(),
    );
    info!("Database: {}", db_path.display());

    let db_pool = oraculo_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;

    let event_bus = EventBus::new(256);
    let listener = tokio::spawn(log_events(event_bus.subscribe()));

    let ctx = ReconContext::new(db_pool, event_bus, config);

    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current record");
            cancel.cancel();
        }
    });

    let outcome = run(&ctx, args.command).await;

    // Close the bus so the listener drains and exits
    drop(ctx);
    if listener.await.is_err() {
        warn!("Event listener ended abnormally");
    }

    outcome
}

async fn run(ctx: &ReconContext, command: Command) -> Result<()> {
    match command {
        Command::Reconcile { files } => {
            let producers: Vec<Arc<dyn RecordProducer>> = files
                .into_iter()
                .map(|path| Arc::new(JsonFileProducer::new(path)) as Arc<dyn RecordProducer>)
                .collect();
            let timeout = Duration::from_secs(ctx.config.producers.fetch_timeout_secs);
            let reconciler = ctx.reconciler();
            let reports = run_sources(&reconciler, &producers, timeout)
                .await
                .context("Reconciliation failed")?;
            print_json(&reports)
        }
        Command::RefreshWeights => {
            let table = ctx.refresh_weights().await.context("Failed to refresh weights")?;
            info!(
                products = table.corpus_size(),
                tokens = table.vocabulary_size(),
                "Weights refreshed"
            );
            Ok(())
        }
        Command::Pending => {
            let pending = ctx.manual().pending().await?;
            print_json(&pending)
        }
        Command::MatchPending {
            pending_id,
            product_id,
        } => {
            let offer_id = ctx
                .manual()
                .match_pending(pending_id, product_id)
                .await
                .with_context(|| format!("Failed to match pending record {}", pending_id))?;
            println!("{}", offer_id);
            Ok(())
        }
        Command::Discard {
            pending_ids,
            reason,
        } => {
            let manual = ctx.manual();
            if let [id] = pending_ids.as_slice() {
                manual
                    .discard_pending(*id, &reason)
                    .await
                    .with_context(|| format!("Failed to discard pending record {}", id))?;
                println!("1");
            } else {
                let discarded = manual.bulk_discard(&pending_ids, &reason).await?;
                println!("{}", discarded);
            }
            Ok(())
        }
        Command::Purge { pending_id } => {
            ctx.manual()
                .purge_pending(pending_id)
                .await
                .with_context(|| format!("Failed to purge pending record {}", pending_id))?;
            Ok(())
        }
        Command::AutoLink { threshold } => {
            let threshold = threshold.unwrap_or(ctx.config.matching.auto_link_threshold);
            let summary = ctx.manual().bulk_auto_link(threshold).await?;
            print_json(&summary)
        }
        Command::Unlink { offer_id } => {
            let pending_id = ctx
                .manual()
                .unlink_offer(offer_id)
                .await
                .with_context(|| format!("Failed to unlink offer {}", offer_id))?;
            println!("{}", pending_id);
            Ok(())
        }
        Command::Relink {
            offer_id,
            product_id,
        } => {
            ctx.manual()
                .relink_offer(offer_id, product_id)
                .await
                .with_context(|| format!("Failed to relink offer {}", offer_id))?;
            Ok(())
        }
        Command::Undo { entry_id } => {
            let report = ctx
                .ledger()
                .undo(entry_id)
                .await
                .with_context(|| format!("Failed to undo history entry {}", entry_id))?;
            print_json(&report)
        }
        Command::History { limit, url } => {
            let ledger = ctx.ledger();
            let entries = match url {
                Some(url) => ledger.for_url(&url).await?,
                None => ledger.recent(limit).await?,
            };
            print_json(&entries)
        }
        Command::RecomputeStats => {
            let products = ctx
                .recompute_price_statistics()
                .await
                .context("Failed to recompute price statistics")?;
            println!("{}", products);
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Log deal alerts and anomalies as they are published
async fn log_events(mut rx: broadcast::Receiver<ReconEvent>) {
    loop {
        match rx.recv().await {
            Ok(ReconEvent::DealAlert {
                product_name,
                shop,
                price,
                discount,
                nuclear,
                ..
            }) => {
                info!(
                    product = %product_name,
                    %shop,
                    price,
                    discount = %format!("{:.0}%", discount * 100.0),
                    nuclear,
                    "Deal alert"
                );
            }
            Ok(ReconEvent::AnomalyBlocked { url, price, reference_price, .. }) => {
                warn!(%url, price, reference_price, "Anomaly blocked");
            }
            Ok(event) => tracing::debug!(kind = event.kind(), "Event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event listener lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
