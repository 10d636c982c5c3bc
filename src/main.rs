//! Hedge Guardian - Main Entry Point
//!
//! Runs the hedge control loop against paper venues, or prints the ledger
//! status from an existing database.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hedge_guardian::config::Config;
use hedge_guardian::exchange::{PaperVenue, Venue, VenueClient, VenueSet};
use hedge_guardian::ledger::Ledger;
use hedge_guardian::persistence::SqliteLedger;
use hedge_guardian::risk::{AlertBook, CooldownStore};
use hedge_guardian::strategy::{FundingSpreadScanner, HedgeContext, HedgeEngine};
use hedge_guardian::utils::{Clock, SystemClock};
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Hedge Guardian CLI
#[derive(Parser)]
#[command(name = "hedge-guardian")]
#[command(version, about = "Two-venue funding hedge execution and reconciliation")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control loop against paper venues (default)
    Run,

    /// Show active hedges and recent history from the ledger
    Status {
        /// Path to SQLite database
        #[arg(short, long, default_value = "data/hedge_guardian.db")]
        db: String,

        /// Number of archived trades to list
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Some(Commands::Status { db, limit }) => show_status(&db, limit).await,
        Some(Commands::Run) | None => run().await,
    }
}

async fn run() -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        "🛡️  Hedge Guardian starting (paper venues)"
    );

    let config = Config::load()?;
    config.validate()?;
    log_config(&config);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let x10 = Arc::new(paper_venue(Venue::X10, &config, clock.clone()));
    let lighter = Arc::new(paper_venue(Venue::Lighter, &config, clock.clone()));
    let venues = VenueSet::new(x10, lighter);

    if let Some(parent) = Path::new(&config.database_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let ledger = Arc::new(SqliteLedger::with_clock(&config.database_path, clock.clone())?);
    info!(path = %config.database_path, "💾 Ledger opened");

    let cooldowns = Arc::new(CooldownStore::new(clock.clone()));
    let alerts = Arc::new(AlertBook::new(clock.clone()));
    let ctx = HedgeContext::new(venues.clone(), ledger, cooldowns, alerts);

    let scanner = Arc::new(FundingSpreadScanner::new(
        venues,
        config.scan.clone(),
        config.sizing.desired_notional_usd,
    ));
    let engine = HedgeEngine::new(ctx, scanner, &config);

    let open = engine.refresh_open_count().await?;
    info!(open, cap = config.sizing.max_open_trades, "📊 Active hedges loaded");

    match engine.reconcile().await {
        Ok(report) => info!(clean = report.view.is_clean(), "🔍 Startup reconciliation done"),
        Err(e) => warn!(error = %e, "Startup reconciliation failed"),
    }

    let mut scan_tick = tokio::time::interval(Duration::from_secs(config.scan.interval_secs));
    let mut reconcile_tick =
        tokio::time::interval(Duration::from_secs(config.reconciliation.interval_secs));
    let mut pnl_tick = tokio::time::interval(Duration::from_secs(config.scan.pnl_log_interval_secs));
    for tick in [&mut scan_tick, &mut reconcile_tick, &mut pnl_tick] {
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    }
    // Startup reconciliation already ran
    reconcile_tick.tick().await;

    let min_scan_gap = Duration::from_secs(config.scan.min_interval_secs);
    let mut last_scan: Option<Instant> = None;

    info!("🚀 Starting control loop");

    loop {
        tokio::select! {
            _ = scan_tick.tick() => {
                if last_scan.is_some_and(|at| at.elapsed() < min_scan_gap) {
                    continue;
                }
                last_scan = Some(Instant::now());

                match engine.run_scan_cycle().await {
                    Ok(report) => info!(
                        evaluated = report.monitor.evaluated,
                        closed = report.monitor.closed.len(),
                        attempted = report.attempted,
                        opened = report.opened.len(),
                        open = report.open_count,
                        "📡 Scan cycle complete"
                    ),
                    Err(e) => error!(error = %e, "❌ Scan cycle failed"),
                }
            }
            _ = reconcile_tick.tick() => {
                match engine.reconcile().await {
                    Ok(report) if !report.view.is_clean() || report.failures > 0 => warn!(
                        ghost_on_exchange = ?report.view.ghost_on_exchange,
                        ghost_in_ledger = ?report.view.ghost_in_ledger,
                        failures = report.failures,
                        "🔍 Reconciliation found drift"
                    ),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "❌ Reconciliation failed"),
                }
            }
            _ = pnl_tick.tick() => {
                if let Err(e) = engine.log_pnl_status().await {
                    warn!(error = %e, "PnL status unavailable");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Shutdown signal received");
                break;
            }
        }
    }

    let alerts = engine.context().alerts.active();
    if !alerts.is_empty() {
        warn!(count = alerts.len(), "Unacknowledged hedge alerts at shutdown");
        for alert in &alerts {
            warn!(symbol = %alert.symbol, kind = ?alert.kind, message = %alert.message, "Alert");
        }
    }
    info!(open = engine.open_count(), "👋 Hedge Guardian stopped");
    Ok(())
}

/// Build a paper venue seeded with the configured markets.
fn paper_venue(venue: Venue, config: &Config, clock: Arc<dyn Clock>) -> PaperVenue {
    let paper = PaperVenue::new(venue, config.paper.balance_usd, clock);
    paper.set_min_notional(config.paper.min_notional_usd);
    for market in &config.paper.markets {
        let (price, funding) = match venue {
            Venue::X10 => (market.x10_price, market.x10_funding),
            Venue::Lighter => (market.lighter_price, market.lighter_funding),
        };
        paper.set_market(&market.symbol, price, funding);
    }
    info!(
        %venue,
        markets = config.paper.markets.len(),
        balance = %config.paper.balance_usd,
        resting_orders = paper.supports_resting_orders(),
        "Paper venue ready"
    );
    paper
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "hedge-guardian.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("hedge_guardian=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!(
        "   Notional: ${} desired, ${} min, ${} max",
        config.sizing.desired_notional_usd,
        config.sizing.hard_min_notional_usd,
        config.sizing.max_notional_usd
    );
    info!("   Max Open Hedges: {}", config.sizing.max_open_trades);
    info!(
        "   Leg B: {} attempts, {}s timeout",
        config.execution.leg_b_max_attempts, config.execution.order_timeout_secs
    );
    info!(
        "   Cooldowns: {}s leg failure, {}s pause, {}s ledger failure",
        config.cooldown.leg_failure_secs,
        config.cooldown.global_pause_secs,
        config.cooldown.ledger_failure_secs
    );
    info!(
        "   Exit: SL {:.1}% / TP {:.1}% / max hold {}h",
        config.exit.stop_loss_pct * dec!(100),
        config.exit.take_profit_pct * dec!(100),
        config.exit.max_hold_hours
    );
    info!(
        "   Scan: every {}s, min APY {:.1}%, farm mode {}",
        config.scan.interval_secs,
        config.scan.min_apy * dec!(100),
        config.scan.farm_mode
    );
    info!(
        "   Reconciliation: every {}s, grace {}s",
        config.reconciliation.interval_secs, config.reconciliation.grace_window_secs
    );
}

/// Print ledger status from the SQLite database.
async fn show_status(db_path: &str, limit: usize) -> Result<()> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              HEDGE GUARDIAN STATUS                         ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\n❌ Database not found: {}", db_path);
        println!("   The guardian has not been started yet, or the database path is incorrect.");
        return Ok(());
    }

    let ledger = SqliteLedger::new(db_path)?;
    let active = ledger.get_open_trades().await?;
    let history = ledger.history(limit)?;
    let realized = ledger.total_realized_pnl()?;

    println!("\n📊 Summary");
    println!("   ├─ Active Hedges:    {}", active.len());
    println!("   └─ Realized PnL:     ${:.4}", realized);

    if !active.is_empty() {
        println!("\n🔓 Active Hedges");
        for trade in &active {
            println!("   ┌─ {} [{}]", trade.symbol, trade.status);
            println!(
                "   ├─ Long:  {} ${:.2} @ {}",
                trade.long_leg().venue,
                trade.long_leg().filled_notional_usd,
                trade.long_leg().entry_price
            );
            println!(
                "   ├─ Short: {} ${:.2} @ {}",
                trade.short_leg().venue,
                trade.short_leg().filled_notional_usd,
                trade.short_leg().entry_price
            );
            println!("   ├─ Funding Collected: ${:.4}", trade.funding_collected);
            if let Some(reason) = &trade.close_reason {
                println!("   ├─ Note: {}", reason);
            }
            println!("   └─ Opened: {}", trade.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
    }

    if !history.is_empty() {
        println!("\n📜 Recent History");
        for trade in &history {
            println!(
                "   ├─ {} {} | {} | PnL ${:.4}",
                trade.symbol,
                trade.status,
                trade.close_reason.as_deref().unwrap_or("-"),
                trade.realized_pnl.unwrap_or_default()
            );
        }
    }

    println!();
    Ok(())
}
