use chrono::Utc;
use clap::{Parser, Subcommand};
use papertrader::audit::{AuditLog, AUDIT_FILE};
use papertrader::broker::{BrokerAdapter, PaperBroker};
use papertrader::config::Settings;
use papertrader::execution::ExecutionEngine;
use papertrader::orchestrator::Orchestrator;
use papertrader::risk::consensus::ConsensusService;
use papertrader::risk::{HttpConsensus, RiskGate};
use papertrader::scan::ReportDirSource;
use papertrader::scheduler::{next_check_delay, should_run_now};
use papertrader::store::PositionStore;
use std::path::PathBuf;
use std::sync::Arc;

/// Market snapshot the paper broker trades against, kept current by the
/// scanner side of the tool
const MARKET_SNAPSHOT_FILE: &str = "market.json";

#[derive(Parser)]
#[command(name = "papertrader", about = "Automated paper-trading position manager")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "papertrader.toml")]
    config: PathBuf,

    /// Plan and gate orders but never submit them
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler loop until interrupted (default)
    Run,
    /// Run exactly one cycle now, ignoring the schedule window
    Cycle,
    /// Print the position ledger
    Positions,
    /// Flag an open position to be closed on the next cycle
    Close { symbol: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let mut settings = Settings::load(&cli.config)?;
    if cli.dry_run {
        settings.engine.dry_run = true;
    }

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_loop(settings).await,
        Command::Cycle => run_once(settings).await,
        Command::Positions => print_positions(&settings),
        Command::Close { symbol } => request_close(&settings, &symbol),
    }
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "papertrader=info".to_string()),
        )
        .init();
}

fn build_orchestrator(settings: &Settings) -> anyhow::Result<Orchestrator> {
    let store = PositionStore::open(&settings.engine.data_dir)?;

    let snapshot = settings.engine.data_dir.join(MARKET_SNAPSHOT_FILE);
    let broker: Arc<dyn BrokerAdapter> = if snapshot.exists() {
        Arc::new(PaperBroker::from_snapshot(&snapshot)?)
    } else {
        tracing::warn!(
            "No market snapshot at {}, starting with an empty quote table",
            snapshot.display()
        );
        Arc::new(PaperBroker::new())
    };

    let scan = Arc::new(ReportDirSource::new(settings.engine.reports_dir.clone()));

    let consensus: Option<Arc<dyn ConsensusService>> =
        match (&settings.engine.consensus_url, settings.engine.pre_trade_ai_check_enabled) {
            (Some(url), true) => Some(Arc::new(HttpConsensus::new(
                url.clone(),
                settings.engine.consensus_timeout_sec,
            )?)),
            _ => None,
        };
    let gate = RiskGate::new(&settings.engine, consensus);

    let engine = ExecutionEngine::new(
        broker.clone(),
        settings.engine.broker_max_retries,
        settings.engine.dry_run,
    );
    let audit = AuditLog::new(settings.engine.data_dir.join(AUDIT_FILE));

    Ok(Orchestrator::new(
        settings.clone(),
        store,
        broker,
        scan,
        gate,
        engine,
        audit,
    ))
}

async fn run_loop(settings: Settings) -> anyhow::Result<()> {
    tracing::info!("🚀 Paper trader starting ({} sleeves)", settings.sleeves.len());
    if settings.engine.dry_run {
        tracing::info!("Dry run: orders will be planned and gated but never submitted");
    }

    let mut last_run = PositionStore::open(&settings.engine.data_dir)?
        .load_state()?
        .last_run;
    let orchestrator = build_orchestrator(&settings)?;

    loop {
        let now = Utc::now();
        if should_run_now(now, last_run, &settings.schedule) {
            match orchestrator.run_cycle(now).await {
                Ok(report) => {
                    last_run = Some(now);
                    tracing::debug!("Cycle {} complete", report.cycle_id);
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!("Fatal: {}", e);
                    return Err(e.into());
                }
                Err(e) => tracing::error!("Cycle failed, will retry on next tick: {}", e),
            }
        }

        let delay = next_check_delay(Utc::now(), &settings.schedule);
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("⚠️  Received Ctrl+C, shutting down...");
                break;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }

    tracing::info!("👋 Paper trader stopped");
    Ok(())
}

async fn run_once(settings: Settings) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(&settings)?;
    let report = orchestrator.run_cycle(Utc::now()).await?;
    tracing::info!(
        "Cycle {}: {} fills, {} skips, {} aborts",
        report.cycle_id,
        report.fills,
        report.skips,
        report.aborts
    );
    Ok(())
}

fn print_positions(settings: &Settings) -> anyhow::Result<()> {
    let store = PositionStore::open(&settings.engine.data_dir)?;
    let positions = store.load()?;
    if positions.is_empty() {
        println!("No positions");
        return Ok(());
    }
    for p in &positions {
        match p.close_price {
            Some(close_price) => println!(
                "{}  {:<6} x{:<5} in ${:.2} out ${:.2} ({})",
                p.entry_trading_day,
                p.symbol,
                p.quantity,
                p.entry_price,
                close_price,
                p.close_reason
                    .map(|r| format!("{:?}", r))
                    .unwrap_or_else(|| "Closed".to_string()),
            ),
            None => println!(
                "{}  {:<6} x{:<5} in ${:.2} OPEN (stop {:.1}%, target {:.1}%, max {}d)",
                p.entry_trading_day,
                p.symbol,
                p.quantity,
                p.entry_price,
                p.stop_pct,
                p.target_pct,
                p.max_hold_days,
            ),
        }
    }
    Ok(())
}

fn request_close(settings: &Settings, symbol: &str) -> anyhow::Result<()> {
    let store = PositionStore::open(&settings.engine.data_dir)?;
    let mut positions = store.load()?;
    let symbol = symbol.to_uppercase();

    let mut flagged = 0;
    for p in positions
        .iter_mut()
        .filter(|p| p.is_open() && p.symbol == symbol)
    {
        p.manual_close_requested = true;
        flagged += 1;
    }
    if flagged == 0 {
        anyhow::bail!("no open position in {}", symbol);
    }
    store.save(&positions)?;
    tracing::info!("Flagged {} position(s) in {} for close on next cycle", flagged, symbol);
    Ok(())
}
