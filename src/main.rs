//! `ingestd` — CLI entry point for the equities/options ingestion pipeline.
//! See `spec.md` §6 "CLI commands".

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use ingest_core::config::Config;
use ingest_core::coordinator::Coordinator;
use ingest_core::engine::{stock_backfill, streaming};
use ingest_core::error::IngestError;
use ingest_core::report::IngestRunReport;
use ingest_core::vendor::{EquityBarsClient, OptionsWebSocketClient};
use owo_colors::OwoColorize;
use std::collections::HashSet;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Parser)]
#[command(name = "ingestd", about = "US equities & options market-data ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backfill one or all tickers: `backfill`, `backfill <ticker>`,
    /// `backfill <ticker> <date>`, or `backfill <date>`.
    Backfill {
        #[arg(value_name = "TICKER_OR_DATE")]
        args: Vec<String>,
    },
    /// Start the real-time poller and streaming trade engine; traps
    /// SIGINT/SIGTERM for graceful shutdown.
    Ingest,
    /// Destructive: drop known tables and re-run the schema.
    Reset,
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap()))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let exit_code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{} {e:#}", "fatal:".red().bold());
            1
        }
    };
    std::process::exit(exit_code);
}

async fn run() -> Result<()> {
    let cfg = Config::from_env()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Backfill { args } => run_backfill(cfg, args).await,
        Commands::Ingest => run_ingest(cfg).await,
        Commands::Reset => run_reset(cfg).await,
    }
}

async fn run_backfill(cfg: Config, args: Vec<String>) -> Result<()> {
    let coordinator = Coordinator::new(cfg);

    let report = tokio::select! {
        result = collect_backfill_report(&coordinator, &args) => result?,
        _ = wait_for_shutdown_signal() => {
            info!("shutdown signal received, cancelling backfill");
            return Err(IngestError::Cancelled.into());
        }
    };

    print_report(&report);
    if !report.failed_tickers().is_empty() {
        bail!("{} ticker(s) failed during backfill", report.failed_tickers().len());
    }
    Ok(())
}

async fn collect_backfill_report(coordinator: &Coordinator, args: &[String]) -> Result<IngestRunReport> {
    let report = match args {
        [] => coordinator.backfill_all().await,
        [single] => match parse_date(single) {
            Some(date) => coordinator.backfill_all_to_date(date).await,
            None => {
                let report = coordinator.backfill_ticker_to_date(single, Utc::now()).await;
                IngestRunReport { tickers: vec![report], duration: std::time::Duration::default() }
            }
        },
        [ticker, date] => {
            let Some(date) = parse_date(date) else {
                bail!("expected a YYYY-MM-DD date, got {date:?}");
            };
            let report = coordinator.backfill_ticker_to_date(ticker, date).await;
            IngestRunReport { tickers: vec![report], duration: std::time::Duration::default() }
        }
        _ => bail!("backfill takes at most a ticker and a date"),
    };
    Ok(report)
}

fn print_report(report: &IngestRunReport) {
    for t in &report.tickers {
        match &t.error {
            None => println!(
                "{} {} stock={} contracts={} trades={} quotes={}",
                "ok".green().bold(),
                t.ticker,
                t.stock_rows_written,
                t.option_contracts_written,
                t.option_trades_written,
                t.option_quotes_written,
            ),
            Some(e) => println!("{} {} {e}", "failed".red().bold(), t.ticker),
        }
    }
    println!(
        "{} {} rows written in {}",
        "done".cyan().bold(),
        report.total_rows_written(),
        report.duration_string(),
    );
}

async fn run_ingest(cfg: Config) -> Result<()> {
    let coordinator = Coordinator::new(cfg.clone());
    coordinator.gateway().connect().await?;
    coordinator.gateway().run_schema().await?;

    let equity = EquityBarsClient::new(cfg.polygon_base_url.clone(), cfg.polygon_api_key.clone());
    let ws_client = OptionsWebSocketClient::new(cfg.polygon_ws_url.clone(), cfg.polygon_api_key.clone());

    let tickers: HashSet<String> = cfg.tickers.iter().cloned().collect();
    let trades_table = ingest_core::dates::table_name("option_trades", cfg.test_mode);
    let stock_table = ingest_core::dates::table_name("stock_aggregates", cfg.test_mode);
    let sync_state_table = ingest_core::dates::table_name("sync_state", cfg.test_mode);

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    let streaming_gw_url = cfg.store_base_url();
    let streaming_handle = tokio::spawn({
        let threshold = cfg.option_trade_value_threshold;
        async move {
            let gw = ingest_core::store::Gateway::new(streaming_gw_url);
            let _ = gw.connect().await;
            streaming::run_streaming_engine(&gw, ws_client, tickers, threshold, &trades_table, shutdown_rx).await;
        }
    });

    let poller_gw = ingest_core::store::Gateway::new(cfg.store_base_url());
    poller_gw.connect().await?;
    let poller_tickers = cfg.tickers.clone();
    let mut poll_interval = tokio::time::interval(std::time::Duration::from_secs(10));
    let poller_handle = tokio::spawn(async move {
        loop {
            poll_interval.tick().await;
            for ticker in &poller_tickers {
                stock_backfill::poll_latest_bar(&poller_gw, &equity, ticker, &stock_table, &sync_state_table).await;
            }
        }
    });

    info!("ingest running, press ctrl-c to stop");
    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping streaming engine");

    let _ = shutdown_tx.send(()).await;
    let _ = streaming_handle.await;
    poller_handle.abort();

    coordinator.gateway().disconnect();
    println!("{}", "ingest stopped cleanly".green().bold());
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

async fn run_reset(cfg: Config) -> Result<()> {
    let coordinator = Coordinator::new(cfg);
    coordinator.gateway().connect().await?;
    coordinator.gateway().reset().await?;
    println!("{}", "store reset".yellow().bold());
    Ok(())
}
