// =============================================================================
// Scanner Worker — Main Entry Point
// =============================================================================
//
// Boots one partition worker: connects to the bus, rehydrates its owned
// symbols from historical storage, then spawns the tick/bar/indicator
// consumers, the scan loop, the rule refresher, the cooldown sweeper, and the
// HTTP server, all wired to a shared shutdown signal.
// =============================================================================

mod alert;
mod app_state;
mod bus;
mod consumers;
mod cooldown;
mod errors;
mod metrics;
mod partitioner;
mod rehydrate;
mod rules;
mod runtime_config;
mod scan;
mod state;
mod types;

mod api;

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::{ConsumerHealth, ScannerState};
use crate::bus::redis_bus::{RedisBarStore, RedisBus, RedisRuleStore};
use crate::consumers::decode::ProviderFlavor;
use crate::consumers::{BarConsumer, Consumer, IndicatorConsumer, TickConsumer};
use crate::cooldown::CooldownTracker;
use crate::partitioner::Partitioner;
use crate::rehydrate::Rehydrator;
use crate::runtime_config::RuntimeConfig;
use crate::scan::ScanEngine;
use crate::state::SymbolStateStore;

const CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("scanner worker starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load runtime config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();
    config.validate()?;

    info!(
        worker_id = config.worker.id,
        worker_total = config.worker.total,
        symbols = ?config.symbols,
        "runtime config resolved"
    );

    let metrics_handle = metrics::install();

    let bus = RedisBus::connect(&config.redis_url).await?;
    let rule_store = Arc::new(RedisRuleStore::new(bus.clone(), "scanner:rules".to_string()));
    let bar_store = Arc::new(RedisBarStore::new(bus.clone(), "scanner:bars:".to_string()));
    let bus: Arc<bus::redis_bus::RedisBus> = Arc::new(bus);

    let state_store = Arc::new(SymbolStateStore::new(config.state.max_final_bars));
    let partitioner = Arc::new(Partitioner::new(config.worker.id, config.worker.total));
    let cooldown = Arc::new(CooldownTracker::new());
    let alerts = Arc::new(crate::alert::AlertEmitter::new(
        bus.clone(),
        config
            .alerts
            .stream
            .as_ref()
            .map(|_| bus.clone() as Arc<dyn crate::bus::DurableStream>),
        config.alerts.channel.clone(),
        config.alerts.stream.clone(),
    ));

    let scan_engine = Arc::new(ScanEngine::new(
        state_store.clone(),
        cooldown.clone(),
        alerts.clone(),
        rule_store,
        config.scan.max_time(),
    ));
    scan_engine.reload_rules().await.unwrap_or_else(|e| {
        warn!(error = %e, "initial rule load failed, starting with an empty ruleset");
        0
    });

    let scanner_state = Arc::new(ScannerState {
        config: config.clone(),
        state_store: state_store.clone(),
        partitioner: partitioner.clone(),
        cooldown: cooldown.clone(),
        alerts: alerts.clone(),
        scan_engine: scan_engine.clone(),
        metrics_handle,
        start_time: Instant::now(),
        tick_consumer_health: ConsumerHealth::new(),
        bar_consumer_health: ConsumerHealth::new(),
        indicator_consumer_health: ConsumerHealth::new(),
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // ── Rehydration ───────────────────────────────────────────────────────
    let rehydrator = Rehydrator::new(
        bar_store,
        bus.clone(),
        state_store.clone(),
        partitioner.clone(),
        config.indicator.prefix.clone(),
        config.rehydration.max_bars,
    );
    rehydrator
        .run(&config.symbols, config.rehydration.deadline())
        .await;
    info!(
        symbols = state_store.len(),
        ready = scanner_state.is_ready(),
        "rehydration pass complete"
    );

    let mut tasks = Vec::new();

    // ── Tick consumer ───────────────────────────────────────────────────
    {
        let consumer = TickConsumer {
            bus: bus.clone(),
            store: state_store.clone(),
            partitioner: partitioner.clone(),
            stream: "ticks".to_string(),
            group: "scanner-workers".to_string(),
            batch_size: config.consumer.batch_size,
            ack_timeout: config.consumer.ack_timeout(),
            flavor: ProviderFlavor::Canonical,
            healthy: scanner_state.tick_consumer_health.healthy.clone(),
            processed: scanner_state.tick_consumer_health.processed.clone(),
            failed: scanner_state.tick_consumer_health.failed.clone(),
        };
        let cancel = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = consumer.run(cancel).await {
                error!(error = %e, "tick consumer exited with error");
            }
        }));
    }

    // ── Bar consumer ────────────────────────────────────────────────────
    {
        let consumer = BarConsumer {
            bus: bus.clone(),
            store: state_store.clone(),
            partitioner: partitioner.clone(),
            stream: "bars.finalized".to_string(),
            group: "scanner-workers".to_string(),
            batch_size: config.consumer.batch_size,
            ack_timeout: config.consumer.ack_timeout(),
            flavor: ProviderFlavor::Canonical,
            healthy: scanner_state.bar_consumer_health.healthy.clone(),
            processed: scanner_state.bar_consumer_health.processed.clone(),
            failed: scanner_state.bar_consumer_health.failed.clone(),
        };
        let cancel = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = consumer.run(cancel).await {
                error!(error = %e, "bar consumer exited with error");
            }
        }));
    }

    // ── Indicator consumer ──────────────────────────────────────────────
    {
        let consumer = IndicatorConsumer {
            pubsub: bus.clone(),
            kv: bus.clone(),
            store: state_store.clone(),
            partitioner: partitioner.clone(),
            channel: "indicators.updated".to_string(),
            prefix: config.indicator.prefix.clone(),
            healthy: scanner_state.indicator_consumer_health.healthy.clone(),
            processed: scanner_state.indicator_consumer_health.processed.clone(),
            failed: scanner_state.indicator_consumer_health.failed.clone(),
        };
        let cancel = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = consumer.run(cancel).await {
                error!(error = %e, "indicator consumer exited with error");
            }
        }));
    }

    // ── Scan loop ───────────────────────────────────────────────────────
    {
        let engine = scan_engine.clone();
        let interval = config.scan.interval();
        let cancel = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            engine.run_scan_loop(interval, cancel).await;
        }));
    }

    // ── Rule refresh loop ───────────────────────────────────────────────
    {
        let engine = scan_engine.clone();
        let interval = config.scan.rule_reload_interval();
        let cancel = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            engine.run_rule_refresh_loop(interval, cancel).await;
        }));
    }

    // ── Cooldown sweeper ────────────────────────────────────────────────
    {
        let tracker = cooldown.clone();
        let interval = config.cooldown.sweep_interval();
        let cancel = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            crate::cooldown::run_sweeper(tracker, interval, cancel).await;
        }));
    }

    // ── HTTP server ─────────────────────────────────────────────────────
    {
        let http_state = scanner_state.clone();
        let bind_addr = config.bind_addr.clone();
        tasks.push(tokio::spawn(async move {
            let app = api::rest::router(http_state);
            let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!(addr = %bind_addr, error = %e, "failed to bind HTTP server");
                    return;
                }
            };
            info!(addr = %bind_addr, "HTTP server listening");
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "HTTP server exited with error");
            }
        }));
    }

    info!("all subsystems running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping gracefully");
    let _ = shutdown_tx.send(true);

    let grace = tokio::time::Duration::from_secs(10);
    let shutdown_all = futures_util::future::join_all(tasks);
    if tokio::time::timeout(grace, shutdown_all).await.is_err() {
        warn!("shutdown grace period elapsed before all tasks exited");
    }

    if let Err(e) = config.save(CONFIG_PATH) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("scanner worker shut down complete");
    Ok(())
}
