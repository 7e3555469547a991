//! Application entry point for the `parkly-occupancy` service.
//!
//! This binary orchestrates the full startup sequence for the occupancy
//! pipeline, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Opening (or creating) the raw and counts CSV logs
//! - Restoring per-spot counters according to the restore policy
//! - Subscribing to the sensor topic on the broker
//! - Running the single pipeline consumer on a blocking thread
//! - Binding the Axum query service and serving requests
//!
//! # Environment Variables
//! - `BROKER_HOST` (**required**) – pub/sub broker address
//! - `PARKLY_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `PARKLY_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See `config` for the remaining variables.
//!
//! Shutdown (Ctrl-C, SIGTERM, or the subscription ending) stops the feed
//! first, then waits for the pipeline to finish every queued message.
use std::{env, io::IsTerminal, net::SocketAddr};

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tokio::{
    sync::{mpsc, watch},
    task::{AbortHandle, JoinHandle},
};
use tracing::Level;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use parkly::{
    config,
    feed::{self, LinkState},
    journal::CsvJournal,
    pipeline::{self, Pipeline},
    recovery, routes,
};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let mut journal = CsvJournal::open(&cfg.log_path, &cfg.counts_path)
        .context("Failed to initialize log files")?;
    let tracker = recovery::restore(&cfg, &mut journal)?;
    let pipeline = Pipeline::new(tracker, journal);

    let (link_tx, link_rx) = watch::channel(LinkState::Disconnected);
    let feed = feed::subscribe(&cfg, link_tx).await?;

    let (tx, rx) = mpsc::channel(cfg.queue_depth);
    let consumer = tokio::task::spawn_blocking(move || pipeline::drain(pipeline, rx));
    let feed_task = tokio::spawn(feed.forward(tx));
    let feed_abort = feed_task.abort_handle();

    let app = routes::router(routes::QueryState::from_config(&cfg, link_rx));

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(feed_task, feed_abort))
        .await?;

    // The feed task is gone, so the queue sender is dropped; wait for the drain.
    let pipeline = consumer.await.context("Pipeline consumer panicked")?;
    for (spot, state) in pipeline.tracker().spots() {
        tracing::info!(
            spot = %spot,
            usage_count = state.usage_count,
            "Final usage count"
        );
    }

    Ok(())
}

// ---

/// Resolve when the process should stop: a termination signal, or the feed
/// ending on its own. Aborts the feed in the signal case.
async fn shutdown_signal(feed: JoinHandle<Result<()>>, feed_abort: AbortHandle) {
    // ---
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("Cannot install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, shutting down");
            feed_abort.abort();
        }
        _ = terminate => {
            tracing::info!("SIGTERM received, shutting down");
            feed_abort.abort();
        }
        res = feed => match res {
            Ok(Ok(())) => tracing::warn!("Feed stopped, shutting down"),
            Ok(Err(e)) => tracing::error!("Feed failed: {:#}, shutting down", e),
            Err(e) => tracing::error!("Feed task aborted: {}, shutting down", e),
        },
    }
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set. Otherwise `PARKLY_LOG_LEVEL` picks the level for
/// this crate (default `debug`) while the broker client stays at `info`.
/// `PARKLY_SPAN_EVENTS` selects span events (`full`, `enter_exit`, else close
/// only) and `FORCE_COLOR` overrides terminal detection.
fn init_tracing() {
    // ---
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = env::var("PARKLY_LOG_LEVEL")
            .ok()
            .and_then(|v| v.parse::<Level>().ok())
            .unwrap_or(Level::DEBUG);
        EnvFilter::new(format!("{},async_nats=info", level.as_str().to_lowercase()))
    });

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_span_events(span_events_from_env())
        .with_ansi(color_from_env())
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .compact()
        .init();
}

fn span_events_from_env() -> FmtSpan {
    match env::var("PARKLY_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    }
}

fn color_from_env() -> bool {
    match env::var("FORCE_COLOR").map(|v| v.to_ascii_lowercase()).as_deref() {
        Ok("1" | "true" | "yes") => true,
        Ok("0" | "false" | "no") => false,
        _ => std::io::stdout().is_terminal(),
    }
}
