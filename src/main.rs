//! Intent Tracker - replays scripted intents through the trackers
//!
//! Registers every intent from `[[replay.intents]]`, follows each watcher with a
//! stage projector and logs the dock as it moves, and logs every relayed
//! settlement event as JSON.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use intent_tracker::config::{LoggingConfig, Settings};
use intent_tracker::watcher::ScriptedSource;
use intent_tracker::{dock, metrics, DisplayState, ProjectionFeed, StagePlan, TrackingSession};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::load()?;

    // Initialize logging
    init_logging(&settings.logging);

    info!("Starting Intent Tracker v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Loaded configuration with {} replay intents",
        settings.replay.intents.len()
    );

    // Script the settlement source
    let source = Arc::new(ScriptedSource::new());
    for intent in &settings.replay.intents {
        source.script(intent.id.clone(), intent.steps.clone());
    }

    let session = TrackingSession::new(&settings.tracker, source);

    // Log settlements as they are relayed
    let settlement_handle = tokio::spawn({
        let mut settlements = session.subscribe_settlements();
        async move {
            loop {
                match settlements.recv().await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(json) => info!(event = event.name(), "{}", json),
                        Err(e) => error!("Failed to encode settlement: {}", e),
                    },
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Settlement log lagged, skipped {} events", skipped);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    });

    let mut followers = Vec::new();
    for intent in &settings.replay.intents {
        let outcome = session.register(intent.id.clone(), intent.descriptor.clone());
        if !outcome.is_registered() {
            warn!("Replay intent {} not registered: {:?}", intent.id, outcome);
            continue;
        }

        let tracker = session.tracker(intent.descriptor.kind());
        match tracker.follow(&intent.id) {
            Some(feed) => followers.push(follow(intent.id.clone(), feed, tracker.plan())),
            None => warn!("No watcher to follow for {}", intent.id),
        }
    }

    info!("Intent Tracker is running");

    // Wait for every intent to settle or for a shutdown signal
    tokio::select! {
        _ = futures::future::join_all(followers) => {
            info!("All replay intents settled");
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping...");
        }
    }

    let dismissed = session.shutdown();
    settlement_handle.abort();
    info!("Dismissed {} intents", dismissed);

    if settings.metrics.enabled {
        match metrics::gather_text() {
            Ok(text) => info!("Final metrics:\n{}", text),
            Err(e) => error!("Failed to gather metrics: {}", e),
        }
    }

    info!("Intent Tracker stopped");
    Ok(())
}

/// Log the dock of one intent until it settles
fn follow(id: String, feed: ProjectionFeed, plan: &'static StagePlan) -> JoinHandle<()> {
    tokio::spawn(async move {
        follow_to_terminal(&id, feed, plan).await;
    })
}

/// Drive a feed until the terminal stage, returning the last display state
///
/// A replay never issues retries, so a failed intent ends the follow too.
async fn follow_to_terminal(
    id: &str,
    mut feed: ProjectionFeed,
    plan: &'static StagePlan,
) -> Option<DisplayState> {
    while let Some((projection, state)) = feed.next().await {
        info!(
            intent = %id,
            stage = state.stage,
            ?projection,
            "{}",
            dock::render(&state, plan)
        );

        if state.is_terminal(plan) {
            if state.has_error {
                warn!(intent = %id, can_retry = state.can_retry, "Intent failed");
            }
            return Some(state);
        }
    }
    None
}

fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
