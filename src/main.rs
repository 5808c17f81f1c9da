use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod api;
mod chat;
mod config;
mod models;
mod parser;
mod persist;
mod reference;
mod tailer;
mod tracker;
mod translate;

use config::Config;
use parser::Session;
use reference::ReferenceIndex;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("wakfulogger=info")),
        )
        .init();

    let config = Config::load();
    let Some(log_path) = resolve_log_path(&config) else {
        error!(
            "no log file to tail: pass a path argument or set log_file in {}",
            config::CONFIG_FILE
        );
        std::process::exit(1);
    };

    // 1. Static reference tables, built once and shared read-only.
    let reference = Arc::new(ReferenceIndex::load_dir(&config.data_dir));

    // 2. The live session: parser state, aggregates, chat, tracker.
    let mut session = Session::new(
        reference,
        config.dedup_cache_size,
        Some(config.data_dir.clone()),
    );
    session.translation = config.translation;
    let session = Arc::new(Mutex::new(session));

    let state = Arc::new(api::AppState::new(
        session.clone(),
        config.auto_reset,
        config.reset_delay_secs,
    ));

    // 3. Background tasks: log tailer, translation drain, idle watchdog.
    tokio::spawn(tailer::run(
        session.clone(),
        log_path,
        Duration::from_millis(config.poll_interval_ms.max(100)),
    ));
    tokio::spawn(translate::run_worker(
        session.clone(),
        config.translation_endpoint.clone(),
    ));
    tokio::spawn(watchdog(state.clone()));

    // 4. JSON surface for the rendering collaborator.
    let app = api::create_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%addr, error = %err, "failed to bind");
            std::process::exit(1);
        }
    };
    info!(%addr, "serving");
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %err, "server error");
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
}

/// CLI argument first, config file second.
fn resolve_log_path(config: &Config) -> Option<PathBuf> {
    if let Some(arg) = std::env::args().nth(1) {
        let path = PathBuf::from(&arg);
        if path.exists() {
            return Some(path);
        }
        error!(%arg, "log file argument does not exist");
    }
    config.log_file.clone()
}

/// Reset the live meter after prolonged combat silence, saving the fight
/// to history first.
async fn watchdog(state: Arc<api::AppState>) {
    let mut interval = tokio::time::interval(Duration::from_millis(500));
    loop {
        interval.tick().await;
        if !state.auto_reset.load(Ordering::Relaxed) {
            continue;
        }
        let delay =
            chrono::Duration::seconds(state.reset_delay_secs.load(Ordering::Relaxed) as i64);
        let mut session = state.session.lock().await;
        if session.auto_reset_due(delay) {
            info!("combat idle, auto-resetting meter");
            session.perform_reset(false);
        }
    }
}
