use std::env;
use std::net::SocketAddr;
use std::process::ExitCode;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

mod adapters;
mod config;
mod dedup;
mod engine;
mod error;
mod events;
mod handlers;
mod intel;
mod models;
mod prices;
mod resilience;
mod sentiment;
mod server;
mod store;
mod summary;
mod supervisor;

use crate::config::Config;
use crate::handlers::{health, sentiment as sentiment_handlers, stats, transactions};

async fn print_startup_summary(state: &server::AppState) {
    println!("\n{}", "=".repeat(70));
    println!("{:^70}", "🐋 WHALE MONITOR STARTUP 🐋");
    println!("{}\n", "=".repeat(70));

    println!("📡 SOURCE ADAPTERS:");
    for adapter in &state.adapters {
        println!("   🟢 {}", adapter.name());
    }
    if state.adapters.is_empty() {
        println!("   ⚪ none enabled (API-only mode)");
    }

    println!("\n⚖️ THRESHOLDS:");
    println!(
        "   Global minimum:   ${:>12.0}",
        state.config.global_usd_threshold
    );
    println!(
        "   Large trader:     ${:>12.0}",
        state.config.whale.large_trader_usd
    );
    println!("   Whale:            ${:>12.0}", state.config.whale.whale_usd);
    println!(
        "   Mega whale:       ${:>12.0}",
        state.config.whale.mega_whale_usd
    );

    println!("\n🗄️ RETENTION:");
    println!(
        "   Event window:     {}s ({} max entries)",
        state.config.ces_retention_seconds, state.config.ces_max_entries
    );
    println!(
        "   Sentiment window: {}h, tick {}s",
        state.config.sentiment_window_hours, state.config.sentiment_tick_seconds
    );

    println!("\n{}", "=".repeat(70));
    println!("📋 QUICK COMMANDS:");
    println!("   Recent events:  curl localhost:{}/api/transactions", state.config.port);
    println!("   Token stats:    curl localhost:{}/api/stats", state.config.port);
    println!("   Sentiment:      curl localhost:{}/api/sentiment", state.config.port);
    println!("{}\n", "=".repeat(70));
}

fn create_router(state: server::AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/transactions", get(transactions::get_transactions))
        .route("/api/stats", get(stats::get_stats))
        .route("/api/sentiment", get(sentiment_handlers::get_sentiment))
        .route("/api/sentiment/bullish", get(sentiment_handlers::get_bullish))
        .route("/api/sentiment/bearish", get(sentiment_handlers::get_bearish))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(TraceLayer::new_for_http())
}

#[tokio::main]
async fn main() -> ExitCode {
    if dotenvy::dotenv().is_ok() {
        println!("✅ Loaded configuration from .env");
    }

    // Optional rolling file log next to console output.
    let _file_guard = match env::var("WHALE_MONITOR_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "whale-monitor.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "info,whale_monitor=debug".into()),
                )
                .with_writer(writer)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "info,whale_monitor=debug".into()),
                )
                .init();
            None
        }
    };

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Configuration error: {}", e);
            return ExitCode::from(1);
        }
    };
    info!("🔧 Configuration loaded: {}", config.service_name);

    let state = match server::AppState::new(config).await {
        Ok(state) => state,
        Err(e) => {
            eprintln!("❌ Startup failed: {}", e);
            return ExitCode::from(1);
        }
    };

    print_startup_summary(&state).await;

    let port = state.config.port;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let supervisor = state.supervisor.clone();
    let report_state = state.clone();

    let app = create_router(state);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("❌ Could not bind {}: {}", addr, e);
            return ExitCode::from(1);
        }
    };
    info!("✅ Server listening on {}", addr);

    let server_cancel = supervisor.cancel_token();
    let server = tokio::spawn(async move {
        let shutdown = server_cancel.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    });

    // Run until Ctrl-C, or until every adapter has degraded.
    let exit_code = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Interrupt received");
            ExitCode::SUCCESS
        }
        _ = supervisor.wait_all_degraded() => {
            warn!("❌ All source adapters degraded, shutting down");
            ExitCode::from(2)
        }
    };

    supervisor.shutdown().await;
    summary::print_final_report(&report_state).await;

    if let Err(e) = server.await {
        warn!("Server task ended abnormally: {}", e);
    }

    exit_code
}
