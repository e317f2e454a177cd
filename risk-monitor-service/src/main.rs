//! Risk Monitor Service — standalone binary for DeFi pool and wallet
//! risk monitoring with AI-assisted decisions and dual-channel alerts.
//!
//! Hosts both an RPC API and a dashboard UI on the same port.
//! Default: http://127.0.0.1:9110/

mod ai;
mod approval;
mod chain;
mod dashboard;
mod db;
mod detect;
mod history;
mod routes;
mod telegram;
mod voice;
mod worker;

use routes::AppState;
use std::sync::Arc;
use std::time::Instant;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    let port: u16 = std::env::var("RISK_MONITOR_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9110);

    let db_path = std::env::var("RISK_MONITOR_DB_PATH")
        .unwrap_or_else(|_| "./risk_monitor.db".to_string());

    let poll_interval_secs: u64 = std::env::var("MONITOR_POLL_INTERVAL")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(worker::DEFAULT_POLL_INTERVAL_SECS);

    let rpc_url = std::env::var("CELO_RPC_URL")
        .unwrap_or_else(|_| "https://forno.celo.org".to_string());

    let mock_mode = std::env::var("MOCK_MODE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if mock_mode {
        log::warn!("[RISK_MONITOR] MOCK_MODE enabled — chain data is simulated");
    }

    log::info!("Opening database at: {}", db_path);
    let database = Arc::new(db::Db::open(&db_path).expect("Failed to open database"));

    let chat = Arc::new(telegram::ChatClient::from_env());
    let approval = Arc::new(approval::ApprovalWorkflow::new(database.clone(), chat));

    let monitor = Arc::new(worker::Monitor::new(
        database,
        chain::ChainClient::new(rpc_url, mock_mode),
        ai::AiClient::from_env(),
        voice::VoiceClient::from_env(),
        approval,
        poll_interval_secs,
    ));

    // The loop is armed at startup; /monitor/stop pauses it.
    monitor.start();

    let state = Arc::new(AppState {
        monitor,
        start_time: Instant::now(),
    });

    let cors = tower_http::cors::CorsLayer::permissive();

    let app = axum::Router::new()
        .route("/", axum::routing::get(dashboard::dashboard))
        // Pools
        .route("/pool/data", axum::routing::post(routes::pool_data))
        .route("/pool/check", axum::routing::post(routes::pool_check))
        .route(
            "/pool/monitor/add",
            axum::routing::post(routes::pool_monitor_add),
        )
        .route(
            "/pool/monitor/remove",
            axum::routing::post(routes::pool_monitor_remove),
        )
        .route("/pool/monitored", axum::routing::get(routes::pool_monitored))
        // Wallets
        .route("/wallet/analyze", axum::routing::post(routes::wallet_analyze))
        .route(
            "/wallet/monitor/add",
            axum::routing::post(routes::wallet_monitor_add),
        )
        .route(
            "/wallet/monitor/remove",
            axum::routing::post(routes::wallet_monitor_remove),
        )
        .route(
            "/wallet/monitored",
            axum::routing::get(routes::wallet_monitored),
        )
        // Users
        .route("/user/register", axum::routing::post(routes::user_register))
        // Alerts and actions
        .route("/test-alert", axum::routing::post(routes::test_alert))
        .route(
            "/actions/pending",
            axum::routing::get(routes::actions_pending),
        )
        .route(
            "/actions/history",
            axum::routing::get(routes::actions_history),
        )
        .route(
            "/actions/respond",
            axum::routing::post(routes::actions_respond),
        )
        // Monitor control
        .route("/monitor/start", axum::routing::post(routes::monitor_start))
        .route("/monitor/stop", axum::routing::post(routes::monitor_stop))
        .route("/status", axum::routing::get(routes::status))
        // Telegram inbound
        .route(
            "/telegram/webhook",
            axum::routing::post(routes::telegram_webhook),
        )
        .layer(cors)
        .with_state(state);

    let addr = format!("0.0.0.0:{}", port);
    log::info!("Risk Monitor Service listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind port");
    axum::serve(listener, app).await.expect("Server error");
}
