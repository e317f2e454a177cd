//! Axum route handlers for the risk monitor RPC API.

use crate::telegram::{self, TelegramUpdate};
use crate::worker::{AlertOutcome, Monitor};
use crate::{detect, ai::AlertContext};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use risk_monitor_types::*;
use std::sync::Arc;
use std::time::Instant;

pub struct AppState {
    pub monitor: Arc<Monitor>,
    pub start_time: Instant,
}

fn alert_response(outcome: Option<AlertOutcome>) -> AlertResponse {
    match outcome {
        Some(o) => AlertResponse {
            alert: Some(o.alert),
            ai_summary: Some(o.ai_summary),
            proposed_action: Some(o.decision),
            action_id: o.action_id,
            call_initiated: o.call_initiated,
            telegram_sent: o.telegram_sent,
            ..Default::default()
        },
        None => AlertResponse::default(),
    }
}

// =====================================================
// Pool Endpoints
// =====================================================

// POST /pool/data
pub async fn pool_data(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PoolRequest>,
) -> (StatusCode, Json<RpcResponse<PoolSnapshot>>) {
    let snapshot = state.monitor.chain.get_pool_snapshot(&req.pool_address).await;
    (StatusCode::OK, Json(RpcResponse::ok(snapshot)))
}

// POST /pool/check
pub async fn pool_check(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PoolRequest>,
) -> (StatusCode, Json<RpcResponse<AlertResponse>>) {
    match state.monitor.check_pool(&req.pool_address).await {
        Ok((snapshot, outcome)) => {
            let mut resp = alert_response(outcome);
            resp.pool = Some(snapshot);
            (StatusCode::OK, Json(RpcResponse::ok(resp)))
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RpcResponse::err(format!("Pool check failed: {}", e))),
        ),
    }
}

// POST /pool/monitor/add
pub async fn pool_monitor_add(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PoolRequest>,
) -> (StatusCode, Json<RpcResponse<bool>>) {
    if state.monitor.add_pool(&req.pool_address).await {
        (StatusCode::OK, Json(RpcResponse::ok(true)))
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(RpcResponse::err(format!(
                "Pool {} is already monitored",
                req.pool_address
            ))),
        )
    }
}

// POST /pool/monitor/remove
pub async fn pool_monitor_remove(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PoolRequest>,
) -> (StatusCode, Json<RpcResponse<bool>>) {
    if state.monitor.remove_pool(&req.pool_address).await {
        (StatusCode::OK, Json(RpcResponse::ok(true)))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(RpcResponse::err(format!(
                "Pool {} is not monitored",
                req.pool_address
            ))),
        )
    }
}

// GET /pool/monitored
pub async fn pool_monitored(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<RpcResponse<Vec<String>>>) {
    (
        StatusCode::OK,
        Json(RpcResponse::ok(state.monitor.monitored_pools().await)),
    )
}

// =====================================================
// Wallet Endpoints
// =====================================================

// POST /wallet/analyze
pub async fn wallet_analyze(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WalletRequest>,
) -> (StatusCode, Json<RpcResponse<AlertResponse>>) {
    match state
        .monitor
        .analyze_wallet(&req.wallet_address, req.lp_pool_address.as_deref())
        .await
    {
        Ok((snapshot, outcome)) => {
            let mut resp = alert_response(outcome);
            resp.wallet = Some(snapshot);
            (StatusCode::OK, Json(RpcResponse::ok(resp)))
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RpcResponse::err(format!("Wallet analysis failed: {}", e))),
        ),
    }
}

// POST /wallet/monitor/add
pub async fn wallet_monitor_add(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WalletRequest>,
) -> (StatusCode, Json<RpcResponse<bool>>) {
    if state
        .monitor
        .add_wallet(&req.wallet_address, req.lp_pool_address)
        .await
    {
        (StatusCode::OK, Json(RpcResponse::ok(true)))
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(RpcResponse::err(format!(
                "Wallet {} is already monitored",
                req.wallet_address
            ))),
        )
    }
}

// POST /wallet/monitor/remove
pub async fn wallet_monitor_remove(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WalletRequest>,
) -> (StatusCode, Json<RpcResponse<bool>>) {
    if state.monitor.remove_wallet(&req.wallet_address).await {
        (StatusCode::OK, Json(RpcResponse::ok(true)))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(RpcResponse::err(format!(
                "Wallet {} is not monitored",
                req.wallet_address
            ))),
        )
    }
}

// GET /wallet/monitored
pub async fn wallet_monitored(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<RpcResponse<Vec<String>>>) {
    (
        StatusCode::OK,
        Json(RpcResponse::ok(state.monitor.monitored_wallets().await)),
    )
}

// =====================================================
// User Registration
// =====================================================

// POST /user/register
pub async fn user_register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterUserRequest>,
) -> (StatusCode, Json<RpcResponse<User>>) {
    match state.monitor.db.upsert_user(
        req.telegram_id,
        req.username.as_deref(),
        req.wallet_address.as_deref(),
        req.pool_address.as_deref(),
        req.phone_number.as_deref(),
    ) {
        Ok(user) => {
            // Registered subjects join the monitor automatically
            if let Some(wallet) = &user.wallet_address {
                state
                    .monitor
                    .add_wallet(wallet, user.pool_address.clone())
                    .await;
            }
            if let Some(pool) = &user.pool_address {
                state.monitor.add_pool(pool).await;
            }
            (StatusCode::OK, Json(RpcResponse::ok(user)))
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RpcResponse::err(format!("Failed to register user: {}", e))),
        ),
    }
}

// =====================================================
// Alerts and Actions
// =====================================================

// POST /test-alert
pub async fn test_alert(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TestAlertRequest>,
) -> (StatusCode, Json<RpcResponse<AlertResponse>>) {
    let subject = req
        .pool_address
        .unwrap_or_else(|| "0xtestpool".to_string());
    let alert = detect::generate_fake_alert(&req.alert_type);
    let context = AlertContext {
        subject_address: subject.clone(),
        ..Default::default()
    };
    match state
        .monitor
        .raise_alert(&subject, alert, &context, req.phone_call)
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(RpcResponse::ok(alert_response(Some(outcome)))),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RpcResponse::err(format!("Test alert failed: {}", e))),
        ),
    }
}

// GET /actions/pending
pub async fn actions_pending(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<RpcResponse<Vec<Action>>>) {
    let filter = ActionFilter {
        status: Some("pending".to_string()),
        ..Default::default()
    };
    match state.monitor.db.list_actions(&filter) {
        Ok(actions) => (StatusCode::OK, Json(RpcResponse::ok(actions))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RpcResponse::err(format!("Failed to list actions: {}", e))),
        ),
    }
}

// GET /actions/history
pub async fn actions_history(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<RpcResponse<Vec<Action>>>) {
    let filter = ActionFilter {
        limit: Some(50),
        ..Default::default()
    };
    match state.monitor.db.list_actions(&filter) {
        Ok(actions) => (StatusCode::OK, Json(RpcResponse::ok(actions))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RpcResponse::err(format!("Failed to list actions: {}", e))),
        ),
    }
}

// POST /actions/respond
pub async fn actions_respond(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RespondRequest>,
) -> (StatusCode, Json<RpcResponse<RespondOutcome>>) {
    let response_text = if req.approve { "yes" } else { "no" };
    match state
        .monitor
        .approval
        .respond(req.action_id, req.approve, response_text)
        .await
    {
        Ok(outcome @ RespondOutcome::Resolved { .. }) => {
            (StatusCode::OK, Json(RpcResponse::ok(outcome)))
        }
        Ok(outcome @ RespondOutcome::NotFound { .. }) => {
            (StatusCode::NOT_FOUND, Json(RpcResponse::ok(outcome)))
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RpcResponse::err(format!("Failed to respond: {}", e))),
        ),
    }
}

// =====================================================
// Monitor Control
// =====================================================

// POST /monitor/start
pub async fn monitor_start(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<RpcResponse<String>>) {
    if state.monitor.start() {
        (
            StatusCode::OK,
            Json(RpcResponse::ok("Monitoring started".to_string())),
        )
    } else {
        (
            StatusCode::OK,
            Json(RpcResponse::ok("Monitoring already running".to_string())),
        )
    }
}

// POST /monitor/stop
pub async fn monitor_stop(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<RpcResponse<String>>) {
    if state.monitor.stop() {
        (
            StatusCode::OK,
            Json(RpcResponse::ok("Monitoring stopped".to_string())),
        )
    } else {
        (
            StatusCode::OK,
            Json(RpcResponse::ok("Monitoring was not running".to_string())),
        )
    }
}

// GET /status
pub async fn status(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<RpcResponse<ServiceStatus>>) {
    let monitor = &state.monitor;
    let status = ServiceStatus {
        running: true,
        monitoring: monitor.is_running(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        monitored_pools: monitor.monitored_pools().await,
        monitored_wallets: monitor.monitored_wallets().await,
        pool_history_len: monitor.pool_history.lengths().await,
        wallet_history_len: monitor.wallet_history.lengths().await,
        pending_actions: monitor.db.count_pending_actions(),
        registered_users: monitor.db.count_users(),
        last_tick_at: monitor.last_tick_at.lock().await.clone(),
        poll_interval_secs: monitor.poll_interval_secs,
    };
    (StatusCode::OK, Json(RpcResponse::ok(status)))
}

// =====================================================
// Telegram Webhook
// =====================================================

// POST /telegram/webhook
//
// Accepts both button callbacks and slash-command replies. Always answers
// 200 so Telegram does not re-deliver the update on application errors.
pub async fn telegram_webhook(
    State(state): State<Arc<AppState>>,
    Json(update): Json<TelegramUpdate>,
) -> (StatusCode, Json<RpcResponse<bool>>) {
    if let Some(callback) = &update.callback_query {
        if let Some(reply) = callback
            .data
            .as_deref()
            .and_then(telegram::parse_approval_reply)
        {
            let response_text = if reply.approve { "yes" } else { "no" };
            let ack = match state
                .monitor
                .approval
                .respond(reply.action_id, reply.approve, response_text)
                .await
            {
                Ok(RespondOutcome::Resolved { .. }) => {
                    if reply.approve {
                        "Action approved"
                    } else {
                        "Action rejected"
                    }
                }
                Ok(RespondOutcome::NotFound { .. }) => "Action already resolved",
                Err(e) => {
                    log::error!("[RISK_MONITOR] Webhook respond failed: {}", e);
                    "Something went wrong"
                }
            };
            if let Err(e) = state
                .monitor
                .approval
                .chat()
                .answer_callback(&callback.id, ack)
                .await
            {
                log::warn!("[RISK_MONITOR] answerCallbackQuery failed: {}", e);
            }
        }
        return (StatusCode::OK, Json(RpcResponse::ok(true)));
    }

    if let Some(message) = &update.message {
        if let Some(reply) = message
            .text
            .as_deref()
            .and_then(telegram::parse_approval_reply)
        {
            let response_text = message.text.as_deref().unwrap_or_default();
            if let Err(e) = state
                .monitor
                .approval
                .respond(reply.action_id, reply.approve, response_text)
                .await
            {
                log::error!("[RISK_MONITOR] Webhook respond failed: {}", e);
            }
        }
    }

    (StatusCode::OK, Json(RpcResponse::ok(true)))
}
