//! Dashboard HTML page handler.
//!
//! Serves a self-contained HTML page with inline CSS showing monitored
//! subjects, pending actions, recent alerts, and service status.

use crate::routes::AppState;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use risk_monitor_types::ActionFilter;
use std::sync::Arc;

pub async fn dashboard(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let monitor = &state.monitor;
    let pools = monitor.monitored_pools().await;
    let wallets = monitor.monitored_wallets().await;
    let pool_lens = monitor.pool_history.lengths().await;
    let wallet_lens = monitor.wallet_history.lengths().await;
    let pending = monitor
        .db
        .list_actions(&ActionFilter {
            status: Some("pending".to_string()),
            ..Default::default()
        })
        .unwrap_or_default();
    let alerts = monitor.db.list_alert_history(20).unwrap_or_default();
    let pending_count = monitor.db.count_pending_actions();
    let user_count = monitor.db.count_users();
    let last_tick = monitor.last_tick_at.lock().await.clone();
    let uptime = state.start_time.elapsed().as_secs();

    let monitoring = if monitor.is_running() {
        "<span class=\"on\">RUNNING</span>"
    } else {
        "<span class=\"off\">STOPPED</span>"
    };

    let mut pool_rows = String::new();
    for p in &pools {
        pool_rows.push_str(&format!(
            "<tr><td class=\"mono\">{}</td><td>{}</td></tr>\n",
            p,
            pool_lens.get(p).unwrap_or(&0)
        ));
    }
    if pool_rows.is_empty() {
        pool_rows = "<tr><td colspan=\"2\">No pools being monitored.</td></tr>".to_string();
    }

    let mut wallet_rows = String::new();
    for w in &wallets {
        wallet_rows.push_str(&format!(
            "<tr><td class=\"mono\">{}</td><td>{}</td></tr>\n",
            w,
            wallet_lens.get(w).unwrap_or(&0)
        ));
    }
    if wallet_rows.is_empty() {
        wallet_rows = "<tr><td colspan=\"2\">No wallets being monitored.</td></tr>".to_string();
    }

    let mut action_rows = String::new();
    for a in &pending {
        action_rows.push_str(&format!(
            "<tr><td>{}</td><td class=\"mono\">{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            a.action_id,
            a.subject_address,
            a.severity,
            a.alert_type,
            escape_html(&a.proposed_action),
            a.created_at
        ));
    }
    if action_rows.is_empty() {
        action_rows = "<tr><td colspan=\"6\">No pending actions.</td></tr>".to_string();
    }

    let mut alert_rows = String::new();
    for a in &alerts {
        let sev_cls = match a.severity {
            risk_monitor_types::Severity::Critical => " class=\"critical\"",
            risk_monitor_types::Severity::High => " class=\"high\"",
            _ => "",
        };
        let channels = match (a.call_initiated, a.telegram_sent) {
            (true, true) => "call + chat",
            (true, false) => "call",
            (false, true) => "chat",
            (false, false) => "-",
        };
        alert_rows.push_str(&format!(
            "<tr{}><td class=\"mono\">{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            sev_cls,
            a.subject_address,
            a.severity,
            a.alert_type,
            escape_html(&a.message),
            channels,
            a.created_at
        ));
    }
    if alert_rows.is_empty() {
        alert_rows = "<tr><td colspan=\"6\">No alerts recorded yet.</td></tr>".to_string();
    }

    let last_tick_str = last_tick.as_deref().unwrap_or("not yet");
    let uptime_str = format_uptime(uptime);

    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Risk Monitor Dashboard</title>
<style>
  * {{ margin: 0; padding: 0; box-sizing: border-box; }}
  body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; background: #0f1117; color: #e0e0e0; padding: 20px; }}
  h1 {{ color: #58a6ff; margin-bottom: 8px; }}
  .meta {{ color: #8b949e; font-size: 0.85em; margin-bottom: 20px; }}
  .meta .on {{ color: #3fb950; font-weight: bold; }}
  .meta .off {{ color: #f85149; font-weight: bold; }}
  .stats {{ display: flex; gap: 16px; margin-bottom: 24px; flex-wrap: wrap; }}
  .stat {{ background: #161b22; border: 1px solid #30363d; border-radius: 8px; padding: 16px 24px; text-align: center; min-width: 120px; }}
  .stat .val {{ display: block; font-size: 2em; font-weight: bold; color: #58a6ff; }}
  .stat .lbl {{ display: block; font-size: 0.85em; color: #8b949e; margin-top: 4px; }}
  table {{ width: 100%; border-collapse: collapse; margin-bottom: 24px; }}
  th {{ background: #161b22; color: #8b949e; text-align: left; padding: 8px 12px; font-size: 0.85em; text-transform: uppercase; border-bottom: 1px solid #30363d; }}
  td {{ padding: 8px 12px; border-bottom: 1px solid #21262d; font-size: 0.9em; }}
  tr:hover {{ background: #161b22; }}
  tr.critical {{ background: #2d0d0d; }}
  tr.critical:hover {{ background: #3d1313; }}
  tr.high {{ background: #2d1b00; }}
  tr.high:hover {{ background: #3d2500; }}
  .mono {{ font-family: 'SF Mono', 'Consolas', monospace; font-size: 0.85em; }}
  h2 {{ color: #c9d1d9; margin-bottom: 12px; font-size: 1.1em; }}
  .section {{ margin-bottom: 28px; }}
</style>
</head>
<body>
  <h1>Risk Monitor</h1>
  <p class="meta">Monitoring: {monitoring} &middot; Uptime: {uptime_str} &middot; Last tick: {last_tick_str} &middot; Poll interval: {poll_interval}s</p>

  <div class="stats">
    <div class="stat"><span class="val">{pool_count}</span><span class="lbl">Pools</span></div>
    <div class="stat"><span class="val">{wallet_count}</span><span class="lbl">Wallets</span></div>
    <div class="stat"><span class="val">{pending_count}</span><span class="lbl">Pending Actions</span></div>
    <div class="stat"><span class="val">{user_count}</span><span class="lbl">Users</span></div>
  </div>

  <div class="section">
    <h2>Monitored Pools</h2>
    <table>
      <thead><tr><th>Address</th><th>History</th></tr></thead>
      <tbody>{pool_rows}</tbody>
    </table>
  </div>

  <div class="section">
    <h2>Monitored Wallets</h2>
    <table>
      <thead><tr><th>Address</th><th>History</th></tr></thead>
      <tbody>{wallet_rows}</tbody>
    </table>
  </div>

  <div class="section">
    <h2>Pending Actions</h2>
    <table>
      <thead><tr><th>ID</th><th>Subject</th><th>Severity</th><th>Type</th><th>Proposed Action</th><th>Created</th></tr></thead>
      <tbody>{action_rows}</tbody>
    </table>
  </div>

  <div class="section">
    <h2>Recent Alerts</h2>
    <table>
      <thead><tr><th>Subject</th><th>Severity</th><th>Type</th><th>Message</th><th>Notified</th><th>Time</th></tr></thead>
      <tbody>{alert_rows}</tbody>
    </table>
  </div>

  <script>
    // Auto-refresh every 30 seconds
    setTimeout(() => location.reload(), 30000);
  </script>
</body>
</html>"#,
        monitoring = monitoring,
        uptime_str = uptime_str,
        last_tick_str = last_tick_str,
        poll_interval = monitor.poll_interval_secs,
        pool_count = pools.len(),
        wallet_count = wallets.len(),
        pending_count = pending_count,
        user_count = user_count,
        pool_rows = pool_rows,
        wallet_rows = wallet_rows,
        action_rows = action_rows,
        alert_rows = alert_rows,
    );

    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], html)
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn format_uptime(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
