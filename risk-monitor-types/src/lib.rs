//! Shared types for the risk monitor service and its RPC clients.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// =====================================================
// Severity
// =====================================================

/// Alert severity, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(format!("Unknown severity: {}", other)),
        }
    }
}

// =====================================================
// Snapshots
// =====================================================

/// Point-in-time reading of a liquidity pool's reserves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub pool_address: String,
    pub reserve0: String,
    pub reserve1: String,
    pub tvl: f64,
    pub ratio: f64,
    /// Capture time, unix milliseconds
    pub timestamp: i64,
}

/// A single token holding within a wallet snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBalance {
    pub token: String,
    pub symbol: String,
    pub balance: String,
    pub value_usd: f64,
}

/// A protocol position (e.g. an LP stake) within a wallet snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionData {
    pub protocol: String,
    pub position_type: String,
    pub tokens: Vec<String>,
    pub value: f64,
    pub apy: Option<f64>,
}

/// Point-in-time reading of a wallet's portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub address: String,
    pub total_value_usd: f64,
    pub native_balance: String,
    pub tokens: Vec<TokenBalance>,
    pub positions: Vec<PositionData>,
    /// Capture time, unix milliseconds
    pub timestamp: i64,
}

// =====================================================
// Alerts & Decisions
// =====================================================

/// A detected anomaly. Derived, never stored on its own — always attached
/// to an action or an alert-history row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAlert {
    pub severity: Severity,
    pub message: String,
    pub metrics: HashMap<String, f64>,
    pub alert_type: String,
}

/// A structured remediation proposal from the decision engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDecision {
    pub action: String,
    pub reasoning: String,
    pub urgency: String,
    pub risk_if_ignored: String,
}

// =====================================================
// Actions (approval records)
// =====================================================

/// Lifecycle state of a persisted action.
/// `pending -> approved -> executed`, or `pending -> rejected` (terminal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Approved,
    Rejected,
    Executed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Approved => "approved",
            ActionStatus::Rejected => "rejected",
            ActionStatus::Executed => "executed",
        }
    }
}

impl std::str::FromStr for ActionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ActionStatus::Pending),
            "approved" => Ok(ActionStatus::Approved),
            "rejected" => Ok(ActionStatus::Rejected),
            "executed" => Ok(ActionStatus::Executed),
            other => Err(format!("Unknown action status: {}", other)),
        }
    }
}

/// A persisted, approvable remediation proposal tied to one alert.
/// Forms an audit trail; rows are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub action_id: i64,
    pub user_id: i64,
    pub subject_address: String,
    pub alert_type: String,
    pub severity: Severity,
    pub alert_message: String,
    pub metrics_json: Option<String>,
    pub proposed_action: String,
    pub reasoning: String,
    pub urgency: String,
    pub risk_if_ignored: String,
    pub ai_summary: Option<String>,
    pub status: ActionStatus,
    pub user_response: Option<String>,
    pub telegram_message_id: Option<i64>,
    pub created_at: String,
    pub responded_at: Option<String>,
    pub executed_at: Option<String>,
}

// =====================================================
// Users (owner registrations)
// =====================================================

/// A registered owner: the chat/phone identity that receives and approves
/// actions for its linked subjects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: i64,
    pub telegram_id: i64,
    pub username: Option<String>,
    pub wallet_address: Option<String>,
    pub pool_address: Option<String>,
    pub phone_number: Option<String>,
    pub created_at: String,
    pub last_active: String,
}

// =====================================================
// Alert history
// =====================================================

/// One row of the alert audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub alert_id: i64,
    pub user_id: Option<i64>,
    pub subject_address: String,
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    pub metrics_json: Option<String>,
    pub ai_summary: Option<String>,
    pub call_initiated: bool,
    pub telegram_sent: bool,
    pub created_at: String,
}

// =====================================================
// RPC Request Types
// =====================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct PoolRequest {
    pub pool_address: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WalletRequest {
    pub wallet_address: String,
    pub lp_pool_address: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterUserRequest {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub wallet_address: Option<String>,
    pub pool_address: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TestAlertRequest {
    pub alert_type: String,
    #[serde(default = "default_true")]
    pub phone_call: bool,
    pub pool_address: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RespondRequest {
    pub action_id: i64,
    pub approve: bool,
    pub telegram_id: Option<i64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ActionFilter {
    pub user_id: Option<i64>,
    pub subject_address: Option<String>,
    pub status: Option<String>,
    pub limit: Option<usize>,
}

// =====================================================
// RPC Response Types
// =====================================================

/// Outcome of running the alert pipeline once for a subject.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AlertResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet: Option<WalletSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<RiskAlert>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposed_action: Option<ActionDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_id: Option<i64>,
    pub call_initiated: bool,
    pub telegram_sent: bool,
}

/// Result of responding to a pending action.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RespondOutcome {
    Resolved { action: Action },
    NotFound { action_id: i64 },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub monitoring: bool,
    pub uptime_secs: u64,
    pub monitored_pools: Vec<String>,
    pub monitored_wallets: Vec<String>,
    pub pool_history_len: HashMap<String, usize>,
    pub wallet_history_len: HashMap<String, usize>,
    pub pending_actions: i64,
    pub registered_users: i64,
    pub last_tick_at: Option<String>,
    pub poll_interval_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> RpcResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn severity_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&Severity::Critical).unwrap(),
            "\"CRITICAL\""
        );
        let s: Severity = serde_json::from_str("\"HIGH\"").unwrap();
        assert_eq!(s, Severity::High);
    }

    #[test]
    fn action_status_round_trip() {
        for status in [
            ActionStatus::Pending,
            ActionStatus::Approved,
            ActionStatus::Rejected,
            ActionStatus::Executed,
        ] {
            let parsed: ActionStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("done".parse::<ActionStatus>().is_err());
    }
}
