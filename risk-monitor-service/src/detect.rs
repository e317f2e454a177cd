//! Anomaly detection over snapshot history.
//!
//! Pure functions: a new snapshot is compared against the stored baseline
//! and at most one alert comes back per subject per cycle. Rule order is
//! load-bearing — the first rule that fires wins, not the most severe.

use risk_monitor_types::{PoolSnapshot, RiskAlert, Severity, WalletSnapshot};
use std::collections::HashMap;

/// Minimum history before pool rules apply.
const POOL_MIN_HISTORY: usize = 10;
/// Baseline window for pool averages.
const POOL_WINDOW: usize = 20;
/// Minimum history before wallet rules apply.
const WALLET_MIN_HISTORY: usize = 2;

/// Compare a fresh pool snapshot against its history.
///
/// TVL-drop is evaluated before reserve imbalance; if both fire only the
/// TVL alert is returned.
pub fn detect_pool_anomalies(
    current: &PoolSnapshot,
    history: &[PoolSnapshot],
) -> Option<RiskAlert> {
    if history.len() < POOL_MIN_HISTORY {
        return None;
    }

    let window_start = history.len().saturating_sub(POOL_WINDOW);
    let window = &history[window_start..];

    let avg_tvl = window.iter().map(|d| d.tvl).sum::<f64>() / window.len() as f64;
    if avg_tvl != 0.0 {
        let tvl_change = ((current.tvl - avg_tvl) / avg_tvl) * 100.0;
        if tvl_change < -20.0 {
            return Some(pool_tvl_alert(Severity::Critical, tvl_change));
        } else if tvl_change < -10.0 {
            return Some(pool_tvl_alert(Severity::High, tvl_change));
        }
    }

    let avg_ratio = window.iter().map(|d| d.ratio).sum::<f64>() / window.len() as f64;
    if avg_ratio != 0.0 {
        let ratio_change = (((current.ratio - avg_ratio) / avg_ratio) * 100.0).abs();
        if ratio_change > 30.0 {
            let mut metrics = HashMap::new();
            metrics.insert("reserveImbalance".to_string(), ratio_change);
            return Some(RiskAlert {
                severity: Severity::High,
                message: format!("Reserve imbalance: {:.1}% deviation", ratio_change),
                metrics,
                alert_type: "pool_imbalance".to_string(),
            });
        }
    }

    None
}

fn pool_tvl_alert(severity: Severity, tvl_change: f64) -> RiskAlert {
    let mut metrics = HashMap::new();
    metrics.insert("tvlChange".to_string(), tvl_change);
    RiskAlert {
        severity,
        message: format!("TVL dropped {:.1}%", tvl_change),
        metrics,
        alert_type: "pool_tvl_drop".to_string(),
    }
}

/// Compare a fresh wallet snapshot against its history.
///
/// Value-drop is checked against the immediately preceding snapshot only.
/// Impermanent-loss checks each current LP position against its prior
/// same-protocol counterpart. A large inflow (value more than doubling the
/// 5-snapshot average) surfaces as a LOW informational alert.
pub fn detect_wallet_risks(
    current: &WalletSnapshot,
    history: &[WalletSnapshot],
) -> Option<RiskAlert> {
    if history.len() < WALLET_MIN_HISTORY {
        return None;
    }

    let prev = history.last()?;

    if prev.total_value_usd != 0.0 {
        let value_change =
            ((current.total_value_usd - prev.total_value_usd) / prev.total_value_usd) * 100.0;
        if value_change < -30.0 {
            return Some(wallet_value_alert(
                Severity::Critical,
                value_change,
                current.total_value_usd,
                true,
            ));
        } else if value_change < -15.0 {
            return Some(wallet_value_alert(
                Severity::High,
                value_change,
                current.total_value_usd,
                false,
            ));
        }
    }

    for pos in &current.positions {
        if pos.position_type != "Liquidity Pool" {
            continue;
        }
        let prev_pos = prev.positions.iter().find(|p| p.protocol == pos.protocol);
        if let Some(prev_pos) = prev_pos {
            if prev_pos.value > 0.0 {
                let pos_change = ((pos.value - prev_pos.value) / prev_pos.value) * 100.0;
                if pos_change < -10.0 {
                    let mut metrics = HashMap::new();
                    metrics.insert("positionChange".to_string(), pos_change);
                    return Some(RiskAlert {
                        severity: Severity::Medium,
                        message: format!(
                            "Impermanent loss risk: {} LP position down {:.1}%",
                            pos.protocol,
                            pos_change.abs()
                        ),
                        metrics,
                        alert_type: "impermanent_loss".to_string(),
                    });
                }
            }
        }
    }

    if history.len() >= 5 {
        let recent = &history[history.len() - 5..];
        let avg_value = recent.iter().map(|h| h.total_value_usd).sum::<f64>() / 5.0;
        if avg_value != 0.0 && current.total_value_usd > avg_value * 2.0 {
            let increase = ((current.total_value_usd - avg_value) / avg_value) * 100.0;
            let mut metrics = HashMap::new();
            metrics.insert("valueIncrease".to_string(), increase);
            return Some(RiskAlert {
                severity: Severity::Low,
                message: format!(
                    "Large inflow detected: portfolio value increased {:.1}%",
                    increase
                ),
                metrics,
                alert_type: "large_inflow".to_string(),
            });
        }
    }

    None
}

fn wallet_value_alert(
    severity: Severity,
    value_change: f64,
    current_value: f64,
    rug_pull: bool,
) -> RiskAlert {
    let mut metrics = HashMap::new();
    metrics.insert("valueChange".to_string(), value_change);
    metrics.insert("currentValue".to_string(), current_value);
    let message = if rug_pull {
        format!(
            "Portfolio value dropped {:.1}%! Potential rug pull",
            value_change.abs()
        )
    } else {
        format!("Portfolio value dropped {:.1}%", value_change.abs())
    };
    RiskAlert {
        severity,
        message,
        metrics,
        alert_type: "wallet_value_drop".to_string(),
    }
}

/// Canned alerts for the /test-alert endpoint.
pub fn generate_fake_alert(alert_type: &str) -> RiskAlert {
    match alert_type {
        "imbalance" => {
            let mut metrics = HashMap::new();
            metrics.insert("reserveImbalance".to_string(), 35.8);
            RiskAlert {
                severity: Severity::High,
                message: "Reserve imbalance: 35.8% deviation".to_string(),
                metrics,
                alert_type: "pool_imbalance".to_string(),
            }
        }
        "rug-pull" => {
            let mut metrics = HashMap::new();
            metrics.insert("valueChange".to_string(), -45.0);
            RiskAlert {
                severity: Severity::Critical,
                message: "Portfolio value dropped 45.0%! Potential rug pull".to_string(),
                metrics,
                alert_type: "wallet_value_drop".to_string(),
            }
        }
        // "tvl-drop" and anything unrecognized
        _ => {
            let mut metrics = HashMap::new();
            metrics.insert("tvlChange".to_string(), -25.3);
            RiskAlert {
                severity: Severity::Critical,
                message: "TVL dropped 25.3%".to_string(),
                metrics,
                alert_type: "pool_tvl_drop".to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(tvl: f64, ratio: f64) -> PoolSnapshot {
        PoolSnapshot {
            pool_address: "0xpool".to_string(),
            reserve0: "0".to_string(),
            reserve1: "0".to_string(),
            tvl,
            ratio,
            timestamp: 0,
        }
    }

    fn wallet(total: f64) -> WalletSnapshot {
        WalletSnapshot {
            address: "0xwallet".to_string(),
            total_value_usd: total,
            native_balance: "0".to_string(),
            tokens: vec![],
            positions: vec![],
            timestamp: 0,
        }
    }

    #[test]
    fn pool_silent_below_min_history() {
        let history: Vec<PoolSnapshot> = (0..9).map(|_| pool(1000.0, 1.0)).collect();
        // A 99% crash still produces nothing with too little history
        assert!(detect_pool_anomalies(&pool(10.0, 1.0), &history).is_none());
    }

    #[test]
    fn pool_tvl_drop_critical_at_25_percent() {
        let history: Vec<PoolSnapshot> = (0..20).map(|_| pool(1000.0, 1.0)).collect();
        let alert = detect_pool_anomalies(&pool(750.0, 1.0), &history).unwrap();
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.alert_type, "pool_tvl_drop");
        assert_eq!(alert.message, "TVL dropped -25.0%");
        let tvl_change = alert.metrics["tvlChange"];
        assert!((tvl_change - (-25.0)).abs() < 1e-9);
    }

    #[test]
    fn pool_tvl_drop_high_between_10_and_20() {
        let history: Vec<PoolSnapshot> = (0..20).map(|_| pool(1000.0, 1.0)).collect();
        let alert = detect_pool_anomalies(&pool(850.0, 1.0), &history).unwrap();
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.alert_type, "pool_tvl_drop");
    }

    #[test]
    fn pool_tvl_drop_precedes_imbalance() {
        let history: Vec<PoolSnapshot> = (0..20).map(|_| pool(1000.0, 1.0)).collect();
        // Both rules would fire; TVL drop is evaluated first
        let alert = detect_pool_anomalies(&pool(700.0, 2.0), &history).unwrap();
        assert_eq!(alert.alert_type, "pool_tvl_drop");
    }

    #[test]
    fn pool_imbalance_fires_alone() {
        let history: Vec<PoolSnapshot> = (0..20).map(|_| pool(1000.0, 1.0)).collect();
        let alert = detect_pool_anomalies(&pool(1000.0, 1.4), &history).unwrap();
        assert_eq!(alert.alert_type, "pool_imbalance");
        assert_eq!(alert.severity, Severity::High);
    }

    #[test]
    fn pool_window_uses_last_twenty() {
        // 30 entries: first 10 at 10000 must not affect the baseline
        let mut history: Vec<PoolSnapshot> = (0..10).map(|_| pool(10000.0, 1.0)).collect();
        history.extend((0..20).map(|_| pool(1000.0, 1.0)));
        let alert = detect_pool_anomalies(&pool(750.0, 1.0), &history).unwrap();
        assert!((alert.metrics["tvlChange"] - (-25.0)).abs() < 1e-9);
    }

    #[test]
    fn pool_zero_average_is_no_signal() {
        let history: Vec<PoolSnapshot> = (0..20).map(|_| pool(0.0, 0.0)).collect();
        assert!(detect_pool_anomalies(&pool(100.0, 1.0), &history).is_none());
    }

    #[test]
    fn wallet_silent_with_one_prior_snapshot() {
        let history = vec![wallet(1000.0)];
        assert!(detect_wallet_risks(&wallet(1.0), &history).is_none());
    }

    #[test]
    fn wallet_value_drop_thresholds() {
        let history = vec![wallet(1000.0), wallet(1000.0)];

        // -40% -> CRITICAL
        let alert = detect_wallet_risks(&wallet(600.0), &history).unwrap();
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.alert_type, "wallet_value_drop");
        assert!((alert.metrics["valueChange"] - (-40.0)).abs() < 1e-9);

        // -35% -> CRITICAL
        let alert = detect_wallet_risks(&wallet(650.0), &history).unwrap();
        assert_eq!(alert.severity, Severity::Critical);

        // -50% -> CRITICAL
        let alert = detect_wallet_risks(&wallet(500.0), &history).unwrap();
        assert_eq!(alert.severity, Severity::Critical);

        // -20% -> HIGH
        let alert = detect_wallet_risks(&wallet(800.0), &history).unwrap();
        assert_eq!(alert.severity, Severity::High);

        // -10% -> nothing
        assert!(detect_wallet_risks(&wallet(900.0), &history).is_none());
    }

    #[test]
    fn wallet_compares_against_last_snapshot_only() {
        // Last snapshot is 500; a current of 450 is only -10% against it
        let history = vec![wallet(1000.0), wallet(500.0)];
        assert!(detect_wallet_risks(&wallet(450.0), &history).is_none());
    }

    #[test]
    fn impermanent_loss_on_lp_position() {
        use risk_monitor_types::PositionData;
        let lp = |value: f64| PositionData {
            protocol: "Ubeswap".to_string(),
            position_type: "Liquidity Pool".to_string(),
            tokens: vec!["CELO".to_string(), "cUSD".to_string()],
            value,
            apy: Some(15.5),
        };

        let mut prev = wallet(1000.0);
        prev.positions.push(lp(200.0));
        let history = vec![wallet(1000.0), prev];

        let mut current = wallet(990.0);
        current.positions.push(lp(170.0));

        let alert = detect_wallet_risks(&current, &history).unwrap();
        assert_eq!(alert.alert_type, "impermanent_loss");
        assert_eq!(alert.severity, Severity::Medium);
    }

    #[test]
    fn value_drop_precedes_impermanent_loss() {
        use risk_monitor_types::PositionData;
        let lp = |value: f64| PositionData {
            protocol: "Ubeswap".to_string(),
            position_type: "Liquidity Pool".to_string(),
            tokens: vec![],
            value,
            apy: None,
        };

        let mut prev = wallet(1000.0);
        prev.positions.push(lp(200.0));
        let history = vec![wallet(1000.0), prev];

        let mut current = wallet(600.0);
        current.positions.push(lp(100.0));

        let alert = detect_wallet_risks(&current, &history).unwrap();
        assert_eq!(alert.alert_type, "wallet_value_drop");
    }

    #[test]
    fn large_inflow_is_low_severity() {
        let history: Vec<WalletSnapshot> = (0..5).map(|_| wallet(1000.0)).collect();
        let alert = detect_wallet_risks(&wallet(2500.0), &history).unwrap();
        assert_eq!(alert.alert_type, "large_inflow");
        assert_eq!(alert.severity, Severity::Low);
    }

    #[test]
    fn wallet_zero_previous_value_is_no_signal() {
        let history = vec![wallet(0.0), wallet(0.0)];
        assert!(detect_wallet_risks(&wallet(100.0), &history).is_none());
    }
}
