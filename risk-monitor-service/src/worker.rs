//! Background monitor loop.
//!
//! Owns the monitored-subject registries and runs the full alert pipeline
//! on a fixed interval: fetch snapshot, detect against history, and on an
//! alert drive the AI decision, approval workflow, voice call, and audit
//! record. Manual check/analyze requests run the same pipeline once
//! through the shared `Monitor`, so history mutations stay serialized.

use crate::ai::{AiClient, AlertContext};
use crate::approval::ApprovalWorkflow;
use crate::chain::ChainClient;
use crate::db::Db;
use crate::detect;
use crate::history::{self, HistoryStore};
use crate::voice::VoiceClient;
use risk_monitor_types::{
    ActionDecision, PoolSnapshot, RiskAlert, User, WalletSnapshot,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Everything the pipeline produced for one fired alert.
pub struct AlertOutcome {
    pub alert: RiskAlert,
    pub ai_summary: String,
    pub decision: ActionDecision,
    pub action_id: Option<i64>,
    pub call_initiated: bool,
    pub telegram_sent: bool,
}

pub struct Monitor {
    pub db: Arc<Db>,
    pub chain: ChainClient,
    pub ai: AiClient,
    pub voice: VoiceClient,
    pub approval: Arc<ApprovalWorkflow>,
    pub pool_history: HistoryStore<PoolSnapshot>,
    pub wallet_history: HistoryStore<WalletSnapshot>,
    monitored_pools: Mutex<HashSet<String>>,
    /// wallet address -> optional linked LP pool
    monitored_wallets: Mutex<HashMap<String, Option<String>>>,
    running: AtomicBool,
    /// Bumped on every start. A loop that wakes from its sleep and finds
    /// a newer generation has been superseded and exits, so stop-then-start
    /// mid-sleep can never leave two loops ticking.
    generation: AtomicU64,
    pub last_tick_at: Mutex<Option<String>>,
    pub poll_interval_secs: u64,
}

impl Monitor {
    pub fn new(
        db: Arc<Db>,
        chain: ChainClient,
        ai: AiClient,
        voice: VoiceClient,
        approval: Arc<ApprovalWorkflow>,
        poll_interval_secs: u64,
    ) -> Self {
        Self {
            db,
            chain,
            ai,
            voice,
            approval,
            pool_history: history::pool_history(),
            wallet_history: history::wallet_history(),
            monitored_pools: Mutex::new(HashSet::new()),
            monitored_wallets: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            last_tick_at: Mutex::new(None),
            poll_interval_secs,
        }
    }

    // =====================================================
    // Registry
    // =====================================================

    /// Returns false if the pool was already monitored.
    pub async fn add_pool(&self, pool_address: &str) -> bool {
        self.monitored_pools
            .lock()
            .await
            .insert(pool_address.to_lowercase())
    }

    pub async fn remove_pool(&self, pool_address: &str) -> bool {
        let removed = self
            .monitored_pools
            .lock()
            .await
            .remove(&pool_address.to_lowercase());
        if removed {
            self.pool_history.remove(pool_address).await;
        }
        removed
    }

    pub async fn monitored_pools(&self) -> Vec<String> {
        let mut pools: Vec<String> =
            self.monitored_pools.lock().await.iter().cloned().collect();
        pools.sort();
        pools
    }

    pub async fn add_wallet(&self, wallet_address: &str, lp_pool: Option<String>) -> bool {
        self.monitored_wallets
            .lock()
            .await
            .insert(
                wallet_address.to_lowercase(),
                lp_pool.map(|p| p.to_lowercase()),
            )
            .is_none()
    }

    pub async fn remove_wallet(&self, wallet_address: &str) -> bool {
        let removed = self
            .monitored_wallets
            .lock()
            .await
            .remove(&wallet_address.to_lowercase())
            .is_some();
        if removed {
            self.wallet_history.remove(wallet_address).await;
        }
        removed
    }

    pub async fn monitored_wallets(&self) -> Vec<String> {
        let mut wallets: Vec<String> = self
            .monitored_wallets
            .lock()
            .await
            .keys()
            .cloned()
            .collect();
        wallets.sort();
        wallets
    }

    // =====================================================
    // Run control
    // =====================================================

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Arm the run flag and spawn the loop. Returns false if the loop was
    /// already running; at most one loop is ever in flight.
    pub fn start(self: &Arc<Self>) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        let my_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            monitor.run_loop(my_generation).await;
        });
        true
    }

    /// Clear the run flag. The loop exits at its next iteration boundary.
    pub fn stop(&self) -> bool {
        self.running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn is_current(&self, my_generation: u64) -> bool {
        self.is_running() && self.generation.load(Ordering::SeqCst) == my_generation
    }

    async fn run_loop(&self, my_generation: u64) {
        log::info!(
            "[RISK_MONITOR] Monitor loop started (poll interval: {}s)",
            self.poll_interval_secs
        );
        while self.is_current(my_generation) {
            tokio::time::sleep(Duration::from_secs(self.poll_interval_secs)).await;
            if !self.is_current(my_generation) {
                break;
            }
            self.tick().await;
            let now = chrono::Utc::now().to_rfc3339();
            *self.last_tick_at.lock().await = Some(now);
        }
        log::info!("[RISK_MONITOR] Monitor loop stopped");
    }

    /// One monitoring pass over every registered subject. A failure on one
    /// subject is logged and never halts the rest of the tick.
    pub async fn tick(&self) {
        let pools = self.monitored_pools().await;
        let wallets: Vec<(String, Option<String>)> = self
            .monitored_wallets
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        log::debug!(
            "[RISK_MONITOR] Tick: {} pools, {} wallets",
            pools.len(),
            wallets.len()
        );

        for pool in &pools {
            if let Err(e) = self.check_pool(pool).await {
                log::warn!("[RISK_MONITOR] Pool check failed for {}: {}", pool, e);
            }
        }
        for (wallet, lp_pool) in &wallets {
            if let Err(e) = self.analyze_wallet(wallet, lp_pool.as_deref()).await {
                log::warn!(
                    "[RISK_MONITOR] Wallet analysis failed for {}: {}",
                    wallet,
                    e
                );
            }
        }
    }

    // =====================================================
    // Pipeline
    // =====================================================

    /// Fetch, detect, and (on alert) notify for one pool. Also the body of
    /// the manual `/pool/check` path.
    pub async fn check_pool(
        &self,
        pool_address: &str,
    ) -> Result<(PoolSnapshot, Option<AlertOutcome>), String> {
        let snapshot = self.chain.get_pool_snapshot(pool_address).await;
        let history = self.pool_history.get(pool_address).await;

        let outcome = match detect::detect_pool_anomalies(&snapshot, &history) {
            Some(alert) => {
                let context = AlertContext {
                    subject_address: snapshot.pool_address.clone(),
                    tvl: Some(snapshot.tvl),
                    ratio: Some(snapshot.ratio),
                    ..Default::default()
                };
                Some(
                    self.raise_alert(&snapshot.pool_address, alert, &context, true)
                        .await?,
                )
            }
            None => None,
        };

        self.pool_history.append(pool_address, snapshot.clone()).await;
        Ok((snapshot, outcome))
    }

    /// Fetch, detect, and (on alert) notify for one wallet. Also the body
    /// of the manual `/wallet/analyze` path.
    pub async fn analyze_wallet(
        &self,
        wallet_address: &str,
        lp_pool_address: Option<&str>,
    ) -> Result<(WalletSnapshot, Option<AlertOutcome>), String> {
        let snapshot = self
            .chain
            .get_wallet_snapshot(wallet_address, lp_pool_address)
            .await;
        let history = self.wallet_history.get(wallet_address).await;

        let outcome = match detect::detect_wallet_risks(&snapshot, &history) {
            Some(alert) => {
                let context = AlertContext {
                    subject_address: snapshot.address.clone(),
                    total_value: Some(snapshot.total_value_usd),
                    ..Default::default()
                };
                Some(
                    self.raise_alert(&snapshot.address, alert, &context, true)
                        .await?,
                )
            }
            None => None,
        };

        self.wallet_history
            .append(wallet_address, snapshot.clone())
            .await;
        Ok((snapshot, outcome))
    }

    /// Drive the decision engine and both notification channels for a
    /// fired alert, then record it in the audit trail. `with_call` is
    /// false only for test alerts that opt out of the phone call.
    pub async fn raise_alert(
        &self,
        subject_address: &str,
        alert: RiskAlert,
        context: &AlertContext,
        with_call: bool,
    ) -> Result<AlertOutcome, String> {
        log::warn!(
            "[RISK_MONITOR] {} alert on {}: {}",
            alert.severity,
            subject_address,
            alert.message
        );

        let ai_summary = self.ai.summarize(&alert, context).await;
        let decision = self.ai.decide(&alert, context).await.into_decision();

        let owner = self.db.get_user_for_subject(subject_address)?;

        let mut action_id = None;
        let mut telegram_sent = false;
        if let Some(user) = &owner {
            match self
                .approval
                .open_action(user, subject_address, &alert, &decision, &ai_summary)
                .await?
            {
                Some(opened) => {
                    action_id = Some(opened.action.action_id);
                    telegram_sent = opened.telegram_sent;
                }
                None => {
                    log::info!(
                        "[RISK_MONITOR] Alert on {} suppressed by open action",
                        subject_address
                    );
                }
            }
        }

        let call_initiated = if with_call {
            self.place_call(owner.as_ref(), &alert, &ai_summary).await
        } else {
            false
        };

        self.db.insert_alert_record(
            owner.as_ref().map(|u| u.user_id),
            subject_address,
            &alert,
            Some(&ai_summary),
            call_initiated,
            telegram_sent,
        )?;

        Ok(AlertOutcome {
            alert,
            ai_summary,
            decision,
            action_id,
            call_initiated,
            telegram_sent,
        })
    }

    async fn place_call(
        &self,
        owner: Option<&User>,
        alert: &RiskAlert,
        ai_summary: &str,
    ) -> bool {
        let Some(phone) = owner.and_then(|u| u.phone_number.clone()) else {
            log::debug!("[RISK_MONITOR] No phone number on record, skipping call");
            return false;
        };
        let result = self.voice.place_call(&phone, alert, ai_summary).await;
        result.success
    }
}
