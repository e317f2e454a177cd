//! SQLite database operations for the risk monitor service.
//!
//! Three tables: users (owner registrations), actions (the approval audit
//! trail) and alert_history (every alert ever raised, owner or not).

use risk_monitor_types::*;
use rusqlite::{Connection, Result as SqliteResult};
use std::sync::Mutex;

pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn open(path: &str) -> SqliteResult<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY AUTOINCREMENT,
                telegram_id INTEGER NOT NULL UNIQUE,
                username TEXT,
                wallet_address TEXT,
                pool_address TEXT,
                phone_number TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                last_active TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_users_wallet ON users(wallet_address)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_users_pool ON users(pool_address)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS actions (
                action_id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                subject_address TEXT NOT NULL,
                alert_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                alert_message TEXT NOT NULL,
                metrics_json TEXT,
                proposed_action TEXT NOT NULL,
                reasoning TEXT NOT NULL,
                urgency TEXT NOT NULL,
                risk_if_ignored TEXT NOT NULL,
                ai_summary TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                user_response TEXT,
                telegram_message_id INTEGER,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                responded_at TEXT,
                executed_at TEXT,
                FOREIGN KEY (user_id) REFERENCES users(user_id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_actions_status ON actions(status, created_at DESC)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_actions_subject ON actions(subject_address, alert_type)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS alert_history (
                alert_id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER,
                subject_address TEXT NOT NULL,
                alert_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                message TEXT NOT NULL,
                metrics_json TEXT,
                ai_summary TEXT,
                call_initiated INTEGER NOT NULL DEFAULT 0,
                telegram_sent INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                FOREIGN KEY (user_id) REFERENCES users(user_id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_alerts_subject ON alert_history(subject_address, created_at DESC)",
            [],
        )?;

        Ok(())
    }

    // =====================================================
    // User Operations
    // =====================================================

    /// Register or update an owner. Re-registration merges: incoming
    /// non-null fields overwrite, nulls preserve prior values.
    pub fn upsert_user(
        &self,
        telegram_id: i64,
        username: Option<&str>,
        wallet_address: Option<&str>,
        pool_address: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<User, String> {
        let conn = self.conn.lock().unwrap();
        let wallet = wallet_address.map(|a| a.to_lowercase());
        let pool = pool_address.map(|a| a.to_lowercase());

        conn.execute(
            "INSERT INTO users (telegram_id, username, wallet_address, pool_address, phone_number)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(telegram_id) DO UPDATE SET
                 username = COALESCE(excluded.username, users.username),
                 wallet_address = COALESCE(excluded.wallet_address, users.wallet_address),
                 pool_address = COALESCE(excluded.pool_address, users.pool_address),
                 phone_number = COALESCE(excluded.phone_number, users.phone_number),
                 last_active = datetime('now')",
            rusqlite::params![telegram_id, username, wallet, pool, phone_number],
        )
        .map_err(|e| format!("Failed to upsert user: {}", e))?;

        get_user_impl(&conn, "telegram_id = ?1", rusqlite::params![telegram_id])?
            .ok_or_else(|| "User not found after upsert".to_string())
    }

    pub fn get_user_by_telegram_id(&self, telegram_id: i64) -> Result<Option<User>, String> {
        let conn = self.conn.lock().unwrap();
        get_user_impl(&conn, "telegram_id = ?1", rusqlite::params![telegram_id])
    }

    pub fn get_user_by_id(&self, user_id: i64) -> Result<Option<User>, String> {
        let conn = self.conn.lock().unwrap();
        get_user_impl(&conn, "user_id = ?1", rusqlite::params![user_id])
    }

    /// Find the owner registered for a subject address (wallet or pool).
    pub fn get_user_for_subject(&self, subject_address: &str) -> Result<Option<User>, String> {
        let conn = self.conn.lock().unwrap();
        let addr = subject_address.to_lowercase();
        get_user_impl(
            &conn,
            "wallet_address = ?1 OR pool_address = ?1",
            rusqlite::params![addr],
        )
    }

    pub fn count_users(&self) -> i64 {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
            .unwrap_or(0)
    }

    // =====================================================
    // Action Operations
    // =====================================================

    /// True if an unresolved action already exists for this subject and
    /// alert type. At most one pending action per (subject, alert_type).
    pub fn has_open_action(&self, subject_address: &str, alert_type: &str) -> Result<bool, String> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM actions
                 WHERE subject_address = ?1 AND alert_type = ?2 AND status = 'pending'",
                rusqlite::params![subject_address.to_lowercase(), alert_type],
                |r| r.get(0),
            )
            .map_err(|e| format!("Failed to check open actions: {}", e))?;
        Ok(count > 0)
    }

    pub fn create_action(
        &self,
        user_id: i64,
        subject_address: &str,
        alert: &RiskAlert,
        decision: &ActionDecision,
        ai_summary: Option<&str>,
    ) -> Result<Action, String> {
        let conn = self.conn.lock().unwrap();
        let metrics_json = serde_json::to_string(&alert.metrics).ok();

        conn.execute(
            "INSERT INTO actions (user_id, subject_address, alert_type, severity,
                                  alert_message, metrics_json, proposed_action,
                                  reasoning, urgency, risk_if_ignored, ai_summary)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                user_id,
                subject_address.to_lowercase(),
                alert.alert_type,
                alert.severity.as_str(),
                alert.message,
                metrics_json,
                decision.action,
                decision.reasoning,
                decision.urgency,
                decision.risk_if_ignored,
                ai_summary,
            ],
        )
        .map_err(|e| format!("Failed to create action: {}", e))?;

        let id = conn.last_insert_rowid();
        get_action_impl(&conn, id)?.ok_or_else(|| "Action not found after insert".to_string())
    }

    pub fn get_action(&self, action_id: i64) -> Result<Option<Action>, String> {
        let conn = self.conn.lock().unwrap();
        get_action_impl(&conn, action_id)
    }

    pub fn set_action_message_id(&self, action_id: i64, message_id: i64) -> Result<(), String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE actions SET telegram_message_id = ?1 WHERE action_id = ?2",
            rusqlite::params![message_id, action_id],
        )
        .map_err(|e| format!("Failed to set message id: {}", e))?;
        Ok(())
    }

    /// Transition a pending action to approved or rejected. Returns the
    /// updated action, or None if the action does not exist or was already
    /// resolved — resolving twice is a no-op, never a second transition.
    pub fn resolve_action(
        &self,
        action_id: i64,
        approve: bool,
        user_response: &str,
    ) -> Result<Option<Action>, String> {
        let conn = self.conn.lock().unwrap();
        let new_status = if approve { "approved" } else { "rejected" };
        let rows = conn
            .execute(
                "UPDATE actions
                 SET status = ?1, user_response = ?2, responded_at = datetime('now')
                 WHERE action_id = ?3 AND status = 'pending'",
                rusqlite::params![new_status, user_response, action_id],
            )
            .map_err(|e| format!("Failed to resolve action: {}", e))?;

        if rows == 0 {
            return Ok(None);
        }
        get_action_impl(&conn, action_id)
    }

    /// Mark an approved action as executed. Only valid from `approved`.
    pub fn mark_action_executed(&self, action_id: i64) -> Result<Option<Action>, String> {
        let conn = self.conn.lock().unwrap();
        let rows = conn
            .execute(
                "UPDATE actions
                 SET status = 'executed', executed_at = datetime('now')
                 WHERE action_id = ?1 AND status = 'approved'",
                rusqlite::params![action_id],
            )
            .map_err(|e| format!("Failed to mark executed: {}", e))?;

        if rows == 0 {
            return Ok(None);
        }
        get_action_impl(&conn, action_id)
    }

    pub fn list_actions(&self, filter: &ActionFilter) -> Result<Vec<Action>, String> {
        let conn = self.conn.lock().unwrap();
        let mut sql = String::from(
            "SELECT action_id, user_id, subject_address, alert_type, severity,
                    alert_message, metrics_json, proposed_action, reasoning,
                    urgency, risk_if_ignored, ai_summary, status, user_response,
                    telegram_message_id, created_at, responded_at, executed_at
             FROM actions WHERE 1=1",
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(user_id) = filter.user_id {
            params.push(Box::new(user_id));
            sql.push_str(&format!(" AND user_id = ?{}", params.len()));
        }
        if let Some(ref subject) = filter.subject_address {
            params.push(Box::new(subject.to_lowercase()));
            sql.push_str(&format!(" AND subject_address = ?{}", params.len()));
        }
        if let Some(ref status) = filter.status {
            params.push(Box::new(status.clone()));
            sql.push_str(&format!(" AND status = ?{}", params.len()));
        }
        sql.push_str(" ORDER BY created_at DESC");
        let limit = filter.limit.unwrap_or(100);
        sql.push_str(&format!(" LIMIT {}", limit));

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| format!("Failed to prepare query: {}", e))?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let actions = stmt
            .query_map(param_refs.as_slice(), row_to_action)
            .map_err(|e| format!("Failed to query actions: {}", e))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(actions)
    }

    pub fn count_pending_actions(&self) -> i64 {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM actions WHERE status = 'pending'",
            [],
            |r| r.get(0),
        )
        .unwrap_or(0)
    }

    // =====================================================
    // Alert History Operations
    // =====================================================

    pub fn insert_alert_record(
        &self,
        user_id: Option<i64>,
        subject_address: &str,
        alert: &RiskAlert,
        ai_summary: Option<&str>,
        call_initiated: bool,
        telegram_sent: bool,
    ) -> Result<i64, String> {
        let conn = self.conn.lock().unwrap();
        let metrics_json = serde_json::to_string(&alert.metrics).ok();
        conn.execute(
            "INSERT INTO alert_history (user_id, subject_address, alert_type, severity,
                                        message, metrics_json, ai_summary,
                                        call_initiated, telegram_sent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                user_id,
                subject_address.to_lowercase(),
                alert.alert_type,
                alert.severity.as_str(),
                alert.message,
                metrics_json,
                ai_summary,
                call_initiated,
                telegram_sent,
            ],
        )
        .map_err(|e| format!("Failed to insert alert record: {}", e))?;
        Ok(conn.last_insert_rowid())
    }

    /// Test hook for breaking the schema underneath live operations.
    #[cfg(test)]
    pub fn execute_raw(&self, sql: &str) -> Result<(), String> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(sql).map_err(|e| e.to_string())
    }

    pub fn list_alert_history(&self, limit: usize) -> Result<Vec<AlertRecord>, String> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT alert_id, user_id, subject_address, alert_type, severity,
                        message, metrics_json, ai_summary, call_initiated,
                        telegram_sent, created_at
                 FROM alert_history ORDER BY created_at DESC LIMIT ?1",
            )
            .map_err(|e| format!("Failed to prepare query: {}", e))?;
        let records = stmt
            .query_map([limit as i64], row_to_alert_record)
            .map_err(|e| format!("Failed to query history: {}", e))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }
}

fn get_user_impl(
    conn: &Connection,
    where_clause: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Option<User>, String> {
    let sql = format!(
        "SELECT user_id, telegram_id, username, wallet_address, pool_address,
                phone_number, created_at, last_active
         FROM users WHERE {}",
        where_clause
    );
    match conn.query_row(&sql, params, row_to_user) {
        Ok(user) => Ok(Some(user)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(format!("Database error: {}", e)),
    }
}

fn get_action_impl(conn: &Connection, action_id: i64) -> Result<Option<Action>, String> {
    let result = conn.query_row(
        "SELECT action_id, user_id, subject_address, alert_type, severity,
                alert_message, metrics_json, proposed_action, reasoning,
                urgency, risk_if_ignored, ai_summary, status, user_response,
                telegram_message_id, created_at, responded_at, executed_at
         FROM actions WHERE action_id = ?1",
        rusqlite::params![action_id],
        row_to_action,
    );
    match result {
        Ok(action) => Ok(Some(action)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(format!("Database error: {}", e)),
    }
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        user_id: row.get(0)?,
        telegram_id: row.get(1)?,
        username: row.get(2)?,
        wallet_address: row.get(3)?,
        pool_address: row.get(4)?,
        phone_number: row.get(5)?,
        created_at: row.get(6)?,
        last_active: row.get(7)?,
    })
}

fn row_to_action(row: &rusqlite::Row) -> rusqlite::Result<Action> {
    let severity_str: String = row.get(4)?;
    let status_str: String = row.get(12)?;
    Ok(Action {
        action_id: row.get(0)?,
        user_id: row.get(1)?,
        subject_address: row.get(2)?,
        alert_type: row.get(3)?,
        severity: severity_str.parse().unwrap_or(Severity::Low),
        alert_message: row.get(5)?,
        metrics_json: row.get(6)?,
        proposed_action: row.get(7)?,
        reasoning: row.get(8)?,
        urgency: row.get(9)?,
        risk_if_ignored: row.get(10)?,
        ai_summary: row.get(11)?,
        status: status_str.parse().unwrap_or(ActionStatus::Pending),
        user_response: row.get(13)?,
        telegram_message_id: row.get(14)?,
        created_at: row.get(15)?,
        responded_at: row.get(16)?,
        executed_at: row.get(17)?,
    })
}

fn row_to_alert_record(row: &rusqlite::Row) -> rusqlite::Result<AlertRecord> {
    let severity_str: String = row.get(4)?;
    Ok(AlertRecord {
        alert_id: row.get(0)?,
        user_id: row.get(1)?,
        subject_address: row.get(2)?,
        alert_type: row.get(3)?,
        severity: severity_str.parse().unwrap_or(Severity::Low),
        message: row.get(5)?,
        metrics_json: row.get(6)?,
        ai_summary: row.get(7)?,
        call_initiated: row.get(8)?,
        telegram_sent: row.get(9)?,
        created_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_alert(alert_type: &str, severity: Severity) -> RiskAlert {
        let mut metrics = HashMap::new();
        metrics.insert("tvlChange".to_string(), -25.0);
        RiskAlert {
            severity,
            message: "TVL dropped 25.0%".to_string(),
            metrics,
            alert_type: alert_type.to_string(),
        }
    }

    fn test_decision() -> ActionDecision {
        ActionDecision {
            action: "Withdraw Liquidity".to_string(),
            reasoning: "TVL collapse underway".to_string(),
            urgency: "immediate".to_string(),
            risk_if_ignored: "Further losses".to_string(),
        }
    }

    #[test]
    fn upsert_user_merges_fields() {
        let db = Db::open(":memory:").unwrap();
        let u = db
            .upsert_user(42, Some("alice"), Some("0xABC"), None, None)
            .unwrap();
        assert_eq!(u.wallet_address.as_deref(), Some("0xabc"));
        assert!(u.pool_address.is_none());

        // Re-register with only a pool: wallet must survive
        let u = db
            .upsert_user(42, None, None, Some("0xPOOL"), Some("+15551234"))
            .unwrap();
        assert_eq!(u.username.as_deref(), Some("alice"));
        assert_eq!(u.wallet_address.as_deref(), Some("0xabc"));
        assert_eq!(u.pool_address.as_deref(), Some("0xpool"));
        assert_eq!(u.phone_number.as_deref(), Some("+15551234"));
        assert_eq!(db.count_users(), 1);
    }

    #[test]
    fn subject_lookup_matches_wallet_or_pool() {
        let db = Db::open(":memory:").unwrap();
        db.upsert_user(1, None, Some("0xWallet"), Some("0xPool"), None)
            .unwrap();
        assert!(db.get_user_for_subject("0xWALLET").unwrap().is_some());
        assert!(db.get_user_for_subject("0xpool").unwrap().is_some());
        assert!(db.get_user_for_subject("0xother").unwrap().is_none());
    }

    #[test]
    fn action_reject_then_respond_again_is_noop() {
        let db = Db::open(":memory:").unwrap();
        let user = db.upsert_user(1, None, Some("0xabc"), None, None).unwrap();
        let action = db
            .create_action(
                user.user_id,
                "0xabc",
                &test_alert("wallet_value_drop", Severity::High),
                &test_decision(),
                None,
            )
            .unwrap();
        assert_eq!(action.status, ActionStatus::Pending);

        let resolved = db.resolve_action(action.action_id, false, "no").unwrap();
        let resolved = resolved.expect("first response resolves");
        assert_eq!(resolved.status, ActionStatus::Rejected);
        assert!(resolved.responded_at.is_some());

        // Second response must not transition again
        let again = db.resolve_action(action.action_id, true, "yes").unwrap();
        assert!(again.is_none());
        let current = db.get_action(action.action_id).unwrap().unwrap();
        assert_eq!(current.status, ActionStatus::Rejected);
    }

    #[test]
    fn approve_then_execute_sets_executed_at() {
        let db = Db::open(":memory:").unwrap();
        let user = db.upsert_user(1, None, Some("0xabc"), None, None).unwrap();
        let action = db
            .create_action(
                user.user_id,
                "0xabc",
                &test_alert("pool_tvl_drop", Severity::Critical),
                &test_decision(),
                Some("summary"),
            )
            .unwrap();

        let approved = db
            .resolve_action(action.action_id, true, "yes")
            .unwrap()
            .unwrap();
        assert_eq!(approved.status, ActionStatus::Approved);

        let executed = db
            .mark_action_executed(action.action_id)
            .unwrap()
            .unwrap();
        assert_eq!(executed.status, ActionStatus::Executed);
        assert!(executed.executed_at.is_some());

        // executed is terminal
        assert!(db.mark_action_executed(action.action_id).unwrap().is_none());
    }

    #[test]
    fn open_action_dedupe_per_subject_and_type() {
        let db = Db::open(":memory:").unwrap();
        let user = db.upsert_user(1, None, Some("0xabc"), None, None).unwrap();
        let alert = test_alert("pool_tvl_drop", Severity::High);
        db.create_action(user.user_id, "0xABC", &alert, &test_decision(), None)
            .unwrap();

        assert!(db.has_open_action("0xabc", "pool_tvl_drop").unwrap());
        assert!(!db.has_open_action("0xabc", "pool_imbalance").unwrap());
        assert!(!db.has_open_action("0xdef", "pool_tvl_drop").unwrap());
    }

    #[test]
    fn list_actions_filters_by_status() {
        let db = Db::open(":memory:").unwrap();
        let user = db.upsert_user(1, None, Some("0xabc"), None, None).unwrap();
        let a1 = db
            .create_action(
                user.user_id,
                "0xabc",
                &test_alert("pool_tvl_drop", Severity::High),
                &test_decision(),
                None,
            )
            .unwrap();
        db.create_action(
            user.user_id,
            "0xabc",
            &test_alert("pool_imbalance", Severity::High),
            &test_decision(),
            None,
        )
        .unwrap();
        db.resolve_action(a1.action_id, false, "no").unwrap();

        let pending = db
            .list_actions(&ActionFilter {
                status: Some("pending".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(db.count_pending_actions(), 1);
    }

    #[test]
    fn alert_history_round_trip() {
        let db = Db::open(":memory:").unwrap();
        db.insert_alert_record(
            None,
            "0xABC",
            &test_alert("pool_tvl_drop", Severity::Critical),
            Some("summary"),
            true,
            false,
        )
        .unwrap();

        let history = db.list_alert_history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].subject_address, "0xabc");
        assert_eq!(history[0].severity, Severity::Critical);
        assert!(history[0].call_initiated);
        assert!(!history[0].telegram_sent);
    }
}
