//! Approval workflow.
//!
//! Persists proposed actions, notifies the owning user through chat with
//! inline approve/reject controls, and correlates asynchronous responses
//! back to the original action. Lifecycle:
//!
//!   pending -> approved -> executed
//!   pending -> rejected            (terminal)
//!
//! Approval and execution collapse into one operation here — actual
//! on-chain execution is a stub, the record transitions straight through
//! to `executed`.

use crate::db::Db;
use crate::telegram::ChatClient;
use risk_monitor_types::{
    Action, ActionDecision, ActionStatus, RespondOutcome, RiskAlert, User,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Outcome of opening an approval cycle for an alert.
pub struct OpenResult {
    pub action: Action,
    pub telegram_sent: bool,
}

pub struct ApprovalWorkflow {
    db: Arc<Db>,
    chat: Arc<ChatClient>,
    /// Transient index: action id -> owner chat id, for fast response
    /// routing. The database remains the source of truth.
    pending: Mutex<HashMap<i64, i64>>,
}

impl ApprovalWorkflow {
    pub fn new(db: Arc<Db>, chat: Arc<ChatClient>) -> Self {
        Self {
            db,
            chat,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Persist a pending action for an alert and notify its owner.
    ///
    /// Returns None when an unresolved action for the same (subject,
    /// alert type) already exists — repeated alerts do not stack
    /// approval requests. A failed notification keeps the persisted
    /// action (the audit trail stays complete) with `telegram_sent`
    /// reflecting the failure.
    pub async fn open_action(
        &self,
        user: &User,
        subject_address: &str,
        alert: &RiskAlert,
        decision: &ActionDecision,
        ai_summary: &str,
    ) -> Result<Option<OpenResult>, String> {
        if self.db.has_open_action(subject_address, &alert.alert_type)? {
            log::debug!(
                "[APPROVAL] Open action already exists for {} / {} — skipping",
                subject_address,
                alert.alert_type
            );
            return Ok(None);
        }

        let action = self.db.create_action(
            user.user_id,
            subject_address,
            alert,
            decision,
            Some(ai_summary),
        )?;

        let text = format_approval_message(alert, decision, ai_summary, action.action_id);
        let telegram_sent = match self
            .chat
            .send_approval_request(user.telegram_id, &text, action.action_id)
            .await
        {
            Ok(message_id) => {
                let _ = self.db.set_action_message_id(action.action_id, message_id);
                true
            }
            Err(e) => {
                log::error!(
                    "[APPROVAL] Failed to notify user {} for action {}: {}",
                    user.telegram_id,
                    action.action_id,
                    e
                );
                false
            }
        };

        self.pending
            .lock()
            .await
            .insert(action.action_id, user.telegram_id);

        log::info!(
            "[APPROVAL] Action {} opened for {} ({} {})",
            action.action_id,
            subject_address,
            alert.severity,
            alert.alert_type
        );

        Ok(Some(OpenResult {
            action,
            telegram_sent,
        }))
    }

    /// Apply a user's yes/no response to a pending action.
    ///
    /// Unknown or already-resolved ids produce a benign NotFound, never a
    /// second transition. Approval marks the action executed in the same
    /// operation. The pending-index entry is removed either way.
    pub async fn respond(
        &self,
        action_id: i64,
        approve: bool,
        response_text: &str,
    ) -> Result<RespondOutcome, String> {
        let resolved = self.db.resolve_action(action_id, approve, response_text)?;

        let Some(action) = resolved else {
            self.pending.lock().await.remove(&action_id);
            log::debug!(
                "[APPROVAL] Response for unknown or resolved action {} — no-op",
                action_id
            );
            return Ok(RespondOutcome::NotFound { action_id });
        };

        let final_action = if approve {
            self.execute_action(&action);
            self.db
                .mark_action_executed(action_id)?
                .unwrap_or(action)
        } else {
            action
        };

        self.pending.lock().await.remove(&action_id);

        if let Some(owner) = self.db.get_user_by_id(final_action.user_id)? {
            let confirmation = format_confirmation_message(&final_action);
            if let Err(e) = self.chat.send_message(owner.telegram_id, &confirmation).await {
                log::error!(
                    "[APPROVAL] Failed to send confirmation for action {}: {}",
                    action_id,
                    e
                );
            }
        }

        log::info!(
            "[APPROVAL] Action {} resolved: {}",
            action_id,
            final_action.status.as_str()
        );

        Ok(RespondOutcome::Resolved {
            action: final_action,
        })
    }

    /// Execution stub. A production deployment would submit the protective
    /// transaction here; this build only records the transition.
    fn execute_action(&self, action: &Action) {
        log::info!(
            "[APPROVAL] Executing action {} for {}: {}",
            action.action_id,
            action.subject_address,
            action.proposed_action
        );
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub fn chat(&self) -> &ChatClient {
        &self.chat
    }
}

fn format_approval_message(
    alert: &RiskAlert,
    decision: &ActionDecision,
    ai_summary: &str,
    action_id: i64,
) -> String {
    format!(
        "🚨 <b>{} Alert</b>\n\
         {}\n\n\
         <b>Analysis:</b> {}\n\n\
         <b>Proposed action:</b> {}\n\
         <b>Reasoning:</b> {}\n\
         <b>Urgency:</b> {}\n\
         <b>Risk if ignored:</b> {}\n\n\
         Approve with the buttons below, or reply /yes_{} or /no_{}",
        alert.severity,
        alert.message,
        ai_summary,
        decision.action,
        decision.reasoning,
        decision.urgency,
        decision.risk_if_ignored,
        action_id,
        action_id,
    )
}

fn format_confirmation_message(action: &Action) -> String {
    match action.status {
        ActionStatus::Executed => format!(
            "✅ Action #{} approved and executed: {}",
            action.action_id, action.proposed_action
        ),
        ActionStatus::Rejected => format!(
            "❌ Action #{} rejected. No changes were made.",
            action.action_id
        ),
        _ => format!(
            "Action #{} is now {}",
            action.action_id,
            action.status.as_str()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use risk_monitor_types::Severity;

    fn setup() -> (Arc<Db>, Arc<ChatClient>, ApprovalWorkflow, User) {
        let db = Arc::new(Db::open(":memory:").unwrap());
        let chat = Arc::new(ChatClient::mock());
        let user = db
            .upsert_user(42, Some("alice"), Some("0xabc"), None, None)
            .unwrap();
        let workflow = ApprovalWorkflow::new(db.clone(), chat.clone());
        (db, chat, workflow, user)
    }

    fn alert() -> RiskAlert {
        RiskAlert {
            severity: Severity::Critical,
            message: "TVL dropped 25.0%".to_string(),
            metrics: HashMap::new(),
            alert_type: "pool_tvl_drop".to_string(),
        }
    }

    fn decision() -> ActionDecision {
        ActionDecision {
            action: "Withdraw Liquidity".to_string(),
            reasoning: "TVL collapse underway".to_string(),
            urgency: "immediate".to_string(),
            risk_if_ignored: "Further losses".to_string(),
        }
    }

    #[tokio::test]
    async fn open_notifies_and_indexes() {
        let (db, chat, workflow, user) = setup();
        let result = workflow
            .open_action(&user, "0xabc", &alert(), &decision(), "summary")
            .await
            .unwrap()
            .expect("action should open");

        assert!(result.telegram_sent);
        assert_eq!(result.action.status, ActionStatus::Pending);
        assert_eq!(workflow.pending_count().await, 1);

        let stored = db.get_action(result.action.action_id).unwrap().unwrap();
        assert!(stored.telegram_message_id.is_some());

        let sent = chat.sent_messages();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("Withdraw Liquidity"));
        assert!(sent[0].1.contains("CRITICAL"));
    }

    #[tokio::test]
    async fn duplicate_open_is_skipped() {
        let (_db, _chat, workflow, user) = setup();
        workflow
            .open_action(&user, "0xabc", &alert(), &decision(), "s")
            .await
            .unwrap()
            .expect("first opens");
        let second = workflow
            .open_action(&user, "0xabc", &alert(), &decision(), "s")
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn reject_then_second_response_is_not_found() {
        let (db, _chat, workflow, user) = setup();
        let opened = workflow
            .open_action(&user, "0xabc", &alert(), &decision(), "s")
            .await
            .unwrap()
            .unwrap();
        let id = opened.action.action_id;

        match workflow.respond(id, false, "no").await.unwrap() {
            RespondOutcome::Resolved { action } => {
                assert_eq!(action.status, ActionStatus::Rejected);
                assert!(action.responded_at.is_some());
            }
            RespondOutcome::NotFound { .. } => panic!("first response should resolve"),
        }
        assert_eq!(workflow.pending_count().await, 0);

        // Second response after removal from the pending index: benign no-op
        match workflow.respond(id, true, "yes").await.unwrap() {
            RespondOutcome::NotFound { action_id } => assert_eq!(action_id, id),
            RespondOutcome::Resolved { .. } => panic!("second response must not transition"),
        }
        let current = db.get_action(id).unwrap().unwrap();
        assert_eq!(current.status, ActionStatus::Rejected);
        assert!(current.executed_at.is_none());
    }

    #[tokio::test]
    async fn approve_executes_in_same_operation() {
        let (db, chat, workflow, user) = setup();
        let opened = workflow
            .open_action(&user, "0xabc", &alert(), &decision(), "s")
            .await
            .unwrap()
            .unwrap();
        let id = opened.action.action_id;

        match workflow.respond(id, true, "yes").await.unwrap() {
            RespondOutcome::Resolved { action } => {
                assert_eq!(action.status, ActionStatus::Executed);
                assert!(action.executed_at.is_some());
            }
            RespondOutcome::NotFound { .. } => panic!("response should resolve"),
        }

        // No externally observable approved-only state persists
        let stored = db.get_action(id).unwrap().unwrap();
        assert_eq!(stored.status, ActionStatus::Executed);

        // Confirmation message went out after the approval request
        let sent = chat.sent_messages();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].1.contains("approved and executed"));
    }

    #[tokio::test]
    async fn respond_to_unknown_id_is_benign() {
        let (_db, _chat, workflow, _user) = setup();
        match workflow.respond(9999, true, "yes").await.unwrap() {
            RespondOutcome::NotFound { action_id } => assert_eq!(action_id, 9999),
            RespondOutcome::Resolved { .. } => panic!("unknown id must not resolve"),
        }
    }
}
