//! AI decision engine.
//!
//! Wraps the text-generation collaborator behind a unified client enum.
//! Two independent operations: `summarize` produces a one-paragraph
//! human-readable analysis, `decide` produces a structured remediation
//! proposal. Both have deterministic fallbacks so a model outage or
//! malformed output never aborts the alert pipeline.

use risk_monitor_types::{ActionDecision, RiskAlert, Severity};
use serde_json::{json, Value};
use std::collections::HashMap;

const SUMMARY_SYSTEM_PROMPT: &str =
    "You are a concise DeFi risk analyst. Provide brief, actionable summaries in 1 paragraph only.";
const DECISION_SYSTEM_PROMPT: &str =
    "You are a DeFi risk manager. Always respond with valid JSON only.";

/// Context handed to prompt construction: subject id plus whichever
/// numeric readings apply (value for wallets, tvl/ratio for pools).
#[derive(Debug, Default, Clone)]
pub struct AlertContext {
    pub subject_address: String,
    pub total_value: Option<f64>,
    pub tvl: Option<f64>,
    pub ratio: Option<f64>,
}

/// Outcome of decision parsing. The fallback path is explicit rather than
/// an exception unwound into a default.
#[derive(Debug, Clone)]
pub enum DecisionOutcome {
    Parsed(ActionDecision),
    Fallback {
        decision: ActionDecision,
        raw_text: Option<String>,
    },
}

impl DecisionOutcome {
    pub fn into_decision(self) -> ActionDecision {
        match self {
            DecisionOutcome::Parsed(d) => d,
            DecisionOutcome::Fallback { decision, .. } => decision,
        }
    }
}

/// Unified AI client. `Replicate` talks to a hosted model endpoint;
/// `Mock` returns canned output for local development and tests.
pub enum AiClient {
    Replicate(ReplicateClient),
    Mock,
}

impl AiClient {
    pub fn from_env() -> Self {
        match std::env::var("REPLICATE_API_TOKEN") {
            Ok(token) if !token.is_empty() => {
                let model = std::env::var("AI_MODEL")
                    .unwrap_or_else(|_| "openai/gpt-4o-mini".to_string());
                AiClient::Replicate(ReplicateClient::new(token, model))
            }
            _ => {
                log::warn!("[RISK_MONITOR] REPLICATE_API_TOKEN not set — AI runs in mock mode");
                AiClient::Mock
            }
        }
    }

    async fn generate(
        &self,
        prompt: &str,
        system_prompt: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<String, String> {
        match self {
            AiClient::Replicate(client) => {
                client
                    .generate(prompt, system_prompt, max_tokens, temperature)
                    .await
            }
            AiClient::Mock => Ok(json!({
                "action": "Monitor Portfolio",
                "reasoning": "Mock AI analysis for testing",
                "urgency": "soon",
                "risk_if_ignored": "Potential losses may increase"
            })
            .to_string()),
        }
    }

    /// One-paragraph analysis of the alert. Falls back to a terse
    /// severity + message line on any failure.
    pub async fn summarize(&self, alert: &RiskAlert, context: &AlertContext) -> String {
        let prompt = build_summary_prompt(alert, context);
        match self.generate(&prompt, SUMMARY_SYSTEM_PROMPT, 150, 0.7).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) | Err(_) => summary_fallback(alert),
        }
    }

    /// Structured remediation decision. Malformed output resolves to an
    /// explicit fallback, never an error.
    pub async fn decide(&self, alert: &RiskAlert, context: &AlertContext) -> DecisionOutcome {
        let prompt = build_decision_prompt(alert, context);
        match self
            .generate(&prompt, DECISION_SYSTEM_PROMPT, 200, 0.3)
            .await
        {
            Ok(text) => parse_decision(&text, alert.severity),
            Err(e) => {
                log::warn!("[RISK_MONITOR] AI decision call failed: {}", e);
                DecisionOutcome::Fallback {
                    decision: error_fallback_decision(alert.severity),
                    raw_text: None,
                }
            }
        }
    }
}

/// Parse the model's output into a decision. Non-JSON text or a JSON
/// object missing any required field yields the review fallback.
pub fn parse_decision(raw: &str, severity: Severity) -> DecisionOutcome {
    let trimmed = raw.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => {
            let fields = ["action", "reasoning", "urgency", "risk_if_ignored"]
                .iter()
                .map(|k| value.get(*k).and_then(|v| v.as_str()).map(|s| s.to_string()))
                .collect::<Vec<_>>();
            match (&fields[0], &fields[1], &fields[2], &fields[3]) {
                (Some(action), Some(reasoning), Some(urgency), Some(risk)) => {
                    DecisionOutcome::Parsed(ActionDecision {
                        action: action.clone(),
                        reasoning: reasoning.clone(),
                        urgency: urgency.clone(),
                        risk_if_ignored: risk.clone(),
                    })
                }
                _ => DecisionOutcome::Fallback {
                    decision: review_fallback_decision(),
                    raw_text: Some(trimmed.to_string()),
                },
            }
        }
        Err(_) => DecisionOutcome::Fallback {
            decision: error_fallback_decision(severity),
            raw_text: Some(trimmed.to_string()),
        },
    }
}

fn review_fallback_decision() -> ActionDecision {
    ActionDecision {
        action: "Review Portfolio".to_string(),
        reasoning: "Anomaly detected, manual review recommended".to_string(),
        urgency: "soon".to_string(),
        risk_if_ignored: "Potential losses may increase".to_string(),
    }
}

fn error_fallback_decision(severity: Severity) -> ActionDecision {
    ActionDecision {
        action: "Monitor Situation".to_string(),
        reasoning: format!("{} alert triggered", severity),
        urgency: if severity == Severity::Critical {
            "immediate".to_string()
        } else {
            "soon".to_string()
        },
        risk_if_ignored: "Situation may worsen".to_string(),
    }
}

pub fn summary_fallback(alert: &RiskAlert) -> String {
    format!("{} Alert: {}", alert.severity, alert.message)
}

fn format_metrics(metrics: &HashMap<String, f64>) -> String {
    let mut entries: Vec<_> = metrics.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
        .iter()
        .map(|(k, v)| format!("{}={:.2}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

fn build_summary_prompt(alert: &RiskAlert, context: &AlertContext) -> String {
    if alert.alert_type.starts_with("wallet_") || alert.alert_type == "impermanent_loss" {
        format!(
            "Analyze this wallet portfolio alert and provide a brief 1-paragraph summary \
             (3-4 sentences max) explaining what happened and what the user should do.\n\n\
             Alert Details:\n\
             - Severity: {}\n\
             - Alert Type: {}\n\
             - Message: {}\n\
             - Wallet Address: {}\n\
             - Total Portfolio Value: ${:.2}\n\
             - Metrics: {}\n\n\
             Keep it concise, actionable, and easy to understand. Focus on protecting the user's assets.",
            alert.severity,
            alert.alert_type,
            alert.message,
            context.subject_address,
            context.total_value.unwrap_or(0.0),
            format_metrics(&alert.metrics),
        )
    } else {
        format!(
            "Analyze this liquidity pool alert and provide a brief 1-paragraph summary \
             (3-4 sentences max) explaining what happened and what the user should do.\n\n\
             Alert Details:\n\
             - Severity: {}\n\
             - Alert Type: {}\n\
             - Message: {}\n\
             - Pool Address: {}\n\
             - Current TVL: ${:.2}\n\
             - Reserve Ratio: {:.4}\n\
             - Metrics: {}\n\n\
             Keep it concise, actionable, and easy to understand for a non-technical user.",
            alert.severity,
            alert.alert_type,
            alert.message,
            context.subject_address,
            context.tvl.unwrap_or(0.0),
            context.ratio.unwrap_or(0.0),
            format_metrics(&alert.metrics),
        )
    }
}

fn build_decision_prompt(alert: &RiskAlert, context: &AlertContext) -> String {
    format!(
        "A risk alert fired for {}. Decide what protective action to propose.\n\n\
         Alert: {} - {}\n\
         Type: {}\n\
         Metrics: {}\n\n\
         Respond with a JSON object with exactly these fields:\n\
         {{\"action\": \"...\", \"reasoning\": \"...\", \"urgency\": \"immediate|soon|monitor\", \"risk_if_ignored\": \"...\"}}",
        context.subject_address,
        alert.severity,
        alert.message,
        alert.alert_type,
        format_metrics(&alert.metrics),
    )
}

/// Client for Replicate-hosted models.
pub struct ReplicateClient {
    client: reqwest::Client,
    token: String,
    model: String,
}

impl ReplicateClient {
    pub fn new(token: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            model,
        }
    }

    async fn generate(
        &self,
        prompt: &str,
        system_prompt: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<String, String> {
        let url = format!(
            "https://api.replicate.com/v1/models/{}/predictions",
            self.model
        );
        let body = json!({
            "input": {
                "prompt": prompt,
                "system_prompt": system_prompt,
                "max_tokens": max_tokens,
                "temperature": temperature,
            }
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Prefer", "wait")
            .json(&body)
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| format!("AI request failed: {}", e))?;

        let status = resp.status();
        let data: Value = resp
            .json()
            .await
            .map_err(|e| format!("AI response not JSON: {}", e))?;

        if !status.is_success() {
            return Err(format!("AI request returned {}: {}", status, data));
        }

        // Output is a list of text chunks to be joined
        match &data["output"] {
            Value::Array(chunks) => Ok(chunks
                .iter()
                .filter_map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join("")),
            Value::String(s) => Ok(s.clone()),
            other => Err(format!("Unexpected AI output shape: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_decision() {
        let raw = r#"{"action": "Withdraw Liquidity", "reasoning": "TVL collapsing",
                      "urgency": "immediate", "risk_if_ignored": "Total loss"}"#;
        match parse_decision(raw, Severity::Critical) {
            DecisionOutcome::Parsed(d) => {
                assert_eq!(d.action, "Withdraw Liquidity");
                assert_eq!(d.urgency, "immediate");
            }
            DecisionOutcome::Fallback { .. } => panic!("expected parsed decision"),
        }
    }

    #[test]
    fn invalid_json_falls_back_by_severity() {
        match parse_decision("I think you should sell everything", Severity::Critical) {
            DecisionOutcome::Fallback { decision, raw_text } => {
                assert_eq!(decision.action, "Monitor Situation");
                assert_eq!(decision.urgency, "immediate");
                assert_eq!(decision.reasoning, "CRITICAL alert triggered");
                assert!(raw_text.is_some());
            }
            DecisionOutcome::Parsed(_) => panic!("expected fallback"),
        }

        match parse_decision("not json", Severity::High) {
            DecisionOutcome::Fallback { decision, .. } => {
                assert_eq!(decision.urgency, "soon");
            }
            DecisionOutcome::Parsed(_) => panic!("expected fallback"),
        }
    }

    #[test]
    fn missing_fields_fall_back_to_review() {
        let raw = r#"{"action": "Sell", "urgency": "soon"}"#;
        match parse_decision(raw, Severity::High) {
            DecisionOutcome::Fallback { decision, .. } => {
                assert_eq!(decision.action, "Review Portfolio");
                assert_eq!(decision.urgency, "soon");
            }
            DecisionOutcome::Parsed(_) => panic!("expected fallback"),
        }
    }

    #[test]
    fn summary_fallback_format() {
        let alert = RiskAlert {
            severity: Severity::High,
            message: "TVL dropped 12.0%".to_string(),
            metrics: HashMap::new(),
            alert_type: "pool_tvl_drop".to_string(),
        };
        assert_eq!(summary_fallback(&alert), "HIGH Alert: TVL dropped 12.0%");
    }

    #[tokio::test]
    async fn mock_client_decides_without_network() {
        let client = AiClient::Mock;
        let alert = RiskAlert {
            severity: Severity::High,
            message: "TVL dropped 12.0%".to_string(),
            metrics: HashMap::new(),
            alert_type: "pool_tvl_drop".to_string(),
        };
        let outcome = client.decide(&alert, &AlertContext::default()).await;
        let decision = outcome.into_decision();
        assert_eq!(decision.action, "Monitor Portfolio");
    }
}
