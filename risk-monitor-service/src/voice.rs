//! Voice-call collaborator.
//!
//! Places a phone call for a fired alert through a Twilio Studio Flow
//! execution. Call parameters carry the alert fields so the flow can read
//! them out. Runs in mock mode when credentials are missing.

use risk_monitor_types::RiskAlert;
use serde_json::json;

#[derive(Debug, Clone)]
pub struct CallResult {
    pub success: bool,
    pub call_id: Option<String>,
    pub error: Option<String>,
}

pub struct TwilioCredentials {
    pub account_sid: String,
    pub auth_token: String,
    pub flow_sid: String,
    pub from_number: String,
}

impl TwilioCredentials {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            account_sid: std::env::var("TWILIO_ACCOUNT_SID").ok()?,
            auth_token: std::env::var("TWILIO_AUTH_TOKEN").ok()?,
            flow_sid: std::env::var("TWILIO_FLOW_SID").ok()?,
            from_number: std::env::var("TWILIO_FROM_NUMBER").ok()?,
        })
    }
}

pub enum VoiceClient {
    Twilio {
        client: reqwest::Client,
        credentials: TwilioCredentials,
    },
    Mock,
}

impl VoiceClient {
    pub fn from_env() -> Self {
        match TwilioCredentials::from_env() {
            Some(credentials) => VoiceClient::Twilio {
                client: reqwest::Client::new(),
                credentials,
            },
            None => {
                log::warn!(
                    "[RISK_MONITOR] Twilio credentials not set — voice calls run in mock mode"
                );
                VoiceClient::Mock
            }
        }
    }

    /// Place an alert call. Failures come back in the result, never as an
    /// error — the alert pipeline records them and moves on.
    pub async fn place_call(
        &self,
        to_number: &str,
        alert: &RiskAlert,
        ai_summary: &str,
    ) -> CallResult {
        let full_message = format!(
            "Alert! {} severity. {}. {}",
            alert.severity, alert.message, ai_summary
        );

        match self {
            VoiceClient::Mock => {
                log::info!(
                    "[RISK_MONITOR] MOCK CALL to {}: {}",
                    to_number,
                    full_message
                );
                CallResult {
                    success: true,
                    call_id: Some("mock_execution_id".to_string()),
                    error: None,
                }
            }
            VoiceClient::Twilio {
                client,
                credentials,
            } => {
                let url = format!(
                    "https://studio.twilio.com/v2/Flows/{}/Executions",
                    credentials.flow_sid
                );
                let parameters = json!({
                    "alertSeverity": alert.severity.as_str(),
                    "alertMessage": alert.message,
                    "aiSummary": ai_summary,
                    "fullMessage": full_message,
                    "alertType": alert.alert_type,
                })
                .to_string();

                let form = [
                    ("To", to_number),
                    ("From", credentials.from_number.as_str()),
                    ("Parameters", parameters.as_str()),
                ];

                let result = client
                    .post(&url)
                    .basic_auth(&credentials.account_sid, Some(&credentials.auth_token))
                    .form(&form)
                    .timeout(std::time::Duration::from_secs(15))
                    .send()
                    .await;

                match result {
                    Ok(resp) if resp.status().is_success() => {
                        let sid = resp
                            .json::<serde_json::Value>()
                            .await
                            .ok()
                            .and_then(|v| v["sid"].as_str().map(|s| s.to_string()));
                        CallResult {
                            success: true,
                            call_id: sid,
                            error: None,
                        }
                    }
                    Ok(resp) => {
                        let status = resp.status();
                        let body = resp.text().await.unwrap_or_default();
                        let error = format!("Twilio returned {}: {}", status, body);
                        log::error!("[RISK_MONITOR] Phone call failed: {}", error);
                        CallResult {
                            success: false,
                            call_id: None,
                            error: Some(error),
                        }
                    }
                    Err(e) => {
                        let error = format!("Twilio request failed: {}", e);
                        log::error!("[RISK_MONITOR] Phone call failed: {}", error);
                        CallResult {
                            success: false,
                            call_id: None,
                            error: Some(error),
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use risk_monitor_types::Severity;
    use std::collections::HashMap;

    #[tokio::test]
    async fn mock_call_always_succeeds() {
        let client = VoiceClient::Mock;
        let alert = RiskAlert {
            severity: Severity::Critical,
            message: "TVL dropped 25.3%".to_string(),
            metrics: HashMap::new(),
            alert_type: "pool_tvl_drop".to_string(),
        };
        let result = client.place_call("+15551234567", &alert, "summary").await;
        assert!(result.success);
        assert!(result.call_id.is_some());
        assert!(result.error.is_none());
    }
}
