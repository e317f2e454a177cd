//! Telegram chat collaborator.
//!
//! Sends alert notifications with inline Approve/Reject buttons and
//! confirmation messages via the Bot API. Inbound traffic arrives on the
//! webhook route (see routes.rs) as either a text command or a button
//! callback. The mock variant records outbound messages for tests.

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

// =====================================================
// Webhook update types (subset of the Bot API)
// =====================================================

#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    pub data: Option<String>,
}

/// A decoded approval response: which action, and yes or no.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalReply {
    pub action_id: i64,
    pub approve: bool,
}

/// Decode `approve:<id>` / `reject:<id>` callback data and the
/// `/yes_<id>` / `/no_<id>` command forms.
pub fn parse_approval_reply(text: &str) -> Option<ApprovalReply> {
    let text = text.trim();
    let (approve, id_part) = if let Some(rest) = text.strip_prefix("approve:") {
        (true, rest)
    } else if let Some(rest) = text.strip_prefix("reject:") {
        (false, rest)
    } else if let Some(rest) = text.strip_prefix("/yes_") {
        (true, rest)
    } else if let Some(rest) = text.strip_prefix("/no_") {
        (false, rest)
    } else {
        return None;
    };
    id_part
        .parse::<i64>()
        .ok()
        .map(|action_id| ApprovalReply { action_id, approve })
}

// =====================================================
// Outbound client
// =====================================================

pub enum ChatClient {
    Telegram {
        client: reqwest::Client,
        bot_token: String,
    },
    Mock {
        sent: Mutex<Vec<(i64, String)>>,
        next_message_id: AtomicI64,
    },
}

impl ChatClient {
    pub fn from_env() -> Self {
        match std::env::var("TELEGRAM_BOT_TOKEN") {
            Ok(token) if !token.is_empty() => ChatClient::Telegram {
                client: reqwest::Client::new(),
                bot_token: token,
            },
            _ => {
                log::warn!(
                    "[RISK_MONITOR] TELEGRAM_BOT_TOKEN not set — chat runs in mock mode"
                );
                ChatClient::mock()
            }
        }
    }

    pub fn mock() -> Self {
        ChatClient::Mock {
            sent: Mutex::new(Vec::new()),
            next_message_id: AtomicI64::new(1),
        }
    }

    /// Messages recorded by the mock variant, for assertions.
    pub fn sent_messages(&self) -> Vec<(i64, String)> {
        match self {
            ChatClient::Mock { sent, .. } => sent.lock().unwrap().clone(),
            ChatClient::Telegram { .. } => Vec::new(),
        }
    }

    /// Send a plain text message. Returns the channel-assigned message id.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, String> {
        self.send(chat_id, text, None).await
    }

    /// Send an approval request with inline Approve/Reject buttons whose
    /// callback data carries the action id.
    pub async fn send_approval_request(
        &self,
        chat_id: i64,
        text: &str,
        action_id: i64,
    ) -> Result<i64, String> {
        let keyboard = json!({
            "inline_keyboard": [[
                {"text": "✅ Approve", "callback_data": format!("approve:{}", action_id)},
                {"text": "❌ Reject", "callback_data": format!("reject:{}", action_id)},
            ]]
        });
        self.send(chat_id, text, Some(keyboard)).await
    }

    async fn send(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<Value>,
    ) -> Result<i64, String> {
        match self {
            ChatClient::Mock {
                sent,
                next_message_id,
            } => {
                sent.lock().unwrap().push((chat_id, text.to_string()));
                Ok(next_message_id.fetch_add(1, Ordering::SeqCst))
            }
            ChatClient::Telegram { client, bot_token } => {
                let url = format!("https://api.telegram.org/bot{}/sendMessage", bot_token);
                let mut body = json!({
                    "chat_id": chat_id,
                    "text": text,
                    "parse_mode": "HTML",
                });
                if let Some(markup) = reply_markup {
                    body["reply_markup"] = markup;
                }

                let resp = client
                    .post(&url)
                    .json(&body)
                    .timeout(std::time::Duration::from_secs(15))
                    .send()
                    .await
                    .map_err(|e| format!("Telegram request failed: {}", e))?;

                let data: Value = resp
                    .json()
                    .await
                    .map_err(|e| format!("Telegram response not JSON: {}", e))?;

                if data["ok"].as_bool() != Some(true) {
                    return Err(format!(
                        "Telegram sendMessage failed: {}",
                        data["description"].as_str().unwrap_or("unknown error")
                    ));
                }
                data["result"]["message_id"]
                    .as_i64()
                    .ok_or_else(|| "Telegram response missing message_id".to_string())
            }
        }
    }

    /// Acknowledge a button press so the client stops its spinner.
    pub async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<(), String> {
        match self {
            ChatClient::Mock { .. } => Ok(()),
            ChatClient::Telegram { client, bot_token } => {
                let url = format!(
                    "https://api.telegram.org/bot{}/answerCallbackQuery",
                    bot_token
                );
                client
                    .post(&url)
                    .json(&json!({"callback_query_id": callback_id, "text": text}))
                    .timeout(std::time::Duration::from_secs(15))
                    .send()
                    .await
                    .map_err(|e| format!("Telegram answerCallbackQuery failed: {}", e))?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_callback_and_command_forms() {
        assert_eq!(
            parse_approval_reply("approve:42"),
            Some(ApprovalReply {
                action_id: 42,
                approve: true
            })
        );
        assert_eq!(
            parse_approval_reply("reject:7"),
            Some(ApprovalReply {
                action_id: 7,
                approve: false
            })
        );
        assert_eq!(
            parse_approval_reply("/yes_13"),
            Some(ApprovalReply {
                action_id: 13,
                approve: true
            })
        );
        assert_eq!(
            parse_approval_reply("/no_13"),
            Some(ApprovalReply {
                action_id: 13,
                approve: false
            })
        );
        assert_eq!(parse_approval_reply("/start"), None);
        assert_eq!(parse_approval_reply("approve:notanumber"), None);
        assert_eq!(parse_approval_reply("hello"), None);
    }

    #[tokio::test]
    async fn mock_records_sent_messages() {
        let chat = ChatClient::mock();
        let id1 = chat.send_message(100, "first").await.unwrap();
        let id2 = chat
            .send_approval_request(100, "approve this", 5)
            .await
            .unwrap();
        assert_ne!(id1, id2);
        let sent = chat.sent_messages();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], (100, "first".to_string()));
    }
}
