use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatId as TgChatId, Update, UpdateKind};
use tracing::debug;

use crate::config::TelegramConfig;
use crate::error::{FetchError, SendError};
use crate::platform::{ChatId, ChatPlatform, InboundMessage, InboundUpdate};

/// Telegram rejects messages over 4096 characters; stay below it in bytes.
const MAX_MESSAGE_LEN: usize = 4000;

/// Headroom on top of the long-poll hold time before the HTTP call gives up.
const HTTP_GRACE: Duration = Duration::from_secs(10);

/// Split long messages for Telegram's 4096 char limit
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

fn inbound_from(update: Update) -> InboundUpdate {
    let message = match update.kind {
        UpdateKind::Message(msg) => Some(InboundMessage {
            chat_id: ChatId(msg.chat.id.0),
            text: msg.text().map(str::to_string),
            sender: msg.from.as_ref().map(|user| user.first_name.clone()),
        }),
        _ => None,
    };

    InboundUpdate {
        update_id: update.id.0,
        message,
    }
}

/// Bot API access through teloxide, polling with `getUpdates`.
pub struct TelegramPlatform {
    bot: Bot,
    poll_timeout_secs: u32,
}

impl TelegramPlatform {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let http_timeout = Duration::from_secs(u64::from(config.poll_timeout_secs)) + HTTP_GRACE;
        let client = teloxide::net::default_reqwest_settings()
            .timeout(http_timeout)
            .build()
            .context("Failed to build Telegram HTTP client")?;

        let api_url = reqwest::Url::parse(&config.api_url)
            .with_context(|| format!("Invalid Telegram API URL: {}", config.api_url))?;

        let bot = Bot::with_client(&config.bot_token, client).set_api_url(api_url);

        Ok(Self {
            bot,
            poll_timeout_secs: config.poll_timeout_secs,
        })
    }
}

#[async_trait]
impl ChatPlatform for TelegramPlatform {
    async fn fetch_updates(&self, offset: u32) -> Result<Vec<InboundUpdate>, FetchError> {
        let wire_offset = i32::try_from(offset).map_err(|_| FetchError::InvalidOffset(offset))?;

        let updates = self
            .bot
            .get_updates()
            .offset(wire_offset)
            .timeout(self.poll_timeout_secs)
            .await?;

        debug!("getUpdates(offset={}) returned {} update(s)", offset, updates.len());

        let mut inbound: Vec<InboundUpdate> = updates.into_iter().map(inbound_from).collect();
        inbound.sort_by_key(|u| u.update_id);
        Ok(inbound)
    }

    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<(), SendError> {
        for chunk in split_message(text, MAX_MESSAGE_LEN) {
            self.bot.send_message(TgChatId(chat_id.0), chunk).await?;
        }
        Ok(())
    }

    async fn clear_commands(&self) -> Result<(), SendError> {
        self.bot.delete_my_commands().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Bytes, extract::State, http::Uri, Json, Router};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_split_short_message_untouched() {
        assert_eq!(split_message("hello", 10), vec!["hello".to_string()]);
    }

    #[test]
    fn test_split_prefers_word_boundaries() {
        let chunks = split_message("aaaa bbbb cccc", 10);
        assert_eq!(chunks, vec!["aaaa bbbb ".to_string(), "cccc".to_string()]);
        assert_eq!(chunks.concat(), "aaaa bbbb cccc");
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        let text = "привет".repeat(10);
        let chunks = split_message(&text, 7);
        assert!(chunks.iter().all(|c| c.len() <= 7 && !c.is_empty()));
        assert_eq!(chunks.concat(), text);
    }

    #[derive(Clone, Default)]
    struct FakeTelegram {
        calls: Arc<Mutex<Vec<(String, Value)>>>,
        updates: Arc<Mutex<Value>>,
    }

    fn message_json(chat_id: i64, text: &str) -> Value {
        json!({
            "message_id": 1,
            "date": 1700000000,
            "chat": {"id": chat_id, "type": "private", "first_name": "Ann"},
            "from": {"id": 7, "is_bot": false, "first_name": "Ann"},
            "text": text
        })
    }

    async fn handle(State(fake): State<FakeTelegram>, uri: Uri, body: Bytes) -> Json<Value> {
        let method = uri.path().rsplit('/').next().unwrap_or_default().to_lowercase();
        let params: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        fake.calls.lock().unwrap().push((method.clone(), params.clone()));

        let result = match method.as_str() {
            "getupdates" => fake.updates.lock().unwrap().clone(),
            "sendmessage" => message_json(
                params["chat_id"].as_i64().unwrap_or_default(),
                params["text"].as_str().unwrap_or_default(),
            ),
            "deletemycommands" => json!(true),
            _ => {
                return Json(json!({"ok": false, "error_code": 404, "description": "Not Found"}))
            }
        };
        Json(json!({"ok": true, "result": result}))
    }

    async fn spawn_fake(updates: Value) -> (TelegramPlatform, FakeTelegram) {
        let fake = FakeTelegram::default();
        *fake.updates.lock().unwrap() = updates;
        let app = Router::new().fallback(handle).with_state(fake.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let platform = TelegramPlatform::new(&TelegramConfig {
            bot_token: "123:abc".to_string(),
            api_url: format!("http://{addr}"),
            poll_timeout_secs: 0,
            delete_commands_on_start: true,
        })
        .unwrap();
        (platform, fake)
    }

    #[test]
    fn test_invalid_api_url_rejected() {
        let result = TelegramPlatform::new(&TelegramConfig {
            bot_token: "123:abc".to_string(),
            api_url: "not a url".to_string(),
            ..TelegramConfig::default()
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_fetch_maps_updates_and_sends_offset() {
        let (platform, fake) = spawn_fake(json!([
            {"update_id": 6, "some_future_update": {"x": 1}},
            {"update_id": 5, "message": message_json(42, "hi")}
        ]))
        .await;

        let updates = platform.fetch_updates(5).await.unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].update_id, 5);
        assert_eq!(updates[0].text_message(), Some((ChatId(42), "hi")));
        assert_eq!(
            updates[0].message.as_ref().unwrap().sender.as_deref(),
            Some("Ann")
        );
        assert_eq!(updates[1].update_id, 6);
        assert!(updates[1].message.is_none());

        let calls = fake.calls.lock().unwrap();
        assert_eq!(calls[0].0, "getupdates");
        assert_eq!(calls[0].1["offset"], 5);
    }

    #[tokio::test]
    async fn test_fetch_reports_api_errors() {
        let (platform, _) = spawn_fake(json!("not a list")).await;
        assert!(matches!(
            platform.fetch_updates(0).await,
            Err(FetchError::Http(_))
        ));
    }

    #[tokio::test]
    async fn test_offset_beyond_wire_range() {
        let (platform, fake) = spawn_fake(json!([])).await;
        let err = platform.fetch_updates(u32::MAX).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidOffset(u32::MAX)));
        assert!(fake.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_message_posts_chat_and_text() {
        let (platform, fake) = spawn_fake(json!([])).await;
        platform.send_message(ChatId(42), "hello").await.unwrap();

        let calls = fake.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "sendmessage");
        assert_eq!(calls[0].1["chat_id"], 42);
        assert_eq!(calls[0].1["text"], "hello");
    }

    #[tokio::test]
    async fn test_long_reply_is_sent_in_chunks() {
        let (platform, fake) = spawn_fake(json!([])).await;
        let long = "word ".repeat(2000);
        platform.send_message(ChatId(1), &long).await.unwrap();

        let calls = fake.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        let sent: String = calls
            .iter()
            .map(|(_, p)| p["text"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(sent, long);
    }

    #[tokio::test]
    async fn test_clear_commands() {
        let (platform, fake) = spawn_fake(json!([])).await;
        platform.clear_commands().await.unwrap();
        assert_eq!(fake.calls.lock().unwrap()[0].0, "deletemycommands");
    }
}
