pub mod telegram;

use async_trait::async_trait;

use crate::error::{FetchError, SendError};

/// Platform-specific chat identifier. Replies always go back to the chat the
/// update arrived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One inbound event, identified and ordered by `update_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundUpdate {
    pub update_id: u32,
    /// `None` for every update that is not a new message.
    pub message: Option<InboundMessage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub chat_id: ChatId,
    /// `None` for stickers, photos and other non-text content.
    pub text: Option<String>,
    /// Display name of the sender, used only in logs
    pub sender: Option<String>,
}

impl InboundUpdate {
    /// Chat id and text, if this update is a text message the relay answers.
    pub fn text_message(&self) -> Option<(ChatId, &str)> {
        let message = self.message.as_ref()?;
        let text = message.text.as_deref()?;
        Some((message.chat_id, text))
    }
}

/// The messaging platform as seen by the relay loop.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Pending updates with `update_id >= offset`, ascending.
    async fn fetch_updates(&self, offset: u32) -> Result<Vec<InboundUpdate>, FetchError>;

    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<(), SendError>;

    /// Remove the bot's command menu.
    async fn clear_commands(&self) -> Result<(), SendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(message: Option<InboundMessage>) -> InboundUpdate {
        InboundUpdate {
            update_id: 1,
            message,
        }
    }

    #[test]
    fn test_text_message_extracts_chat_and_text() {
        let u = update(Some(InboundMessage {
            chat_id: ChatId(42),
            text: Some("hi".to_string()),
            sender: None,
        }));
        assert_eq!(u.text_message(), Some((ChatId(42), "hi")));
    }

    #[test]
    fn test_non_text_updates_are_not_text_messages() {
        assert_eq!(update(None).text_message(), None);
        let photo = update(Some(InboundMessage {
            chat_id: ChatId(42),
            text: None,
            sender: Some("Ann".to_string()),
        }));
        assert_eq!(photo.text_message(), None);
    }
}
