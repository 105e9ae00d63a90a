//! Telegram client using teloxide.

use teloxide::prelude::*;
use teloxide::types::{ChatAction, LinkPreviewOptions, ParseMode};
use teloxide::RequestError;
use tracing::{debug, warn};

use crate::bot::sender::{ChatSender, Markup, SendError};

/// Markers of Telegram's "your markup is broken" responses.
const FORMATTING_ERRORS: &[&str] = &["can't parse entities", "can't find end of", "unsupported start tag"];

fn classify(err: RequestError) -> SendError {
    let text = err.to_string();
    let lower = text.to_lowercase();
    if FORMATTING_ERRORS.iter().any(|marker| lower.contains(marker)) {
        SendError::Formatting(text)
    } else {
        SendError::Transport(text)
    }
}

fn no_link_previews() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

impl ChatSender for TelegramClient {
    async fn send_text(&self, chat_id: i64, text: &str, markup: Markup) -> Result<(), SendError> {
        let mut request = self
            .bot
            .send_message(ChatId(chat_id), text)
            .link_preview_options(no_link_previews());
        if markup == Markup::MarkdownV2 {
            request = request.parse_mode(ParseMode::MarkdownV2);
        }

        match request.await {
            Ok(msg) => {
                debug!("Sent message {} to chat {} ({:?})", msg.id.0, chat_id, markup);
                Ok(())
            }
            Err(e) => {
                let err = classify(e);
                warn!("Failed to send to chat {}: {}", chat_id, err);
                Err(err)
            }
        }
    }

    async fn send_typing(&self, chat_id: i64) {
        if let Err(e) = self.bot.send_chat_action(ChatId(chat_id), ChatAction::Typing).await {
            debug!("Failed to send typing to chat {chat_id}: {e}");
        }
    }
}
