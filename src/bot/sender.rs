//! Delivering reply chunks with a plain-text fallback.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::format::{strip_markdown_v2, strip_progress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Markup {
    MarkdownV2,
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Telegram rejected the markup. Worth retrying as plain text.
    Formatting(String),
    /// Anything else: network, blocked bot, rate limit.
    Transport(String),
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::Formatting(e) => write!(f, "formatting rejected: {e}"),
            SendError::Transport(e) => write!(f, "send failed: {e}"),
        }
    }
}

impl std::error::Error for SendError {}

/// Outbound side of a chat.
pub trait ChatSender {
    fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        markup: Markup,
    ) -> impl Future<Output = Result<(), SendError>> + Send;

    /// Show "typing…" in the chat. Failures are ignored.
    fn send_typing(&self, chat_id: i64) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Formatted,
    /// Sent without markup after Telegram rejected the formatting.
    Plain,
    Failed(String),
}

/// Send one MarkdownV2 chunk; on a formatting error resend it as plain text.
pub async fn send_chunk<S: ChatSender>(sender: &S, chat_id: i64, chunk: &str) -> SendOutcome {
    match sender.send_text(chat_id, chunk, Markup::MarkdownV2).await {
        Ok(()) => SendOutcome::Formatted,
        Err(SendError::Formatting(e)) => {
            warn!("MarkdownV2 rejected in chat {chat_id}, resending as plain text: {e}");
            match sender
                .send_text(chat_id, &strip_markdown_v2(chunk), Markup::Plain)
                .await
            {
                Ok(()) => SendOutcome::Plain,
                Err(e) => SendOutcome::Failed(e.to_string()),
            }
        }
        Err(e) => SendOutcome::Failed(e.to_string()),
    }
}

/// Send chunks in order, `delay` apart, stopping at the first failure.
/// Blank chunks are skipped.
pub async fn deliver<S: ChatSender>(
    sender: &S,
    chat_id: i64,
    chunks: &[String],
    delay: Duration,
) -> Vec<SendOutcome> {
    let mut outcomes = Vec::with_capacity(chunks.len());
    let chunks = chunks.iter().filter(|c| !strip_progress(c).trim().is_empty());

    for (i, chunk) in chunks.enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let outcome = send_chunk(sender, chat_id, chunk).await;
        if let SendOutcome::Failed(ref reason) = outcome {
            warn!("Delivery to chat {chat_id} stopped at chunk {}: {reason}", i + 1);
            outcomes.push(outcome);
            break;
        }
        outcomes.push(outcome);
    }
    outcomes
}
