//! Forwards warnings and errors to an admin chat.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::format::split_message;

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
/// Flush early once this many lines are waiting.
const MAX_BUFFERED: usize = 30;
const LOG_MESSAGE_LIMIT: usize = 4000;

pub struct AdminLogLayer {
    tx: mpsc::UnboundedSender<String>,
}

impl AdminLogLayer {
    /// Must be called inside a tokio runtime.
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let mut buffer: Vec<String> = Vec::new();
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);

            loop {
                tokio::select! {
                    line = rx.recv() => match line {
                        Some(line) => {
                            buffer.push(line);
                            if buffer.len() >= MAX_BUFFERED {
                                flush(&bot, chat_id, &mut buffer).await;
                            }
                        }
                        None => {
                            flush(&bot, chat_id, &mut buffer).await;
                            break;
                        }
                    },
                    _ = interval.tick() => flush(&bot, chat_id, &mut buffer).await,
                }
            }
        });

        Self { tx }
    }
}

async fn flush(bot: &Bot, chat_id: ChatId, buffer: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    let combined = buffer.join("\n");
    buffer.clear();

    // Plain text: log lines are full of reserved MarkdownV2 characters.
    for part in split_message(&combined, LOG_MESSAGE_LIMIT) {
        if let Err(e) = bot.send_message(chat_id, part).await {
            // Not logged through tracing, that would feed back into this layer.
            eprintln!("Failed to send log to Telegram: {e}");
            return;
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message.push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

fn format_line(level: Level, target: &str, message: &str) -> Option<String> {
    match level {
        Level::ERROR => Some(format!("❌ [{target}] {message}")),
        Level::WARN => Some(format!("⚠️ [{target}] {message}")),
        _ => None,
    }
}

impl<S: Subscriber> Layer<S> for AdminLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        // Telegram client internals would report their own send failures.
        if metadata.target().starts_with("teloxide") || metadata.target().starts_with("reqwest") {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let Some(line) = format_line(*metadata.level(), metadata.target(), &visitor.message) else {
            return;
        };
        if self.tx.send(line).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}
