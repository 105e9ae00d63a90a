//! Telegram transport: commands, per-chat ordering and reply delivery.

pub mod sender;
pub mod server;
pub mod telegram;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tokio::sync::OwnedMutexGuard;
use tracing::{error, info};

use crate::assistant::{Assistant, EMPTY_QUESTION_REPLY, ERROR_REPLY};
use crate::format::render_markdown_v2;

pub use sender::{deliver, ChatSender, Markup, SendError, SendOutcome};
pub use telegram::TelegramClient;

pub const WELCOME_TEXT: &str = "🎸 Привет! Я помощник гитарной школы.\n\n\
Спроси меня о ценах, расписании, преподавателях или о том, как записаться на пробный урок, \
и я отвечу по информации с нашего сайта.";

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    /// Start the conversation.
    Start,
    /// How to use the bot.
    Help,
}

/// One async lock per chat so a chat's messages are answered one at a time.
#[derive(Default)]
pub struct ChatLocks {
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

/// Idle locks are dropped once the map grows past this.
const MAX_IDLE_LOCKS: usize = 1024;

impl ChatLocks {
    pub async fn lock(&self, chat_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            if locks.len() > MAX_IDLE_LOCKS {
                locks.retain(|_, l| Arc::strong_count(l) > 1);
            }
            locks.entry(chat_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub struct BotState {
    pub assistant: Assistant,
    pub telegram: TelegramClient,
    /// Used to recognize `/start@<username>`.
    pub bot_username: String,
    pub send_delay: Duration,
    chat_locks: ChatLocks,
}

impl BotState {
    pub fn new(
        assistant: Assistant,
        telegram: TelegramClient,
        bot_username: String,
        send_delay: Duration,
    ) -> Self {
        Self {
            assistant,
            telegram,
            bot_username,
            send_delay,
            chat_locks: ChatLocks::default(),
        }
    }
}

/// Answer one inbound message in `chat_id` and deliver the reply.
///
/// `text` is `None` for messages without text (stickers, photos).
pub async fn respond<S: ChatSender>(
    assistant: &Assistant,
    sender: &S,
    chat_id: i64,
    text: Option<&str>,
    bot_username: &str,
    send_delay: Duration,
) -> Vec<SendOutcome> {
    let question = text.map(str::trim).unwrap_or_default();

    if let Ok(command) = Command::parse(question, bot_username) {
        info!("Command {:?} in chat {}", command, chat_id);
        let reply = render_markdown_v2(WELCOME_TEXT);
        return deliver(sender, chat_id, &[reply], send_delay).await;
    }

    if question.is_empty() {
        let reply = render_markdown_v2(EMPTY_QUESTION_REPLY);
        return deliver(sender, chat_id, &[reply], send_delay).await;
    }

    sender.send_typing(chat_id).await;
    let answer = assistant.answer(question).await;
    let chunks = assistant.prepare(&answer);
    info!("📨 Replying to chat {} in {} chunk(s)", chat_id, chunks.len());
    deliver(sender, chat_id, &chunks, send_delay).await
}

/// Run one turn on its own task; if it panics, apologize in the chat.
pub async fn apologize_on_panic<S, F>(sender: &S, chat_id: i64, turn: F) -> Vec<SendOutcome>
where
    S: ChatSender,
    F: Future<Output = Vec<SendOutcome>> + Send + 'static,
{
    match tokio::spawn(turn).await {
        Ok(outcomes) => outcomes,
        Err(e) => {
            error!("Handling a message in chat {} failed: {}", chat_id, e);
            let reply = render_markdown_v2(ERROR_REPLY);
            deliver(sender, chat_id, &[reply], Duration::ZERO).await
        }
    }
}

/// Dispatcher endpoint, also used by the webhook route.
pub async fn handle_message(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let chat_id = msg.chat.id.0;
    let _turn = state.chat_locks.lock(chat_id).await;

    let username = msg
        .from
        .as_ref()
        .map(|u| u.username.clone().unwrap_or_else(|| u.first_name.clone()))
        .unwrap_or_else(|| "unknown".to_string());
    info!("💬 Message from {} in chat {}", username, chat_id);

    let text = msg.text().map(str::to_owned);
    let worker = state.clone();
    let turn = async move {
        respond(
            &worker.assistant,
            &worker.telegram,
            chat_id,
            text.as_deref(),
            &worker.bot_username,
            worker.send_delay,
        )
        .await
    };
    apologize_on_panic(&state.telegram, chat_id, turn).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::sender::fake::FakeSender;
    use super::*;
    use crate::completion::{CompletionClient, CompletionSettings};
    use crate::prompt::PromptOptions;
    use crate::site::{SiteCache, SiteContent};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn assistant(url: String) -> Assistant {
        let completion = CompletionClient::new(CompletionSettings {
            url,
            api_key: "k".into(),
            models: vec!["m".into()],
            max_tokens: 100,
            temperature: 0.0,
            timeout: Duration::from_secs(2),
        });
        let prompt = PromptOptions {
            school_name: "Аккорд".into(),
            char_budget: 1000,
        };
        Assistant::new(Arc::new(SiteCache::new(SiteContent::default())), completion, prompt, 4096)
    }

    #[test]
    fn test_command_parsing() {
        assert!(matches!(Command::parse("/start", "guitar_bot"), Ok(Command::Start)));
        assert!(matches!(Command::parse("/help@guitar_bot", "guitar_bot"), Ok(Command::Help)));
        assert!(Command::parse("сколько стоит?", "guitar_bot").is_err());
    }

    #[tokio::test]
    async fn test_start_sends_welcome_without_api_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let sender = FakeSender::default();
        let outcomes = respond(&assistant(server.uri()), &sender, 5, Some("/start"), "bot", Duration::ZERO).await;

        assert_eq!(outcomes, vec![SendOutcome::Formatted]);
        let sent = sender.sent();
        assert!(sent[0].1.starts_with("🎸 Привет\\!"));
        assert!(sender.typing.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_text_message() {
        let sender = FakeSender::default();
        respond(&assistant("http://127.0.0.1:9".into()), &sender, 5, None, "bot", Duration::ZERO).await;
        assert_eq!(sender.sent()[0].1, render_markdown_v2(EMPTY_QUESTION_REPLY));
    }

    #[tokio::test]
    async fn test_question_goes_through_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "**Абонемент:** 5000 руб."}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let sender = FakeSender::default();
        let outcomes = respond(&assistant(server.uri()), &sender, 5, Some("цена"), "bot", Duration::ZERO).await;

        assert_eq!(outcomes, vec![SendOutcome::Formatted]);
        assert_eq!(sender.sent()[0].1, "*Абонемент:* 5000 руб\\.");
        assert_eq!(*sender.typing.lock().unwrap(), vec![5]);
    }

    #[tokio::test]
    async fn test_panicking_turn_sends_error_reply() {
        let sender = FakeSender::default();
        let outcomes = apologize_on_panic(&sender, 9, async { broken_turn() }).await;

        assert_eq!(outcomes, vec![SendOutcome::Formatted]);
        assert_eq!(sender.sent()[0].1, render_markdown_v2(ERROR_REPLY));
    }

    fn broken_turn() -> Vec<SendOutcome> {
        panic!("renderer bug")
    }

    #[tokio::test]
    async fn test_finished_turn_passes_outcomes_through() {
        let sender = FakeSender::default();
        let outcomes = apologize_on_panic(&sender, 9, async { vec![SendOutcome::Plain] }).await;
        assert_eq!(outcomes, vec![SendOutcome::Plain]);
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_chat_locks_serialize_per_chat() {
        let locks = Arc::new(ChatLocks::default());
        let guard = locks.lock(1).await;

        let other_chat = tokio::time::timeout(Duration::from_millis(50), locks.lock(2)).await;
        assert!(other_chat.is_ok());

        let same_chat = tokio::time::timeout(Duration::from_millis(50), locks.lock(1)).await;
        assert!(same_chat.is_err());

        drop(guard);
        let same_chat = tokio::time::timeout(Duration::from_millis(50), locks.lock(1)).await;
        assert!(same_chat.is_ok());
    }
}
