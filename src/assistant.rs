//! Answering questions: site snapshot → prompt → completion → chunks.

use std::sync::Arc;

use tracing::info;

use crate::completion::CompletionClient;
use crate::config::Config;
use crate::format::prepare_reply;
use crate::prompt::{build_messages, PromptOptions};
use crate::site::SiteCache;

/// Reply to messages without any text.
pub const EMPTY_QUESTION_REPLY: &str = "❓ Напиши, пожалуйста, вопрос текстом.";

/// Reply when handling a message panicked.
pub const ERROR_REPLY: &str = "Что-то пошло не так... Попробуйте задать вопрос иначе.";

pub struct Assistant {
    cache: Arc<SiteCache>,
    completion: CompletionClient,
    prompt: PromptOptions,
    chunk_limit: usize,
}

impl Assistant {
    pub fn new(
        cache: Arc<SiteCache>,
        completion: CompletionClient,
        prompt: PromptOptions,
        chunk_limit: usize,
    ) -> Self {
        Self {
            cache,
            completion,
            prompt,
            chunk_limit,
        }
    }

    pub fn from_config(config: &Config, cache: Arc<SiteCache>, completion: CompletionClient) -> Self {
        let prompt = PromptOptions {
            school_name: config.school_name.clone(),
            char_budget: config.prompt_char_budget,
        };
        Self::new(cache, completion, prompt, config.chunk_limit)
    }

    /// The model's reply, or a fixed fallback. Never fails.
    pub async fn answer(&self, question: &str) -> String {
        let question = question.trim();
        if question.is_empty() {
            return EMPTY_QUESTION_REPLY.to_string();
        }

        let snapshot = self.cache.snapshot();
        let messages = build_messages(&snapshot, question, &self.prompt);
        info!(
            "❔ Question ({} chars), prompt {} chars",
            question.chars().count(),
            messages.iter().map(|m| m.content.chars().count()).sum::<usize>()
        );
        self.completion.answer(&messages).await
    }

    /// MarkdownV2 chunks of `reply`, each within the chunk limit.
    pub fn prepare(&self, reply: &str) -> Vec<String> {
        prepare_reply(reply, self.chunk_limit)
    }
}
