//! Telegram assistant for a guitar school: answers questions from cached
//! website text through a chat-completion API.

pub mod assistant;
pub mod bot;
pub mod completion;
pub mod config;
pub mod format;
pub mod prompt;
pub mod site;
pub mod telegram_log;
