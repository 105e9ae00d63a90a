use std::path::PathBuf;
use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use guitarbot::assistant::Assistant;
use guitarbot::bot::server::{self, Webhook};
use guitarbot::bot::{handle_message, BotState, TelegramClient};
use guitarbot::completion::{CompletionClient, CompletionSettings};
use guitarbot::config::Config;
use guitarbot::site::{spawn_refresher, SiteCache, SiteContent, SiteLoader};
use guitarbot::telegram_log::AdminLogLayer;

fn env_filter(debug: bool) -> tracing_subscriber::EnvFilter {
    let level = if debug { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let settings_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("BOT_CONFIG").ok())
        .map(PathBuf::from);
    let config = match Config::load(settings_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create log directory {}: {e}", log_dir.display());
        std::process::exit(1);
    }
    let (non_blocking, _guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(&log_dir, "guitarbot.log"));

    let admin_layer = config
        .log_chat_id
        .map(|chat_id| AdminLogLayer::new(bot.clone(), chat_id));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(env_filter(config.debug)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(env_filter(config.debug)),
        )
        .with(admin_layer)
        .init();

    info!("🚀 Starting guitarbot...");
    match &settings_path {
        Some(path) => info!("Loaded settings from {}", path.display()),
        None => info!("No settings file, using defaults"),
    }
    info!("Models: {:?}", config.models);

    let loader = SiteLoader::from_config(&config);
    let cache = Arc::new(SiteCache::new(SiteContent::empty(loader.pages())));
    spawn_refresher(loader, cache.clone(), config.refresh_interval);

    let bot_username = match bot.get_me().await {
        Ok(me) => {
            info!("Bot username: @{}", me.username());
            me.username().to_string()
        }
        Err(e) => {
            warn!("Failed to get bot info: {e}");
            String::new()
        }
    };

    let completion = CompletionClient::new(CompletionSettings::from_config(&config));
    let assistant = Assistant::from_config(&config, cache.clone(), completion);
    let state = Arc::new(BotState::new(
        assistant,
        TelegramClient::new(bot.clone()),
        bot_username,
        config.send_delay,
    ));

    if config.is_webhook() {
        let webhook_url = config.webhook_url.as_deref().unwrap_or_default();
        let url = format!("{}/{}", webhook_url, config.telegram_bot_token);
        let url = match reqwest::Url::parse(&url) {
            Ok(url) => url,
            Err(e) => {
                error!("Invalid WEBHOOK_URL: {e}");
                std::process::exit(1);
            }
        };
        if let Err(e) = bot.set_webhook(url).await {
            error!("Failed to set webhook: {e}");
            std::process::exit(1);
        }
        info!("Webhook mode, updates pushed to {}/<token>", webhook_url);

        let webhook = Webhook {
            token: config.telegram_bot_token.clone(),
            state,
        };
        if let Err(e) = server::serve(config.port, server::router(cache, Some(webhook))).await {
            error!("HTTP server failed: {e}");
            std::process::exit(1);
        }
        return;
    }

    info!("Polling mode");
    if let Err(e) = bot.delete_webhook().await {
        warn!("Failed to delete webhook: {e}");
    }
    let port = config.port;
    tokio::spawn(async move {
        if let Err(e) = server::serve(port, server::router(cache, None)).await {
            warn!("Health server failed: {e}");
        }
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}
