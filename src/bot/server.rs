//! HTTP side: liveness checks and, in webhook mode, the update route.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use teloxide::types::{Update, UpdateKind};
use tracing::{debug, info, warn};

use crate::bot::{handle_message, BotState};
use crate::site::SiteCache;

/// Where Telegram pushes updates in webhook mode.
#[derive(Clone)]
pub struct Webhook {
    pub token: String,
    pub state: Arc<BotState>,
}

#[derive(Clone)]
struct ServerState {
    cache: Arc<SiteCache>,
    webhook: Option<Webhook>,
}

pub fn router(cache: Arc<SiteCache>, webhook: Option<Webhook>) -> Router {
    let with_webhook = webhook.is_some();
    let router = Router::new()
        .route("/", get(root))
        .route("/health", get(health));
    let router = if with_webhook {
        router.route("/:token", post(receive_update))
    } else {
        router
    };
    router.with_state(ServerState { cache, webhook })
}

/// Bind `0.0.0.0:<port>` and serve until the process exits.
pub async fn serve(port: u16, router: Router) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🌐 HTTP server listening on {}", addr);
    axum::serve(listener, router).await
}

async fn root() -> &'static str {
    "OK"
}

async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    let snapshot = state.cache.snapshot();
    Json(serde_json::json!({
        "status": "ok",
        "pages": snapshot.pages.iter().filter(|p| !p.text.trim().is_empty()).count(),
        "chars": snapshot.total_chars(),
        "refreshed_at": snapshot.refreshed_at.map(|t| t.to_rfc3339()),
    }))
}

async fn receive_update(
    State(state): State<ServerState>,
    Path(token): Path<String>,
    body: Bytes,
) -> StatusCode {
    let Some(webhook) = state.webhook else {
        return StatusCode::NOT_FOUND;
    };
    if token != webhook.token {
        debug!("Update posted with a wrong token, ignoring");
        return StatusCode::NOT_FOUND;
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!("Malformed update: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };

    match update.kind {
        UpdateKind::Message(msg) => {
            let bot_state = webhook.state.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_message(msg, bot_state).await {
                    warn!("Failed to handle message: {}", e);
                }
            });
        }
        _ => debug!("Ignoring update {}", update.id.0),
    }
    StatusCode::OK
}
