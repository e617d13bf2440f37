pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State, WebSocketUpgrade},
    response::Response,
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use parlor_api::error::ApiError;
use parlor_api::extract::Query;
use parlor_api::{AppState, AppStateInner};
use parlor_db::Database;
use parlor_gateway::{AuthMode, Gateway, Verifier, admit, serve};

use crate::config::{AuthModeKind, Config};

/// Wire storage, verifier and gateway together. In development mode the
/// fallback identity is created in storage so its rooms and messages have a
/// real author.
pub fn build_state(db: Arc<Database>, config: &Config) -> anyhow::Result<AppState> {
    let mode = match config.auth_mode {
        AuthModeKind::Token => AuthMode::Token,
        AuthModeKind::Development => {
            let identity = db.ensure_user(&config.dev_username)?;
            warn!(
                "Development auth mode: connections without a token act as '{}'",
                identity.username
            );
            AuthMode::Development { identity }
        }
    };

    let verifier = Verifier::new(config.jwt_secret.clone(), mode)
        .with_token_ttl(chrono::Duration::hours(config.token_ttl_hours));
    let gateway = Gateway::new(db.clone(), verifier);

    Ok(AppStateInner::new(db, gateway))
}

pub fn app(state: AppState) -> Router {
    let ws_routes = Router::new()
        .route("/ws/chat/{room_name}", get(ws_upgrade))
        .route("/ws/chat/{room_name}/", get(ws_upgrade))
        .with_state(state.clone());

    Router::new()
        .merge(parlor_api::router(state))
        .merge(ws_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// The handshake runs before the upgrade, so a refused client gets a plain
/// HTTP error and never a socket.
async fn ws_upgrade(
    State(state): State<AppState>,
    Path(room_name): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let (session, history) = admit(&state.gateway, &room_name, query.token.as_deref()).await?;
    Ok(ws.on_upgrade(move |socket| serve(session, history, socket)))
}
