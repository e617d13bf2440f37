//! HTTP side of Parlor: registration, login and room administration.

pub mod auth;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod rooms;

use std::sync::Arc;

use axum::{
    Json, Router,
    routing::{get, post},
};
use serde_json::{Value, json};

use parlor_db::Database;
use parlor_gateway::Gateway;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    /// Account storage sits outside the chat store.
    pub db: Arc<Database>,
    pub gateway: Gateway,
}

impl AppStateInner {
    pub fn new(db: Arc<Database>, gateway: Gateway) -> AppState {
        Arc::new(Self { db, gateway })
    }
}

/// Every HTTP route. The room socket is mounted separately by the server.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/health", get(health));

    let protected_routes = Router::new()
        .route("/rooms", post(rooms::create_room).get(rooms::list_rooms))
        .route("/rooms/{name}/exists", get(rooms::room_exists))
        .route("/rooms/{name}/join", post(rooms::join_room))
        .route("/rooms/{name}/invite", post(rooms::invite))
        .route("/rooms/{name}/participants", get(rooms::participants))
        .route("/rooms/{name}/history", get(rooms::history))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
