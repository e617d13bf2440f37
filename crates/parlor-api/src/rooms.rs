use axum::{
    Extension,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use parlor_db::{ChatStore, MessageStore, RoomStore};
use parlor_gateway::blocking;
use parlor_types::api::{
    CreateRoomRequest, HistoryResponse, InviteRequest, InviteResponse, ParticipantsResponse,
    RoomExistsResponse, RoomListResponse, RoomResponse, RoomSummary,
};
use parlor_types::error::ChatResult;
use parlor_types::events::HistoryEntry;
use parlor_types::{Identity, Room};

use crate::AppState;
use crate::error::ApiError;
use crate::extract::Json;

fn summarize(store: &dyn ChatStore, room: &Room) -> ChatResult<RoomSummary> {
    Ok(RoomSummary::new(room, store.latest_timestamp(&room.name)?))
}

fn success() -> String {
    "success".into()
}

/// 201 when the room was created, 200 when it already existed.
pub async fn create_room(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let registry = state.gateway.registry.clone();
    let store = state.gateway.store.clone();
    let who = identity.clone();

    let (summary, created) = blocking(move || {
        let (room, created) = registry.get_or_create(&req.name, &who, req.privacy)?;
        Ok((summarize(store.as_ref(), &room)?, created))
    })
    .await?;

    let status = if created {
        info!("{} created {} room '{}'", identity.username, summary.privacy, summary.name);
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(RoomResponse {
            status: success(),
            room: summary,
        }),
    ))
}

pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<RoomListResponse>, ApiError> {
    let registry = state.gateway.registry.clone();
    let store = state.gateway.store.clone();

    let rooms = blocking(move || {
        registry
            .list_visible(&identity)?
            .iter()
            .map(|room| summarize(store.as_ref(), room))
            .collect::<ChatResult<Vec<_>>>()
    })
    .await?;

    Ok(Json(RoomListResponse {
        status: success(),
        rooms,
    }))
}

pub async fn room_exists(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<RoomExistsResponse>, ApiError> {
    let store = state.gateway.store.clone();
    let lookup = name.clone();
    let exists = blocking(move || Ok(store.room(&lookup)?.is_some())).await?;

    Ok(Json(RoomExistsResponse {
        exists,
        room_name: name,
    }))
}

pub async fn join_room(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(name): Path<String>,
) -> Result<Json<RoomResponse>, ApiError> {
    let registry = state.gateway.registry.clone();
    let store = state.gateway.store.clone();

    let room = blocking(move || {
        let room = registry.join(&name, &identity)?;
        summarize(store.as_ref(), &room)
    })
    .await?;

    Ok(Json(RoomResponse {
        status: success(),
        room,
    }))
}

pub async fn invite(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(name): Path<String>,
    Json(req): Json<InviteRequest>,
) -> Result<Json<InviteResponse>, ApiError> {
    let registry = state.gateway.registry.clone();
    let room = name.clone();
    let inviter = identity.clone();

    let invitee = blocking(move || registry.invite(&room, &inviter, &req.username)).await?;

    info!("{} invited {} to '{}'", identity.username, invitee.username, name);

    Ok(Json(InviteResponse {
        status: success(),
        room_name: name,
        username: invitee.username,
    }))
}

pub async fn participants(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(name): Path<String>,
) -> Result<Json<ParticipantsResponse>, ApiError> {
    let registry = state.gateway.registry.clone();
    let room = name.clone();

    let participants = blocking(move || registry.participants(&room, &identity)).await?;

    Ok(Json(ParticipantsResponse {
        status: success(),
        room_name: name,
        participants: participants.into_iter().map(|p| p.username).collect(),
    }))
}

/// Unlike the room socket, a missing room is a 404 here.
pub async fn history(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(name): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let registry = state.gateway.registry.clone();
    let store = state.gateway.store.clone();

    let messages = blocking(move || {
        registry.readable(&name, &identity)?;
        Ok(store.history(&name)?)
    })
    .await?;

    Ok(Json(HistoryResponse {
        status: success(),
        messages: messages.iter().map(HistoryEntry::from).collect(),
    }))
}
