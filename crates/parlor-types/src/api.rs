use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::HistoryEntry;
use crate::models::{Privacy, Room};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the room socket handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Returned by both register and login.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Rooms --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateRoomRequest {
    pub name: String,
    #[serde(default)]
    pub privacy: Option<Privacy>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InviteRequest {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSummary {
    pub name: String,
    pub privacy: Privacy,
    pub creator: String,
    pub participants: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub latest_message_at: Option<DateTime<Utc>>,
}

impl RoomSummary {
    pub fn new(room: &Room, latest_message_at: Option<DateTime<Utc>>) -> Self {
        Self {
            name: room.name.clone(),
            privacy: room.privacy,
            creator: room.creator.username.clone(),
            participants: room.participants.iter().map(|p| p.username.clone()).collect(),
            created_at: room.created_at,
            latest_message_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoomResponse {
    pub status: String,
    pub room: RoomSummary,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoomListResponse {
    pub status: String,
    pub rooms: Vec<RoomSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ParticipantsResponse {
    pub status: String,
    pub room_name: String,
    pub participants: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub status: String,
    pub messages: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InviteResponse {
    pub status: String,
    pub room_name: String,
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoomExistsResponse {
    pub exists: bool,
    pub room_name: String,
}

/// Body of every non-2xx response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub error: String,
}
