/// Database row types. These map directly to SQLite rows and are converted
/// into parlor-types models at the edge of the crate.
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use parlor_types::{Identity, Message, Room};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub password: String,
    pub created_at: String,
}

pub struct RoomRow {
    pub id: String,
    pub name: String,
    pub privacy: String,
    pub creator_id: String,
    pub creator_username: String,
    pub created_at: i64,
}

pub struct ParticipantRow {
    pub room_id: String,
    pub user_id: String,
    pub username: String,
}

pub struct MessageRow {
    pub id: String,
    pub room_name: String,
    pub author_id: String,
    pub author_username: String,
    pub content: String,
    pub created_at: i64,
}

impl UserRow {
    pub fn identity(&self) -> Result<Identity> {
        Ok(Identity::new(parse_id(&self.id)?, self.username.clone()))
    }
}

impl ParticipantRow {
    pub fn identity(&self) -> Result<Identity> {
        Ok(Identity::new(parse_id(&self.user_id)?, self.username.clone()))
    }
}

impl RoomRow {
    pub fn into_room(self, participants: Vec<Identity>) -> Result<Room> {
        let privacy = self
            .privacy
            .parse()
            .map_err(|e: String| anyhow!("Corrupt room '{}': {}", self.name, e))?;

        Ok(Room {
            id: parse_id(&self.id)?,
            creator: Identity::new(parse_id(&self.creator_id)?, self.creator_username),
            name: self.name,
            privacy,
            participants,
            created_at: from_micros(self.created_at)?,
        })
    }
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        Ok(Message {
            id: parse_id(&self.id)?,
            room: self.room_name,
            author: Identity::new(parse_id(&self.author_id)?, self.author_username),
            content: self.content,
            timestamp: from_micros(self.created_at)?,
        })
    }
}

pub(crate) fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("Corrupt id '{}'", raw))
}

pub(crate) fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

pub(crate) fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| anyhow!("Timestamp out of range: {}", micros))
}
