use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A resolved user. The chat core only ever reads identities; users are
/// created and authenticated by the auth endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub username: String,
}

impl Identity {
    pub fn new(id: Uuid, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    #[default]
    Public,
    Private,
}

impl Privacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl fmt::Display for Privacy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Privacy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(format!("unknown privacy mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub privacy: Privacy,
    pub creator: Identity,
    /// Ordered by join time; the creator is always first.
    pub participants: Vec<Identity>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.creator.id == user_id || self.participants.iter().any(|p| p.id == user_id)
    }

    /// Public rooms are visible to everyone, private rooms only to participants.
    pub fn is_visible_to(&self, user_id: Uuid) -> bool {
        self.privacy == Privacy::Public || self.is_participant(user_id)
    }
}

/// A persisted chat message. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub room: String,
    pub author: Identity,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}
