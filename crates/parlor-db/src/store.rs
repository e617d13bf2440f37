//! Storage seams used by the gateway and the HTTP API.
//!
//! The room registry, the message store and the sessions take an
//! `Arc<dyn ChatStore>` instead of reaching for the database directly, so
//! tests can hand them an in-memory database or a double.

use anyhow::Result;
use chrono::{DateTime, Utc};

use parlor_types::{Identity, Message, Privacy, Room};

use crate::Database;

pub trait RoomStore: Send + Sync {
    fn find_user(&self, username: &str) -> Result<Option<Identity>>;

    fn room(&self, name: &str) -> Result<Option<Room>>;

    /// Returns the room and whether it was created by this call.
    fn get_or_create_room(&self, name: &str, creator: &Identity, privacy: Privacy)
    -> Result<(Room, bool)>;

    /// Idempotent; true when the participant set changed.
    fn add_participant(&self, room: &str, user: &Identity) -> Result<bool>;

    /// Every room, ordered by name.
    fn rooms(&self) -> Result<Vec<Room>>;
}

pub trait MessageStore: Send + Sync {
    /// Persist a message, implicitly creating the room with `author` as creator.
    fn append(&self, room: &str, author: &Identity, content: &str) -> Result<Message>;

    /// Oldest first; empty for rooms that do not exist.
    fn history(&self, room: &str) -> Result<Vec<Message>>;

    fn latest_timestamp(&self, room: &str) -> Result<Option<DateTime<Utc>>>;
}

pub trait ChatStore: RoomStore + MessageStore {}

impl<T: RoomStore + MessageStore> ChatStore for T {}

impl RoomStore for Database {
    fn find_user(&self, username: &str) -> Result<Option<Identity>> {
        self.get_user_by_username(username)?
            .map(|row| row.identity())
            .transpose()
    }

    fn room(&self, name: &str) -> Result<Option<Room>> {
        self.get_room(name)
    }

    fn get_or_create_room(
        &self,
        name: &str,
        creator: &Identity,
        privacy: Privacy,
    ) -> Result<(Room, bool)> {
        Database::get_or_create_room(self, name, creator, privacy)
    }

    fn add_participant(&self, room: &str, user: &Identity) -> Result<bool> {
        Database::add_participant(self, room, user)
    }

    fn rooms(&self) -> Result<Vec<Room>> {
        self.list_rooms()
    }
}

impl MessageStore for Database {
    fn append(&self, room: &str, author: &Identity, content: &str) -> Result<Message> {
        self.insert_message(room, author, content)
    }

    fn history(&self, room: &str) -> Result<Vec<Message>> {
        self.get_messages(room)
    }

    fn latest_timestamp(&self, room: &str) -> Result<Option<DateTime<Utc>>> {
        self.latest_message_at(room)
    }
}
