use std::sync::Arc;

use parlor_db::{ChatStore, RoomStore};
use parlor_types::error::{ChatError, ChatResult};
use parlor_types::{Identity, Privacy, Room};

pub const MAX_ROOM_NAME_LEN: usize = 255;

/// Room names travel in URL paths, so slashes and control characters are out.
pub fn validate_room_name(name: &str) -> ChatResult<()> {
    if name.trim().is_empty() {
        return Err(ChatError::invalid("room name is required"));
    }
    if name.chars().count() > MAX_ROOM_NAME_LEN {
        return Err(ChatError::invalid(format!(
            "room name cannot exceed {} characters",
            MAX_ROOM_NAME_LEN
        )));
    }
    if name.chars().any(|c| c == '/' || c.is_control()) {
        return Err(ChatError::invalid("room name contains invalid characters"));
    }
    Ok(())
}

/// Membership rules on top of the room store.
///
/// All methods block on storage; async callers go through [`crate::blocking`].
#[derive(Clone)]
pub struct RoomRegistry {
    store: Arc<dyn ChatStore>,
}

impl RoomRegistry {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Idempotent. A new room is public unless `privacy` says otherwise, and
    /// `identity` becomes its creator and only participant.
    pub fn get_or_create(
        &self,
        name: &str,
        identity: &Identity,
        privacy: Option<Privacy>,
    ) -> ChatResult<(Room, bool)> {
        validate_room_name(name)?;
        Ok(self
            .store
            .get_or_create_room(name, identity, privacy.unwrap_or_default())?)
    }

    pub fn room(&self, name: &str) -> ChatResult<Room> {
        self.store
            .room(name)?
            .ok_or_else(|| ChatError::not_found(format!("room '{}' not found", name)))
    }

    pub fn join(&self, name: &str, identity: &Identity) -> ChatResult<Room> {
        let room = self.room(name)?;

        if room.is_participant(identity.id) {
            return Ok(room);
        }
        if room.privacy == Privacy::Private {
            return Err(ChatError::forbidden(format!(
                "room '{}' is private; an invitation is required",
                name
            )));
        }

        self.store.add_participant(name, identity)?;
        self.room(name)
    }

    /// Returns the invited identity.
    pub fn invite(&self, name: &str, inviter: &Identity, invitee_username: &str) -> ChatResult<Identity> {
        let room = self.room(name)?;

        if !room.is_participant(inviter.id) {
            return Err(ChatError::forbidden(format!(
                "only participants of '{}' can invite",
                name
            )));
        }

        let invitee = self
            .store
            .find_user(invitee_username)?
            .ok_or_else(|| ChatError::not_found(format!("user '{}' not found", invitee_username)))?;

        self.store.add_participant(name, &invitee)?;
        Ok(invitee)
    }

    /// Public rooms plus the private rooms `identity` participates in.
    pub fn list_visible(&self, identity: &Identity) -> ChatResult<Vec<Room>> {
        Ok(self
            .store
            .rooms()?
            .into_iter()
            .filter(|room| room.is_visible_to(identity.id))
            .collect())
    }

    /// The room itself, if `requester` may read it.
    pub fn readable(&self, name: &str, requester: &Identity) -> ChatResult<Room> {
        let room = self.room(name)?;
        if !room.is_visible_to(requester.id) {
            return Err(ChatError::forbidden(format!(
                "room '{}' is private",
                name
            )));
        }
        Ok(room)
    }

    pub fn participants(&self, name: &str, requester: &Identity) -> ChatResult<Vec<Identity>> {
        Ok(self.readable(name, requester)?.participants)
    }
}
