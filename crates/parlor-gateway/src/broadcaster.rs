use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{trace, warn};
use uuid::Uuid;

use parlor_types::events::ServerEvent;

pub type SessionId = Uuid;

/// Sending half of a session's mailbox.
pub type MailboxSender = mpsc::UnboundedSender<ServerEvent>;

/// Per-room fan-out: room name -> (session id -> mailbox).
///
/// Only mailbox senders are stored here, never the sessions themselves. A
/// dropped session's mailbox closes and is pruned on the next publish.
#[derive(Clone, Default)]
pub struct Broadcaster {
    inner: Arc<BroadcasterInner>,
}

#[derive(Default)]
struct BroadcasterInner {
    /// One lock serializes register, deregister and publish. It is never held
    /// across an await: mailbox sends are unbounded and synchronous.
    rooms: Mutex<HashMap<String, HashMap<SessionId, MailboxSender>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<String, HashMap<SessionId, MailboxSender>>> {
        // Every critical section leaves the map consistent, poisoned or not
        self.inner.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Idempotent. Returns true if the session was not registered yet.
    pub fn register(&self, room: &str, session: SessionId, mailbox: MailboxSender) -> bool {
        self.rooms()
            .entry(room.to_string())
            .or_default()
            .insert(session, mailbox)
            .is_none()
    }

    /// Idempotent. Returns true if the session was registered.
    pub fn deregister(&self, room: &str, session: SessionId) -> bool {
        let mut rooms = self.rooms();
        let Some(sessions) = rooms.get_mut(room) else {
            return false;
        };

        let removed = sessions.remove(&session).is_some();
        if sessions.is_empty() {
            rooms.remove(room);
        }
        removed
    }

    /// Deliver `event` to every session registered in `room` right now.
    /// Returns how many mailboxes accepted it. A closed mailbox is dropped
    /// from the room without affecting delivery to the others.
    pub fn publish(&self, room: &str, event: &ServerEvent) -> usize {
        let mut rooms = self.rooms();
        let Some(sessions) = rooms.get_mut(room) else {
            trace!("Publish to '{}' with no listeners", room);
            return 0;
        };

        let mut delivered = 0;
        sessions.retain(|session, mailbox| match mailbox.send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                warn!("Session {} mailbox closed, dropping it from '{}'", session, room);
                false
            }
        });

        if sessions.is_empty() {
            rooms.remove(room);
        }
        delivered
    }

    pub fn subscribers(&self, room: &str) -> usize {
        self.rooms().get(room).map_or(0, HashMap::len)
    }

    pub fn is_registered(&self, room: &str, session: SessionId) -> bool {
        self.rooms()
            .get(room)
            .is_some_and(|sessions| sessions.contains_key(&session))
    }
}
