//! Per-connection state machine.
//!
//! ```text
//! Connecting -> Authenticating -> Joined -> Closed
//!      \______________\________________________^   (auth or admission failure)
//! ```
//!
//! A `Joined` session is driven by two sources at once: frames from its
//! transport and events from its broadcaster mailbox. Dropping a session in
//! any state deregisters it.

use std::future::Future;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use parlor_db::MessageStore;
use parlor_types::error::{ChatError, ChatResult};
use parlor_types::events::{ClientMessage, ServerEvent};
use parlor_types::{Identity, Message};

use crate::broadcaster::SessionId;
use crate::registry::validate_room_name;
use crate::{Gateway, blocking};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Joined,
    Closed,
}

/// Bidirectional text channel to one client.
///
/// `recv` must be cancel-safe: the session polls it inside `select!`.
pub trait Transport: Send {
    /// Next text frame, or `None` once the client is gone.
    fn recv(&mut self) -> impl Future<Output = Option<String>> + Send;

    fn send(&mut self, event: &ServerEvent) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// In-process transport over tokio channels. Lets a session run without a
/// socket, e.g. from tests or an embedding application.
pub struct ChannelTransport {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<ServerEvent>,
}

impl ChannelTransport {
    /// Returns the transport plus the client's ends: a sender for frames and a
    /// receiver for server events.
    pub fn pair() -> (
        Self,
        mpsc::UnboundedSender<String>,
        mpsc::UnboundedReceiver<ServerEvent>,
    ) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let transport = Self {
            inbound: in_rx,
            outbound: out_tx,
        };
        (transport, in_tx, out_rx)
    }
}

impl Transport for ChannelTransport {
    async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    async fn send(&mut self, event: &ServerEvent) -> anyhow::Result<()> {
        self.outbound
            .send(event.clone())
            .map_err(|_| anyhow::anyhow!("client receiver dropped"))
    }
}

pub struct Session {
    id: SessionId,
    room: String,
    state: SessionState,
    identity: Option<Identity>,
    gateway: Gateway,
    mailbox: Option<mpsc::UnboundedReceiver<ServerEvent>>,
    /// Timestamp of the newest message sent in the history replay. Live
    /// events at or before it were already delivered as history.
    replayed_until: Option<DateTime<Utc>>,
}

impl Session {
    /// Start a handshake for `room`, taken from the connection target.
    pub fn connect(gateway: Gateway, room: &str) -> ChatResult<Self> {
        validate_room_name(room)?;
        Ok(Self {
            id: Uuid::new_v4(),
            room: room.to_string(),
            state: SessionState::Connecting,
            identity: None,
            gateway,
            mailbox: None,
            replayed_until: None,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Connecting -> Authenticating. On failure the session is closed.
    pub async fn authenticate(&mut self, token: Option<&str>) -> ChatResult<Identity> {
        if self.state != SessionState::Connecting {
            return Err(ChatError::invalid("session already authenticated"));
        }
        self.state = SessionState::Authenticating;

        match self.gateway.resolve(token).await {
            Ok(identity) => {
                self.identity = Some(identity.clone());
                Ok(identity)
            }
            Err(e) => {
                warn!("Session {} for '{}' failed authentication: {}", self.id, self.room, e);
                self.close();
                Err(e)
            }
        }
    }

    /// Authenticating -> Joined. Checks room admission, registers with the
    /// broadcaster, then loads history. Registration happens first so nothing
    /// published while history is read gets lost; `run` drops the live copies
    /// of messages the history already holds.
    ///
    /// A room that does not exist yet is admitted; its first message creates it.
    pub async fn join(&mut self) -> ChatResult<Option<ServerEvent>> {
        let identity = match (&self.state, &self.identity) {
            (SessionState::Authenticating, Some(identity)) => identity.clone(),
            _ => {
                self.close();
                return Err(ChatError::unauthenticated("session is not authenticated"));
            }
        };

        let registry = self.gateway.registry.clone();
        let room = self.room.clone();
        let who = identity.clone();
        let admitted = blocking(move || match registry.join(&room, &who) {
            Ok(_) | Err(ChatError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        })
        .await;

        if let Err(e) = admitted {
            warn!("{} ({}) refused from '{}': {}", identity.username, identity.id, self.room, e);
            self.close();
            return Err(e);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.gateway.broadcaster.register(&self.room, self.id, tx);
        self.mailbox = Some(rx);
        self.state = SessionState::Joined;
        info!("{} ({}) joined '{}'", identity.username, identity.id, self.room);

        let store = self.gateway.store.clone();
        let room = self.room.clone();
        match blocking(move || Ok(store.history(&room)?)).await {
            Ok(messages) => {
                self.replayed_until = messages.last().map(|m| m.timestamp);
                Ok(ServerEvent::history(&messages))
            }
            Err(e) => {
                error!("Failed to load history for '{}': {}", self.room, e);
                self.close();
                Err(e)
            }
        }
    }

    /// Persist one client frame and fan it out to the room, sender included.
    pub async fn handle_frame(&mut self, text: &str) -> ChatResult<Message> {
        let identity = match (&self.state, &self.identity) {
            (SessionState::Joined, Some(identity)) => identity.clone(),
            _ => return Err(ChatError::invalid("session has not joined a room")),
        };

        let frame = ClientMessage::parse(text)?;

        let store = self.gateway.store.clone();
        let room = self.room.clone();
        let message = blocking(move || Ok(store.append(&room, &identity, &frame.message)?)).await?;

        let delivered = self
            .gateway
            .broadcaster
            .publish(&self.room, &ServerEvent::delivered(&message));
        debug!(
            "{} -> '{}' delivered to {} session(s)",
            message.author.username, self.room, delivered
        );

        Ok(message)
    }

    /// Drive a joined session until the client leaves, the transport fails
    /// or storage fails. `history` goes out before any live event.
    pub async fn run<T: Transport>(mut self, mut transport: T, history: Option<ServerEvent>) {
        let Some(mut mailbox) = self.mailbox.take() else {
            warn!("Session {} started without joining", self.id);
            self.close();
            return;
        };

        if let Some(history) = history {
            if let Err(e) = transport.send(&history).await {
                debug!("Session {} lost before history was sent: {}", self.id, e);
                self.close();
                return;
            }
        }

        loop {
            tokio::select! {
                frame = transport.recv() => {
                    let Some(text) = frame else {
                        break;
                    };

                    match self.handle_frame(&text).await {
                        Ok(_) => {}
                        Err(e) if e.is_storage() => {
                            error!("Session {} in '{}' hit a storage failure: {}", self.id, self.room, e);
                            break;
                        }
                        Err(e) => {
                            warn!(
                                "Session {} bad frame: {} -- raw: {}",
                                self.id,
                                e,
                                text.chars().take(200).collect::<String>()
                            );
                            let reply = ServerEvent::Error { error: e.to_string() };
                            if transport.send(&reply).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                event = mailbox.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    if self.already_replayed(&event) {
                        trace!("Session {} skipping live copy of a replayed message", self.id);
                        continue;
                    }
                    if transport.send(&event).await.is_err() {
                        break;
                    }
                }
            }
        }

        self.close();
    }

    /// Per-room timestamps are strictly increasing, so anything at or before
    /// the newest replayed message was part of the replay.
    fn already_replayed(&self, event: &ServerEvent) -> bool {
        match (event, self.replayed_until) {
            (ServerEvent::ChatMessage { timestamp, .. }, Some(cutoff)) => *timestamp <= cutoff,
            _ => false,
        }
    }

    /// Terminal. Safe to call in any state and more than once.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        self.gateway.broadcaster.deregister(&self.room, self.id);
        self.mailbox = None;

        if let Some(identity) = self.identity.take() {
            if self.state == SessionState::Joined {
                info!("{} ({}) left '{}'", identity.username, identity.id, self.room);
            }
        }
        self.state = SessionState::Closed;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parlor_db::Database;
    use parlor_types::Privacy;

    use super::*;
    use crate::auth::{AuthMode, Verifier};

    struct Fixture {
        db: Arc<Database>,
        gateway: Gateway,
    }

    impl Fixture {
        fn new() -> Self {
            let db = Arc::new(Database::open_in_memory().unwrap());
            let gateway = Gateway::new(db.clone(), Verifier::new("test-secret", AuthMode::Token));
            Self { db, gateway }
        }

        fn user(&self, name: &str) -> (Identity, String) {
            let id = Uuid::new_v4();
            self.db.create_user(&id.to_string(), name, None, "hash").unwrap();
            let identity = Identity::new(id, name);
            let token = self.gateway.verifier.issue(&identity).unwrap();
            (identity, token)
        }
    }

    #[tokio::test]
    async fn bad_token_closes_before_registration() {
        let f = Fixture::new();
        let mut session = Session::connect(f.gateway.clone(), "general").unwrap();
        assert_eq!(session.state(), SessionState::Connecting);

        let err = session.authenticate(Some("forged")).await.unwrap_err();
        assert!(matches!(err, ChatError::Unauthenticated(_)));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.identity().is_none());

        // a closed session can never join
        assert!(session.join().await.is_err());
        assert_eq!(f.gateway.broadcaster.subscribers("general"), 0);
    }

    #[tokio::test]
    async fn missing_token_rejected() {
        let f = Fixture::new();
        let mut session = Session::connect(f.gateway.clone(), "general").unwrap();
        assert!(matches!(session.authenticate(None).await, Err(ChatError::Unauthenticated(_))));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn invalid_room_name_refused_at_connect() {
        let f = Fixture::new();
        assert!(matches!(
            Session::connect(f.gateway.clone(), ""),
            Err(ChatError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn join_without_authentication_fails() {
        let f = Fixture::new();
        let mut session = Session::connect(f.gateway.clone(), "general").unwrap();
        assert!(matches!(session.join().await, Err(ChatError::Unauthenticated(_))));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn join_registers_and_drop_deregisters() {
        let f = Fixture::new();
        let (_, token) = f.user("alice");

        let mut session = Session::connect(f.gateway.clone(), "general").unwrap();
        session.authenticate(Some(&token)).await.unwrap();
        let history = session.join().await.unwrap();
        assert!(history.is_none());
        assert_eq!(session.state(), SessionState::Joined);
        assert!(f.gateway.broadcaster.is_registered("general", session.id()));

        let id = session.id();
        drop(session);
        assert!(!f.gateway.broadcaster.is_registered("general", id));
    }

    #[tokio::test]
    async fn private_room_refuses_outsider() {
        let f = Fixture::new();
        let (alice, _) = f.user("alice");
        let (_, bob_token) = f.user("bob");
        f.gateway
            .registry
            .get_or_create("secret", &alice, Some(Privacy::Private))
            .unwrap();

        let mut session = Session::connect(f.gateway.clone(), "secret").unwrap();
        session.authenticate(Some(&bob_token)).await.unwrap();
        assert!(matches!(session.join().await, Err(ChatError::Forbidden(_))));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(f.gateway.broadcaster.subscribers("secret"), 0);
    }

    #[tokio::test]
    async fn frame_creates_room_and_echoes_to_sender() {
        let f = Fixture::new();
        let (alice, token) = f.user("alice");

        let mut session = Session::connect(f.gateway.clone(), "fresh").unwrap();
        session.authenticate(Some(&token)).await.unwrap();
        session.join().await.unwrap();
        let mut mailbox = session.mailbox.take().unwrap();

        let msg = session.handle_frame(r#"{"message":"hi"}"#).await.unwrap();
        assert_eq!(msg.author, alice);

        let room = f.db.get_room("fresh").unwrap().unwrap();
        assert_eq!(room.creator, alice);

        match mailbox.recv().await.unwrap() {
            ServerEvent::ChatMessage { message, username, timestamp } => {
                assert_eq!(message, "hi");
                assert_eq!(username, "alice");
                assert_eq!(timestamp, msg.timestamp);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_frame_is_reported_not_fatal() {
        let f = Fixture::new();
        let (_, token) = f.user("alice");

        let mut session = Session::connect(f.gateway.clone(), "general").unwrap();
        session.authenticate(Some(&token)).await.unwrap();
        let history = session.join().await.unwrap();

        let (transport, client_tx, mut client_rx) = ChannelTransport::pair();
        let task = tokio::spawn(session.run(transport, history));

        client_tx.send("{not json".to_string()).unwrap();
        assert!(matches!(client_rx.recv().await, Some(ServerEvent::Error { .. })));

        client_tx.send(r#"{"message":"still here"}"#.to_string()).unwrap();
        assert!(matches!(
            client_rx.recv().await,
            Some(ServerEvent::ChatMessage { message, .. }) if message == "still here"
        ));

        drop(client_tx);
        task.await.unwrap();
        assert_eq!(f.gateway.broadcaster.subscribers("general"), 0);
    }

    #[tokio::test]
    async fn token_for_unknown_user_is_refused() {
        let f = Fixture::new();
        let ghost = Identity::new(Uuid::new_v4(), "ghost");
        let token = f.gateway.verifier.issue(&ghost).unwrap();

        let mut session = Session::connect(f.gateway.clone(), "general").unwrap();
        let err = session.authenticate(Some(&token)).await.unwrap_err();
        assert!(matches!(err, ChatError::Unauthenticated(_)));
        assert_eq!(session.state(), SessionState::Closed);

        // same name, different account
        f.user("ghost");
        let mut session = Session::connect(f.gateway.clone(), "general").unwrap();
        assert!(matches!(
            session.authenticate(Some(&token)).await,
            Err(ChatError::Unauthenticated(_))
        ));
    }

    #[tokio::test]
    async fn message_in_history_is_not_repeated_live() {
        let f = Fixture::new();
        let (alice, _) = f.user("alice");
        let (_, bob_token) = f.user("bob");

        let mut bob = Session::connect(f.gateway.clone(), "general").unwrap();
        bob.authenticate(Some(&bob_token)).await.unwrap();

        // persisted before bob reads history, published after he registered
        let hi = f.gateway.store.append("general", &alice, "hi").unwrap();
        let history = bob.join().await.unwrap();
        f.gateway.broadcaster.publish("general", &ServerEvent::delivered(&hi));

        let (transport, client_tx, mut client_rx) = ChannelTransport::pair();
        let task = tokio::spawn(bob.run(transport, history));

        let next = f.gateway.store.append("general", &alice, "next").unwrap();
        f.gateway.broadcaster.publish("general", &ServerEvent::delivered(&next));

        match client_rx.recv().await {
            Some(ServerEvent::ChatHistory { messages }) => {
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].message, "hi");
            }
            other => panic!("expected history, got {:?}", other),
        }
        assert_eq!(client_rx.recv().await, Some(ServerEvent::delivered(&next)));

        drop(client_tx);
        task.await.unwrap();
        assert!(client_rx.try_recv().is_err());
    }
}
