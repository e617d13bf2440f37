//! Whole-room scenarios driven through in-process transports.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use chrono::{DateTime, Utc};
use parlor_db::{ChatStore, Database, MessageStore, RoomStore};
use parlor_gateway::{AuthMode, ChannelTransport, Gateway, Verifier, admit};
use parlor_types::error::ChatError;
use parlor_types::events::{HistoryEntry, ServerEvent};
use parlor_types::{Identity, Message, Privacy, Room};

/// Database whose history reads take a while, widening the window between a
/// session registering and its replay being loaded.
struct SlowHistory {
    db: Arc<Database>,
    delay: Duration,
}

impl RoomStore for SlowHistory {
    fn find_user(&self, username: &str) -> anyhow::Result<Option<Identity>> {
        self.db.find_user(username)
    }

    fn room(&self, name: &str) -> anyhow::Result<Option<Room>> {
        RoomStore::room(self.db.as_ref(), name)
    }

    fn get_or_create_room(
        &self,
        name: &str,
        creator: &Identity,
        privacy: Privacy,
    ) -> anyhow::Result<(Room, bool)> {
        RoomStore::get_or_create_room(self.db.as_ref(), name, creator, privacy)
    }

    fn add_participant(&self, room: &str, user: &Identity) -> anyhow::Result<bool> {
        RoomStore::add_participant(self.db.as_ref(), room, user)
    }

    fn rooms(&self) -> anyhow::Result<Vec<Room>> {
        self.db.rooms()
    }
}

impl MessageStore for SlowHistory {
    fn append(&self, room: &str, author: &Identity, content: &str) -> anyhow::Result<Message> {
        self.db.append(room, author, content)
    }

    fn history(&self, room: &str) -> anyhow::Result<Vec<Message>> {
        std::thread::sleep(self.delay);
        self.db.history(room)
    }

    fn latest_timestamp(&self, room: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        self.db.latest_timestamp(room)
    }
}

struct Server {
    db: Arc<Database>,
    gateway: Gateway,
}

struct Client {
    tx: UnboundedSender<String>,
    rx: UnboundedReceiver<ServerEvent>,
    task: JoinHandle<()>,
}

impl Server {
    fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        Self::with_store(db.clone(), db)
    }

    fn with_store(db: Arc<Database>, store: Arc<dyn ChatStore>) -> Self {
        let gateway = Gateway::new(store, Verifier::new("room-flow-secret", AuthMode::Token));
        Self { db, gateway }
    }

    fn user(&self, name: &str) -> (Identity, String) {
        let id = Uuid::new_v4();
        self.db.create_user(&id.to_string(), name, None, "hash").unwrap();
        let identity = Identity::new(id, name);
        let token = self.gateway.verifier.issue(&identity).unwrap();
        (identity, token)
    }

    async fn connect(&self, room: &str, token: &str) -> Result<Client, ChatError> {
        let (session, history) = admit(&self.gateway, room, Some(token)).await?;
        let (transport, tx, rx) = ChannelTransport::pair();
        let task = tokio::spawn(session.run(transport, history));
        Ok(Client { tx, rx, task })
    }
}

impl Client {
    fn say(&self, text: &str) {
        self.tx
            .send(serde_json::json!({ "message": text }).to_string())
            .unwrap();
    }

    async fn next(&mut self) -> ServerEvent {
        timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("session ended")
    }

    async fn next_chat(&mut self) -> (String, String) {
        match self.next().await {
            ServerEvent::ChatMessage { message, username, .. } => (username, message),
            other => panic!("expected chat_message, got {:?}", other),
        }
    }

    async fn history(&mut self) -> Vec<HistoryEntry> {
        match self.next().await {
            ServerEvent::ChatHistory { messages } => messages,
            other => panic!("expected chat_history, got {:?}", other),
        }
    }

    async fn leave(self) {
        drop(self.tx);
        self.task.await.unwrap();
    }
}

fn pairs(entries: &[HistoryEntry]) -> Vec<(&str, &str)> {
    entries
        .iter()
        .map(|e| (e.username.as_str(), e.message.as_str()))
        .collect()
}

#[tokio::test]
async fn general_room_conversation_and_replay() {
    let server = Server::new();
    let (_, alice_token) = server.user("alice");
    let (_, bob_token) = server.user("bob");
    let (_, carol_token) = server.user("carol");

    // first session in a room that does not exist yet gets no history
    let mut alice = server.connect("general", &alice_token).await.unwrap();
    let mut bob = server.connect("general", &bob_token).await.unwrap();
    assert_eq!(server.gateway.broadcaster.subscribers("general"), 2);

    alice.say("hi");
    assert_eq!(alice.next_chat().await, ("alice".into(), "hi".into()));
    assert_eq!(bob.next_chat().await, ("alice".into(), "hi".into()));

    bob.say("hello");
    assert_eq!(alice.next_chat().await, ("bob".into(), "hello".into()));
    assert_eq!(bob.next_chat().await, ("bob".into(), "hello".into()));

    let mut carol = server.connect("general", &carol_token).await.unwrap();
    let history = carol.history().await;
    assert_eq!(pairs(&history), [("alice", "hi"), ("bob", "hello")]);
    assert!(history[0].timestamp < history[1].timestamp);

    alice.leave().await;
    bob.leave().await;
    carol.leave().await;
    assert_eq!(server.gateway.broadcaster.subscribers("general"), 0);
}

#[tokio::test]
async fn private_room_requires_invitation() {
    let server = Server::new();
    let (alice_id, alice_token) = server.user("alice");
    let (_, bob_token) = server.user("bob");

    server
        .gateway
        .registry
        .get_or_create("secret", &alice_id, Some(Privacy::Private))
        .unwrap();

    let mut alice = server.connect("secret", &alice_token).await.unwrap();
    alice.say("psst");
    assert_eq!(alice.next_chat().await, ("alice".into(), "psst".into()));

    let refused = server.connect("secret", &bob_token).await;
    assert!(matches!(refused, Err(ChatError::Forbidden(_))));
    assert_eq!(server.gateway.broadcaster.subscribers("secret"), 1);

    server.gateway.registry.invite("secret", &alice_id, "bob").unwrap();

    let mut bob = server.connect("secret", &bob_token).await.unwrap();
    assert_eq!(pairs(&bob.history().await), [("alice", "psst")]);

    bob.say("thanks");
    assert_eq!(alice.next_chat().await, ("bob".into(), "thanks".into()));
    assert_eq!(bob.next_chat().await, ("bob".into(), "thanks".into()));

    alice.leave().await;
    bob.leave().await;
}

#[tokio::test]
async fn failed_authentication_never_receives_events() {
    let server = Server::new();
    let (_, alice_token) = server.user("alice");
    let mut alice = server.connect("general", &alice_token).await.unwrap();

    let refused = server.connect("general", "not-a-token").await;
    assert!(matches!(refused, Err(ChatError::Unauthenticated(_))));

    let refused = admit(&server.gateway, "general", None).await;
    assert!(matches!(refused, Err(ChatError::Unauthenticated(_))));

    alice.say("anyone?");
    assert_eq!(alice.next_chat().await, ("alice".into(), "anyone?".into()));
    assert_eq!(server.gateway.broadcaster.subscribers("general"), 1);

    alice.leave().await;
}

#[tokio::test]
async fn reconnect_sees_history_but_not_missed_live_events() {
    let server = Server::new();
    let (_, alice_token) = server.user("alice");
    let (_, bob_token) = server.user("bob");

    let mut alice = server.connect("general", &alice_token).await.unwrap();
    let mut bob = server.connect("general", &bob_token).await.unwrap();

    alice.say("one");
    alice.next_chat().await;
    bob.next_chat().await;
    bob.leave().await;

    alice.say("two");
    alice.next_chat().await;

    // the replay holds everything persisted, then live events resume
    let mut bob = server.connect("general", &bob_token).await.unwrap();
    assert_eq!(pairs(&bob.history().await), [("alice", "one"), ("alice", "two")]);

    alice.say("three");
    assert_eq!(bob.next_chat().await, ("alice".into(), "three".into()));
    assert!(bob.rx.try_recv().is_err());

    alice.leave().await;
    bob.leave().await;
}

#[tokio::test]
async fn rejected_frame_only_reaches_its_sender() {
    let server = Server::new();
    let (_, alice_token) = server.user("alice");
    let (_, bob_token) = server.user("bob");

    let mut alice = server.connect("general", &alice_token).await.unwrap();
    let mut bob = server.connect("general", &bob_token).await.unwrap();

    alice.tx.send(r#"{"message":"   "}"#.to_string()).unwrap();
    assert!(matches!(alice.next().await, ServerEvent::Error { .. }));

    alice.say("real");
    assert_eq!(bob.next_chat().await, ("alice".into(), "real".into()));
    assert_eq!(alice.next_chat().await, ("alice".into(), "real".into()));

    // nothing was persisted for the rejected frame
    assert_eq!(server.db.get_messages("general").unwrap().len(), 1);

    alice.leave().await;
    bob.leave().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn message_sent_while_joining_arrives_once() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let slow = Arc::new(SlowHistory {
        db: db.clone(),
        delay: Duration::from_millis(300),
    });
    let server = Arc::new(Server::with_store(db, slow));
    let (_, alice_token) = server.user("alice");
    let (_, bob_token) = server.user("bob");

    let mut alice = server.connect("general", &alice_token).await.unwrap();

    // bob registers, then sits in the slow history read
    let joining = {
        let server = server.clone();
        tokio::spawn(async move { server.connect("general", &bob_token).await.unwrap() })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    alice.say("hi");
    assert_eq!(alice.next_chat().await, ("alice".into(), "hi".into()));

    let mut bob = joining.await.unwrap();
    assert_eq!(pairs(&bob.history().await), [("alice", "hi")]);

    alice.say("next");
    assert_eq!(bob.next_chat().await, ("alice".into(), "next".into()));
    assert!(bob.rx.try_recv().is_err());

    alice.leave().await;
    bob.leave().await;
}

#[tokio::test]
async fn token_for_unknown_account_is_refused() {
    let server = Server::new();
    let ghost = Identity::new(Uuid::new_v4(), "ghost");
    let token = server.gateway.verifier.issue(&ghost).unwrap();

    let refused = server.connect("general", &token).await;
    assert!(matches!(refused, Err(ChatError::Unauthenticated(_))));
    assert_eq!(server.gateway.broadcaster.subscribers("general"), 0);
}
