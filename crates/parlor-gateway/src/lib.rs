//! Real-time side of Parlor: token verification, room membership rules,
//! per-room fan-out and the per-connection session state machine.

pub mod auth;
pub mod broadcaster;
pub mod connection;
pub mod registry;
pub mod session;

use std::sync::Arc;

use anyhow::anyhow;
use tracing::error;

use parlor_db::{ChatStore, RoomStore};
use parlor_types::Identity;
use parlor_types::error::{ChatError, ChatResult};

pub use auth::{AuthMode, Verifier};
pub use broadcaster::Broadcaster;
pub use registry::RoomRegistry;
pub use connection::{admit, serve};
pub use session::{ChannelTransport, Session, SessionState, Transport};

/// Everything a session needs, injected once at startup and cloned per
/// connection.
#[derive(Clone)]
pub struct Gateway {
    pub verifier: Verifier,
    pub registry: RoomRegistry,
    pub store: Arc<dyn ChatStore>,
    pub broadcaster: Broadcaster,
}

impl Gateway {
    pub fn new(store: Arc<dyn ChatStore>, verifier: Verifier) -> Self {
        Self {
            verifier,
            registry: RoomRegistry::new(store.clone()),
            store,
            broadcaster: Broadcaster::new(),
        }
    }

    /// Verify `token` and check that its identity still exists in storage.
    /// A token for an account that was removed, or replaced under the same
    /// name, is refused like any other bad credential.
    pub async fn resolve(&self, token: Option<&str>) -> ChatResult<Identity> {
        let identity = self.verifier.verify(token)?;

        let store = self.store.clone();
        let username = identity.username.clone();
        let stored = blocking(move || Ok(store.find_user(&username)?)).await?;

        match stored {
            Some(stored) if stored.id == identity.id => Ok(identity),
            _ => Err(ChatError::unauthenticated(format!(
                "unknown user '{}'",
                identity.username
            ))),
        }
    }
}

/// Run blocking storage work off the async runtime.
pub async fn blocking<F, T>(f: F) -> ChatResult<T>
where
    F: FnOnce() -> ChatResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        anyhow!("blocking task failed: {}", e)
    })?
}
