use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, trace, warn};

use parlor_types::error::ChatResult;
use parlor_types::events::ServerEvent;

use crate::Gateway;
use crate::session::{Session, Transport};

/// A room socket after the HTTP upgrade.
pub struct WsTransport {
    sender: SplitSink<WebSocket, WsMessage>,
    receiver: SplitStream<WebSocket>,
}

impl WsTransport {
    pub fn new(socket: WebSocket) -> Self {
        let (sender, receiver) = socket.split();
        Self { sender, receiver }
    }
}

impl Transport for WsTransport {
    async fn recv(&mut self) -> Option<String> {
        while let Some(frame) = self.receiver.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => return Some(text.to_string()),
                Ok(WsMessage::Close(_)) => return None,
                Ok(WsMessage::Binary(data)) => {
                    warn!("Ignoring {} byte binary frame on room socket", data.len());
                }
                // axum answers pings itself
                Ok(_) => trace!("Control frame"),
                Err(e) => {
                    debug!("WebSocket receive error: {}", e);
                    return None;
                }
            }
        }
        None
    }

    async fn send(&mut self, event: &ServerEvent) -> anyhow::Result<()> {
        let text = serde_json::to_string(event)?;
        self.sender.send(WsMessage::Text(text.into())).await?;
        Ok(())
    }
}

/// Run the handshake for `room` before the socket is upgraded: verify the
/// token, check admission, register and load history.
///
/// A refused connection is never upgraded, so callers can answer it with a
/// plain HTTP status.
pub async fn admit(
    gateway: &Gateway,
    room: &str,
    token: Option<&str>,
) -> ChatResult<(Session, Option<ServerEvent>)> {
    let mut session = Session::connect(gateway.clone(), room)?;
    session.authenticate(token).await?;
    let history = session.join().await?;
    Ok((session, history))
}

/// Serve an admitted session over the upgraded socket until either side
/// goes away.
pub async fn serve(session: Session, history: Option<ServerEvent>, socket: WebSocket) {
    session.run(WsTransport::new(socket), history).await;
}
