//! Game Client Transport
//!
//! Connects to a [`GameServer`](super::server::GameServer): WebSocket for the
//! handshake and reliable messages, a connected UDP socket for inputs and
//! snapshots. Prediction lives in `crate::prediction`; this type only moves
//! bytes.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace};

use super::protocol::{
    ClientMessage, Datagram, InputCommand, ProtocolError, ServerError, ServerMessage, SessionToken,
    Snapshot, WelcomeInfo, MAX_DATAGRAM,
};

type WsSink = futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Socket error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Encoding or decoding failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// JSON error on the reliable channel.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server URL could not be used.
    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    /// Server answered the hello with an error.
    #[error("refused: {0:?}")]
    Refused(ServerError),

    /// Connection closed.
    #[error("connection closed")]
    Closed,

    /// Timed out waiting for the server.
    #[error("timed out")]
    Timeout,
}

/// A joined client.
pub struct GameClient {
    welcome: WelcomeInfo,
    token: SessionToken,
    sink: WsSink,
    inbox: mpsc::Receiver<ServerMessage>,
    reader: JoinHandle<()>,
    udp: UdpSocket,
    buf: Vec<u8>,
}

impl std::fmt::Debug for GameClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameClient")
            .field("player_id", &self.welcome.player_id)
            .field("token", &self.token.short())
            .field("udp", &self.udp.local_addr().ok())
            .finish_non_exhaustive()
    }
}

impl GameClient {
    /// Connect and join as `name`.
    pub async fn connect(url: &str, name: &str) -> Result<Self, ClientError> {
        Self::connect_with_token(url, name, None).await
    }

    /// Connect and join, presenting a JWT.
    pub async fn connect_with_token(url: &str, name: &str, auth_token: Option<String>) -> Result<Self, ClientError> {
        let host = server_host(url)?;
        let (ws, _) = connect_async(url).await?;
        let (mut sink, mut stream) = ws.split();

        let hello = ClientMessage::Hello {
            name: name.to_string(),
            client_version: crate::VERSION.to_string(),
            auth_token,
        };
        sink.send(Message::Text(hello.to_json()?)).await?;

        let welcome = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match ServerMessage::from_json(&text)? {
                    ServerMessage::Welcome(welcome) => break welcome,
                    ServerMessage::Error(e) => return Err(ClientError::Refused(e)),
                    other => trace!(?other, "ignored before welcome"),
                },
                Some(Ok(Message::Close(_))) | None => return Err(ClientError::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        };
        let token = SessionToken::from_hex(&welcome.token)?;

        let server_udp = tokio::net::lookup_host((host.as_str(), welcome.udp_port))
            .await?
            .next()
            .ok_or_else(|| ClientError::InvalidUrl(url.to_string()))?;
        let local: SocketAddr = if server_udp.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let udp = UdpSocket::bind(local).await?;
        udp.connect(server_udp).await?;
        info!(player_id = welcome.player_id, %server_udp, token = %token.short(), "joined");

        let (inbox_tx, inbox) = mpsc::channel(64);
        let reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                match ServerMessage::from_json(&text) {
                    Ok(message) => {
                        if inbox_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!("unreadable server message: {}", e),
                }
            }
        });

        Ok(Self {
            welcome,
            token,
            sink,
            inbox,
            reader,
            udp,
            buf: vec![0u8; MAX_DATAGRAM + 1],
        })
    }

    /// Handshake reply.
    pub fn welcome(&self) -> &WelcomeInfo {
        &self.welcome
    }

    /// Local UDP address.
    pub fn udp_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.udp.local_addr()?)
    }

    /// Send one input datagram.
    pub async fn send_input(&self, command: &InputCommand) -> Result<(), ClientError> {
        let bytes = Datagram::Input { token: self.token, command: *command }.encode()?;
        self.udp.send(&bytes).await?;
        Ok(())
    }

    /// Newest snapshot waiting on the socket, if any. Older queued
    /// snapshots are skipped.
    pub fn try_recv_snapshot(&mut self) -> Result<Option<Snapshot>, ClientError> {
        let mut newest: Option<Snapshot> = None;
        loop {
            match self.udp.try_recv(&mut self.buf) {
                Ok(len) => match Datagram::decode(&self.buf[..len]) {
                    Ok(Datagram::Snapshot(snapshot)) => {
                        if newest.as_ref().map_or(true, |n| snapshot.tick > n.tick) {
                            newest = Some(snapshot);
                        }
                    }
                    Ok(Datagram::Input { .. }) => {}
                    Err(e) => debug!("bad snapshot datagram: {}", e),
                },
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(newest),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Wait up to `timeout` for a snapshot.
    pub async fn recv_snapshot(&mut self, timeout: Duration) -> Result<Snapshot, ClientError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(snapshot) = self.try_recv_snapshot()? {
                return Ok(snapshot);
            }
            tokio::time::timeout_at(deadline, self.udp.readable())
                .await
                .map_err(|_| ClientError::Timeout)??;
        }
    }

    /// Send a reliable message.
    pub async fn send(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        self.sink.send(Message::Text(message.to_json()?)).await?;
        Ok(())
    }

    /// Next reliable message without waiting.
    pub fn try_next_message(&mut self) -> Option<ServerMessage> {
        self.inbox.try_recv().ok()
    }

    /// Wait up to `timeout` for a reliable message. `Ok(None)` means the
    /// connection closed.
    pub async fn next_message(&mut self, timeout: Duration) -> Result<Option<ServerMessage>, ClientError> {
        tokio::time::timeout(timeout, self.inbox.recv())
            .await
            .map_err(|_| ClientError::Timeout)
    }

    /// Leave and close the connection.
    pub async fn leave(mut self) -> Result<(), ClientError> {
        self.send(&ClientMessage::Leave).await?;
        self.sink.close().await?;
        Ok(())
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Host part of a `ws://host:port/...` URL.
fn server_host(url: &str) -> Result<String, ClientError> {
    let uri: Uri = url.parse().map_err(|_| ClientError::InvalidUrl(url.to_string()))?;
    let host = uri.host().ok_or_else(|| ClientError::InvalidUrl(url.to_string()))?;
    Ok(host.trim_start_matches('[').trim_end_matches(']').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_host() {
        assert_eq!(server_host("ws://127.0.0.1:27960").unwrap(), "127.0.0.1");
        assert_eq!(server_host("ws://localhost:9/play").unwrap(), "localhost");
        assert_eq!(server_host("ws://[::1]:9").unwrap(), "::1");
        assert!(matches!(server_host("not a url"), Err(ClientError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_connect_refused_without_server() {
        let err = GameClient::connect("ws://127.0.0.1:1", "nobody").await;
        assert!(matches!(err, Err(ClientError::WebSocket(_))));
    }
}
