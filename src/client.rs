//! Client endpoint and the application-facing message builders.
//!
//! A [`Client`] owns exactly one connection. `connect` resolves the remote
//! address and drives the connection through `Connecting → Open`, starting
//! the I/O loops on the ambient tokio runtime; `disconnect` tears the
//! connection down and joins both tasks before returning, so no background
//! activity survives it.
//!
//! Inbound messages land on the client's own queue; the application thread
//! pops (or `wait()`s on) it directly.
//!
//! # Example
//!
//! ```ignore
//! use meownet::{Client, MessageTag, Token};
//!
//! # async fn run() -> meownet::Result<()> {
//! let mut client = Client::new();
//! client.connect("127.0.0.1", 8080).await?;
//! client.login(Token { value: 123 })?;
//! client.say("Hello World!")?;
//!
//! let reply = client.inbound().pop_front();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::net::lookup_host;

use crate::connection::{Connection, ConnectionId, OwnedMessage, Side};
use crate::error::{NetError, Result};
use crate::protocol::{Message, MessageTag};
use crate::queue::SyncQueue;

/// Remote server coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

/// Authentication token, 8 bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token {
    /// Raw token value.
    pub value: u64,
}

/// User profile, transmitted as a JSON body in `Profile` responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Display name.
    pub username: String,
    /// Contact address.
    pub email: String,
}

impl Profile {
    /// Build a `Profile` response message carrying this profile as JSON.
    pub fn to_message(&self) -> Result<Message> {
        let mut message = Message::new(MessageTag::Profile);
        message.append_bytes(&serde_json::to_vec(self)?);
        Ok(message)
    }

    /// Decode a `Profile` response body.
    ///
    /// An empty body means "no profile stored for that token" and decodes
    /// to `Ok(None)`; a non-empty body that is not valid JSON is an error.
    pub fn from_message(message: &Message) -> Result<Option<Self>> {
        if message.body_len() == 0 {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(message.body())?))
    }
}

/// A client endpoint owning one connection to a server.
pub struct Client {
    inbound: Arc<SyncQueue<OwnedMessage>>,
    connection: Option<Arc<Connection>>,
}

impl Client {
    /// Create a disconnected client.
    pub fn new() -> Self {
        Self {
            inbound: Arc::new(SyncQueue::new()),
            connection: None,
        }
    }

    /// Resolve `host:port` and connect.
    ///
    /// On success the connection is `Open` and its read loop is running.
    /// On failure the client stays disconnected; there is no automatic
    /// retry.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        self.disconnect().await;

        let addr = lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| {
                NetError::Transport(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no address found for {}:{}", host, port),
                ))
            })?;

        let connection = Connection::new(ConnectionId(0), Side::Client, self.inbound.clone());
        connection.connect(addr).await?;

        tracing::debug!(%addr, "connected");
        self.connection = Some(connection);
        Ok(())
    }

    /// Connect using a [`ServerInfo`].
    pub async fn connect_to(&mut self, server: &ServerInfo) -> Result<()> {
        self.connect(&server.host, server.port).await
    }

    /// Whether the connection is currently open. Connection loss surfaces
    /// here as `false`; the core never reconnects on its own.
    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| c.is_open())
    }

    /// Tear down the connection and join its I/O tasks. Idempotent; safe
    /// to call on a never-connected client.
    pub async fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.disconnect();
            connection.join().await;
            tracing::debug!("disconnected");
        }
    }

    /// Queue a message for transmission to the server.
    pub fn send(&self, message: Message) -> Result<()> {
        let connection = self.connection.as_ref().ok_or(NetError::NotConnected)?;
        connection.send(message)
    }

    /// The inbound queue. Server replies are untagged (`origin == None`).
    pub fn inbound(&self) -> &Arc<SyncQueue<OwnedMessage>> {
        &self.inbound
    }

    /// Send a `Login` request carrying the token.
    pub fn login(&self, token: Token) -> Result<()> {
        let mut message = Message::new(MessageTag::Login);
        message.append(token.value);
        self.send(message)
    }

    /// Send a `Logout` notification (empty body).
    pub fn logout(&self) -> Result<()> {
        self.send(Message::new(MessageTag::Logout))
    }

    /// Send a chat `Message` with the given text as the body.
    pub fn say(&self, text: &str) -> Result<()> {
        let mut message = Message::new(MessageTag::Message);
        message.append_bytes(text.as_bytes());
        self.send(message)
    }

    /// Request the profile stored for `token`.
    pub fn request_profile(&self, token: Token) -> Result<()> {
        let mut message = Message::new(MessageTag::Profile);
        message.append(token.value);
        self.send(message)
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}
