//! # meownet
//!
//! A minimal bidirectional message protocol over TCP: fixed-header framing,
//! an async connection state machine, and thread-safe queues handing
//! completed messages to application code.
//!
//! ## Architecture
//!
//! - **Frame codec** ([`protocol`]): 8-byte header (tag + body length,
//!   big endian) followed by the body, plus structured value
//!   packing/unpacking into the body buffer.
//! - **Concurrent queue** ([`queue::SyncQueue`]): the sole cross-thread
//!   boundary between the I/O tasks and application threads.
//! - **Connection** ([`connection`]): one read loop and one write loop per
//!   TCP endpoint, one frame in flight at a time in each direction.
//! - **Endpoints**: [`Client`] owns one connection; [`Server`] owns an
//!   acceptor and a table of connections addressed by [`ConnectionId`].
//!
//! ## Example
//!
//! ```ignore
//! use meownet::{Client, MessageTag, Token};
//!
//! #[tokio::main]
//! async fn main() -> meownet::Result<()> {
//!     let mut client = Client::new();
//!     client.connect("127.0.0.1", 8080).await?;
//!     client.login(Token { value: 123 })?;
//!
//!     let inbound = client.inbound().clone();
//!     let reply = tokio::task::spawn_blocking(move || {
//!         inbound.wait();
//!         inbound.pop_front()
//!     })
//!     .await
//!     .expect("join");
//!
//!     assert_eq!(reply.unwrap().message.tag(), MessageTag::Accept);
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod error;
pub mod protocol;
pub mod queue;

mod client;
mod server;

pub use client::{Client, Profile, ServerInfo, Token};
pub use connection::{ConnectionId, ConnectionState, OwnedMessage, Side};
pub use error::{NetError, Result};
pub use protocol::{Header, Message, MessageTag};
pub use queue::SyncQueue;
pub use server::{Server, ServerHandler};
