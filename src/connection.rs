//! Connection state machine and frame I/O loops.
//!
//! A [`Connection`] owns one TCP endpoint. Two tasks drive it:
//!
//! - the **read loop** reads exactly one header, then exactly the declared
//!   body, packages the result as an [`OwnedMessage`] on the shared inbound
//!   queue, and re-arms. It only stops on a transport/framing error or a
//!   shutdown signal;
//! - the **write loop** drains the per-connection outbound queue front to
//!   back, writing one full frame at a time, and parks on a [`Notify`] when
//!   the queue is empty.
//!
//! [`Connection::send`] pushes to the outbound queue and signals the
//! `Notify`; the stored-permit semantics of `notify_one` guarantee the
//! write loop wakes even if the signal lands between its emptiness check
//! and its await, so there is no lost-wakeup race and never more than one
//! write in flight per connection.
//!
//! State machine: `Idle → Connecting → Open → Closing → Closed`. Server
//! side connections are created from an already-accepted socket and start
//! at `Open`; client side connections pass through `Connecting` while the
//! connect attempt resolves. Any error is terminal for the connection;
//! there are no retries.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::{NetError, Result};
use crate::protocol::{Header, Message, DEFAULT_MAX_BODY_SIZE, HEADER_SIZE};
use crate::queue::SyncQueue;

/// Which end of the protocol a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Initiated the connection; inbound messages are untagged.
    Client,
    /// Accepted the connection; inbound messages carry the origin id.
    Server,
}

/// Opaque handle identifying a server-side connection.
///
/// Handlers hold ids, not connections; a stale id simply no longer resolves
/// in the server's connection table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub(crate) u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// An inbound message together with the connection that produced it.
///
/// `origin` is `Some` for server-role connections and `None` for the
/// client role. The queue owns the value once enqueued; the consumer takes
/// ownership on pop.
#[derive(Debug, Clone)]
pub struct OwnedMessage {
    /// Originating connection, server role only.
    pub origin: Option<ConnectionId>,
    /// The received message.
    pub message: Message,
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Created, no transport yet.
    Idle = 0,
    /// Client-side connect attempt in flight.
    Connecting = 1,
    /// Transport established, loops running.
    Open = 2,
    /// Shutdown requested, loops winding down.
    Closing = 3,
    /// Transport gone. Terminal.
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Idle,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Open,
            3 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Read one complete frame: exactly [`HEADER_SIZE`] header bytes, then
/// exactly the declared body.
///
/// The header is validated (known tag, body within `max_body_size`) before
/// any body bytes are read. A peer that closes cleanly between frames
/// surfaces as `UnexpectedEof`.
pub(crate) async fn read_frame<R>(reader: &mut R, max_body_size: u32) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_buf).await?;

    let header = Header::decode(&header_buf)?;
    header.validate(max_body_size)?;

    let mut body = BytesMut::zeroed(header.body_len as usize);
    if header.body_len > 0 {
        reader.read_exact(&mut body).await?;
    }

    Ok(Message::with_body(header.tag, body))
}

/// Write one complete frame: header first, then the body when non-empty.
pub(crate) async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&message.header().encode()).await?;
    if message.body_len() > 0 {
        writer.write_all(message.body()).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// One endpoint of the protocol: a TCP stream driven by a read task and a
/// write task.
pub struct Connection {
    id: ConnectionId,
    side: Side,
    state: AtomicU8,
    outbound: SyncQueue<Message>,
    outbound_ready: Notify,
    inbound: Arc<SyncQueue<OwnedMessage>>,
    shutdown: watch::Sender<bool>,
    tasks: AsyncMutex<Vec<JoinHandle<()>>>,
    max_body_size: u32,
}

impl Connection {
    /// Create a connection in the `Idle` state. No I/O happens until
    /// [`Connection::connect`] (client) or [`Connection::open`] (server).
    pub(crate) fn new(
        id: ConnectionId,
        side: Side,
        inbound: Arc<SyncQueue<OwnedMessage>>,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            id,
            side,
            state: AtomicU8::new(ConnectionState::Idle as u8),
            outbound: SyncQueue::new(),
            outbound_ready: Notify::new(),
            inbound,
            shutdown,
            tasks: AsyncMutex::new(Vec::new()),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        })
    }

    /// Connection id.
    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Which role this connection plays.
    #[inline]
    pub fn side(&self) -> Side {
        self.side
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the connection is open for traffic.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Client role: resolve nothing, just dial the given address and start
    /// the I/O loops on success.
    ///
    /// The state passes through `Connecting`; on failure the connection is
    /// left `Closed` and the error is returned; no retry.
    pub(crate) async fn connect(self: &Arc<Self>, addr: SocketAddr) -> Result<()> {
        debug_assert_eq!(self.side, Side::Client);
        self.set_state(ConnectionState::Connecting);

        match TcpStream::connect(addr).await {
            Ok(stream) => {
                self.open(stream).await;
                Ok(())
            }
            Err(e) => {
                tracing::error!(%addr, error = %e, "connect failed");
                self.set_state(ConnectionState::Closed);
                Err(NetError::Transport(e))
            }
        }
    }

    /// Start the read and write loops over an established stream and
    /// transition to `Open`.
    ///
    /// Server role calls this directly with the accepted socket; the
    /// connection then starts at `Open`.
    pub(crate) async fn open(self: &Arc<Self>, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        self.set_state(ConnectionState::Open);

        let read_task = tokio::spawn(
            self.clone()
                .read_loop(read_half, self.shutdown.subscribe()),
        );
        let write_task = tokio::spawn(
            self.clone()
                .write_loop(write_half, self.shutdown.subscribe()),
        );

        let mut tasks = self.tasks.lock().await;
        tasks.push(read_task);
        tasks.push(write_task);
    }

    /// Queue a message for transmission.
    ///
    /// The push and the write-loop wakeup are race-free; frames go out in
    /// enqueue order, one fully written before the next begins.
    pub fn send(&self, message: Message) -> Result<()> {
        if !self.is_open() {
            return Err(NetError::ConnectionClosed);
        }
        if message.body_len() > self.max_body_size as usize {
            return Err(NetError::Framing(format!(
                "body size {} exceeds maximum {}",
                message.body_len(),
                self.max_body_size
            )));
        }
        self.outbound.push_back(message);
        self.outbound_ready.notify_one();
        Ok(())
    }

    /// Request shutdown. Idempotent; in-flight reads/writes are abandoned,
    /// queued outbound messages are discarded.
    pub fn disconnect(&self) {
        if self.state() == ConnectionState::Open {
            self.set_state(ConnectionState::Closing);
        }
        // Subsequent calls see Closing/Closed and the send below is a no-op
        // for the loops, which only react to the first transition.
        let _ = self.shutdown.send(true);
    }

    /// Await both I/O tasks. Call after [`Connection::disconnect`] for a
    /// guaranteed-clean teardown.
    pub(crate) async fn join(&self) {
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
    }

    fn mark_closed(&self) {
        self.set_state(ConnectionState::Closed);
        self.outbound.clear();
    }

    /// Read loop: header → body → inbound queue → re-arm.
    async fn read_loop<R>(self: Arc<Self>, mut reader: R, mut shutdown: watch::Receiver<bool>)
    where
        R: AsyncRead + Unpin,
    {
        loop {
            tokio::select! {
                result = read_frame(&mut reader, self.max_body_size) => match result {
                    Ok(message) => {
                        let origin = match self.side {
                            Side::Server => Some(self.id),
                            Side::Client => None,
                        };
                        self.inbound.push_back(OwnedMessage { origin, message });
                    }
                    Err(NetError::Transport(e))
                        if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                    {
                        tracing::debug!(id = %self.id, "peer closed connection");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(id = %self.id, error = %e, "read failed");
                        break;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }
        self.mark_closed();
        // Wake the write loop so it observes the closed state too.
        let _ = self.shutdown.send(true);
    }

    /// Write loop: drain the outbound queue front to back, park when empty.
    async fn write_loop<W>(self: Arc<Self>, mut writer: W, mut shutdown: watch::Receiver<bool>)
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            while let Some(message) = self.outbound.pop_front() {
                if let Err(e) = write_frame(&mut writer, &message).await {
                    tracing::error!(id = %self.id, error = %e, "write failed");
                    self.mark_closed();
                    // Wake the read loop so it stops delivering frames for
                    // a connection that is already closed.
                    let _ = self.shutdown.send(true);
                    return;
                }
            }

            tokio::select! {
                _ = self.outbound_ready.notified() => {}
                _ = shutdown.changed() => break,
            }
        }
        self.mark_closed();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("side", &self.side)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageTag;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let (mut a, mut b) = duplex(1024);

        let mut msg = Message::new(MessageTag::Login);
        msg.append(123u64);

        write_frame(&mut a, &msg).await.unwrap();
        let received = read_frame(&mut b, DEFAULT_MAX_BODY_SIZE).await.unwrap();

        assert_eq!(received.tag(), MessageTag::Login);
        assert_eq!(received.read::<u64>(0).unwrap(), 123);
    }

    #[tokio::test]
    async fn test_frame_roundtrip_empty_body() {
        let (mut a, mut b) = duplex(64);

        let msg = Message::new(MessageTag::Accept);
        write_frame(&mut a, &msg).await.unwrap();

        let received = read_frame(&mut b, DEFAULT_MAX_BODY_SIZE).await.unwrap();
        assert_eq!(received.tag(), MessageTag::Accept);
        assert_eq!(received.body_len(), 0);
    }

    #[tokio::test]
    async fn test_frames_arrive_in_send_order() {
        let (mut a, mut b) = duplex(4096);

        for i in 0..3u32 {
            let mut msg = Message::new(MessageTag::Message);
            msg.append(i);
            write_frame(&mut a, &msg).await.unwrap();
        }

        for i in 0..3u32 {
            let received = read_frame(&mut b, DEFAULT_MAX_BODY_SIZE).await.unwrap();
            assert_eq!(received.read::<u32>(0).unwrap(), i);
        }
    }

    #[tokio::test]
    async fn test_read_frame_rejects_unknown_tag() {
        let (mut a, mut b) = duplex(64);

        let mut bad = 77u32.to_be_bytes().to_vec();
        bad.extend_from_slice(&0u32.to_be_bytes());
        a.write_all(&bad).await.unwrap();

        let result = read_frame(&mut b, DEFAULT_MAX_BODY_SIZE).await;
        assert!(matches!(result, Err(NetError::Framing(_))));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized_body() {
        let (mut a, mut b) = duplex(64);

        let header = Header::new(MessageTag::Message, 1_000_000);
        a.write_all(&header.encode()).await.unwrap();

        let result = read_frame(&mut b, 1024).await;
        assert!(matches!(result, Err(NetError::Framing(_))));
    }

    #[tokio::test]
    async fn test_read_frame_eof_is_transport_error() {
        let (a, mut b) = duplex(64);
        drop(a);

        let result = read_frame(&mut b, DEFAULT_MAX_BODY_SIZE).await;
        match result {
            Err(NetError::Transport(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof);
            }
            other => panic!("expected transport error, got {:?}", other.map(|m| m.tag())),
        }
    }

    #[tokio::test]
    async fn test_send_on_idle_connection_fails() {
        let inbound = Arc::new(SyncQueue::new());
        let conn = Connection::new(ConnectionId(1), Side::Client, inbound);

        let result = conn.send(Message::new(MessageTag::Accept));
        assert!(matches!(result, Err(NetError::ConnectionClosed)));
        assert_eq!(conn.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_connection_over_tcp_delivers_and_tags() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_inbound = Arc::new(SyncQueue::new());
        let client_inbound = Arc::new(SyncQueue::new());

        let client_conn = Connection::new(ConnectionId(0), Side::Client, client_inbound.clone());
        client_conn.connect(addr).await.unwrap();
        assert!(client_conn.is_open());

        let (accepted, _) = listener.accept().await.unwrap();
        let server_conn = Connection::new(ConnectionId(7), Side::Server, server_inbound.clone());
        server_conn.open(accepted).await;

        // Client → server: tagged with the server-side connection id.
        let mut msg = Message::new(MessageTag::Message);
        msg.append_bytes(b"hi");
        client_conn.send(msg).unwrap();

        let owned = tokio::task::spawn_blocking(move || {
            server_inbound.wait();
            server_inbound.pop_front()
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(owned.origin, Some(ConnectionId(7)));
        assert_eq!(owned.message.body(), b"hi");

        // Server → client: untagged.
        server_conn.send(Message::new(MessageTag::Accept)).unwrap();
        let owned = tokio::task::spawn_blocking(move || {
            client_inbound.wait();
            client_inbound.pop_front()
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(owned.origin, None);
        assert_eq!(owned.message.tag(), MessageTag::Accept);

        client_conn.disconnect();
        client_conn.join().await;
        server_conn.disconnect();
        server_conn.join().await;
        assert_eq!(client_conn.state(), ConnectionState::Closed);
    }

    /// Writer whose first poll always fails, like a peer that reset the
    /// connection mid-write.
    struct FailingWriter;

    impl AsyncWrite for FailingWriter {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "injected write failure",
            )))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_write_failure_also_stops_the_read_loop() {
        let inbound = Arc::new(SyncQueue::new());
        let conn = Connection::new(ConnectionId(0), Side::Client, inbound.clone());
        conn.set_state(ConnectionState::Open);

        let (mut peer, local) = duplex(1024);
        let (read_half, _write_half) = tokio::io::split(local);

        let read_task = tokio::spawn(
            conn.clone().read_loop(read_half, conn.shutdown.subscribe()),
        );
        let write_task = tokio::spawn(
            conn.clone().write_loop(FailingWriter, conn.shutdown.subscribe()),
        );

        conn.send(Message::new(MessageTag::Accept)).unwrap();

        write_task.await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);

        // The read loop must observe the shutdown and exit too, not keep
        // delivering frames for a connection that reports Closed.
        tokio::time::timeout(std::time::Duration::from_secs(1), read_task)
            .await
            .expect("read loop kept running after write failure")
            .unwrap();

        let msg = Message::new(MessageTag::Accept);
        write_frame(&mut peer, &msg).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(inbound.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let inbound = Arc::new(SyncQueue::new());
        let conn = Connection::new(ConnectionId(0), Side::Client, inbound);
        conn.connect(addr).await.unwrap();
        let _ = listener.accept().await.unwrap();

        conn.disconnect();
        conn.disconnect();
        conn.join().await;
        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }
}
