use super::config::{ConnectionConfig, PeerConfig, Role, SendMode};
use super::error::PeerError;
use super::frame::decode_frame;
use super::handshake::Handshake;
use super::message::{Message, PeerMessage};
use super::transport::{FrameReader, FrameWriter, PeerTransport};
use crate::event_log::{EventLog, PeerEvent};
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// The lifecycle state of a [`PeerConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, `start` not called yet.
    Idle,
    /// Resolving and connecting (active role only).
    Connecting,
    /// Socket is up, exchanging handshakes.
    Handshaking,
    /// Handshake done, reader and writer tasks running.
    Open,
    /// Setup failed or `stop` was called.
    Closed,
}

struct Outbound {
    frame: Bytes,
    ack: Option<oneshot::Sender<Result<(), PeerError>>>,
}

/// Cloneable handle for sending on an open connection.
///
/// All handles feed the connection's single writer task, so frames from
/// concurrent senders are never interleaved on the wire. Their relative
/// order is the order in which they enter the queue.
#[derive(Clone)]
pub struct PeerSender {
    remote: Arc<PeerConfig>,
    queue: mpsc::Sender<Outbound>,
    mode: SendMode,
    max_frame_len: usize,
    closed: Arc<AtomicBool>,
}

impl PeerSender {
    /// Queues `message` for the writer task.
    ///
    /// In [`SendMode::FireAndForget`] this returns once the frame is queued
    /// and write failures are only logged. In [`SendMode::Synchronous`] it
    /// waits for the write and returns its outcome. Either way a failed
    /// write never closes the connection.
    ///
    /// A message whose frame exceeds the connection's `max_frame_len` is
    /// refused with [`PeerError::FrameTooLarge`] in both modes.
    pub async fn send(&self, message: Message) -> Result<(), PeerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PeerError::NotConnected);
        }

        let frame = message.try_encode(self.max_frame_len)?;
        match self.mode {
            SendMode::FireAndForget => self
                .queue
                .send(Outbound { frame, ack: None })
                .await
                .map_err(|_| PeerError::NotConnected),
            SendMode::Synchronous => {
                let (tx, rx) = oneshot::channel();
                self.queue
                    .send(Outbound {
                        frame,
                        ack: Some(tx),
                    })
                    .await
                    .map_err(|_| PeerError::NotConnected)?;
                rx.await.map_err(|_| PeerError::NotConnected)?
            }
        }
    }

    pub fn remote(&self) -> &Arc<PeerConfig> {
        &self.remote
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.queue.is_closed()
    }
}

/// A connection to one remote peer.
///
/// Owns the TCP link: sets it up (outbound connect for [`Role::Active`], an
/// already accepted socket for [`Role::Passive`]), runs the handshake, then
/// runs one reader task that decodes inbound frames into the sink channel
/// and one writer task that serializes outbound frames.
///
/// # Examples
///
/// ```no_run
/// use peerlink::peer::{ConnectionConfig, Message, PeerConfig, PeerConnection};
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let local = Arc::new(PeerConfig::new(1001, "localhost", 6008, true));
/// let remote = Arc::new(PeerConfig::new(1002, "localhost", 6009, false));
/// let (sink, mut inbound) = mpsc::channel(64);
///
/// let mut conn = PeerConnection::active(local, remote, sink, ConnectionConfig::default());
/// conn.start().await?;
/// conn.send(Message::Interested).await?;
///
/// while let Some(msg) = inbound.recv().await {
///     println!("{}", msg);
/// }
/// conn.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct PeerConnection {
    local: Arc<PeerConfig>,
    remote: Arc<PeerConfig>,
    role: Role,
    config: ConnectionConfig,
    state: ConnectionState,
    accepted: Option<TcpStream>,
    sink: mpsc::Sender<PeerMessage>,
    events: Option<Arc<EventLog>>,
    peer_addr: Option<SocketAddr>,
    closed: Arc<AtomicBool>,
    shutdown: Option<watch::Sender<bool>>,
    sender: Option<PeerSender>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<Result<(), PeerError>>>,
}

impl PeerConnection {
    /// A connection that will dial `remote` when started.
    pub fn active(
        local: Arc<PeerConfig>,
        remote: Arc<PeerConfig>,
        sink: mpsc::Sender<PeerMessage>,
        config: ConnectionConfig,
    ) -> Self {
        Self::new(local, remote, Role::Active, None, sink, config)
    }

    /// A connection over a socket the caller already accepted from `remote`.
    pub fn passive(
        local: Arc<PeerConfig>,
        remote: Arc<PeerConfig>,
        stream: TcpStream,
        sink: mpsc::Sender<PeerMessage>,
        config: ConnectionConfig,
    ) -> Self {
        Self::new(local, remote, Role::Passive, Some(stream), sink, config)
    }

    fn new(
        local: Arc<PeerConfig>,
        remote: Arc<PeerConfig>,
        role: Role,
        accepted: Option<TcpStream>,
        sink: mpsc::Sender<PeerMessage>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            local,
            remote,
            role,
            config,
            state: ConnectionState::Idle,
            accepted,
            sink,
            events: None,
            peer_addr: None,
            closed: Arc::new(AtomicBool::new(false)),
            shutdown: None,
            sender: None,
            reader: None,
            writer: None,
        }
    }

    /// Records connection and inbound choke/interest events to `events`.
    pub fn with_event_log(mut self, events: Arc<EventLog>) -> Self {
        self.events = Some(events);
        self
    }

    /// Sets up the socket, performs the handshake and starts the reader and
    /// writer tasks.
    ///
    /// Any failure leaves the connection [`ConnectionState::Closed`] with
    /// no task running. Retrying is up to the caller, with a new
    /// connection.
    pub async fn start(&mut self) -> Result<(), PeerError> {
        if self.state != ConnectionState::Idle {
            return Err(PeerError::AlreadyStarted);
        }

        match self.establish().await {
            Ok(transport) => {
                self.spawn_tasks(transport);
                self.state = ConnectionState::Open;
                info!(
                    local = self.local.id,
                    remote = self.remote.id,
                    role = ?self.role,
                    "connection open"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    local = self.local.id,
                    remote = self.remote.id,
                    role = ?self.role,
                    error = %e,
                    "connection setup failed"
                );
                self.closed.store(true, Ordering::Release);
                self.state = ConnectionState::Closed;
                Err(e)
            }
        }
    }

    async fn establish(&mut self) -> Result<PeerTransport, PeerError> {
        let stream = match self.role {
            Role::Active => {
                self.state = ConnectionState::Connecting;
                let stream = self.connect().await?;
                if let Some(events) = &self.events {
                    events.record(&PeerEvent::Connected {
                        target: self.remote.id,
                    });
                }
                stream
            }
            Role::Passive => self.accepted.take().ok_or(PeerError::NotConnected)?,
        };

        self.state = ConnectionState::Handshaking;
        let mut transport = PeerTransport::new(stream, &self.config)?;
        self.peer_addr = transport.peer_addr().ok();

        let ours = Handshake::new(self.local.id);
        match self.role {
            Role::Active => {
                transport.send_handshake(&ours).await?;
                let theirs = transport.receive_handshake().await?;
                Handshake::validate(&theirs, self.remote.id)?;
            }
            Role::Passive => {
                let theirs = transport.receive_handshake().await?;
                Handshake::validate(&theirs, self.remote.id)?;
                transport.send_handshake(&ours).await?;
            }
        }

        debug!(local = self.local.id, remote = self.remote.id, "handshake complete");
        Ok(transport)
    }

    async fn connect(&self) -> Result<TcpStream, PeerError> {
        let host = self.remote.hostname.as_str();
        let addrs: Vec<SocketAddr> = lookup_host((host, self.remote.port))
            .await
            .map_err(|source| PeerError::AddressResolution {
                host: host.to_string(),
                source,
            })?
            .collect();

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(%addr, error = %e, "connect attempt failed");
                    last_error = Some((addr, e));
                }
            }
        }

        match last_error {
            Some((addr, source)) => Err(PeerError::Connect {
                addr: addr.to_string(),
                source,
            }),
            None => Err(PeerError::AddressResolution {
                host: host.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no addresses"),
            }),
        }
    }

    fn spawn_tasks(&mut self, transport: PeerTransport) {
        let (reader, writer) = transport.into_split();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (queue_tx, queue_rx) = mpsc::channel(self.config.outbound_capacity.max(1));

        let reader_task = ReaderTask {
            reader,
            remote: self.remote.clone(),
            local_id: self.local.id,
            sink: self.sink.clone(),
            events: self.events.clone(),
            closed: self.closed.clone(),
            shutdown: shutdown_rx.clone(),
        };
        self.reader = Some(tokio::spawn(reader_task.run()));
        self.writer = Some(tokio::spawn(run_writer(
            writer,
            queue_rx,
            shutdown_rx,
            self.remote.id,
        )));

        self.sender = Some(PeerSender {
            remote: self.remote.clone(),
            queue: queue_tx,
            mode: self.config.send_mode,
            max_frame_len: self.config.max_frame_len,
            closed: self.closed.clone(),
        });
        self.shutdown = Some(shutdown_tx);
    }

    /// Sends `message` to the remote peer. See [`PeerSender::send`].
    pub async fn send(&self, message: Message) -> Result<(), PeerError> {
        match &self.sender {
            Some(sender) if self.state == ConnectionState::Open => sender.send(message).await,
            _ => Err(PeerError::NotConnected),
        }
    }

    /// A cloneable send handle, available once the connection is open.
    pub fn sender(&self) -> Option<PeerSender> {
        self.sender.clone()
    }

    /// Stops the reader, drains and closes the writer, then releases the
    /// socket.
    ///
    /// Release is best effort: every step runs even if an earlier one
    /// failed, and the failures are returned together as
    /// [`PeerError::Close`]. Calling `stop` again is a no-op.
    pub async fn stop(&mut self) -> Result<(), PeerError> {
        self.closed.store(true, Ordering::Release);
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }

        let mut failures = Vec::new();

        if let Some(reader) = self.reader.take() {
            if let Err(e) = reader.await {
                failures.push(format!("reader task: {}", e));
            }
        }

        self.sender = None;
        if let Some(mut writer) = self.writer.take() {
            match timeout(self.config.close_timeout, &mut writer).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => failures.push(e.to_string()),
                Ok(Err(e)) => failures.push(format!("writer task: {}", e)),
                Err(_) => {
                    writer.abort();
                    failures.push("writer did not drain in time".to_string());
                }
            }
        }

        self.accepted = None;
        let was_open = self.state == ConnectionState::Open;
        self.state = ConnectionState::Closed;

        if failures.is_empty() {
            if was_open {
                info!(local = self.local.id, remote = self.remote.id, "connection closed");
            }
            Ok(())
        } else {
            let reason = failures.join("; ");
            warn!(
                local = self.local.id,
                remote = self.remote.id,
                error = %reason,
                "connection did not close cleanly"
            );
            Err(PeerError::Close(reason))
        }
    }

    pub fn local(&self) -> &Arc<PeerConfig> {
        &self.local
    }

    pub fn remote(&self) -> &Arc<PeerConfig> {
        &self.remote
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The socket address of the remote end, once a socket exists.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Whether the reader task is still delivering messages. It stops on
    /// EOF, on a malformed frame and on transport errors, while the
    /// connection stays `Open` until [`stop`](Self::stop).
    pub fn is_reading(&self) -> bool {
        self.reader.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
    }
}

struct ReaderTask {
    reader: FrameReader,
    remote: Arc<PeerConfig>,
    local_id: u32,
    sink: mpsc::Sender<PeerMessage>,
    events: Option<Arc<EventLog>>,
    closed: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
}

impl ReaderTask {
    async fn run(mut self) {
        let remote = self.remote.id;

        loop {
            if self.closed.load(Ordering::Acquire) {
                break;
            }

            let frame = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                result = self.reader.receive_frame() => result,
            };

            let frame = match frame {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!(local = self.local_id, remote, "peer closed the stream");
                    break;
                }
                Err(e) => {
                    warn!(local = self.local_id, remote, error = %e, "read failed, stopping reader");
                    break;
                }
            };

            let msg = match decode_frame(frame, self.remote.clone()) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(local = self.local_id, remote, error = %e, "malformed frame, stopping reader");
                    break;
                }
            };

            self.record(&msg.message);

            if self.closed.load(Ordering::Acquire) {
                break;
            }

            let delivered = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                result = self.sink.send(msg) => result.is_ok(),
            };
            if !delivered {
                debug!(local = self.local_id, remote, "sink dropped, stopping reader");
                break;
            }
        }
    }

    fn record(&self, message: &Message) {
        let Some(events) = &self.events else {
            return;
        };

        let id = self.remote.id;
        let event = match message {
            Message::Choke => PeerEvent::ChokedBy(id),
            Message::Unchoke => PeerEvent::UnchokedBy(id),
            Message::Interested => PeerEvent::InterestedFrom(id),
            Message::NotInterested => PeerEvent::NotInterestedFrom(id),
            _ => return,
        };
        events.record(&event);
    }
}

async fn run_writer(
    mut writer: FrameWriter,
    mut queue: mpsc::Receiver<Outbound>,
    mut shutdown: watch::Receiver<bool>,
    remote: u32,
) -> Result<(), PeerError> {
    loop {
        tokio::select! {
            biased;
            item = queue.recv() => match item {
                Some(outbound) => write_one(&mut writer, outbound, remote).await,
                None => break,
            },
            _ = shutdown.changed() => {
                // Refuse new frames but flush what is already queued.
                queue.close();
                while let Ok(outbound) = queue.try_recv() {
                    write_one(&mut writer, outbound, remote).await;
                }
                break;
            }
        }
    }

    writer.shutdown().await
}

async fn write_one(writer: &mut FrameWriter, outbound: Outbound, remote: u32) {
    let result = writer.send_frame(&outbound.frame).await;
    if let Err(e) = &result {
        warn!(remote, error = %e, "send failed");
    }
    if let Some(ack) = outbound.ack {
        let _ = ack.send(result);
    }
}
