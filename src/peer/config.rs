use std::fmt;
use std::time::Duration;

use crate::constants::{CLOSE_TIMEOUT, MAX_FRAME_LEN, OUTBOUND_QUEUE_CAPACITY};

/// Identity and network address of one participant in the swarm.
///
/// Built once at configuration time and shared as `Arc<PeerConfig>` by every
/// connection that addresses the peer.
///
/// # Examples
///
/// ```
/// use peerlink::peer::PeerConfig;
///
/// let peer = PeerConfig::new(1001, "localhost", 6008, false);
/// assert_eq!(peer.id, 1001);
/// assert_eq!(peer.to_string(), "1001@localhost:6008");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerConfig {
    /// Swarm-unique peer id.
    pub id: u32,
    /// Hostname or IP literal to connect to.
    pub hostname: String,
    /// TCP port the peer listens on.
    pub port: u16,
    /// Whether the peer starts with the complete file.
    pub has_file: bool,
}

impl PeerConfig {
    pub fn new(id: u32, hostname: impl Into<String>, port: u16, has_file: bool) -> Self {
        Self {
            id,
            hostname: hostname.into(),
            port,
            has_file,
        }
    }
}

impl fmt::Display for PeerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.hostname, self.port)
    }
}

/// Which side of the TCP link a connection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opens the TCP connection and sends its handshake first.
    Active,
    /// Wraps an accepted socket and receives the handshake first.
    Passive,
}

/// Whether `send` waits for the frame to reach the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendMode {
    /// `send` returns once the writer task has written the frame, and
    /// reports write failures to the caller.
    Synchronous,
    /// `send` returns as soon as the frame is queued. Write failures are
    /// only logged.
    #[default]
    FireAndForget,
}

/// Per-connection tuning.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub send_mode: SendMode,
    /// Bound on each socket read. `None` blocks until data or EOF.
    pub read_timeout: Option<Duration>,
    /// Bound on each socket write. `None` blocks until the write completes.
    pub write_timeout: Option<Duration>,
    /// Frames that may be queued for the writer task.
    pub outbound_capacity: usize,
    /// Largest frame accepted or sent, length prefix included.
    pub max_frame_len: usize,
    /// How long `stop` lets the writer drain before aborting it.
    pub close_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            send_mode: SendMode::default(),
            read_timeout: None,
            write_timeout: None,
            outbound_capacity: OUTBOUND_QUEUE_CAPACITY,
            max_frame_len: MAX_FRAME_LEN,
            close_timeout: CLOSE_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    pub fn with_send_mode(mut self, send_mode: SendMode) -> Self {
        self.send_mode = send_mode;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }
}
