//! Human-readable per-peer event log.
//!
//! Each peer process appends one timestamped line per protocol event to
//! `log_peer_<id>.log`:
//!
//! ```text
//! 2026-10-18 14:02:11 Peer 1001 makes a connection to Peer 1002.
//! 2026-10-18 14:02:12 Peer 1001 is unchoked by 1002.
//! ```
//!
//! The log never fails its caller. If the file cannot be opened or written
//! the problem is reported through `tracing` and the event is still emitted
//! as a `tracing` record.
//!
//! # Examples
//!
//! ```no_run
//! use peerlink::event_log::{EventLog, PeerEvent};
//!
//! let log = EventLog::open(".", 1001);
//! log.record(&PeerEvent::Connected { target: 1002 });
//! log.record(&PeerEvent::PreferredNeighbors(vec![1002, 1005]));
//! ```

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::constants::{EVENT_LOG_PREFIX, EVENT_TIMESTAMP_FORMAT};

/// An event worth recording in the peer's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// We opened a TCP connection to `target`.
    Connected { target: u32 },
    /// The preferred neighbor set changed.
    PreferredNeighbors(Vec<u32>),
    /// The given peer was picked as the optimistically unchoked neighbor.
    OptimisticallyUnchoked(u32),
    /// The given peer unchoked us.
    UnchokedBy(u32),
    /// The given peer choked us.
    ChokedBy(u32),
    /// The given peer sent `interested`.
    InterestedFrom(u32),
    /// The given peer sent `not interested`.
    NotInterestedFrom(u32),
}

impl PeerEvent {
    /// Renders the event as seen by peer `self_id`, without timestamp.
    pub fn describe(&self, self_id: u32) -> String {
        match self {
            PeerEvent::Connected { target } => {
                format!("Peer {} makes a connection to Peer {}.", self_id, target)
            }
            PeerEvent::PreferredNeighbors(ids) => {
                let list = ids.iter().map(u32::to_string).collect::<Vec<_>>().join(", ");
                format!("Peer {} has the preferred neighbors {}.", self_id, list)
            }
            PeerEvent::OptimisticallyUnchoked(id) => format!(
                "Peer {} has the optimistically unchoked neighbor {}.",
                self_id, id
            ),
            PeerEvent::UnchokedBy(id) => format!("Peer {} is unchoked by {}.", self_id, id),
            PeerEvent::ChokedBy(id) => format!("Peer {} is choked by {}.", self_id, id),
            PeerEvent::InterestedFrom(id) => format!(
                "Peer {} received the 'interested' message from {}.",
                self_id, id
            ),
            PeerEvent::NotInterestedFrom(id) => format!(
                "Peer {} received the 'not interested' message from {}.",
                self_id, id
            ),
        }
    }
}

/// Append-only event log for one peer process.
///
/// Safe to share between connections; lines are written whole under a
/// lock.
pub struct EventLog {
    self_id: u32,
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl EventLog {
    /// Opens (truncating) `log_peer_<self_id>.log` inside `dir`.
    pub fn open(dir: impl AsRef<Path>, self_id: u32) -> Self {
        let path = dir
            .as_ref()
            .join(format!("{}{}.log", EVENT_LOG_PREFIX, self_id));

        let file = match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
        {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "event log could not be opened");
                None
            }
        };

        Self {
            self_id,
            path,
            file: Mutex::new(file),
        }
    }

    /// A log that only emits `tracing` records.
    pub fn disabled(self_id: u32) -> Self {
        Self {
            self_id,
            path: PathBuf::new(),
            file: Mutex::new(None),
        }
    }

    pub fn self_id(&self) -> u32 {
        self.self_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_file_backed(&self) -> bool {
        self.file.lock().is_some()
    }

    pub fn record(&self, event: &PeerEvent) {
        let line = format!("{} {}", timestamp(), event.describe(self.self_id));
        info!(peer = self.self_id, "{}", line);

        let mut file = self.file.lock();
        if let Some(f) = file.as_mut() {
            if let Err(e) = writeln!(f, "{}", line).and_then(|_| f.flush()) {
                warn!(path = %self.path.display(), error = %e, "event log write failed");
            }
        }
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("self_id", &self.self_id)
            .field("path", &self.path)
            .finish()
    }
}

fn timestamp() -> String {
    chrono::Local::now()
        .format(EVENT_TIMESTAMP_FORMAT)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_event_lines() {
        assert_eq!(
            PeerEvent::Connected { target: 1002 }.describe(1001),
            "Peer 1001 makes a connection to Peer 1002."
        );
        assert_eq!(
            PeerEvent::PreferredNeighbors(vec![1002, 1003, 1005]).describe(1001),
            "Peer 1001 has the preferred neighbors 1002, 1003, 1005."
        );
        assert_eq!(
            PeerEvent::OptimisticallyUnchoked(1004).describe(1001),
            "Peer 1001 has the optimistically unchoked neighbor 1004."
        );
        assert_eq!(
            PeerEvent::UnchokedBy(1002).describe(1001),
            "Peer 1001 is unchoked by 1002."
        );
        assert_eq!(
            PeerEvent::ChokedBy(1002).describe(1001),
            "Peer 1001 is choked by 1002."
        );
        assert_eq!(
            PeerEvent::InterestedFrom(1002).describe(1001),
            "Peer 1001 received the 'interested' message from 1002."
        );
        assert_eq!(
            PeerEvent::NotInterestedFrom(1002).describe(1001),
            "Peer 1001 received the 'not interested' message from 1002."
        );
    }

    #[test]
    fn test_empty_neighbor_list() {
        assert_eq!(
            PeerEvent::PreferredNeighbors(Vec::new()).describe(7),
            "Peer 7 has the preferred neighbors ."
        );
    }

    #[test]
    fn test_record_writes_timestamped_lines() {
        let temp = TempDir::new().unwrap();
        let log = EventLog::open(temp.path(), 1001);
        assert!(log.is_file_backed());
        assert_eq!(log.path(), temp.path().join("log_peer_1001.log"));

        log.record(&PeerEvent::Connected { target: 1002 });
        log.record(&PeerEvent::ChokedBy(1002));

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        // "YYYY-MM-DD HH:MM:SS " is 20 characters.
        assert_eq!(lines[0].as_bytes()[4], b'-');
        assert_eq!(lines[0].as_bytes()[13], b':');
        assert_eq!(&lines[0][20..], "Peer 1001 makes a connection to Peer 1002.");
        assert_eq!(&lines[1][20..], "Peer 1001 is choked by 1002.");
    }

    #[test]
    fn test_unopenable_path_degrades() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("no").join("such").join("dir");
        let log = EventLog::open(&missing, 3);
        assert!(!log.is_file_backed());

        // Must not panic.
        log.record(&PeerEvent::UnchokedBy(4));
    }

    #[test]
    fn test_disabled_log() {
        let log = EventLog::disabled(5);
        assert_eq!(log.self_id(), 5);
        assert!(!log.is_file_backed());
        log.record(&PeerEvent::InterestedFrom(6));
    }
}
