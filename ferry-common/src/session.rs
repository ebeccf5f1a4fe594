//! Session abstraction consumed by the transfer bridge
//!
//! The SSH and Telnet layers each implement [`Session`] over their own
//! transport. The bridge borrows a session for the duration of one transfer:
//! it reads and writes the raw byte stream, forwards terminal geometry to a
//! PTY when the protocol needs one, and follows resize notifications. It
//! never closes the session and never outlives it.
//!
//! There is deliberately no "interrupt a pending read" hook here. The bridge
//! races every session read against a transfer-scoped stop signal inside
//! `tokio::select!`; losing that race leaves the stream untouched, so
//! shutdown can never consume the next interactive input byte.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;

/// Terminal window dimensions in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for WindowSize {
    fn default() -> Self {
        // The classic terminal geometry, used when the session reports none
        Self { cols: 80, rows: 24 }
    }
}

/// PTY metadata reported by a session that allocated a terminal
#[derive(Debug, Clone)]
pub struct PtyInfo {
    /// Terminal type advertised by the client (e.g. "xterm-256color")
    pub term: String,
    /// Current window size
    pub size: WindowSize,
}

/// Which listener a session arrived on
///
/// Some protocol entries are restricted to one connection type (e.g. a
/// driver that only behaves over a clean 8-bit SSH channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Ssh,
    Telnet,
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ssh => write!(f, "ssh"),
            Self::Telnet => write!(f, "telnet"),
        }
    }
}

/// A live remote terminal session, borrowed by the bridge for one transfer
///
/// The byte stream is the session's raw channel; binary protocol frames pass
/// through it unmodified. Implementations must not buffer writes beyond what
/// `poll_flush` flushes.
pub trait Session: AsyncRead + AsyncWrite + Send + Unpin {
    /// Which listener this session arrived on
    fn connection_kind(&self) -> ConnectionKind;

    /// PTY metadata, if the client requested a terminal
    fn pty(&self) -> Option<PtyInfo>;

    /// Window resize notification stream, if the session can resize
    ///
    /// The receiver always holds the most recent size; the bridge forwards
    /// each change to the transfer PTY via `TIOCSWINSZ`.
    fn resize_events(&self) -> Option<watch::Receiver<WindowSize>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_window_size() {
        let size = WindowSize::default();
        assert_eq!(size.cols, 80);
        assert_eq!(size.rows, 24);
    }

    #[test]
    fn test_connection_kind_display() {
        assert_eq!(format!("{}", ConnectionKind::Ssh), "ssh");
        assert_eq!(format!("{}", ConnectionKind::Telnet), "telnet");
    }
}
