//! Shared helpers for bridge integration tests

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::watch;

use ferry_bridge::{ConnectionKind, PtyInfo, Session, WindowSize};

/// In-memory session backed by one side of a duplex pipe
///
/// The other side plays the remote client: tests write inbound protocol
/// bytes there and read what the server side sent.
pub struct TestSession {
    stream: DuplexStream,
    kind: ConnectionKind,
    pty: Option<PtyInfo>,
    resize: Option<watch::Receiver<WindowSize>>,
}

impl TestSession {
    pub fn telnet() -> (Self, DuplexStream) {
        Self::telnet_with_buffer(16 * 1024)
    }

    /// Telnet session with an explicit duplex capacity, for flow-control
    /// scenarios where the far side stops reading
    pub fn telnet_with_buffer(capacity: usize) -> (Self, DuplexStream) {
        let (near, far) = tokio::io::duplex(capacity);
        (
            Self {
                stream: near,
                kind: ConnectionKind::Telnet,
                pty: None,
                resize: None,
            },
            far,
        )
    }

    pub fn ssh_with_pty() -> (Self, DuplexStream) {
        let (near, far) = tokio::io::duplex(16 * 1024);
        (
            Self {
                stream: near,
                kind: ConnectionKind::Ssh,
                pty: Some(PtyInfo {
                    term: "xterm-256color".to_string(),
                    size: WindowSize { cols: 80, rows: 24 },
                }),
                resize: None,
            },
            far,
        )
    }

    /// PTY session whose window size can be changed through the returned
    /// sender, like a live SSH channel forwarding window-change requests
    pub fn ssh_with_resizable_pty() -> (Self, DuplexStream, watch::Sender<WindowSize>) {
        let initial = WindowSize { cols: 80, rows: 24 };
        let (resize_tx, resize_rx) = watch::channel(initial);
        let (near, far) = tokio::io::duplex(16 * 1024);
        (
            Self {
                stream: near,
                kind: ConnectionKind::Ssh,
                pty: Some(PtyInfo {
                    term: "xterm-256color".to_string(),
                    size: initial,
                }),
                resize: Some(resize_rx),
            },
            far,
            resize_tx,
        )
    }
}

impl AsyncRead for TestSession {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TestSession {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

impl Session for TestSession {
    fn connection_kind(&self) -> ConnectionKind {
        self.kind
    }

    fn pty(&self) -> Option<PtyInfo> {
        self.pty.clone()
    }

    fn resize_events(&self) -> Option<watch::Receiver<WindowSize>> {
        self.resize.clone()
    }
}
