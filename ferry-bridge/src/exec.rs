//! Transfer execution
//!
//! The entry points the menu layer calls once a protocol entry and the
//! absolute file paths (or target directory) are known. Each call validates
//! its inputs, resolves the driver executable on the search path, expands the
//! argument template, and hands the session to the transport bridge in the
//! mode the entry asks for. Any file list written during expansion is deleted
//! here after the bridge returns, success or not.

use std::path::{Path, PathBuf};

use tokio::sync::oneshot;

use ferry_common::{Session, TransferError};

use crate::bridge::{BridgeConfig, CommandSpec, direct};
use crate::expand::expand_args;
use crate::protocols::ProtocolConfig;

impl ProtocolConfig {
    /// Send files from the host to the remote client
    ///
    /// `file_paths` must be non-empty absolute paths, already authorized by
    /// the caller. Non-batch protocols accept exactly one file per call; the
    /// caller loops for more. Returns when the transfer has definitively
    /// ended and the session is back in interactive hands.
    pub async fn execute_send<S>(
        &self,
        session: &mut S,
        file_paths: &[PathBuf],
        cancel_rx: oneshot::Receiver<()>,
        config: &BridgeConfig,
    ) -> Result<(), TransferError>
    where
        S: Session,
    {
        self.check_restriction(session)?;

        if file_paths.is_empty() {
            return Err(TransferError::invalid("no files to send"));
        }
        if let Some(path) = file_paths.iter().find(|p| !p.is_absolute()) {
            return Err(TransferError::invalid(format!(
                "file path is not absolute: {}",
                path.display()
            )));
        }
        if !self.supports_batch && file_paths.len() > 1 {
            return Err(TransferError::invalid(format!(
                "protocol {} sends one file at a time",
                self.name
            )));
        }

        let program = resolve_program(&self.send_command)?;
        let (args, file_list) = expand_args(&self.send_args, file_paths, "")?;
        let spec = CommandSpec {
            program,
            args,
            working_dir: None,
        };

        if config.debug {
            eprintln!(
                "Transfer send via {}: {} {}",
                self.name,
                spec.program.display(),
                spec.args.join(" ")
            );
        }

        let result = self.run_bridge(session, &spec, cancel_rx, None, config).await;
        remove_file_list(file_list, config.debug);
        result
    }

    /// Receive files from the remote client into `target_dir`
    ///
    /// `target_dir` must be an absolute directory path; it becomes the
    /// driver's working directory so drivers that write to the cwd land in
    /// the right place. The entry's idle timeout applies on this side only:
    /// an upload whose client went away shows up as inbound silence.
    pub async fn execute_receive<S>(
        &self,
        session: &mut S,
        target_dir: &Path,
        cancel_rx: oneshot::Receiver<()>,
        config: &BridgeConfig,
    ) -> Result<(), TransferError>
    where
        S: Session,
    {
        self.check_restriction(session)?;

        if target_dir.as_os_str().is_empty() {
            return Err(TransferError::invalid("no target directory"));
        }
        if !target_dir.is_absolute() {
            return Err(TransferError::invalid(format!(
                "target directory is not absolute: {}",
                target_dir.display()
            )));
        }

        let program = resolve_program(&self.recv_command)?;
        let target = target_dir.display().to_string();
        let (args, file_list) = expand_args(&self.recv_args, &[], &target)?;
        let spec = CommandSpec {
            program,
            args,
            working_dir: Some(target_dir.to_path_buf()),
        };

        if config.debug {
            eprintln!(
                "Transfer receive via {} into {}: {} {}",
                self.name,
                target_dir.display(),
                spec.program.display(),
                spec.args.join(" ")
            );
        }

        let idle_timeout = self.idle_timeout_on_receive();
        let result = self
            .run_bridge(session, &spec, cancel_rx, idle_timeout, config)
            .await;
        remove_file_list(file_list, config.debug);
        result
    }

    fn check_restriction<S: Session>(&self, session: &S) -> Result<(), TransferError> {
        let kind = session.connection_kind();
        if self.connection_restriction.allows(kind) {
            Ok(())
        } else {
            Err(TransferError::invalid(format!(
                "protocol {} is not available on {kind} connections",
                self.name
            )))
        }
    }

    async fn run_bridge<S>(
        &self,
        session: &mut S,
        spec: &CommandSpec,
        cancel_rx: oneshot::Receiver<()>,
        idle_timeout: Option<std::time::Duration>,
        config: &BridgeConfig,
    ) -> Result<(), TransferError>
    where
        S: Session,
    {
        if self.requires_pty {
            #[cfg(unix)]
            {
                return crate::bridge::pty::run_with_pty(session, spec, cancel_rx, config).await;
            }
            #[cfg(not(unix))]
            {
                return Err(TransferError::invalid(format!(
                    "protocol {} needs a PTY, unsupported on this platform",
                    self.name
                )));
            }
        }
        direct::run_direct(session, spec, cancel_rx, idle_timeout, config).await
    }
}

/// Resolve a driver executable on the search path
fn resolve_program(name: &str) -> Result<PathBuf, TransferError> {
    which::which(name).map_err(|_| TransferError::BinaryNotFound {
        program: name.to_string(),
    })
}

/// Delete the temp file list written during argument expansion
fn remove_file_list(file_list: Option<PathBuf>, debug: bool) {
    if let Some(path) = file_list {
        if let Err(e) = std::fs::remove_file(&path) {
            if debug {
                eprintln!("Failed to remove file list {}: {e}", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::ConnectionRestriction;
    use ferry_common::{ConnectionKind, PtyInfo, WindowSize};
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
    use tokio::sync::watch;

    struct TestSession {
        stream: DuplexStream,
        kind: ConnectionKind,
    }

    impl TestSession {
        fn new(kind: ConnectionKind) -> (Self, DuplexStream) {
            let (near, far) = tokio::io::duplex(4096);
            (Self { stream: near, kind }, far)
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

        fn poll_flush(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.stream).poll_flush(cx)
        }

        fn poll_shutdown(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.stream).poll_shutdown(cx)
        }
    }

    impl Session for TestSession {
        fn connection_kind(&self) -> ConnectionKind {
            self.kind
        }

        fn pty(&self) -> Option<PtyInfo> {
            None
        }

        fn resize_events(&self) -> Option<watch::Receiver<WindowSize>> {
            None
        }
    }

    fn zmodem() -> ProtocolConfig {
        ProtocolConfig {
            key: "z".to_string(),
            name: "ZMODEM".to_string(),
            description: String::new(),
            send_command: "sz".to_string(),
            send_args: vec!["-b".to_string()],
            recv_command: "rz".to_string(),
            recv_args: vec![],
            supports_batch: true,
            requires_pty: false,
            is_default: true,
            connection_restriction: ConnectionRestriction::None,
            idle_timeout_ms: None,
        }
    }

    fn setup() -> (
        TestSession,
        DuplexStream,
        oneshot::Receiver<()>,
        BridgeConfig,
    ) {
        let (session, far) = TestSession::new(ConnectionKind::Telnet);
        let (_tx, rx) = oneshot::channel();
        (session, far, rx, BridgeConfig::default())
    }

    #[tokio::test]
    async fn test_send_rejects_empty_file_set() {
        let (mut session, _far, rx, config) = setup();
        let err = zmodem()
            .execute_send(&mut session, &[], rx, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_send_rejects_relative_path() {
        let (mut session, _far, rx, config) = setup();
        let files = vec![PathBuf::from("relative/file.zip")];
        let err = zmodem()
            .execute_send(&mut session, &files, rx, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_non_batch_rejects_multiple_files() {
        let (mut session, _far, rx, config) = setup();
        let mut protocol = zmodem();
        protocol.supports_batch = false;
        let files = vec![PathBuf::from("/files/a.zip"), PathBuf::from("/files/b.zip")];
        let err = protocol
            .execute_send(&mut session, &files, rx, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_restriction_blocks_wrong_connection_kind() {
        let (mut session, _far, rx, config) = setup();
        let mut protocol = zmodem();
        protocol.connection_restriction = ConnectionRestriction::SshOnly;
        let files = vec![PathBuf::from("/files/a.zip")];
        let err = protocol
            .execute_send(&mut session, &files, rx, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_missing_binary_reported_by_name() {
        let (mut session, _far, rx, config) = setup();
        let mut protocol = zmodem();
        protocol.send_command = "ferry-no-such-driver".to_string();
        let files = vec![PathBuf::from("/files/a.zip")];
        let err = protocol
            .execute_send(&mut session, &files, rx, &config)
            .await
            .unwrap_err();
        match err {
            TransferError::BinaryNotFound { program } => {
                assert_eq!(program, "ferry-no-such-driver");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_receive_rejects_relative_target_dir() {
        let (mut session, _far, rx, config) = setup();
        let err = zmodem()
            .execute_receive(&mut session, Path::new("uploads"), rx, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_receive_rejects_empty_target_dir() {
        let (mut session, _far, rx, config) = setup();
        let err = zmodem()
            .execute_receive(&mut session, Path::new(""), rx, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidInput(_)));
    }
}
