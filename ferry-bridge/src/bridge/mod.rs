//! Dual-mode transport bridge
//!
//! Given a resolved external command and a live session, the bridge starts
//! the process, wires its standard streams to the session, and returns only
//! when the transfer has definitively ended: process reaped, copy tasks
//! joined, leftover session bytes drained. Two modes:
//!
//! - [`direct`]: raw unbuffered pipes, the common case. A PTY's line
//!   discipline can itself mangle binary protocol bytes, so pipes are the
//!   default.
//! - [`pty`]: a pseudo-terminal in raw mode, for legacy drivers that expect
//!   terminal semantics.
//!
//! One transfer is a handful of concurrent copy tasks scoped to a single
//! session, all joined before the enclosing call returns. Nothing here is
//! shared across transfers.

pub(crate) mod direct;
pub(crate) mod monitor;
#[cfg(unix)]
pub(crate) mod pty;

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use ferry_common::TransferError;

/// The in-band cancel byte binary transfer protocols use (CAN, 0x18)
pub(crate) const CANCEL_BYTE: u8 = 0x18;

/// Consecutive cancel bytes that constitute a genuine in-band abort
pub(crate) const ABORT_THRESHOLD: usize = 5;

/// Cancel bytes written to the session when a transfer ends abnormally
const ABORT_RUN_LENGTH: usize = 8;

/// Tunable timing knobs for the transport bridge
///
/// The grace and drain windows were tuned against real drivers; they are
/// configuration because other drivers and clients retransmit on different
/// schedules.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// How long a process gets to exit on its own after its output ends
    /// before it is force-killed
    pub grace_period: Duration,
    /// Bound on waiting for the inbound copy task to notice the stop signal
    pub inbound_join_window: Duration,
    /// Pause between releasing the inbound task and draining leftovers
    pub drain_pause: Duration,
    /// Total budget for draining trailing protocol bytes from the session
    pub drain_window: Duration,
    /// Emit diagnostic output to stderr
    pub debug: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(2),
            inbound_join_window: Duration::from_millis(500),
            drain_pause: Duration::from_millis(100),
            drain_window: Duration::from_millis(300),
            debug: false,
        }
    }
}

/// A fully resolved external command, ready to spawn
#[derive(Debug, Clone)]
pub(crate) struct CommandSpec {
    /// Absolute path of the executable, resolved on the search path
    pub program: PathBuf,
    /// Final argument vector after template expansion
    pub args: Vec<String>,
    /// Working directory (receive side: the target directory)
    pub working_dir: Option<PathBuf>,
}

/// Why a transfer stopped running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EndCause {
    /// The process finished of its own accord
    NormalExit,
    /// No inbound activity within the configured idle window
    IdleTimedOut,
    /// The remote client sent an in-band abort run
    AbortDetected,
    /// The caller's cancellation token fired
    Cancelled,
    /// The session died in both directions while the process was running
    SessionClosed,
}

/// Phase of a single bridge invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Starting,
    Running,
    GraceWait,
    Terminated,
    Draining,
    Done,
}

/// Explicit state for one transfer
///
/// The races between "output ended", "process exited", cancellation and the
/// idle/abort monitor are easy to get subtly wrong with loose flags, so the
/// bridge drives this machine instead:
/// `Starting → Running → GraceWait → Terminated → Draining → Done`,
/// with `GraceWait` skipped when the process was already reaped by the time
/// the output path ended. The first abnormal cause to be flagged wins;
/// later ones are ignored.
#[derive(Debug)]
pub(crate) struct TransferState {
    phase: Phase,
    cause: EndCause,
}

impl TransferState {
    pub(crate) fn new() -> Self {
        Self {
            phase: Phase::Starting,
            cause: EndCause::NormalExit,
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn cause(&self) -> EndCause {
        self.cause
    }

    /// The external process is up and both copy tasks are wired
    pub(crate) fn started(&mut self) {
        debug_assert_eq!(self.phase, Phase::Starting);
        self.phase = Phase::Running;
    }

    /// Record an abnormal end cause; the first one flagged wins
    pub(crate) fn flag(&mut self, cause: EndCause) {
        debug_assert_ne!(cause, EndCause::NormalExit);
        if self.phase == Phase::Running && self.cause == EndCause::NormalExit {
            self.cause = cause;
        }
    }

    /// The authoritative output path ended; `reaped` skips the grace wait
    pub(crate) fn output_ended(&mut self, reaped: bool) {
        debug_assert_eq!(self.phase, Phase::Running);
        self.phase = if reaped {
            Phase::Terminated
        } else {
            Phase::GraceWait
        };
    }

    /// The process has been reaped (voluntarily or force-killed)
    pub(crate) fn terminated(&mut self) {
        debug_assert_eq!(self.phase, Phase::GraceWait);
        self.phase = Phase::Terminated;
    }

    /// Copy tasks released; trailing session bytes are being drained
    pub(crate) fn draining(&mut self) {
        debug_assert_eq!(self.phase, Phase::Terminated);
        self.phase = Phase::Draining;
    }

    pub(crate) fn done(&mut self) {
        debug_assert_eq!(self.phase, Phase::Draining);
        self.phase = Phase::Done;
    }

    /// Whether this end requires the in-band abort sequence on the session
    pub(crate) fn is_abnormal(&self, status: Option<ExitStatus>) -> bool {
        self.cause != EndCause::NormalExit || !status.map(|s| s.success()).unwrap_or(false)
    }
}

/// Map a finished transfer to the caller-visible result
pub(crate) fn finish_result(
    cause: EndCause,
    status: Option<ExitStatus>,
) -> Result<(), TransferError> {
    match cause {
        EndCause::Cancelled => Err(TransferError::Cancelled),
        EndCause::AbortDetected => Err(TransferError::Aborted),
        EndCause::IdleTimedOut => Err(TransferError::IdleTimeout),
        EndCause::SessionClosed => Err(TransferError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "session closed during transfer",
        ))),
        EndCause::NormalExit => match status {
            Some(status) if status.success() => Ok(()),
            Some(status) => Err(TransferError::AbnormalExit {
                code: status.code(),
            }),
            None => Err(TransferError::AbnormalExit { code: None }),
        },
    }
}

/// Write the protocol abort sequence to the session
///
/// Output already queued before a kill can still reach the remote client and
/// be read as a live protocol frame; a run of cancel bytes forces the client
/// out of protocol mode instead of leaving it silently re-armed. Write
/// failures are ignored: the session may already be gone.
pub(crate) async fn write_abort_sequence<W>(writer: &mut W)
where
    W: AsyncWrite + Unpin,
{
    let mut sequence = [CANCEL_BYTE; ABORT_RUN_LENGTH + 2];
    sequence[ABORT_RUN_LENGTH] = b'\r';
    sequence[ABORT_RUN_LENGTH + 1] = b'\n';
    let _ = writer.write_all(&sequence).await;
    let _ = writer.flush().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_flow_with_grace_wait() {
        let mut state = TransferState::new();
        assert_eq!(state.phase(), Phase::Starting);

        state.started();
        assert_eq!(state.phase(), Phase::Running);

        state.output_ended(false);
        assert_eq!(state.phase(), Phase::GraceWait);

        state.terminated();
        state.draining();
        state.done();
        assert_eq!(state.phase(), Phase::Done);
        assert_eq!(state.cause(), EndCause::NormalExit);
    }

    #[test]
    fn test_grace_wait_skipped_when_already_reaped() {
        let mut state = TransferState::new();
        state.started();
        state.output_ended(true);
        assert_eq!(state.phase(), Phase::Terminated);
    }

    #[test]
    fn test_first_cause_wins() {
        let mut state = TransferState::new();
        state.started();
        state.flag(EndCause::AbortDetected);
        state.flag(EndCause::IdleTimedOut);
        state.flag(EndCause::Cancelled);
        assert_eq!(state.cause(), EndCause::AbortDetected);
    }

    #[test]
    fn test_flag_after_running_is_ignored() {
        let mut state = TransferState::new();
        state.started();
        state.output_ended(true);
        state.flag(EndCause::Cancelled);
        assert_eq!(state.cause(), EndCause::NormalExit);
    }

    #[test]
    fn test_abnormal_when_cause_flagged() {
        let mut state = TransferState::new();
        state.started();
        state.flag(EndCause::IdleTimedOut);
        assert!(state.is_abnormal(None));
    }

    #[test]
    fn test_abnormal_when_never_reaped() {
        let state = TransferState::new();
        assert!(state.is_abnormal(None));
    }

    #[test]
    fn test_finish_result_mapping() {
        assert!(matches!(
            finish_result(EndCause::Cancelled, None),
            Err(TransferError::Cancelled)
        ));
        assert!(matches!(
            finish_result(EndCause::AbortDetected, None),
            Err(TransferError::Aborted)
        ));
        assert!(matches!(
            finish_result(EndCause::IdleTimedOut, None),
            Err(TransferError::IdleTimeout)
        ));
        assert!(matches!(
            finish_result(EndCause::NormalExit, None),
            Err(TransferError::AbnormalExit { code: None })
        ));
    }

    #[tokio::test]
    async fn test_abort_sequence_shape() {
        let mut out = Vec::new();
        write_abort_sequence(&mut out).await;
        assert_eq!(out.len(), ABORT_RUN_LENGTH + 2);
        assert!(out[..ABORT_RUN_LENGTH].iter().all(|&b| b == CANCEL_BYTE));
        assert_eq!(&out[ABORT_RUN_LENGTH..], b"\r\n");
    }
}
