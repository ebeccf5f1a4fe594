//! Direct (pipe) mode transport bridge
//!
//! The external driver runs with plain stdin/stdout pipes spliced onto the
//! session byte stream. stderr is captured to a buffer and logged, never
//! merged into stdout: drivers write human-readable progress there, and a
//! single stray line in the binary stream corrupts the transfer.
//!
//! The outbound copy (driver stdout → session) is authoritative for "the
//! transfer is over": once it ends, shutdown starts regardless of whether
//! the process has technically exited. Shutdown steps are strictly ordered:
//! grace wait / forced kill, abort-sequence write on abnormal end, stop
//! signal to the inbound copy, bounded join, pause, drain of leftover
//! session bytes. Draining before the inbound copy has released the stream
//! would eat the next interactive prompt's input, hence the ordering.

use std::io;
use std::pin::pin;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{Notify, oneshot};
use tokio::time::{Instant, sleep, timeout};

use ferry_common::{Session, TransferError};

use super::monitor::AbortScanner;
use super::{
    BridgeConfig, CommandSpec, EndCause, Phase, TransferState, finish_result,
    write_abort_sequence,
};

/// Copy buffer size for both directions
const READ_CHUNK: usize = 8192;

/// Per-read timeout inside the post-transfer drain loop
const DRAIN_READ_TIMEOUT: Duration = Duration::from_millis(25);

/// How the inbound (session → driver stdin) copy ended
#[derive(Debug)]
enum InboundEnd {
    /// Session read returned EOF
    SessionEof,
    /// The shutdown stop signal fired
    Stopped,
    /// No inbound activity within the idle window
    IdleTimedOut,
    /// The consecutive-cancel run reached the abort threshold
    AbortDetected,
    /// The driver's stdin pipe went away (child exiting, expected race)
    ChildGone,
    /// Session read failed
    SessionError(io::Error),
}

/// How the outbound (driver stdout → session) copy ended
#[derive(Debug)]
enum OutboundEnd {
    /// Driver stdout reached EOF (exit or kill); the normal end
    ChildEof,
    /// The session write side failed; the session is unrecoverable
    SessionError(io::Error),
}

/// Run one transfer over raw pipes
pub(crate) async fn run_direct<S>(
    session: &mut S,
    spec: &CommandSpec,
    mut cancel_rx: oneshot::Receiver<()>,
    idle_timeout: Option<Duration>,
    config: &BridgeConfig,
) -> Result<(), TransferError>
where
    S: Session,
{
    let mut state = TransferState::new();

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        command.current_dir(dir);
    }

    let mut child = command.spawn()?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| io::Error::other("child stdin not captured"))?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("child stdout not captured"))?;
    let stderr = child.stderr.take();

    // stderr drains on its own so a chatty driver can never fill the pipe
    // and stall; the buffer is logged after shutdown.
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_end(&mut buf).await;
        }
        buf
    });

    let stop = Notify::new();
    let (reader, writer) = tokio::io::split(&mut *session);
    let mut inbound = pin!(inbound_copy(reader, stdin, &stop, idle_timeout));
    let mut outbound = pin!(async {
        let mut writer = writer;
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match stdout.read(&mut buf).await {
                Ok(0) => return (OutboundEnd::ChildEof, writer),
                Ok(n) => {
                    if let Err(e) = writer.write_all(&buf[..n]).await {
                        return (OutboundEnd::SessionError(e), writer);
                    }
                    if let Err(e) = writer.flush().await {
                        return (OutboundEnd::SessionError(e), writer);
                    }
                }
                // Read errors on a torn-down pipe are an expected shutdown race
                Err(_) => return (OutboundEnd::ChildEof, writer),
            }
        }
    });
    state.started();

    let mut exit_status: Option<ExitStatus> = None;
    let mut wait_done = false;
    let mut cancel_armed = true;
    let mut inbound_result = None;
    let mut outbound_result = None;

    // Running: race the copy tasks, process exit and cancellation. The loop
    // ends when the outbound copy does, or when an abnormal end has already
    // reaped the child. In the second case the outbound copy can be stuck in
    // a write to a client that stopped reading, with no child EOF left to
    // unblock it; it gets a bounded join below, never an unconditional await.
    loop {
        let mut kill_child = false;

        tokio::select! {
            res = &mut outbound, if outbound_result.is_none() => {
                outbound_result = Some(res);
            }
            res = &mut inbound, if inbound_result.is_none() => {
                match &res.0 {
                    InboundEnd::IdleTimedOut => {
                        state.flag(EndCause::IdleTimedOut);
                        kill_child = true;
                    }
                    InboundEnd::AbortDetected => {
                        state.flag(EndCause::AbortDetected);
                        kill_child = true;
                    }
                    InboundEnd::SessionError(e) => {
                        if config.debug {
                            eprintln!("Transfer inbound read failed: {e}");
                        }
                    }
                    InboundEnd::SessionEof
                    | InboundEnd::Stopped
                    | InboundEnd::ChildGone => {}
                }
                inbound_result = Some(res);
            }
            status = child.wait(), if !wait_done => {
                wait_done = true;
                exit_status = status.ok();
            }
            res = &mut cancel_rx, if cancel_armed => {
                cancel_armed = false;
                // Err means the caller dropped the sender: no cancellation
                // is possible for the rest of this transfer.
                if res.is_ok() {
                    state.flag(EndCause::Cancelled);
                    kill_child = true;
                }
            }
        }

        if kill_child && exit_status.is_none() {
            // Killing the driver also closes its stdout, which unblocks the
            // outbound copy with EOF and starts the ordered shutdown.
            let _ = child.start_kill();
        }
        if outbound_result.is_some() {
            break;
        }
        if wait_done && state.cause() != EndCause::NormalExit {
            break;
        }
    }

    // Bounded recovery of the write half; a copy wedged on a stalled session
    // forfeits it, and the abort write is skipped rather than queued behind
    // the blocked write.
    let (outbound_end, mut writer) = match outbound_result {
        Some((end, writer)) => (Some(end), Some(writer)),
        None => match timeout(config.inbound_join_window, &mut outbound).await {
            Ok((end, writer)) => (Some(end), Some(writer)),
            Err(_) => (None, None),
        },
    };

    if let Some(OutboundEnd::SessionError(e)) = &outbound_end {
        state.flag(EndCause::SessionClosed);
        if config.debug {
            eprintln!("Transfer outbound write failed: {e}");
        }
    }

    // GraceWait (skipped when the process is already reaped)
    state.output_ended(exit_status.is_some());
    let status = match exit_status {
        Some(status) => Some(status),
        None => {
            let status = match timeout(config.grace_period, child.wait()).await {
                Ok(status) => status.ok(),
                Err(_) => {
                    let _ = child.start_kill();
                    child.wait().await.ok()
                }
            };
            state.terminated();
            status
        }
    };
    debug_assert_eq!(state.phase(), Phase::Terminated);

    // A half-sent frame left in flight is worse than an explicit abort: tell
    // the remote client to leave protocol mode.
    if state.is_abnormal(status) {
        if let Some(writer) = &mut writer {
            write_abort_sequence(writer).await;
        }
    }

    // Release the inbound copy, then reclaim the read half for draining.
    stop.notify_one();
    let reader = match inbound_result {
        Some((_, reader)) => Some(reader),
        None => match timeout(config.inbound_join_window, &mut inbound).await {
            Ok((_, reader)) => Some(reader),
            Err(_) => None,
        },
    };

    state.draining();
    sleep(config.drain_pause).await;
    if let Some(mut reader) = reader {
        drain_session(&mut reader, config.drain_window).await;
    }
    state.done();

    if let Ok(buf) = stderr_task.await {
        if config.debug && !buf.is_empty() {
            eprintln!(
                "Transfer driver stderr ({}): {}",
                spec.program.display(),
                String::from_utf8_lossy(&buf).trim_end()
            );
        }
    }

    finish_result(state.cause(), status)
}

/// Session → driver stdin copy with embedded idle/abort monitoring
///
/// Owns the read half and returns it so the shutdown path can drain the
/// session after the copy has released it. Dropping `stdin` on any exit
/// path closes the driver's stdin pipe.
async fn inbound_copy<R>(
    mut reader: R,
    mut stdin: ChildStdin,
    stop: &Notify,
    idle_timeout: Option<Duration>,
) -> (InboundEnd, R)
where
    R: AsyncRead + Unpin,
{
    let mut scanner = AbortScanner::new();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut idle_deadline = idle_timeout.map(|window| Instant::now() + window);

    loop {
        tokio::select! {
            _ = stop.notified() => return (InboundEnd::Stopped, reader),
            _ = idle_sleep(idle_deadline) => return (InboundEnd::IdleTimedOut, reader),
            result = reader.read(&mut buf) => match result {
                Ok(0) => return (InboundEnd::SessionEof, reader),
                Ok(n) => {
                    let scan = scanner.scan(&buf[..n]);
                    if scan.abort {
                        return (InboundEnd::AbortDetected, reader);
                    }
                    // Cancel bytes never reset the idle deadline; an abort
                    // burst must not postpone the timeout it is racing.
                    if scan.saw_activity {
                        if let Some(window) = idle_timeout {
                            idle_deadline = Some(Instant::now() + window);
                        }
                    }
                    if stdin.write_all(&buf[..n]).await.is_err()
                        || stdin.flush().await.is_err()
                    {
                        return (InboundEnd::ChildGone, reader);
                    }
                }
                Err(e) => return (InboundEnd::SessionError(e), reader),
            },
        }
    }
}

/// Sleep until the idle deadline, or forever when no timeout is configured
async fn idle_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Swallow trailing protocol bytes so they never leak into the next prompt
async fn drain_session<R>(reader: &mut R, window: Duration)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 256];
    let deadline = Instant::now() + window;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        match timeout(DRAIN_READ_TIMEOUT.min(remaining), reader.read(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => {}
            // Timeout, EOF or error: nothing left worth waiting for
            _ => return,
        }
    }
}
