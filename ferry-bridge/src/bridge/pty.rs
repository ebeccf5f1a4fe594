//! PTY mode transport bridge
//!
//! Some legacy drivers probe for a controlling terminal and misbehave over
//! plain pipes, so this mode runs the driver on the slave side of a
//! pseudo-terminal. The slave termios is put into raw mode first: echo or
//! control-character interpretation in the line discipline would alter
//! binary protocol bytes in transit.
//!
//! Master-side I/O uses `AsyncFd` readiness so the copy loops integrate
//! with the tokio reactor instead of polling. `EIO` from the master is how
//! Linux reports "slave side closed" and is treated as EOF, not a failure.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::pin::pin;
use std::process::{ExitStatus, Stdio};

use nix::pty::{Winsize, openpty};
use nix::sys::termios::{self, SetArg, Termios};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::{Notify, oneshot, watch};
use tokio::time::timeout;

use ferry_common::{Session, TransferError, WindowSize};

use super::{
    BridgeConfig, CommandSpec, EndCause, TransferState, finish_result, write_abort_sequence,
};

/// Copy buffer size for both directions
const READ_CHUNK: usize = 8192;

/// How the inbound (session → PTY master) copy ended
#[derive(Debug)]
enum InboundEnd {
    SessionEof,
    Stopped,
    /// Master write failed; the PTY is being torn down (expected race)
    PtyClosed,
    SessionError(io::Error),
}

/// How the outbound (PTY master → session) copy ended
#[derive(Debug)]
enum OutboundEnd {
    /// Master read hit EOF or EIO: the driver closed its side
    PtyEof,
    SessionError(io::Error),
}

/// Run one transfer through a raw-mode pseudo-terminal
pub(crate) async fn run_with_pty<S>(
    session: &mut S,
    spec: &CommandSpec,
    mut cancel_rx: oneshot::Receiver<()>,
    config: &BridgeConfig,
) -> Result<(), TransferError>
where
    S: Session,
{
    let mut state = TransferState::new();

    let pty_info = session.pty();
    let initial_size = pty_info.as_ref().map(|p| p.size).unwrap_or_default();
    let term = pty_info.map(|p| p.term);
    let mut resize_rx = session.resize_events();

    let (master, slave, saved_termios) = open_raw_pty(initial_size)?;
    let master_fd = master.get_ref().as_raw_fd();

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::from(slave.try_clone().map_err(io_from)?))
        .stdout(Stdio::from(slave.try_clone().map_err(io_from)?))
        .stderr(Stdio::from(slave))
        .kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        command.current_dir(dir);
    }
    if let Some(term) = &term {
        command.env("TERM", term);
    }
    unsafe {
        command.pre_exec(|| {
            // New session with the PTY slave (fd 0) as controlling terminal
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            if libc::ioctl(0, libc::TIOCSCTTY as _, 0) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
    let mut child = command.spawn()?;
    // The parent must hold no slave fd, or master reads would never see EOF
    // when the driver exits. All clones were consumed by spawn.

    let stop = Notify::new();
    let (reader, writer) = tokio::io::split(&mut *session);
    let mut inbound = pin!(inbound_copy(reader, &master, &stop));
    let mut outbound = pin!(outbound_copy(&master, writer));
    state.started();

    let mut exit_status: Option<ExitStatus> = None;
    let mut wait_done = false;
    let mut cancel_armed = true;
    let mut inbound_done = false;
    let mut outbound_result: Option<(OutboundEnd, _)> = None;

    // Running: the process's natural exit is the primary end, raced against
    // cancellation, the copy tasks and resize notifications.
    loop {
        let mut kill_child = false;

        tokio::select! {
            status = child.wait(), if !wait_done => {
                wait_done = true;
                exit_status = status.ok();
            }
            res = &mut cancel_rx, if cancel_armed => {
                cancel_armed = false;
                if res.is_ok() {
                    state.flag(EndCause::Cancelled);
                    kill_child = true;
                }
            }
            res = &mut inbound, if !inbound_done => {
                inbound_done = true;
                if let InboundEnd::SessionError(e) = &res {
                    if config.debug {
                        eprintln!("Transfer inbound read failed: {e}");
                    }
                }
            }
            res = &mut outbound, if outbound_result.is_none() => {
                if let (OutboundEnd::SessionError(e), _) = &res {
                    if config.debug {
                        eprintln!("Transfer outbound write failed: {e}");
                    }
                }
                outbound_result = Some(res);
            }
            changed = resize_changed(&mut resize_rx) => match changed {
                Some(size) => resize_pty(master_fd, size),
                None => resize_rx = None,
            },
        }

        if kill_child && exit_status.is_none() {
            let _ = child.start_kill();
        }
        if wait_done {
            break;
        }
        // A session dead in both directions cannot finish a transfer; give
        // the driver the grace period, then kill it rather than wedge here.
        if inbound_done && outbound_result.is_some() {
            state.flag(EndCause::SessionClosed);
            exit_status = match timeout(config.grace_period, child.wait()).await {
                Ok(status) => status.ok(),
                Err(_) => {
                    let _ = child.start_kill();
                    child.wait().await.ok()
                }
            };
            break;
        }
    }

    // Flush trailing driver output still buffered in the master, bounded.
    let mut writer = match outbound_result {
        Some((_, writer)) => Some(writer),
        None => match timeout(config.inbound_join_window, &mut outbound).await {
            Ok((_, writer)) => Some(writer),
            Err(_) => None,
        },
    };

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

    if state.is_abnormal(status) {
        if let Some(writer) = &mut writer {
            write_abort_sequence(writer).await;
        }
    }

    // Release the inbound copy and join it before the PTY goes away.
    stop.notify_one();
    if !inbound_done {
        let _ = timeout(config.inbound_join_window, &mut inbound).await;
    }

    state.draining();
    // Restore the saved terminal state before closing the PTY. Best effort:
    // the device is about to be destroyed anyway.
    let _ = termios::tcsetattr(master.get_ref(), SetArg::TCSANOW, &saved_termios);
    state.done();

    finish_result(state.cause(), status)
}

/// Allocate a PTY pair, save the slave termios and switch it to raw mode
fn open_raw_pty(size: WindowSize) -> io::Result<(AsyncFd<File>, OwnedFd, Termios)> {
    let winsize = Winsize {
        ws_row: size.rows,
        ws_col: size.cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    let pty = openpty(&winsize, None).map_err(io_from)?;

    let saved = termios::tcgetattr(&pty.slave).map_err(io_from)?;
    let mut raw = saved.clone();
    termios::cfmakeraw(&mut raw);
    termios::tcsetattr(&pty.slave, SetArg::TCSANOW, &raw).map_err(io_from)?;

    set_nonblocking(pty.master.as_raw_fd())?;
    let master = AsyncFd::new(File::from(pty.master))?;

    Ok((master, pty.slave, saved))
}

fn io_from<E: Into<io::Error>>(e: E) -> io::Error {
    e.into()
}

/// Set a file descriptor to non-blocking mode for AsyncFd
fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    use nix::fcntl::{FcntlArg, OFlag, fcntl};

    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(io_from)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(io_from)?;
    Ok(())
}

/// Forward the session's new window size to the PTY
fn resize_pty(master_fd: RawFd, size: WindowSize) {
    let winsize = Winsize {
        ws_row: size.rows,
        ws_col: size.cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    unsafe {
        libc::ioctl(master_fd, libc::TIOCSWINSZ as _, &winsize);
    }
}

/// Wait for the next resize notification, or forever if there is none
async fn resize_changed(rx: &mut Option<watch::Receiver<WindowSize>>) -> Option<WindowSize> {
    match rx {
        Some(receiver) => match receiver.changed().await {
            Ok(()) => Some(*receiver.borrow()),
            // Sender gone: no more resizes for this session
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

/// Session → PTY master copy
async fn inbound_copy<R>(mut reader: R, master: &AsyncFd<File>, stop: &Notify) -> InboundEnd
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        tokio::select! {
            _ = stop.notified() => return InboundEnd::Stopped,
            result = reader.read(&mut buf) => match result {
                Ok(0) => return InboundEnd::SessionEof,
                Ok(n) => {
                    if master_write_all(master, &buf[..n]).await.is_err() {
                        return InboundEnd::PtyClosed;
                    }
                }
                Err(e) => return InboundEnd::SessionError(e),
            },
        }
    }
}

/// PTY master → session copy
async fn outbound_copy<W>(master: &AsyncFd<File>, mut writer: W) -> (OutboundEnd, W)
where
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match master_read(master, &mut buf).await {
            Ok(0) => return (OutboundEnd::PtyEof, writer),
            Ok(n) => {
                if let Err(e) = writer.write_all(&buf[..n]).await {
                    return (OutboundEnd::SessionError(e), writer);
                }
                if let Err(e) = writer.flush().await {
                    return (OutboundEnd::SessionError(e), writer);
                }
            }
            Err(_) => return (OutboundEnd::PtyEof, writer),
        }
    }
}

/// Read from the PTY master, treating EIO as EOF (slave side closed)
async fn master_read(master: &AsyncFd<File>, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let mut guard = master.readable().await?;
        match guard.try_io(|inner| inner.get_ref().read(buf)) {
            Ok(Ok(n)) => return Ok(n),
            Ok(Err(e)) => {
                if e.raw_os_error() == Some(libc::EIO) {
                    return Ok(0);
                }
                return Err(e);
            }
            Err(_would_block) => continue,
        }
    }
}

/// Write a full buffer to the PTY master
async fn master_write_all(master: &AsyncFd<File>, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        let mut guard = master.writable().await?;
        match guard.try_io(|inner| inner.get_ref().write(data)) {
            Ok(Ok(n)) => data = &data[n..],
            Ok(Err(e)) => return Err(e),
            Err(_would_block) => continue,
        }
    }
    Ok(())
}
