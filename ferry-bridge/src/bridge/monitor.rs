//! Inbound idle/abort analysis
//!
//! The Direct-mode inbound copy feeds every chunk of session bytes through
//! this scanner before forwarding it to the child. Two things come out of a
//! scan:
//!
//! - whether the chunk contained *activity* (any non-cancel byte) — this is
//!   what resets the idle deadline on stalled uploads. Cancel bytes are
//!   deliberately not activity: an abort burst must trigger the fast abort
//!   path, not keep postponing the idle timeout.
//! - whether the rolling run of consecutive cancel bytes reached the abort
//!   threshold, meaning the remote client is tearing the transfer down
//!   in-band and the process should be killed immediately.
//!
//! The run survives chunk boundaries; a client that dribbles one CAN per
//! packet still aborts after five of them.

use super::{ABORT_THRESHOLD, CANCEL_BYTE};

/// Result of scanning one inbound chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Scan {
    /// Chunk contained at least one non-cancel byte
    pub saw_activity: bool,
    /// Consecutive-cancel run reached the abort threshold
    pub abort: bool,
}

/// Rolling consecutive-cancel-byte counter
#[derive(Debug, Default)]
pub(crate) struct AbortScanner {
    run: usize,
}

impl AbortScanner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Scan one chunk of inbound session bytes
    pub(crate) fn scan(&mut self, chunk: &[u8]) -> Scan {
        let mut saw_activity = false;
        let mut abort = false;

        for &byte in chunk {
            if byte == CANCEL_BYTE {
                self.run += 1;
                if self.run >= ABORT_THRESHOLD {
                    abort = true;
                }
            } else {
                self.run = 0;
                saw_activity = true;
            }
        }

        Scan { saw_activity, abort }
    }
}
