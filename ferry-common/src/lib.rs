//! Shared abstractions for the Ferry file-transfer bridge
//!
//! This crate holds the types that cross the boundary between the transfer
//! bridge and the SSH/Telnet session implementations: the [`Session`] trait
//! the bridge consumes, terminal geometry metadata, and the transfer error
//! taxonomy surfaced to the menu engine.

pub mod error;
pub mod session;

pub use error::TransferError;
pub use session::{ConnectionKind, PtyInfo, Session, WindowSize};
