//! Ferry file-transfer bridge
//!
//! Lets a remote terminal session exchange binary files with the host by
//! running an external transfer driver (sz/rz and friends) and splicing its
//! stdio onto the session's byte stream, either through a pseudo-terminal or
//! through raw pipes. The menu engine resolves a protocol from the registry,
//! builds absolute paths, and calls `execute_send`/`execute_receive` on the
//! chosen [`ProtocolConfig`].

pub mod bridge;
pub mod exec;
pub mod expand;
pub mod protocols;

pub use bridge::BridgeConfig;
pub use expand::expand_args;
pub use protocols::{ConnectionRestriction, ProtocolConfig, ProtocolRegistry};

pub use ferry_common::{ConnectionKind, PtyInfo, Session, TransferError, WindowSize};
