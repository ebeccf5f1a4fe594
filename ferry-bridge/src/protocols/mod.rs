//! Protocol registry for external transfer drivers
//!
//! A protocol entry describes one user-selectable transfer protocol: which
//! executables implement its send and receive sides, how their argument
//! vectors are built, whether the driver needs a controlling terminal, and
//! which connection types may use it. The registry is loaded once from the
//! sysop's protocol definition file and is immutable afterwards.

mod config;
mod registry;

pub use config::{ConnectionRestriction, ProtocolConfig};
pub use registry::ProtocolRegistry;
