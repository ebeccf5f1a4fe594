//! Protocol definition records
//!
//! These are the deserialized entries of the protocol definition file. The
//! templates may contain the placeholders `{filePath}`, `{fileListPath}` and
//! `{targetDir}`; see [`crate::expand`] for the expansion rules.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use ferry_common::ConnectionKind;

/// Which connection types a protocol entry is available to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionRestriction {
    /// Available to every connection type
    #[default]
    None,
    /// Only offered to SSH sessions
    SshOnly,
    /// Only offered to Telnet sessions
    TelnetOnly,
}

impl ConnectionRestriction {
    /// True when a session of `kind` may use a protocol with this restriction
    #[must_use]
    pub fn allows(&self, kind: ConnectionKind) -> bool {
        match self {
            Self::None => true,
            Self::SshOnly => kind == ConnectionKind::Ssh,
            Self::TelnetOnly => kind == ConnectionKind::Telnet,
        }
    }
}

/// One user-selectable transfer protocol
///
/// Immutable after registry load. `key` values are compared
/// case-insensitively and must be unique within a registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Short selection token the user types at the protocol menu
    pub key: String,
    /// Display name (e.g. "ZMODEM")
    pub name: String,
    /// One-line description shown in the protocol menu
    #[serde(default)]
    pub description: String,

    /// Executable for the send (server → client) side
    pub send_command: String,
    /// Argument template for the send side
    #[serde(default)]
    pub send_args: Vec<String>,
    /// Executable for the receive (client → server) side
    pub recv_command: String,
    /// Argument template for the receive side
    #[serde(default)]
    pub recv_args: Vec<String>,

    /// Whether the send side accepts many files in one invocation
    #[serde(default)]
    pub supports_batch: bool,
    /// Whether the driver needs a controlling terminal
    ///
    /// Raw pipes are the safer default: a PTY's line discipline can mangle
    /// binary protocol bytes. Only legacy drivers that probe for terminal
    /// semantics set this.
    #[serde(default)]
    pub requires_pty: bool,
    /// Whether this entry is the registry default
    #[serde(default)]
    pub is_default: bool,
    /// Which connection types may use this protocol
    #[serde(default)]
    pub connection_restriction: ConnectionRestriction,

    /// Inbound-idle timeout for the receive side, in milliseconds
    ///
    /// Set for drivers whose retransmission loop runs forever when the remote
    /// user cancels client-side without sending a protocol abort. Must be
    /// shorter than the driver's own retry interval. Absent for drivers that
    /// give up on their own.
    #[serde(default)]
    pub idle_timeout_ms: Option<u64>,
}

impl ProtocolConfig {
    /// Inbound-idle timeout applied to receive operations, if configured
    #[must_use]
    pub fn idle_timeout_on_receive(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    /// Case-insensitive selection-key match
    #[must_use]
    pub fn matches_key(&self, key: &str) -> bool {
        self.key.eq_ignore_ascii_case(key)
    }
}
