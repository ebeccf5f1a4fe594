//! Loading and lookup of protocol definitions
//!
//! The registry file is a JSON array of [`ProtocolConfig`] records, owned by
//! the configuration layer. A missing file is not an error: the server still
//! offers binary-mode ZMODEM out of the box. A file that exists but fails to
//! parse is a hard load error, so a sysop typo never silently drops half the
//! protocol menu.

use std::io;
use std::path::Path;

use ferry_common::ConnectionKind;

use super::config::ProtocolConfig;

/// Default receive idle timeout for the built-in ZMODEM entry, milliseconds
///
/// rz retransmits ZRINIT forever when the remote user cancels client-side
/// without a protocol abort; its retry cadence is well above this.
const BUILTIN_ZMODEM_IDLE_TIMEOUT_MS: u64 = 10_000;

/// Ordered, immutable list of protocol definitions
#[derive(Debug, Clone)]
pub struct ProtocolRegistry {
    entries: Vec<ProtocolConfig>,
}

impl ProtocolRegistry {
    /// Load a registry from the protocol definition file
    ///
    /// A missing file yields the built-in single-entry default list. A file
    /// that exists but is malformed fails with `InvalidData`.
    pub fn load(path: &Path) -> io::Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Self {
                    entries: vec![builtin_zmodem()],
                });
            }
            Err(e) => return Err(e),
        };

        let entries: Vec<ProtocolConfig> = serde_json::from_str(&contents).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed protocol file {}: {e}", path.display()),
            )
        })?;

        Ok(Self { entries })
    }

    /// Build a registry directly from entries (tests, embedded defaults)
    #[must_use]
    pub fn from_entries(entries: Vec<ProtocolConfig>) -> Self {
        Self { entries }
    }

    /// All entries, in file order
    #[must_use]
    pub fn entries(&self) -> &[ProtocolConfig] {
        &self.entries
    }

    /// Look up a protocol by selection key, case-insensitively
    ///
    /// On a miss this returns the registry default together with
    /// `found = false`, never an absent config: callers may proceed with the
    /// default while logging the miss, but must check the flag. Returns
    /// `None` only for an empty registry.
    #[must_use]
    pub fn find(&self, key: &str) -> Option<(&ProtocolConfig, bool)> {
        if let Some(entry) = self.entries.iter().find(|e| e.matches_key(key)) {
            return Some((entry, true));
        }
        self.default_entry().map(|entry| (entry, false))
    }

    /// The registry default: first entry flagged default, else the first entry
    #[must_use]
    pub fn default_entry(&self) -> Option<&ProtocolConfig> {
        self.entries
            .iter()
            .find(|e| e.is_default)
            .or_else(|| self.entries.first())
    }

    /// Entries a session of `kind` may use, in file order
    #[must_use]
    pub fn available_for(&self, kind: ConnectionKind) -> Vec<&ProtocolConfig> {
        self.entries
            .iter()
            .filter(|e| e.connection_restriction.allows(kind))
            .collect()
    }
}

/// The built-in binary-mode ZMODEM entry used when no protocol file exists
fn builtin_zmodem() -> ProtocolConfig {
    ProtocolConfig {
        key: "z".to_string(),
        name: "ZMODEM".to_string(),
        description: "ZMODEM batch (binary)".to_string(),
        send_command: "sz".to_string(),
        send_args: vec!["-b".to_string()],
        recv_command: "rz".to_string(),
        recv_args: vec!["-b".to_string(), "-r".to_string()],
        supports_batch: true,
        requires_pty: false,
        is_default: true,
        connection_restriction: Default::default(),
        idle_timeout_ms: Some(BUILTIN_ZMODEM_IDLE_TIMEOUT_MS),
    }
}
