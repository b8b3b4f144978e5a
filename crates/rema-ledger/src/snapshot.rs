//! On-disk ledger state.
//!
//! A snapshot is the full journal plus the materialized accounts. Loading it
//! back goes through [`crate::Ledger::restore`], which re-verifies the hash
//! chain and re-derives every balance before trusting it.

use std::path::Path;

use chrono::{DateTime, Utc};
use rema_types::constants::{ENGINE_NAME, VERSION};
use rema_types::{Account, JournalEntry, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Engine name and version that wrote the file.
    pub engine: String,
    pub taken_at: DateTime<Utc>,
    pub accounts: Vec<Account>,
    pub journal: Vec<JournalEntry>,
}

impl LedgerSnapshot {
    #[must_use]
    pub fn new(accounts: Vec<Account>, journal: Vec<JournalEntry>) -> Self {
        Self {
            engine: format!("{ENGINE_NAME} {VERSION}"),
            taken_at: Utc::now(),
            accounts,
            journal,
        }
    }

    /// Read a snapshot written by [`LedgerSnapshot::save`].
    ///
    /// # Errors
    /// `Io` or `Serialization`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write as pretty JSON. The file is replaced atomically via a sibling
    /// temp file so a crash never leaves a half-written state.
    ///
    /// # Errors
    /// `Io` or `Serialization`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rema_types::{AccountKind, PublicKey};

    use super::*;

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let snapshot = LedgerSnapshot::new(
            vec![Account::new("+22997000001", PublicKey([1; 32]), None, AccountKind::User)],
            Vec::new(),
        );
        snapshot.save(&path).unwrap();

        let loaded = LedgerSnapshot::load(&path).unwrap();
        assert_eq!(loaded, snapshot);
        assert!(loaded.engine.starts_with("REMA "));
        assert!(!dir.path().join("state.tmp").exists());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = LedgerSnapshot::load(Path::new("/nonexistent/rema/state.json")).unwrap_err();
        assert!(err.to_string().starts_with("REMA_ERR_903"));
    }
}
