//! Append-only curated lore
//!
//! Entries are keyed by a monotonic big-endian counter so that key
//! order is insertion order; `all` therefore returns entries oldest
//! first, which is also display order by timestamp. Entries are never
//! updated in place.

use crate::state::LoreEntry;
use crate::{MurmurError, Result};

/// Append-only store of curated facts
#[derive(Clone)]
pub struct LoreStore {
    db: sled::Db,
    tree: sled::Tree,
}

impl LoreStore {
    pub fn new(db: sled::Db, tree: sled::Tree) -> Self {
        Self { db, tree }
    }

    /// Append an entry; returns its auto-increment key
    pub fn append(&self, entry: &LoreEntry) -> Result<u64> {
        let id = self.db.generate_id()?;
        let bytes = serde_json::to_vec(entry)
            .map_err(|e| MurmurError::Storage(format!("failed to encode lore entry: {e}")))?;
        self.tree.insert(id.to_be_bytes(), bytes)?;
        self.tree.flush()?;
        Ok(id)
    }

    /// All entries in insertion order
    pub fn all(&self) -> Result<Vec<LoreEntry>> {
        let mut entries = Vec::new();
        for item in self.tree.iter() {
            let (_, bytes) = item?;
            let entry = serde_json::from_slice(&bytes)
                .map_err(|e| MurmurError::Storage(format!("failed to decode lore entry: {e}")))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Remove every entry
    pub fn clear(&self) -> Result<()> {
        self.tree.clear()?;
        self.tree.flush()?;
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.tree.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.tree.is_empty())
    }

    /// Render all facts as bullet lines for the system instruction
    pub fn render_facts(&self) -> Result<String> {
        let entries = self.all()?;
        Ok(entries
            .iter()
            .map(|entry| format!("- {}", entry.fact))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
