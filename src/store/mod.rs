//! Durable local storage
//!
//! One embedded `sled` database holds everything the session persists
//! across restarts: the subscription flag plus the daily usage record
//! in the `settings` tree, and curated lore in the append-only `lore`
//! tree. The Session Engine is the only writer.

pub mod lore;
pub mod settings;

pub use lore::LoreStore;
pub use settings::SettingsStore;

use crate::Result;
use std::path::Path;
use tracing::info;

const SETTINGS_TREE: &str = "settings";
const LORE_TREE: &str = "lore";

/// Handle to the session database and its trees
#[derive(Clone)]
pub struct SessionStore {
    db: sled::Db,
}

impl SessionStore {
    /// Open (or create) the database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        info!("Session store opened at {}", path.as_ref().display());
        Ok(Self { db })
    }

    /// Open an in-memory database, used by tests
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Key/value settings: subscription flag and usage record
    pub fn settings(&self) -> Result<SettingsStore> {
        let tree = self.db.open_tree(SETTINGS_TREE)?;
        Ok(SettingsStore::new(tree))
    }

    /// Append-only curated lore
    pub fn lore(&self) -> Result<LoreStore> {
        let tree = self.db.open_tree(LORE_TREE)?;
        Ok(LoreStore::new(self.db.clone(), tree))
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
