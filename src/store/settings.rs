//! Persisted session settings
//!
//! The durable key/value contract behind the subscription flag and the
//! per-day usage record. Values are small JSON documents.

use crate::state::UsageRecord;
use crate::{MurmurError, Result};

const SUBSCRIBED_KEY: &str = "isSubscribed";
const USAGE_KEY: &str = "usageData";

/// Key/value settings on a dedicated sled tree
#[derive(Clone)]
pub struct SettingsStore {
    tree: sled::Tree,
}

impl SettingsStore {
    pub fn new(tree: sled::Tree) -> Self {
        Self { tree }
    }

    /// Persist the subscription flag
    pub fn set_subscribed(&self, subscribed: bool) -> Result<()> {
        self.tree
            .insert(SUBSCRIBED_KEY, if subscribed { &[1u8][..] } else { &[0u8][..] })?;
        self.tree.flush()?;
        Ok(())
    }

    /// Read the subscription flag; absent defaults to false
    pub fn subscribed(&self) -> Result<bool> {
        Ok(self
            .tree
            .get(SUBSCRIBED_KEY)?
            .map_or(false, |v| v.as_ref() == [1u8]))
    }

    /// Persist today's usage record, superseding any previous day
    pub fn set_usage(&self, record: &UsageRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)
            .map_err(|e| MurmurError::Storage(format!("failed to encode usage record: {e}")))?;
        self.tree.insert(USAGE_KEY, bytes)?;
        self.tree.flush()?;
        Ok(())
    }

    /// Read the stored usage record, if any
    pub fn usage(&self) -> Result<Option<UsageRecord>> {
        match self.tree.get(USAGE_KEY)? {
            Some(bytes) => {
                let record = serde_json::from_slice(&bytes).map_err(|e| {
                    MurmurError::Storage(format!("failed to decode usage record: {e}"))
                })?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }
}
