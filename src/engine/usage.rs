//! Daily usage metering
//!
//! Unsubscribed sessions get a fixed number of recordings per calendar
//! day. The record is superseded, not incremented, when the stored
//! date differs from the current day, and every charge is durably
//! persisted before recording proceeds.

use crate::state::UsageRecord;
use crate::store::SettingsStore;
use crate::Result;
use chrono::NaiveDate;
use tracing::debug;

pub struct UsageMeter {
    settings: SettingsStore,
    limit: u32,
    record: UsageRecord,
}

impl UsageMeter {
    /// Load the meter, rolling the count to zero if the stored record
    /// is from a different day.
    pub fn load(settings: SettingsStore, limit: u32, today: NaiveDate) -> Result<Self> {
        let record = match settings.usage()? {
            Some(stored) if stored.date == today => stored,
            _ => {
                let fresh = UsageRecord::new(today);
                settings.set_usage(&fresh)?;
                fresh
            }
        };
        Ok(Self {
            settings,
            limit,
            record,
        })
    }

    pub fn count(&self) -> u32 {
        self.record.count
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Whether the free allowance for `today` is used up
    ///
    /// Only the free tier is refused on exhaustion; subscribed
    /// sessions charge past the limit unchecked.
    pub fn exhausted(&self, today: NaiveDate) -> bool {
        self.record.date == today && self.record.count >= self.limit
    }

    /// Charge one use for `today`, persisting before returning
    ///
    /// Rolls the record over when the day has changed. Every session
    /// start is counted; enforcing the free limit is the caller's
    /// decision via [`exhausted`](Self::exhausted).
    pub fn charge(&mut self, today: NaiveDate) -> Result<u32> {
        if self.record.date != today {
            debug!(
                "Usage record rolled over from {} to {}",
                self.record.date, today
            );
            self.record = UsageRecord::new(today);
        }

        self.record.count += 1;
        self.settings.set_usage(&self.record)?;
        Ok(self.record.count)
    }
}
