use crate::catalog::stamp::MinuteKey;
use chrono::NaiveDate;
use std::collections::BTreeSet;

/// Minutes a stage has already handled.
///
/// The ledger lives in memory; after a restart it is rebuilt lazily from the
/// presence of the stage's own output files (see the stages), which is the
/// single source of truth for "already processed".
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    minutes: BTreeSet<MinuteKey>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &MinuteKey) -> bool {
        self.minutes.contains(key)
    }

    /// Returns `true` if the key was not yet recorded.
    pub fn insert(&mut self, key: MinuteKey) -> bool {
        self.minutes.insert(key)
    }

    pub fn len(&self) -> usize {
        self.minutes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.minutes.is_empty()
    }

    pub fn clear(&mut self) {
        self.minutes.clear();
    }

    /// Drops every key dated before `date`.
    pub fn retain_from(&mut self, date: NaiveDate) {
        self.minutes.retain(|key| key.date() >= date);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_records_once_and_prunes_old_days() {
        let day1 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let mut ledger = Ledger::new();
        let old = MinuteKey::from_minute_of_day(day1, 1439).unwrap();
        let new = MinuteKey::from_minute_of_day(day2, 0).unwrap();

        assert!(ledger.insert(old));
        assert!(!ledger.insert(old));
        assert!(ledger.insert(new));
        ledger.retain_from(day2);

        assert!(!ledger.contains(&old));
        assert!(ledger.contains(&new));
        assert_eq!(ledger.len(), 1);
    }
}
