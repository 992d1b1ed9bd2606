//! Published record store and the publish capability
//!
//! Every record the engine publishes is kept here under its
//! (package, granularity, index) key, so the query path can answer from the
//! last published state without touching the network.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::data::{Granularity, NormalizedRecord, Package};

/// Delivery boundary, called once per normalized record
pub trait Publisher: Send + Sync {
    fn publish(&self, record: &NormalizedRecord, package: Package, granularity: Granularity, index: usize);
}

type RecordKey = (Package, Granularity, usize);

/// Shared store of the most recently published records
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: Arc<RwLock<HashMap<RecordKey, NormalizedRecord>>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record at one index, if published
    pub fn get(&self, package: Package, granularity: Granularity, index: usize) -> Option<NormalizedRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.get(&(package, granularity, index)).cloned()
    }

    /// Whether a record exists at one index
    pub fn contains(&self, package: Package, granularity: Granularity, index: usize) -> bool {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.contains_key(&(package, granularity, index))
    }

    /// Remove records at or past `len` for one series
    ///
    /// Called after a series is republished so a shorter series does not
    /// leave stale rows from an earlier cycle behind it.
    pub fn truncate(&self, package: Package, granularity: Granularity, len: usize) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.retain(|(p, g, i), _| !(*p == package && *g == granularity && *i >= len));
    }

    /// Total number of stored records
    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Publisher for RecordStore {
    fn publish(&self, record: &NormalizedRecord, package: Package, granularity: Granularity, index: usize) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert((package, granularity, index), record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ForecastTime;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn record(offset: i64) -> NormalizedRecord {
        NormalizedRecord {
            time: ForecastTime::Day(NaiveDate::from_ymd_opt(2024, 7, 15).unwrap()),
            relative_offset: offset,
            fields: BTreeMap::new(),
            predicted_latitude: None,
            predicted_longitude: None,
            vessel_moving: false,
        }
    }

    #[test]
    fn test_publish_then_get() {
        let store = RecordStore::new();
        store.publish(&record(0), Package::Basic, Granularity::Daily, 0);

        assert!(store.contains(Package::Basic, Granularity::Daily, 0));
        assert!(!store.contains(Package::Basic, Granularity::Hourly, 0));
        assert_eq!(
            store.get(Package::Basic, Granularity::Daily, 0).map(|r| r.relative_offset),
            Some(0)
        );
    }

    #[test]
    fn test_truncate_drops_stale_tail_of_one_series() {
        let store = RecordStore::new();
        for i in 0..4 {
            store.publish(&record(i as i64), Package::Basic, Granularity::Daily, i);
            store.publish(&record(i as i64), Package::Sea, Granularity::Daily, i);
        }

        store.truncate(Package::Basic, Granularity::Daily, 2);

        assert!(store.contains(Package::Basic, Granularity::Daily, 1));
        assert!(!store.contains(Package::Basic, Granularity::Daily, 2));
        assert!(store.contains(Package::Sea, Granularity::Daily, 3));
        assert_eq!(store.len(), 6);
    }

    #[test]
    fn test_clones_share_records() {
        let store = RecordStore::new();
        let reader = store.clone();
        store.publish(&record(0), Package::Wind, Granularity::Daily, 0);
        assert!(!reader.is_empty());
    }
}
