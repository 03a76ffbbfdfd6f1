use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::app::ports::TierStore;
use crate::domain::{GoldAggregate, GoldPartition, PartitionKey, QuarantineRecord, SilverRecord};
use crate::error::{PipelineError, Result, Tier};
use crate::infra::local_tier_store::silver_file_name;

/// In-memory tier store for development/testing
#[derive(Clone, Default)]
pub struct InMemoryTierStore {
    quarantine: Arc<Mutex<HashMap<NaiveDate, Vec<QuarantineRecord>>>>,
    silver: Arc<Mutex<HashMap<PathBuf, Vec<SilverRecord>>>>,
    gold: Arc<Mutex<BTreeMap<PartitionKey, Vec<GoldAggregate>>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryTierStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quarantined(&self, execution_date: NaiveDate) -> Vec<QuarantineRecord> {
        lock(&self.quarantine)
            .get(&execution_date)
            .cloned()
            .unwrap_or_default()
    }

    /// Every gold partition currently held, in key order.
    pub fn gold_partitions(&self) -> Vec<GoldPartition> {
        lock(&self.gold)
            .iter()
            .map(|(key, aggregates)| GoldPartition {
                key: *key,
                aggregates: aggregates.clone(),
            })
            .collect()
    }
}

impl TierStore for InMemoryTierStore {
    fn write_quarantine(&self, execution_date: NaiveDate, records: &[QuarantineRecord]) -> Result<PathBuf> {
        lock(&self.quarantine).insert(execution_date, records.to_vec());
        debug!(rows = records.len(), %execution_date, "Stored quarantine rows in memory");
        Ok(PathBuf::from(format!("memory://quarantine/{}", execution_date)))
    }

    fn write_silver(&self, batch_name: &str, records: &[SilverRecord]) -> Result<PathBuf> {
        let location = PathBuf::from(format!("memory://silver/{}", silver_file_name(batch_name)));
        lock(&self.silver).insert(location.clone(), records.to_vec());
        debug!(rows = records.len(), location = %location.display(), "Stored silver rows in memory");
        Ok(location)
    }

    fn read_silver(&self, location: &Path) -> Result<Vec<SilverRecord>> {
        lock(&self.silver).get(location).cloned().ok_or_else(|| {
            PipelineError::persistence(Tier::Silver, location, "no silver set at this location")
        })
    }

    fn overwrite_gold_partition(&self, partition: &GoldPartition) -> Result<PathBuf> {
        lock(&self.gold).insert(partition.key, partition.aggregates.clone());
        Ok(PathBuf::from("memory://gold").join(partition.key.relative_dir()))
    }

    fn read_gold_partition(&self, key: PartitionKey) -> Result<Option<Vec<GoldAggregate>>> {
        Ok(lock(&self.gold).get(&key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overwrite_replaces_partition() {
        let store = InMemoryTierStore::new();
        let date = NaiveDate::from_ymd_opt(2023, 12, 1).unwrap();
        let key = PartitionKey::from_date(date);
        let agg = |total: f64| GoldAggregate {
            date,
            currency: "USD".to_string(),
            year: 2023,
            month: 12,
            day: 1,
            total_amount: total,
            tx_count: 1,
        };

        store
            .overwrite_gold_partition(&GoldPartition { key, aggregates: vec![agg(1.0), agg(2.0)] })
            .unwrap();
        store
            .overwrite_gold_partition(&GoldPartition { key, aggregates: vec![agg(3.0)] })
            .unwrap();

        assert_eq!(store.read_gold_partition(key).unwrap(), Some(vec![agg(3.0)]));
        assert_eq!(store.gold_partitions().len(), 1);
    }

    #[test]
    fn test_unknown_silver_location_is_persistence_error() {
        let store = InMemoryTierStore::new();
        let err = store.read_silver(Path::new("memory://silver/nope")).unwrap_err();
        assert!(matches!(err, PipelineError::Persistence { tier: Tier::Silver, .. }));
    }
}
