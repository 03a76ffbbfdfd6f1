use chrono::NaiveDate;
use std::path::{Path, PathBuf};

use crate::domain::{GoldAggregate, GoldPartition, PartitionKey, QuarantineRecord, SilverRecord};
use crate::error::Result;

/// Persistence for every tier the transformer produces.
pub trait TierStore: Send + Sync {
    /// Store rejected rows under their execution date.
    fn write_quarantine(&self, execution_date: NaiveDate, records: &[QuarantineRecord]) -> Result<PathBuf>;

    /// Store the silver set derived from `batch_name`, replacing any previous one.
    fn write_silver(&self, batch_name: &str, records: &[SilverRecord]) -> Result<PathBuf>;

    fn read_silver(&self, location: &Path) -> Result<Vec<SilverRecord>>;

    /// Replace the whole content of one gold partition.
    fn overwrite_gold_partition(&self, partition: &GoldPartition) -> Result<PathBuf>;

    /// `None` when the partition was never written.
    fn read_gold_partition(&self, key: PartitionKey) -> Result<Option<Vec<GoldAggregate>>>;
}

/// External secret service holding the encryption key.
pub trait SecretStore: Send + Sync {
    /// Latest value of the secret named by `secret_ref`.
    fn access(&self, secret_ref: &str) -> std::result::Result<String, String>;
}
