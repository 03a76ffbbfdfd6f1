use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::ports::TierStore;
use crate::config::PathsConfig;
use crate::domain::{GoldAggregate, GoldPartition, PartitionKey, QuarantineRecord, SilverRecord};
use crate::error::{PipelineError, Result, Tier};

pub const QUARANTINE_FILE: &str = "invalid_records.csv";
pub const GOLD_PART_FILE: &str = "part-00000.csv";

/// Silver artifact name for a source batch: `<stem>_silver.csv`.
pub fn silver_file_name(batch_name: &str) -> String {
    let stem = Path::new(batch_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| batch_name.to_string());
    format!("{}_silver.csv", stem)
}

/// Amount column of a quarantined row: the cell as read when available,
/// otherwise the parsed value.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum AmountCell<'a> {
    Raw(&'a str),
    Parsed(f64),
}

#[derive(Debug, Serialize)]
struct QuarantineRow<'a> {
    transaction_id: Option<&'a str>,
    customer_id: Option<&'a str>,
    email: Option<&'a str>,
    pan: Option<&'a str>,
    amount: Option<AmountCell<'a>>,
    currency: Option<&'a str>,
    timestamp: Option<&'a str>,
    failed_rules: String,
}

impl<'a> From<&'a QuarantineRecord> for QuarantineRow<'a> {
    fn from(q: &'a QuarantineRecord) -> Self {
        let r = &q.record;
        Self {
            transaction_id: r.transaction_id.as_deref(),
            customer_id: r.customer_id.as_deref(),
            email: r.email.as_deref(),
            pan: r.pan.as_deref(),
            amount: r
                .amount_raw
                .as_deref()
                .map(AmountCell::Raw)
                .or(r.amount.map(AmountCell::Parsed)),
            currency: r.currency.as_deref(),
            timestamp: r.timestamp.as_deref(),
            failed_rules: q.reason(),
        }
    }
}

/// Gold rows on disk; year/month/day live in the partition path.
#[derive(Debug, Serialize, Deserialize)]
struct GoldRow {
    date: NaiveDate,
    currency: String,
    total_amount: f64,
    tx_count: u64,
}

/// Move `staging` into `target`. An existing `target` is renamed aside first
/// and put back if the swap fails, so the partition is never left missing.
fn swap_into_place(staging: &Path, target: &Path) -> std::io::Result<()> {
    let backup = target.exists().then(|| {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        target.with_file_name(format!(".backup-{}-{}", name, Uuid::new_v4()))
    });
    if let Some(backup) = &backup {
        fs::rename(target, backup)?;
    }

    if let Err(e) = fs::rename(staging, target) {
        if let Some(backup) = &backup {
            if let Err(restore) = fs::rename(backup, target) {
                warn!(
                    backup = %backup.display(),
                    error = %restore,
                    "Could not restore previous gold partition"
                );
            }
        }
        return Err(e);
    }

    if let Some(backup) = &backup {
        if let Err(e) = fs::remove_dir_all(backup) {
            warn!(backup = %backup.display(), error = %e, "Previous gold partition left behind");
        }
    }
    Ok(())
}

/// Filesystem-backed tier store writing CSV artifacts.
pub struct LocalTierStore {
    quarantine_root: PathBuf,
    silver_root: PathBuf,
    gold_root: PathBuf,
}

impl LocalTierStore {
    pub fn new(quarantine_root: PathBuf, silver_root: PathBuf, gold_root: PathBuf) -> Self {
        Self {
            quarantine_root,
            silver_root,
            gold_root,
        }
    }

    pub fn from_paths(paths: &PathsConfig) -> Self {
        Self::new(paths.quarantine.clone(), paths.silver.clone(), paths.gold.clone())
    }

    pub fn gold_partition_dir(&self, key: PartitionKey) -> PathBuf {
        self.gold_root.join(key.relative_dir())
    }

    fn write_csv<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> std::result::Result<(), csv::Error> {
        let mut writer = csv::Writer::from_path(path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl TierStore for LocalTierStore {
    fn write_quarantine(&self, execution_date: NaiveDate, records: &[QuarantineRecord]) -> Result<PathBuf> {
        let dir = self.quarantine_root.join(execution_date.format("%Y-%m-%d").to_string());
        let path = dir.join(QUARANTINE_FILE);
        if path.exists() {
            warn!(path = %path.display(), "Quarantine archive for this date already exists and will be replaced");
        }
        fs::create_dir_all(&dir).map_err(|e| PipelineError::persistence(Tier::Quarantine, &dir, e))?;
        Self::write_csv(&path, records.iter().map(QuarantineRow::from))
            .map_err(|e| PipelineError::persistence(Tier::Quarantine, &path, e))?;

        warn!(rows = records.len(), path = %path.display(), "DLQ: saved invalid records");
        Ok(path)
    }

    fn write_silver(&self, batch_name: &str, records: &[SilverRecord]) -> Result<PathBuf> {
        fs::create_dir_all(&self.silver_root)
            .map_err(|e| PipelineError::persistence(Tier::Silver, &self.silver_root, e))?;
        let path = self.silver_root.join(silver_file_name(batch_name));
        Self::write_csv(&path, records)
            .map_err(|e| PipelineError::persistence(Tier::Silver, &path, e))?;

        info!(rows = records.len(), path = %path.display(), "Silver layer published");
        Ok(path)
    }

    fn read_silver(&self, location: &Path) -> Result<Vec<SilverRecord>> {
        let mut reader = csv::Reader::from_path(location)
            .map_err(|e| PipelineError::persistence(Tier::Silver, location, e))?;
        let records = reader
            .deserialize::<SilverRecord>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| PipelineError::persistence(Tier::Silver, location, e))?;
        debug!(rows = records.len(), path = %location.display(), "Silver layer read back");
        Ok(records)
    }

    fn overwrite_gold_partition(&self, partition: &GoldPartition) -> Result<PathBuf> {
        let target = self.gold_partition_dir(partition.key);
        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.gold_root.clone());
        fs::create_dir_all(&parent).map_err(|e| PipelineError::persistence(Tier::Gold, &parent, e))?;

        // Build the new partition beside the old one, then swap.
        let staging = parent.join(format!(".staging-day={}-{}", partition.key.day, Uuid::new_v4()));
        fs::create_dir_all(&staging).map_err(|e| PipelineError::persistence(Tier::Gold, &staging, e))?;
        let staged_file = staging.join(GOLD_PART_FILE);
        let rows = partition.aggregates.iter().map(|a| GoldRow {
            date: a.date,
            currency: a.currency.clone(),
            total_amount: a.total_amount,
            tx_count: a.tx_count,
        });
        if let Err(e) = Self::write_csv(&staged_file, rows) {
            let _ = fs::remove_dir_all(&staging);
            return Err(PipelineError::persistence(Tier::Gold, &staged_file, e));
        }

        if let Err(e) = swap_into_place(&staging, &target) {
            let _ = fs::remove_dir_all(&staging);
            return Err(PipelineError::persistence(Tier::Gold, &target, e));
        }

        let path = target.join(GOLD_PART_FILE);
        debug!(rows = partition.aggregates.len(), path = %path.display(), "Gold partition overwritten");
        Ok(path)
    }

    fn read_gold_partition(&self, key: PartitionKey) -> Result<Option<Vec<GoldAggregate>>> {
        let path = self.gold_partition_dir(key).join(GOLD_PART_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let mut reader =
            csv::Reader::from_path(&path).map_err(|e| PipelineError::persistence(Tier::Gold, &path, e))?;
        let rows = reader
            .deserialize::<GoldRow>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| PipelineError::persistence(Tier::Gold, &path, e))?;

        Ok(Some(
            rows.into_iter()
                .map(|row| GoldAggregate {
                    date: row.date,
                    currency: row.currency,
                    year: key.year,
                    month: key.month,
                    day: key.day,
                    total_amount: row.total_amount,
                    tx_count: row.tx_count,
                })
                .collect(),
        ))
    }
}
