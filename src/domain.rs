//! Data shapes shared across the quality gate, PII protection and the tiers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::warn;

use crate::error::Result;
use crate::pipeline::processing::quality_gate::RowRule;

pub const TRANSACTION_ID: &str = "transaction_id";
pub const CUSTOMER_ID: &str = "customer_id";
pub const EMAIL: &str = "email";
pub const PAN: &str = "pan";
pub const AMOUNT: &str = "amount";
pub const CURRENCY: &str = "currency";
pub const TIMESTAMP: &str = "timestamp";

/// The seven columns every raw batch carries.
pub const EXPECTED_COLUMNS: [&str; 7] = [
    TRANSACTION_ID,
    CUSTOMER_ID,
    EMAIL,
    PAN,
    AMOUNT,
    CURRENCY,
    TIMESTAMP,
];

/// One banking transaction as received from upstream. Cells may be null.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    pub transaction_id: Option<String>,
    pub customer_id: Option<String>,
    pub email: Option<String>,
    pub pan: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub timestamp: Option<String>,
    /// Amount cell exactly as read, kept so rejected rows archive the
    /// original text even when it did not parse.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_raw: Option<String>,
}

impl Record {
    /// Transaction id, treating empty and whitespace-only values as null.
    pub fn transaction_id(&self) -> Option<&str> {
        present(&self.transaction_id)
    }

    pub fn email(&self) -> Option<&str> {
        present(&self.email)
    }

    pub fn pan(&self) -> Option<&str> {
        present(&self.pan)
    }

    pub fn currency(&self) -> Option<&str> {
        present(&self.currency)
    }

    pub fn timestamp(&self) -> Option<&str> {
        present(&self.timestamp)
    }

    /// Amount, treating NaN as null.
    pub fn amount(&self) -> Option<f64> {
        self.amount.filter(|a| !a.is_nan())
    }

    /// Label used in logs and errors to point at this row.
    pub fn label(&self) -> String {
        self.transaction_id()
            .map(str::to_string)
            .unwrap_or_else(|| "<missing transaction_id>".to_string())
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// An ordered collection of records sharing one execution date.
#[derive(Debug, Clone)]
pub struct Batch {
    pub name: String,
    pub execution_date: NaiveDate,
    /// Column names as they arrived, in order, duplicates included.
    pub columns: Vec<String>,
    pub records: Vec<Record>,
}

impl Batch {
    /// A batch carrying exactly the expected columns.
    pub fn new(name: impl Into<String>, execution_date: NaiveDate, records: Vec<Record>) -> Self {
        Self {
            name: name.into(),
            execution_date,
            columns: EXPECTED_COLUMNS.iter().map(|c| c.to_string()).collect(),
            records,
        }
    }

    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn from_csv_path(path: &Path, execution_date: NaiveDate) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let file = File::open(path)?;
        Self::from_csv_reader(name, execution_date, file)
    }

    /// Read a raw batch. The header row becomes the column list; empty cells
    /// are null and a non-numeric amount is null.
    pub fn from_csv_reader<R: Read>(
        name: impl Into<String>,
        execution_date: NaiveDate,
        reader: R,
    ) -> Result<Self> {
        let name = name.into();
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let columns: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let index_of = |column: &str| columns.iter().position(|c| c == column);
        let idx_tx = index_of(TRANSACTION_ID);
        let idx_customer = index_of(CUSTOMER_ID);
        let idx_email = index_of(EMAIL);
        let idx_pan = index_of(PAN);
        let idx_amount = index_of(AMOUNT);
        let idx_currency = index_of(CURRENCY);
        let idx_timestamp = index_of(TIMESTAMP);

        let mut records = Vec::new();
        for (row, result) in rdr.records().enumerate() {
            let row_data = result?;
            let cell = |idx: Option<usize>| {
                idx.and_then(|i| row_data.get(i))
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            };

            let amount_raw = cell(idx_amount);
            let amount = match amount_raw.as_deref() {
                Some(raw) => match raw.parse::<f64>() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!(batch = %name, row, value = %raw, "Non-numeric amount treated as null");
                        None
                    }
                },
                None => None,
            };

            records.push(Record {
                transaction_id: cell(idx_tx),
                customer_id: cell(idx_customer),
                email: cell(idx_email),
                pan: cell(idx_pan),
                amount,
                currency: cell(idx_currency),
                timestamp: cell(idx_timestamp),
                amount_raw,
            });
        }

        Ok(Self {
            name,
            execution_date,
            columns,
            records,
        })
    }
}

/// A record after PII protection: email hashed, PAN encrypted, originals gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SilverRecord {
    pub transaction_id: String,
    pub customer_id: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub timestamp: Option<String>,
    pub email_hashed: String,
    pub pan_encrypted: String,
}

/// Year/month/day partition of the gold tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionKey {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl PartitionKey {
    pub fn from_date(date: NaiveDate) -> Self {
        use chrono::Datelike;
        Self {
            year: date.year(),
            month: date.month(),
            day: date.day(),
        }
    }

    /// Relative directory for this partition, e.g. `year=2023/month=1/day=5`.
    pub fn relative_dir(&self) -> std::path::PathBuf {
        Path::new(&format!("year={}", self.year))
            .join(format!("month={}", self.month))
            .join(format!("day={}", self.day))
    }
}

/// Sum and count of amounts for one (date, currency) group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldAggregate {
    pub date: NaiveDate,
    pub currency: String,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub total_amount: f64,
    pub tx_count: u64,
}

impl GoldAggregate {
    pub fn partition(&self) -> PartitionKey {
        PartitionKey {
            year: self.year,
            month: self.month,
            day: self.day,
        }
    }
}

/// Every aggregate of one partition, sorted by (date, currency).
#[derive(Debug, Clone, PartialEq)]
pub struct GoldPartition {
    pub key: PartitionKey,
    pub aggregates: Vec<GoldAggregate>,
}

/// A rejected record and the row rules it failed. Never PII-protected.
#[derive(Debug, Clone, PartialEq)]
pub struct QuarantineRecord {
    pub record: Record,
    pub failed_rules: Vec<RowRule>,
}

impl QuarantineRecord {
    pub fn reason(&self) -> String {
        self.failed_rules
            .iter()
            .map(|r| r.name())
            .collect::<Vec<_>>()
            .join(";")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 12, 1).unwrap()
    }

    #[test]
    fn test_reads_batch_with_nulls_and_bad_amount() {
        let csv = "transaction_id,customer_id,email,pan,amount,currency,timestamp\n\
                   tx1,CUST-1,a@b.com,4111,100.5,USD,2023-12-01T10:00:00.000000\n\
                   ,CUST-2,c@d.com,4222,abc,EUR,2023-12-01T11:00:00.000000\n";
        let batch = Batch::from_csv_reader("batch.csv", date(), csv.as_bytes()).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.columns.len(), 7);
        assert_eq!(batch.records[0].amount(), Some(100.5));
        assert_eq!(batch.records[1].transaction_id(), None);
        assert_eq!(batch.records[1].amount(), None);
        assert_eq!(batch.records[1].amount_raw.as_deref(), Some("abc"));
        assert_eq!(batch.records[0].amount_raw.as_deref(), Some("100.5"));
        assert_eq!(batch.records[1].currency(), Some("EUR"));
    }

    #[test]
    fn test_keeps_duplicate_and_extra_columns() {
        let csv = "transaction_id,amount,amount,extra\ntx1,1,2,x\n";
        let batch = Batch::from_csv_reader("odd.csv", date(), csv.as_bytes()).unwrap();
        assert_eq!(batch.columns, vec!["transaction_id", "amount", "amount", "extra"]);
        assert_eq!(batch.records[0].email, None);
    }

    #[test]
    fn test_whitespace_and_nan_are_null() {
        let record = Record {
            transaction_id: Some("   ".to_string()),
            amount: Some(f64::NAN),
            ..Default::default()
        };
        assert_eq!(record.transaction_id(), None);
        assert_eq!(record.amount(), None);
        assert_eq!(record.label(), "<missing transaction_id>");
    }

    #[test]
    fn test_partition_dir_layout() {
        let key = PartitionKey::from_date(NaiveDate::from_ymd_opt(2023, 1, 5).unwrap());
        assert_eq!(key.relative_dir(), Path::new("year=2023/month=1/day=5"));
    }
}
