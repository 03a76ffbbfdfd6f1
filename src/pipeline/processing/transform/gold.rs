use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;

use crate::domain::{GoldAggregate, GoldPartition, PartitionKey, SilverRecord};
use crate::error::{PipelineError, Result, Stage};

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Calendar date of a transaction timestamp.
///
/// Accepts the ISO form with or without a fraction, a space separator, an
/// RFC 3339 offset (converted to its local date) or a bare date.
pub fn parse_event_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_local().date());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|dt| dt.date())
        .or_else(|| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok())
}

/// Group silver rows by (date, currency) and sum their amounts.
///
/// Output is sorted by (date, currency). Rows are summed in input order so a
/// fixed input always produces identical totals.
pub fn aggregate(silver: &[SilverRecord]) -> Result<Vec<GoldAggregate>> {
    let mut groups: BTreeMap<(NaiveDate, &str), (f64, u64)> = BTreeMap::new();

    for record in silver {
        let date = record
            .timestamp
            .as_deref()
            .and_then(parse_event_date)
            .ok_or_else(|| {
                PipelineError::stage(
                    Stage::Gold,
                    format!(
                        "transaction '{}' has no usable timestamp ({:?})",
                        record.transaction_id, record.timestamp
                    ),
                )
            })?;
        let entry = groups.entry((date, record.currency.as_str())).or_insert((0.0, 0));
        entry.0 += record.amount;
        entry.1 += 1;
    }

    Ok(groups
        .into_iter()
        .map(|((date, currency), (total_amount, tx_count))| {
            let key = PartitionKey::from_date(date);
            GoldAggregate {
                date,
                currency: currency.to_string(),
                year: key.year,
                month: key.month,
                day: key.day,
                total_amount,
                tx_count,
            }
        })
        .collect())
}

/// Split sorted aggregates into their year/month/day partitions.
pub fn partition(aggregates: Vec<GoldAggregate>) -> Vec<GoldPartition> {
    let mut by_key: BTreeMap<PartitionKey, Vec<GoldAggregate>> = BTreeMap::new();
    for agg in aggregates {
        by_key.entry(agg.partition()).or_default().push(agg);
    }
    by_key
        .into_iter()
        .map(|(key, aggregates)| GoldPartition { key, aggregates })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silver(id: &str, amount: f64, currency: &str, ts: Option<&str>) -> SilverRecord {
        SilverRecord {
            transaction_id: id.to_string(),
            customer_id: None,
            amount,
            currency: currency.to_string(),
            timestamp: ts.map(str::to_string),
            email_hashed: String::new(),
            pan_encrypted: "x".to_string(),
        }
    }

    #[test]
    fn test_timestamp_variants() {
        let d = NaiveDate::from_ymd_opt(2023, 12, 1).unwrap();
        assert_eq!(parse_event_date("2023-12-01T10:00:00.123456"), Some(d));
        assert_eq!(parse_event_date("2023-12-01T10:00:00"), Some(d));
        assert_eq!(parse_event_date("2023-12-01 23:59:59.5"), Some(d));
        assert_eq!(parse_event_date("2023-12-01T23:30:00-05:00"), Some(d));
        assert_eq!(parse_event_date("2023-12-01"), Some(d));
        assert_eq!(parse_event_date("yesterday"), None);
    }

    #[test]
    fn test_groups_by_date_and_currency() {
        let rows = vec![
            silver("a", 100.0, "USD", Some("2023-12-01T10:00:00.000000")),
            silver("b", 50.0, "USD", Some("2023-12-01T11:00:00.000000")),
            silver("c", 20.0, "EUR", Some("2023-12-01T12:00:00.000000")),
            silver("d", 5.0, "USD", Some("2023-12-02T09:00:00.000000")),
        ];
        let aggs = aggregate(&rows).unwrap();

        let summary: Vec<(String, &str, f64, u64)> = aggs
            .iter()
            .map(|a| (a.date.to_string(), a.currency.as_str(), a.total_amount, a.tx_count))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("2023-12-01".to_string(), "EUR", 20.0, 1),
                ("2023-12-01".to_string(), "USD", 150.0, 2),
                ("2023-12-02".to_string(), "USD", 5.0, 1),
            ]
        );
        assert_eq!((aggs[0].year, aggs[0].month, aggs[0].day), (2023, 12, 1));

        let parts = partition(aggs);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].aggregates.len(), 2);
        assert_eq!(parts[1].key, PartitionKey { year: 2023, month: 12, day: 2 });
    }

    #[test]
    fn test_aggregation_is_deterministic() {
        let rows: Vec<SilverRecord> = (0..50)
            .map(|i| silver(&format!("tx-{i}"), 0.1 * i as f64, "USD", Some("2023-12-01T10:00:00.0")))
            .collect();
        assert_eq!(aggregate(&rows).unwrap(), aggregate(&rows).unwrap());
    }

    #[test]
    fn test_missing_timestamp_fails_gold_stage() {
        let rows = vec![silver("tx-9", 1.0, "USD", None)];
        let err = aggregate(&rows).unwrap_err();
        assert_eq!(err.failed_stage(), Some(Stage::Gold));
        assert!(err.to_string().contains("tx-9"));
    }
}
