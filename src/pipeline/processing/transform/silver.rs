use tracing::warn;

use crate::domain::{Record, SilverRecord};
use crate::error::{PiiError, PipelineError, Result, Stage};
use crate::security::PiiProtector;

/// Protect one valid record: hash the email, encrypt the PAN, drop both
/// originals and carry every other field through unchanged.
pub fn protect_record(protector: &PiiProtector, record: &Record) -> Result<SilverRecord> {
    let transaction_id = record.transaction_id().ok_or_else(|| {
        PipelineError::stage(
            Stage::Silver,
            format!("record {} reached silver without a transaction_id", record.label()),
        )
    })?;
    let amount = record.amount().ok_or_else(|| {
        PipelineError::stage(
            Stage::Silver,
            format!("transaction '{}' reached silver without an amount", transaction_id),
        )
    })?;
    let currency = record.currency().ok_or_else(|| {
        PipelineError::stage(
            Stage::Silver,
            format!("transaction '{}' reached silver without a currency", transaction_id),
        )
    })?;

    let email_hashed = match record.email() {
        Some(email) => protector.hash_identifier(email),
        None => {
            warn!(transaction_id, "Record has no email; email_hashed left empty");
            String::new()
        }
    };

    let pii_failure = |source: PiiError| PipelineError::PiiProcessing {
        stage: Stage::Silver,
        transaction_id: transaction_id.to_string(),
        source,
    };
    let pan = record
        .pan()
        .ok_or_else(|| pii_failure(PiiError::InvalidInput("pan is missing".to_string())))?;
    let pan_encrypted = protector.encrypt(pan).map_err(pii_failure)?;

    Ok(SilverRecord {
        transaction_id: transaction_id.to_string(),
        customer_id: record.customer_id.clone(),
        amount,
        currency: currency.to_string(),
        timestamp: record.timestamp.clone(),
        email_hashed,
        pan_encrypted,
    })
}
