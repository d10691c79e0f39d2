//! `transaction_records` entity.

use chrono::{Duration as ChronoDuration, NaiveDateTime, Timelike, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

pub const TABLE_NAME: &str = "transaction_records";

pub const CURRENCIES: [&str; 3] = ["USD", "EUR", "GBP"];
pub const PAYMENT_METHODS: [&str; 4] = ["CreditCard", "DebitCard", "PayPal", "ApplePay"];
pub const STATUSES: [&str; 4] = ["Completed", "Pending", "Failed", "Refunded"];

/// Timestamp layout used on the wire to every SQL backend.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Column order shared by INSERT and SELECT statements.
pub const COLUMNS: [&str; 10] = [
    "transaction_id",
    "user_id",
    "transaction_ts",
    "product_id",
    "quantity",
    "unit_price",
    "total_amount",
    "currency",
    "payment_method",
    "status",
];

/// A transaction before an id is assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub user_id: String,
    pub transaction_ts: NaiveDateTime,
    pub product_id: String,
    pub quantity: i32,
    pub unit_price: f64,
    pub total_amount: f64,
    pub currency: String,
    pub payment_method: String,
    pub status: String,
}

impl NewTransaction {
    /// Generate a random sample record, timestamped up to 30 days before `now`.
    pub fn random<R: Rng + ?Sized>(rng: &mut R, now: NaiveDateTime) -> Self {
        let quantity = rng.gen_range(1..=5);
        let unit_price = round_cents(rng.gen_range(5.0..=100.0));
        let total_amount = round_cents(f64::from(quantity) * unit_price);
        let days_ago = rng.gen_range(0..=30);

        Self {
            user_id: format!("user-{}", rng.gen_range(100..=999)),
            transaction_ts: truncate_to_seconds(now - ChronoDuration::days(days_ago)),
            product_id: format!("product-{}", rng.gen_range(1..=50)),
            quantity,
            unit_price,
            total_amount,
            currency: pick(rng, &CURRENCIES),
            payment_method: pick(rng, &PAYMENT_METHODS),
            status: pick(rng, &STATUSES),
        }
    }

    /// Random sample record relative to the current UTC time.
    pub fn sample() -> Self {
        Self::random(&mut rand::thread_rng(), Utc::now().naive_utc())
    }

    /// Check field widths against the table definition.
    pub fn validate(&self) -> Result<(), String> {
        for (field, value, max) in [
            ("user_id", &self.user_id, 36),
            ("product_id", &self.product_id, 36),
            ("payment_method", &self.payment_method, 20),
            ("status", &self.status, 20),
        ] {
            if value.is_empty() {
                return Err(format!("{} cannot be empty", field));
            }
            if value.chars().count() > max {
                return Err(format!("{} exceeds {} characters", field, max));
            }
        }
        if self.currency.chars().count() != 3 {
            return Err(format!("currency must be a 3-letter code, got '{}'", self.currency));
        }
        if self.quantity <= 0 {
            return Err("quantity must be greater than 0".to_string());
        }
        if !self.unit_price.is_finite() || !self.total_amount.is_finite() {
            return Err("amounts must be finite numbers".to_string());
        }
        Ok(())
    }

    /// Assign an id, producing a storable record.
    pub fn into_record(self, transaction_id: impl Into<String>) -> TransactionRecord {
        TransactionRecord {
            transaction_id: transaction_id.into(),
            user_id: self.user_id,
            transaction_ts: self.transaction_ts,
            product_id: self.product_id,
            quantity: self.quantity,
            unit_price: self.unit_price,
            total_amount: self.total_amount,
            currency: self.currency,
            payment_method: self.payment_method,
            status: self.status,
        }
    }
}

/// A stored transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: String,
    pub user_id: String,
    pub transaction_ts: NaiveDateTime,
    pub product_id: String,
    pub quantity: i32,
    pub unit_price: f64,
    pub total_amount: f64,
    pub currency: String,
    pub payment_method: String,
    pub status: String,
}

impl TransactionRecord {
    /// Timestamp rendered in [`TIMESTAMP_FORMAT`].
    pub fn timestamp_text(&self) -> String {
        self.transaction_ts.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Parse a backend timestamp rendered as text (optional fractional seconds).
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

fn pick<R: Rng + ?Sized>(rng: &mut R, choices: &[&str]) -> String {
    choices
        .choose(rng)
        .copied()
        .unwrap_or(choices[0])
        .to_string()
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn truncate_to_seconds(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_nanosecond(0).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn now() -> NaiveDateTime {
        parse_timestamp("2025-06-30 12:00:00.123456").unwrap()
    }

    #[test]
    fn test_random_record_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let tx = NewTransaction::random(&mut rng, now());
            assert!((1..=5).contains(&tx.quantity));
            assert!((5.0..=100.0).contains(&tx.unit_price));
            assert!((tx.total_amount - round_cents(f64::from(tx.quantity) * tx.unit_price)).abs() < 1e-9);
            assert!(CURRENCIES.contains(&tx.currency.as_str()));
            assert!(PAYMENT_METHODS.contains(&tx.payment_method.as_str()));
            assert!(STATUSES.contains(&tx.status.as_str()));
            assert!(tx.transaction_ts <= now());
            assert!(now() - tx.transaction_ts <= ChronoDuration::days(30) + ChronoDuration::seconds(1));
            assert!(tx.validate().is_ok());
        }
    }

    #[test]
    fn test_random_record_has_whole_seconds() {
        let mut rng = StdRng::seed_from_u64(1);
        let tx = NewTransaction::random(&mut rng, now());
        let text = tx.transaction_ts.format(TIMESTAMP_FORMAT).to_string();
        assert_eq!(parse_timestamp(&text), Some(tx.transaction_ts));
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        let mut rng = StdRng::seed_from_u64(3);
        let base = NewTransaction::random(&mut rng, now());

        let mut tx = base.clone();
        tx.currency = "EURO".to_string();
        assert!(tx.validate().unwrap_err().contains("currency"));

        let mut tx = base.clone();
        tx.quantity = 0;
        assert!(tx.validate().is_err());

        let mut tx = base;
        tx.status = "x".repeat(21);
        assert!(tx.validate().unwrap_err().contains("status"));
    }

    #[test]
    fn test_parse_timestamp_variants() {
        assert!(parse_timestamp("2025-01-02 03:04:05").is_some());
        assert!(parse_timestamp("2025-01-02T03:04:05").is_some());
        assert!(parse_timestamp("2025-01-02 03:04:05.500").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_into_record_keeps_fields() {
        let mut rng = StdRng::seed_from_u64(9);
        let tx = NewTransaction::random(&mut rng, now());
        let record = tx.clone().into_record("abc");
        assert_eq!(record.transaction_id, "abc");
        assert_eq!(record.user_id, tx.user_id);
        assert_eq!(record.timestamp_text(), tx.transaction_ts.format(TIMESTAMP_FORMAT).to_string());
    }
}
