use chrono::{DateTime, Utc};
use rand::Rng;

const PREFIX: &str = "INV";
const SUFFIX_LEN: usize = 6;
const SUFFIX_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Builds `INV-YYYYMMDD-XXXXXX` with a random upper-case alphanumeric suffix.
///
/// Uniqueness is probabilistic (36^6 suffixes per day); the insert path
/// retries with a fresh number when the unique index rejects one.
pub fn generate_invoice_number(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
        .collect();
    format!("{}-{}-{}", PREFIX, now.format("%Y%m%d"), suffix)
}
