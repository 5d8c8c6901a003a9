// src/utils.rs
// Small shared helpers: id generation, time formatting.

use chrono::{DateTime, Utc};
use rand::Rng;

const RANDOM_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Current time, used everywhere instead of scattering `Utc::now()` calls so
/// tests can reason about a single notion of "now" per operation.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Render a timestamp the way rows are stored: RFC 3339 in UTC.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// Base36 encoding of a millisecond epoch timestamp, lowercase.
fn base36_millis(ts: DateTime<Utc>) -> String {
    let mut n = ts.timestamp_millis().max(0) as u128;
    if n == 0 {
        return "0".to_string();
    }
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).expect("base36 digits are ASCII")
}

/// Three random upper-alphanumeric characters, per the message id format.
fn random_suffix() -> String {
    let mut rng = rand::rng();
    (0..3)
        .map(|_| {
            let idx = rng.random_range(0..RANDOM_ALPHABET.len());
            RANDOM_ALPHABET[idx] as char
        })
        .collect()
}

/// Generate a message id: `<TYPE>-<base36 epoch ms>-<3 random upper-alphanumeric>`.
pub fn generate_message_id(message_type: &str, ts: DateTime<Utc>) -> String {
    format!(
        "{}-{}-{}",
        message_type.to_uppercase(),
        base36_millis(ts),
        random_suffix()
    )
}

/// Derive a thread id from the originating message id.
pub fn thread_id_for(message_id: &str) -> String {
    format!("{message_id}-thread")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_matches_shape() {
        let id = generate_message_id("contract", now());
        let re = regex::Regex::new(r"^CONTRACT-[0-9a-z]+-[A-Z0-9]{3}$").unwrap();
        assert!(re.is_match(&id), "id {id} did not match expected shape");
    }

    #[test]
    fn thread_id_appends_suffix() {
        assert_eq!(thread_id_for("CONTRACT-abc-XYZ"), "CONTRACT-abc-XYZ-thread");
    }
}
