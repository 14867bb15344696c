use chrono::{DateTime, Utc};
use rand::Rng;

use ferry_core::Schedule;

// No 0/O or 1/I: order ids get read out over the phone.
const SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const SUFFIX_LEN: usize = 5;

/// Human-readable order id, e.g. `MRK-BKH-KMP1-261019-7QX2M`:
/// departure harbor, arrival harbor, ship, booking date, random suffix.
pub fn generate_order_id(schedule: &Schedule, now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect();

    format!(
        "{}-{}-{}-{}-{}",
        alias_part(&schedule.departure_harbor_alias),
        alias_part(&schedule.arrival_harbor_alias),
        alias_part(&schedule.ship_alias),
        now.format("%y%m%d"),
        suffix
    )
}

fn alias_part(alias: &str) -> String {
    alias
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_uppercase()
}
