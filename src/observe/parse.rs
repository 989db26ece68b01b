use chrono::{NaiveDateTime, TimeZone, Utc};

/// First integer token anywhere in `text`, e.g. `Error (0) Replica acquired successfully` -> 0.
pub fn first_integer(text: &str) -> Option<i64> {
    let start = text.char_indices().find_map(|(i, c)| {
        let starts_number = c.is_ascii_digit()
            || (c == '-' && text[i + 1..].starts_with(|next: char| next.is_ascii_digit()));
        if starts_number {
            Some(i)
        } else {
            None
        }
    })?;
    integer_prefix(&text[start..])
}

/// Integer token at the very start of `text`, e.g. `0 Total init succeeded` -> 0.
pub fn leading_integer(text: &str) -> Option<i64> {
    integer_prefix(text)
}

/// Directory boolean flags: `on`, `true`, `yes` and `1` are true (any case), anything else false.
pub fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "on" | "true" | "yes" | "1")
}

/// Convert LDAP generalized time (`YYYYmmddHHMMSSZ`, optionally with a fraction of a second
/// before the `Z`) to epoch seconds. Fractions are truncated.
pub fn generalized_time_to_epoch(value: &str) -> Option<i64> {
    let body = value.strip_suffix('Z')?;
    let (whole, fraction) = match body.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (body, None),
    };
    if whole.len() != 14 || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if let Some(fraction) = fraction {
        if fraction.is_empty() || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }

    let naive = NaiveDateTime::parse_from_str(whole, "%Y%m%d%H%M%S").ok()?;
    Some(Utc.from_utc_datetime(&naive).timestamp())
}

fn integer_prefix(text: &str) -> Option<i64> {
    let digits_start = if text.starts_with('-') { 1 } else { 0 };
    let digits_len = text[digits_start..]
        .bytes()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits_len == 0 {
        return None;
    }
    text[..digits_start + digits_len].parse().ok()
}
