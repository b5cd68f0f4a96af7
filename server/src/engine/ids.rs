use chrono::{SecondsFormat, Utc};
use rand::Rng;
use uuid::Uuid;

/// Invite codes use lowercase letters and digits minus the look-alikes (0, 1, l, o).
const INVITE_ALPHABET: &[u8] = b"abcdefghijkmnpqrstuvwxyz23456789";

pub const INVITE_CODE_LENGTH: usize = 8;

/// A new entity id. UUIDv7 text sorts in creation order, so ids double as
/// the chronological pagination key.
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// Current time as RFC 3339 with millisecond precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn new_invite_code() -> String {
    let mut rng = rand::thread_rng();
    (0..INVITE_CODE_LENGTH)
        .map(|_| INVITE_ALPHABET[rng.gen_range(0..INVITE_ALPHABET.len())] as char)
        .collect()
}

/// Normalize a user-supplied invite code for lookup.
pub fn normalize_invite_code(code: &str) -> String {
    code.trim().to_ascii_lowercase()
}
