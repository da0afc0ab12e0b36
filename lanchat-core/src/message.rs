//! Chat message: id, sender, content, creation timestamp, integrity checksum.

use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

use md5::{Digest, Md5};
use time::{macros::format_description, OffsetDateTime};
use uuid::Uuid;

/// One chat message. Immutable once created; travels as a single frame (see wire module).
/// The checksum covers id, sender, content and the decimal timestamp — corruption
/// detection only, not authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Hyphenated UUIDv4, 36 characters. Used only for dedup, never for ordering.
    pub id: String,
    /// Display name of the sender. Encoders reject anything over 256 UTF-8 bytes.
    pub sender: String,
    /// Message body, UTF-8. Bounded only by the whole-frame size cap.
    pub content: String,
    /// Milliseconds since the Unix epoch, captured at creation.
    pub timestamp: i64,
    /// 32-char lowercase hex MD5 digest.
    pub checksum: String,
}

impl Message {
    /// Create a message with a fresh id, the current timestamp and a computed checksum.
    pub fn create(sender: &str, content: &str) -> Self {
        let id = Uuid::new_v4().to_string();
        let timestamp = now_millis();
        let checksum = compute_checksum(&id, sender, content, timestamp);
        Message {
            id,
            sender: sender.to_string(),
            content: content.to_string(),
            timestamp,
            checksum,
        }
    }

    /// Recompute the digest from the message's own fields and compare with the embedded one.
    pub fn verify_checksum(&self) -> bool {
        compute_checksum(&self.id, &self.sender, &self.content, self.timestamp) == self.checksum
    }

    /// Timestamp rendered as `HH:MM:SS` UTC, for display.
    pub fn formatted_time(&self) -> String {
        let nanos = i128::from(self.timestamp) * 1_000_000;
        let Ok(t) = OffsetDateTime::from_unix_timestamp_nanos(nanos) else {
            return String::new();
        };
        t.format(format_description!("[hour]:[minute]:[second]"))
            .unwrap_or_default()
    }
}

/// MD5 over `id + sender + content + decimal(timestamp)`, lowercase hex.
pub fn compute_checksum(id: &str, sender: &str, content: &str, timestamp: i64) -> String {
    let mut hasher = Md5::new();
    hasher.update(id.as_bytes());
    hasher.update(sender.as_bytes());
    hasher.update(content.as_bytes());
    hasher.update(timestamp.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_populates_all_fields() {
        let msg = Message::create("alice", "hello");
        assert_eq!(msg.id.len(), 36);
        assert_eq!(msg.sender, "alice");
        assert_eq!(msg.content, "hello");
        assert!(msg.timestamp > 0);
        assert_eq!(msg.checksum.len(), 32);
        assert!(msg.checksum.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(msg.verify_checksum());
    }

    #[test]
    fn distinct_messages_get_distinct_ids() {
        let a = Message::create("alice", "hello");
        let b = Message::create("alice", "hello");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn checksum_is_deterministic() {
        let a = compute_checksum("id", "alice", "hello", 1700000000000);
        let b = compute_checksum("id", "alice", "hello", 1700000000000);
        assert_eq!(a, b);
    }

    #[test]
    fn tampered_fields_fail_verification() {
        let mut msg = Message::create("alice", "hello");
        msg.content.push('!');
        assert!(!msg.verify_checksum());

        let mut msg = Message::create("alice", "hello");
        msg.timestamp += 1;
        assert!(!msg.verify_checksum());

        let mut msg = Message::create("alice", "hello");
        msg.sender = "mallory".to_string();
        assert!(!msg.verify_checksum());
    }

    #[test]
    fn formatted_time_renders_utc() {
        let mut msg = Message::create("alice", "hello");
        msg.timestamp = 0;
        assert_eq!(msg.formatted_time(), "00:00:00");
        msg.timestamp = 12 * 3600 * 1000 + 34 * 60 * 1000 + 56 * 1000;
        assert_eq!(msg.formatted_time(), "12:34:56");
    }
}
