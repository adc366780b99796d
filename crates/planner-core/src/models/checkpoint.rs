//! Pull checkpoint model

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Position of the last row a client consumed from a collection's change
/// stream. Rows are totally ordered by `(change_time, identity)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Identity of the last consumed row (`id` or `uuid` depending on the
    /// collection; always serialized as `id`)
    #[serde(rename = "id", alias = "uuid", alias = "identity")]
    pub identity: String,
    /// Change time of the last consumed row (Unix ms)
    pub change_time: i64,
}

impl Checkpoint {
    /// Create a checkpoint at the given row position
    pub fn new(identity: impl Into<String>, change_time: i64) -> Self {
        Self {
            identity: identity.into(),
            change_time,
        }
    }

    /// Whether a row at `(change_time, identity)` comes after this checkpoint
    pub fn precedes(&self, change_time: i64, identity: &str) -> bool {
        self.position_cmp(change_time, identity) == Ordering::Less
    }

    fn position_cmp(&self, change_time: i64, identity: &str) -> Ordering {
        self.change_time
            .cmp(&change_time)
            .then_with(|| self.identity.as_str().cmp(identity))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_checkpoint_serializes_as_id_and_change_time() {
        let checkpoint = Checkpoint::new("a1", 42);
        let value = serde_json::to_value(&checkpoint).unwrap();
        assert_eq!(value, json!({"id": "a1", "changeTime": 42}));
    }

    #[test]
    fn test_checkpoint_accepts_identity_aliases() {
        let from_uuid: Checkpoint =
            serde_json::from_value(json!({"uuid": "s1", "changeTime": 7})).unwrap();
        let from_identity: Checkpoint =
            serde_json::from_value(json!({"identity": "s1", "changeTime": 7})).unwrap();
        assert_eq!(from_uuid, Checkpoint::new("s1", 7));
        assert_eq!(from_identity, from_uuid);
    }

    #[test]
    fn test_precedes_uses_identity_tie_break() {
        let checkpoint = Checkpoint::new("a1", 100);
        assert!(checkpoint.precedes(101, "a0"));
        assert!(checkpoint.precedes(100, "b1"));
        assert!(!checkpoint.precedes(100, "a1"));
        assert!(!checkpoint.precedes(100, "a0"));
        assert!(!checkpoint.precedes(99, "z9"));
    }
}
