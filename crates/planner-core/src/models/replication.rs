//! Pull/push exchange models

use serde::{Deserialize, Serialize};

use super::{Checkpoint, WireDocument};

/// Default number of rows returned by one pull.
pub const DEFAULT_PULL_BATCH_SIZE: usize = 10;

/// Result of one pull round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Changed documents in `(change_time, identity)` order
    pub documents: Vec<WireDocument>,
    /// Position after the last returned document; unchanged (or `None`)
    /// when nothing new was found
    pub checkpoint: Option<Checkpoint>,
}

impl PullResponse {
    /// An empty batch signals the end of the current sync round.
    pub fn is_exhausted(&self) -> bool {
        self.documents.is_empty()
    }
}

/// One client write intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRow {
    /// Full document the client wants stored, including `deleted`
    pub new_state: WireDocument,
    /// Document as the client last observed it; absent for creations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assumed_state: Option<WireDocument>,
}

impl PushRow {
    /// A write without an assumed prior state
    pub const fn create(new_state: WireDocument) -> Self {
        Self {
            new_state,
            assumed_state: None,
        }
    }

    /// A write that expects `assumed_state` to be the current stored row
    pub const fn update(new_state: WireDocument, assumed_state: WireDocument) -> Self {
        Self {
            new_state,
            assumed_state: Some(assumed_state),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_push_row_deserializes_camel_case() {
        let row: PushRow = serde_json::from_value(json!({
            "newState": {"id": "a1", "title": "Y", "deleted": false},
            "assumedState": {"id": "a1", "title": "X", "deleted": false}
        }))
        .unwrap();
        assert_eq!(row.new_state["title"], "Y");
        assert_eq!(row.assumed_state.unwrap()["title"], "X");
    }

    #[test]
    fn test_push_row_assumed_state_optional() {
        let row: PushRow =
            serde_json::from_value(json!({"newState": {"id": "a1", "deleted": false}})).unwrap();
        assert!(row.assumed_state.is_none());
    }

    #[test]
    fn test_pull_response_serializes_null_checkpoint() {
        let response = PullResponse {
            documents: Vec::new(),
            checkpoint: None,
        };
        assert!(response.is_exhausted());
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"documents": [], "checkpoint": null})
        );
    }
}
