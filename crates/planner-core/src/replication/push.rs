//! Push handler
//!
//! A batch is validated, conflict-checked and applied inside one immediate
//! transaction. Any conflict leaves the whole batch unapplied.

use std::collections::HashSet;

use rusqlite::{Connection, TransactionBehavior};

use crate::codec;
use crate::collections::{Collection, CollectionConfig};
use crate::conflict::is_conflict;
use crate::db::{is_identity_violation, ReplicationStore, SqliteReplicationStore};
use crate::error::{Error, Result};
use crate::models::{PushRow, StoredRow, WireDocument};

/// A validated write intent
#[derive(Debug)]
struct Intent<'a> {
    /// Encoded `newState`; change time is filled in at apply time
    row: StoredRow,
    assumed: Option<&'a WireDocument>,
}

impl Intent<'_> {
    fn identity(&self) -> &str {
        &self.row.identity
    }
}

/// Apply a batch of client writes for `owner`.
///
/// Returns the conflicting stored rows in wire shape; empty means every
/// intent was applied.
pub fn push(
    conn: &mut Connection,
    collection: Collection,
    owner: &str,
    rows: &[PushRow],
) -> Result<Vec<WireDocument>> {
    let config = collection.config();
    let intents = validate(config, owner, rows)?;
    if intents.is_empty() {
        return Ok(Vec::new());
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let store = SqliteReplicationStore::new(&tx, config);

    let conflicts = scan_conflicts(&store, owner, &intents)?;
    if !conflicts.is_empty() {
        tracing::info!(
            collection = config.name,
            intents = intents.len(),
            conflicts = conflicts.len(),
            "Push rejected with conflicts"
        );
        return Ok(conflicts);
    }

    let change_time = next_change_time(&store, owner)?;
    if let Some(conflict) = apply(&store, owner, intents, change_time)? {
        tracing::warn!(
            collection = config.name,
            constraint = config.unique_constraint.unwrap_or("primary key"),
            "Concurrent write claimed identity during push"
        );
        return Ok(vec![conflict]);
    }

    drop(store);
    tx.commit()?;

    tracing::debug!(
        collection = config.name,
        intents = rows.len(),
        change_time,
        "Push applied"
    );
    Ok(Vec::new())
}

/// Reject malformed batches before touching storage.
fn validate<'a>(
    config: &CollectionConfig,
    owner: &str,
    rows: &'a [PushRow],
) -> Result<Vec<Intent<'a>>> {
    if owner.trim().is_empty() {
        return Err(Error::InvalidInput("owner must not be empty".to_string()));
    }

    let mut seen = HashSet::new();
    let mut intents = Vec::with_capacity(rows.len());

    for (index, push_row) in rows.iter().enumerate() {
        if codec::tombstone_flag(&push_row.new_state)?.is_none() {
            return Err(Error::InvalidInput(format!(
                "row {index}: newState is missing boolean `deleted`"
            )));
        }
        let row = codec::encode(config, owner, &push_row.new_state, 0)
            .map_err(|error| prefix_row_error(index, error))?;

        if let Some(assumed) = &push_row.assumed_state {
            if config.identity.get(assumed) != Some(row.identity.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "row {index}: assumedState `{}` does not match newState",
                    config.identity.column()
                )));
            }
        }

        if !seen.insert(row.identity.clone()) {
            return Err(Error::InvalidInput(format!(
                "row {index}: `{}` appears more than once in the batch",
                row.identity
            )));
        }

        intents.push(Intent {
            row,
            assumed: push_row.assumed_state.as_ref(),
        });
    }

    Ok(intents)
}

fn prefix_row_error(index: usize, error: Error) -> Error {
    match error {
        Error::InvalidInput(message) => Error::InvalidInput(format!("row {index}: {message}")),
        other => other,
    }
}

/// Phase 1: compare each intent's assumed state with the stored row.
fn scan_conflicts(
    store: &impl ReplicationStore,
    owner: &str,
    intents: &[Intent<'_>],
) -> Result<Vec<WireDocument>> {
    let config = store.config();
    let mut conflicts = Vec::new();

    for intent in intents {
        let Some(stored) = store.find(owner, intent.identity())? else {
            continue;
        };
        let stored = codec::decode(config, &stored)?;
        if is_conflict(Some(&stored), intent.assumed) {
            conflicts.push(stored);
        }
    }

    Ok(conflicts)
}

/// Strictly later than anything the owner has in this collection, so every
/// write moves its row forward and pulls never miss it.
fn next_change_time(store: &impl ReplicationStore, owner: &str) -> Result<i64> {
    let now = chrono::Utc::now().timestamp_millis();
    let floor = store
        .latest_change_time(owner)?
        .map_or(i64::MIN, |latest| latest.saturating_add(1));
    Ok(now.max(floor))
}

/// Phase 2: write every intent. A uniqueness violation means another writer
/// got there first; the stored row is returned as the conflict.
fn apply(
    store: &impl ReplicationStore,
    owner: &str,
    intents: Vec<Intent<'_>>,
    change_time: i64,
) -> Result<Option<WireDocument>> {
    for intent in intents {
        let mut row = intent.row;
        row.change_time = change_time;

        let written = if row.is_deleted {
            match store.tombstone(owner, &row.identity, change_time) {
                // Unknown identity: store it already deleted so it stays reserved
                Ok(false) => store.upsert(&row),
                Ok(true) => Ok(()),
                Err(error) => Err(error),
            }
        } else {
            store.upsert(&row)
        };

        match written {
            Ok(()) => {}
            Err(error) if is_identity_violation(&error) => {
                let Some(stored) = store.find(owner, &row.identity)? else {
                    return Err(error);
                };
                return codec::decode(store.config(), &stored).map(Some);
            }
            Err(error) => return Err(error),
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    use super::*;
    use crate::db::Database;
    use crate::models::Checkpoint;
    use crate::replication::pull;

    fn doc(value: Value) -> WireDocument {
        value.as_object().cloned().unwrap()
    }

    fn stored_title(db: &Database, identity: &str) -> Option<String> {
        db.connection()
            .query_row(
                "SELECT title FROM items WHERE user_id = 'u1' AND id = ?1",
                [identity],
                |row| row.get(0),
            )
            .ok()
    }

    fn pull_items(db: &Database, checkpoint: Option<Checkpoint>) -> crate::models::PullResponse {
        let store = SqliteReplicationStore::new(db.connection(), Collection::Items.config());
        pull(&store, "u1", checkpoint, 10).unwrap()
    }

    fn bare(value: Value) -> WireDocument {
        // Pull fills empty defaults for semi-structured fields
        let mut expected = doc(value);
        expected.entry("tags").or_insert_with(|| json!([]));
        expected.entry("details").or_insert_with(|| json!({}));
        expected
    }

    #[test]
    fn test_create_then_pull() {
        let mut db = Database::open_in_memory().unwrap();
        let conflicts = push(
            db.connection_mut(),
            Collection::Items,
            "u1",
            &[PushRow::create(doc(
                json!({"id": "a1", "title": "X", "deleted": false}),
            ))],
        )
        .unwrap();
        assert!(conflicts.is_empty());

        let response = pull_items(&db, None);
        assert_eq!(
            response.documents,
            vec![bare(json!({"id": "a1", "title": "X", "deleted": false}))]
        );
        let checkpoint = response.checkpoint.unwrap();
        assert_eq!(checkpoint.identity, "a1");
        assert!(checkpoint.change_time > 0);
    }

    #[test]
    fn test_stale_assumed_state_conflicts_and_leaves_row() {
        let mut db = Database::open_in_memory().unwrap();
        push(
            db.connection_mut(),
            Collection::Items,
            "u1",
            &[PushRow::create(doc(
                json!({"id": "a1", "title": "X", "deleted": false}),
            ))],
        )
        .unwrap();
        let before = pull_items(&db, None).checkpoint;

        let conflicts = push(
            db.connection_mut(),
            Collection::Items,
            "u1",
            &[PushRow::update(
                doc(json!({"id": "a1", "title": "Y", "deleted": false})),
                doc(json!({"id": "a1", "title": "WRONG", "deleted": false})),
            )],
        )
        .unwrap();

        assert_eq!(
            conflicts,
            vec![bare(json!({"id": "a1", "title": "X", "deleted": false}))]
        );
        assert_eq!(stored_title(&db, "a1").as_deref(), Some("X"));
        assert_eq!(pull_items(&db, None).checkpoint, before);
    }

    #[test]
    fn test_matching_assumed_state_updates() {
        let mut db = Database::open_in_memory().unwrap();
        push(
            db.connection_mut(),
            Collection::Items,
            "u1",
            &[PushRow::create(doc(
                json!({"id": "a1", "title": "X", "tags": ["x"], "deleted": false}),
            ))],
        )
        .unwrap();
        let assumed = pull_items(&db, None).documents.remove(0);

        let conflicts = push(
            db.connection_mut(),
            Collection::Items,
            "u1",
            &[PushRow::update(
                doc(json!({"id": "a1", "title": "Y", "tags": ["x", "y"], "deleted": false})),
                assumed,
            )],
        )
        .unwrap();
        assert!(conflicts.is_empty());
        assert_eq!(stored_title(&db, "a1").as_deref(), Some("Y"));
    }

    #[test]
    fn test_soft_delete_is_pulled_after_old_checkpoint() {
        let mut db = Database::open_in_memory().unwrap();
        push(
            db.connection_mut(),
            Collection::Items,
            "u1",
            &[PushRow::create(doc(
                json!({"id": "a1", "title": "X", "deleted": false}),
            ))],
        )
        .unwrap();
        let first = pull_items(&db, None);
        let t1 = first.checkpoint.clone().unwrap();

        let conflicts = push(
            db.connection_mut(),
            Collection::Items,
            "u1",
            &[PushRow::update(
                doc(json!({"id": "a1", "title": "X", "deleted": true})),
                first.documents[0].clone(),
            )],
        )
        .unwrap();
        assert!(conflicts.is_empty());

        let after = pull_items(&db, Some(t1.clone()));
        assert_eq!(
            after.documents,
            vec![bare(json!({"id": "a1", "title": "X", "deleted": true}))]
        );
        let t2 = after.checkpoint.unwrap();
        assert_eq!(t2.identity, "a1");
        assert!(t2.change_time > t1.change_time);

        // Still present for a device syncing from scratch
        let fresh = pull_items(&db, None);
        assert_eq!(fresh.documents.len(), 1);
        assert_eq!(fresh.documents[0]["deleted"], true);
    }

    #[test]
    fn test_tombstone_for_unknown_identity_reserves_it() {
        let mut db = Database::open_in_memory().unwrap();
        let conflicts = push(
            db.connection_mut(),
            Collection::Items,
            "u1",
            &[PushRow::create(doc(
                json!({"id": "ghost", "title": "offline only", "deleted": true}),
            ))],
        )
        .unwrap();
        assert!(conflicts.is_empty());

        let response = pull_items(&db, None);
        assert_eq!(response.documents.len(), 1);
        assert_eq!(response.documents[0]["deleted"], true);
    }

    #[test]
    fn test_one_conflict_blocks_whole_batch() {
        let mut db = Database::open_in_memory().unwrap();
        push(
            db.connection_mut(),
            Collection::Items,
            "u1",
            &[PushRow::create(doc(
                json!({"id": "a1", "title": "X", "deleted": false}),
            ))],
        )
        .unwrap();

        let conflicts = push(
            db.connection_mut(),
            Collection::Items,
            "u1",
            &[
                PushRow::create(doc(json!({"id": "b1", "title": "new", "deleted": false}))),
                PushRow::update(
                    doc(json!({"id": "a1", "title": "Y", "deleted": false})),
                    doc(json!({"id": "a1", "title": "stale", "deleted": false})),
                ),
            ],
        )
        .unwrap();

        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0]["id"], "a1");
        assert_eq!(stored_title(&db, "b1"), None);
        assert_eq!(stored_title(&db, "a1").as_deref(), Some("X"));
    }

    #[test]
    fn test_batch_shares_change_time_and_pulls_by_identity() {
        let mut db = Database::open_in_memory().unwrap();
        push(
            db.connection_mut(),
            Collection::Items,
            "u1",
            &[
                PushRow::create(doc(json!({"id": "b1", "deleted": false}))),
                PushRow::create(doc(json!({"id": "a1", "deleted": false}))),
            ],
        )
        .unwrap();

        let store = SqliteReplicationStore::new(db.connection(), Collection::Items.config());
        let first = pull(&store, "u1", None, 1).unwrap();
        assert_eq!(first.documents[0]["id"], "a1");
        let second = pull(&store, "u1", first.checkpoint.clone(), 1).unwrap();
        assert_eq!(second.documents[0]["id"], "b1");
        assert_eq!(
            first.checkpoint.unwrap().change_time,
            second.checkpoint.unwrap().change_time
        );
    }

    #[test]
    fn test_change_time_advances_per_write() {
        let mut db = Database::open_in_memory().unwrap();
        let mut last = i64::MIN;
        for title in ["one", "two", "three"] {
            push(
                db.connection_mut(),
                Collection::Items,
                "u1",
                &[PushRow::create(doc(
                    json!({"id": "a1", "title": title, "deleted": false}),
                ))],
            )
            .unwrap();
            let checkpoint = pull_items(&db, None).checkpoint.unwrap();
            assert!(checkpoint.change_time > last);
            last = checkpoint.change_time;
        }
    }

    #[test]
    fn test_uuid_collection_round_trip() {
        let mut db = Database::open_in_memory().unwrap();
        let semester = doc(json!({
            "uuid": "s1",
            "term": "fall",
            "year": 2025,
            "course_ids": ["c1", "c2"],
            "deleted": false
        }));
        push(
            db.connection_mut(),
            Collection::Semesters,
            "u1",
            &[PushRow::create(semester.clone())],
        )
        .unwrap();

        let store = SqliteReplicationStore::new(db.connection(), Collection::Semesters.config());
        let response = pull(&store, "u1", None, 10).unwrap();
        assert_eq!(response.documents, vec![semester]);
        assert_eq!(response.checkpoint.unwrap().identity, "s1");
    }

    #[test]
    fn test_owners_are_isolated() {
        let mut db = Database::open_in_memory().unwrap();
        for owner in ["u1", "u2"] {
            push(
                db.connection_mut(),
                Collection::Items,
                owner,
                &[PushRow::create(doc(
                    json!({"id": "a1", "title": owner, "deleted": false}),
                ))],
            )
            .unwrap();
        }
        let response = pull_items(&db, None);
        assert_eq!(response.documents.len(), 1);
        assert_eq!(response.documents[0]["title"], "u1");
    }

    #[test]
    fn test_malformed_batches_are_rejected() {
        let mut db = Database::open_in_memory().unwrap();
        let cases = vec![
            vec![PushRow::create(doc(json!({"id": "a1", "title": "no flag"})))],
            vec![PushRow::create(doc(json!({"title": "no id", "deleted": false})))],
            vec![PushRow::update(
                doc(json!({"id": "a1", "deleted": false})),
                doc(json!({"id": "b1", "deleted": false})),
            )],
            vec![
                PushRow::create(doc(json!({"id": "a1", "deleted": false}))),
                PushRow::create(doc(json!({"id": "a1", "deleted": true}))),
            ],
            vec![PushRow::create(doc(
                json!({"id": "a1", "user_id": "someone-else", "deleted": false}),
            ))],
        ];

        for rows in cases {
            let err = push(db.connection_mut(), Collection::Items, "u1", &rows).unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{err}");
        }
        assert!(pull_items(&db, None).is_exhausted());
    }

    #[test]
    fn test_empty_batch_is_a_no_op() {
        let mut db = Database::open_in_memory().unwrap();
        let conflicts = push(db.connection_mut(), Collection::Items, "u1", &[]).unwrap();
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_next_change_time_passes_future_rows() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteReplicationStore::new(db.connection(), Collection::Items.config());
        let future = chrono::Utc::now().timestamp_millis() + 60_000;
        store
            .upsert(&StoredRow {
                owner: "u1".to_string(),
                identity: "a1".to_string(),
                change_time: future,
                is_deleted: false,
                fields: Vec::new(),
            })
            .unwrap();

        assert_eq!(next_change_time(&store, "u1").unwrap(), future + 1);
        assert!(next_change_time(&store, "u2").unwrap() < future);
    }
}
