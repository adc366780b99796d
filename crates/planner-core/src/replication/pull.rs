//! Pull handler

use crate::codec;
use crate::db::ReplicationStore;
use crate::error::{Error, Result};
use crate::models::{Checkpoint, PullResponse};

/// Next batch of changes after `checkpoint`, at most `batch_size` rows.
///
/// An empty batch hands back the checkpoint it was given, which tells the
/// client the current round is complete.
pub fn pull(
    store: &impl ReplicationStore,
    owner: &str,
    checkpoint: Option<Checkpoint>,
    batch_size: usize,
) -> Result<PullResponse> {
    if batch_size == 0 {
        return Err(Error::InvalidInput(
            "batch size must be at least 1".to_string(),
        ));
    }

    let config = store.config();
    let rows = store.changes_since(owner, checkpoint.as_ref(), batch_size)?;

    let Some(last) = rows.last() else {
        return Ok(PullResponse {
            documents: Vec::new(),
            checkpoint,
        });
    };
    debug_assert!(
        checkpoint.as_ref().map_or(true, |after| {
            rows.iter()
                .all(|row| after.precedes(row.change_time, &row.identity))
        }),
        "store returned rows at or before the checkpoint"
    );
    let next = Checkpoint::new(last.identity.clone(), last.change_time);

    let documents = rows
        .iter()
        .map(|row| codec::decode(config, row))
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!(
        collection = config.name,
        documents = documents.len(),
        change_time = next.change_time,
        "Pulled changes"
    );

    Ok(PullResponse {
        documents,
        checkpoint: Some(next),
    })
}
