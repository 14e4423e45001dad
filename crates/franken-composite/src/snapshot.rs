//! Deterministic, hashable introspection of a composite.
//!
//! A snapshot records the shape of a composite (entry counts, visible and
//! tombstoned keys, flags, which traps are overridden) and a content hash
//! over those fields.  Two composites with the same composition history
//! produce the same `view_hash`; target identity never enters the hash.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::dispatcher::CompositeState;
use crate::object_model::canonical_key_order;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeSnapshot {
    pub trace_id: String,
    /// Recompute count of the data view.
    pub revision: u64,
    pub target_count: usize,
    pub trap_table_count: usize,
    pub visible_keys: Vec<String>,
    pub deleted_keys: Vec<String>,
    pub extensible: bool,
    pub has_prototype: bool,
    pub callable: bool,
    pub overridden_traps: Vec<String>,
    pub view_hash: String,
}

/// Hash preimage: every field except the hash itself.
#[derive(Serialize)]
struct SnapshotPreimage<'a> {
    trace_id: &'a str,
    revision: u64,
    target_count: usize,
    trap_table_count: usize,
    visible_keys: &'a [String],
    deleted_keys: &'a [String],
    extensible: bool,
    has_prototype: bool,
    callable: bool,
    overridden_traps: &'a [String],
}

impl CompositeSnapshot {
    pub(crate) fn capture(state: &CompositeState) -> Self {
        let view = state.data.combined();
        let book = state.data.hook();
        let visible_keys = canonical_key_order(
            view.keys()
                .filter(|key| !book.is_deleted(key))
                .cloned(),
        )
        .iter()
        .map(ToString::to_string)
        .collect();
        let deleted_keys = canonical_key_order(book.deleted().iter().cloned())
            .iter()
            .map(ToString::to_string)
            .collect();
        let overridden_traps = state
            .traps
            .combined()
            .keys()
            .map(|kind| kind.as_str().to_string())
            .collect();

        let mut snapshot = Self {
            trace_id: state.log.trace_id().to_string(),
            revision: view.revision(),
            target_count: state.data.entry_count(),
            trap_table_count: state.traps.entry_count(),
            visible_keys,
            deleted_keys,
            extensible: book.extensible(),
            has_prototype: book.prototype().is_some(),
            callable: state.callable,
            overridden_traps,
            view_hash: String::new(),
        };
        snapshot.view_hash = snapshot.compute_hash();
        snapshot
    }

    /// Does `view_hash` match the other fields?
    pub fn verify_hash(&self) -> bool {
        self.view_hash == self.compute_hash()
    }

    fn compute_hash(&self) -> String {
        let preimage = SnapshotPreimage {
            trace_id: &self.trace_id,
            revision: self.revision,
            target_count: self.target_count,
            trap_table_count: self.trap_table_count,
            visible_keys: &self.visible_keys,
            deleted_keys: &self.deleted_keys,
            extensible: self.extensible,
            has_prototype: self.has_prototype,
            callable: self.callable,
            overridden_traps: &self.overridden_traps,
        };
        // Plain strings, integers and bools always serialize.
        let bytes = serde_json::to_vec(&preimage).unwrap_or_default();
        sha256_hex(&bytes)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("sha256:{}", hex::encode(digest))
}
