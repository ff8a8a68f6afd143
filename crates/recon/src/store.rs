//! Persistence collaborator: where canonical records are staged between
//! ingestion and matching.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use unirecon_core::CanonicalRecord;

use crate::error::ReconError;
use crate::model::{BatchId, BatchInfo, SourceBatch};

pub trait RecordStore: Send + Sync {
    /// Latest batch of every requested source that has one, read under a
    /// single consistent view.
    fn latest_batches(&self, definition: &str, sources: &[String]) -> Result<HashMap<String, SourceBatch>, ReconError>;

    /// Stores `records` as a new batch, which becomes that source's latest.
    fn ingest(
        &self,
        definition: &str,
        source: &str,
        label: &str,
        records: Vec<CanonicalRecord>,
    ) -> Result<BatchId, ReconError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    next_id: BatchId,
    /// (definition, source) -> batches in ingestion order.
    batches: HashMap<(String, String), Vec<SourceBatch>>,
}

/// Process-local store. One lock guards all sources so a reader never sees
/// a batch from one ingestion next to a stale batch from another.
#[derive(Default)]
pub struct MemoryRecordStore {
    state: RwLock<MemoryState>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_count(&self, definition: &str, source: &str) -> usize {
        let state = self.state.read();
        state
            .batches
            .get(&(definition.to_string(), source.to_string()))
            .map_or(0, Vec::len)
    }
}

impl RecordStore for MemoryRecordStore {
    fn latest_batches(&self, definition: &str, sources: &[String]) -> Result<HashMap<String, SourceBatch>, ReconError> {
        let state = self.state.read();
        let mut latest = HashMap::new();
        for source in sources {
            let key = (definition.to_string(), source.clone());
            if let Some(batch) = state.batches.get(&key).and_then(|b| b.iter().max_by_key(|b| b.info.id)) {
                latest.insert(source.clone(), batch.clone());
            }
        }
        Ok(latest)
    }

    fn ingest(
        &self,
        definition: &str,
        source: &str,
        label: &str,
        records: Vec<CanonicalRecord>,
    ) -> Result<BatchId, ReconError> {
        let mut state = self.state.write();
        state.next_id += 1;
        let id = state.next_id;
        let batch = SourceBatch {
            info: BatchInfo { id, label: label.to_string(), ingested_at: Utc::now() },
            records,
        };
        log::debug!(
            "ingested batch {id} ({} records) for {definition}/{source}",
            batch.records.len()
        );
        state
            .batches
            .entry((definition.to_string(), source.to_string()))
            .or_default()
            .push(batch);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unirecon_core::Row;

    fn records(keys: &[&str]) -> Vec<CanonicalRecord> {
        keys.iter().map(|k| CanonicalRecord::new(*k, Row::new())).collect()
    }

    #[test]
    fn latest_batch_wins_per_source() {
        let store = MemoryRecordStore::new();
        store.ingest("D", "A", "monday", records(&["1"])).unwrap();
        let tuesday = store.ingest("D", "A", "tuesday", records(&["1", "2"])).unwrap();
        store.ingest("D", "B", "monday", records(&["9"])).unwrap();
        store.ingest("OTHER", "A", "monday", records(&[])).unwrap();

        let latest = store.latest_batches("D", &["A".into(), "B".into(), "C".into()]).unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest["A"].info.id, tuesday);
        assert_eq!(latest["A"].info.label, "tuesday");
        assert_eq!(latest["A"].records.len(), 2);
        assert!(!latest.contains_key("C"));
        assert_eq!(store.batch_count("D", "A"), 2);
    }
}
