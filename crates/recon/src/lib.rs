//! `unirecon-recon`: dynamic multi-source reconciliation.
//!
//! Loads the latest canonical batch of every configured source through a
//! [`RecordStore`], compares each source against the anchor and reports
//! break candidates. Matching itself is pure: no IO beyond the store.

pub mod classify;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod matcher;
pub mod model;
pub mod stage;
pub mod store;

pub use config::{DefinitionConfig, SourceConfig};
pub use engine::{reconcile, run};
pub use error::ReconError;
pub use evidence::{summarize, RunSummary};
pub use model::{
    BatchId, BatchInfo, BreakCandidate, BreakType, DynamicReconciliationContext, MatchingResult, SourceBatch,
    SourceDataset, SourceSnapshot,
};
pub use store::{MemoryRecordStore, RecordStore};
