//! `unirecon-core`: shared types for the reconciliation workspace.
//!
//! Pure data: the field catalog a definition is configured with, the tagged
//! `Value` every record field holds, and the ordered `Row` mapping that flows
//! from ingestion through transformation into matching.

pub mod catalog;
pub mod record;
pub mod row;
pub mod value;

pub use catalog::{
    CanonicalField, ComparisonLogic, DataType, FieldRole, ReconciliationDefinition,
    ReconciliationSource,
};
pub use record::CanonicalRecord;
pub use row::Row;
pub use value::{CoercionError, Value};
