//! `unirecon-transform`: normalizes raw ingested rows before matching.
//!
//! Three layers:
//!
//! - **Evaluators** (`script`, `formula`, `pipeline`, `prompt`): value-level
//!   strategies behind the [`TransformationEvaluator`] trait, collected in an
//!   [`Evaluators`] registry.
//! - **Plan processor** (`plan`, `processor`): dataset script, then row
//!   operations, then column operations over a batch of rows.
//! - **Canonical projection** (`canonical`): maps normalized rows onto the
//!   field catalog and derives each record's canonical key.

pub mod canonical;
pub mod error;
pub mod evaluator;
pub mod formula;
pub mod pipeline;
pub mod plan;
pub mod processor;
pub mod prompt;
pub mod script;

pub use canonical::{CanonicalProjector, FieldMapping, FieldTransformation};
pub use error::TransformationError;
pub use evaluator::{Evaluators, TransformationEvaluator, TransformationKind};
pub use plan::{ColumnOperation, RowOperation, SourceTransformationPlan};
pub use processor::PlanProcessor;
pub use prompt::{CompletionRequest, StructuredCompletion};
