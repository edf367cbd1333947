//! Declarative multi-step form engine.
//!
//! Field schemas compose into steps, steps into a `FormDefinition`; a
//! `FormEngine` holds the live values, errors, touched marks and the current
//! step, validates on navigation and persists snapshots through a
//! `KeyValueStore`.

pub mod definition;
pub mod engine;
pub mod errors;
pub mod field;
pub(crate) mod merge;
pub mod step;
pub mod storage;
pub mod validation;

pub use definition::{DefinitionCache, FormDefinition};
pub use engine::{step_error_key, FormEngine, FormEngineBuilder, SaveMode};
pub use errors::{FormError, StorageError};
pub use field::{
    Condition, CustomOutcome, Dependency, DependencyOperator, FieldKind, FieldSchema, FormData,
    ValidationRule,
};
pub use step::{
    validate_step, FieldErrors, StepCheck, StepSchema, StepValidationResult, STEP_ERROR_KEY,
};
pub use storage::{
    FileStore, FormSnapshot, KeyValueStore, MemoryStore, SnapshotStorage, DEFAULT_KEY_PREFIX,
};
pub use validation::validate;
