use thiserror::Error;

/// Misconfiguration detected while building a form engine or parsing a
/// form definition. These are the only failures surfaced as `Err`; runtime
/// validation problems are recorded as state on the engine.
#[derive(Error, Debug)]
pub enum FormError {
    #[error("missing form id: supply a definition or a form id")]
    MissingFormId,

    #[error("missing initial values: supply a definition or initial values")]
    MissingInitialValues,

    #[error("conflicting construction modes: definition given with imperative options")]
    ConflictingModes,

    #[error("form must have at least one step")]
    NoSteps,

    #[error("initial step {step} out of range 1..={total}")]
    InitialStepOutOfRange { step: usize, total: usize },

    #[error("step validator registered for step {step}, form has {total} steps")]
    ValidatorOutOfRange { step: usize, total: usize },

    #[error("duplicate field name: {0}")]
    DuplicateField(String),

    #[error("ron error: {0}")]
    Ron(#[from] ron::error::SpannedError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("definition loader failed: {0}")]
    Loader(String),
}

/// Failure inside a key-value store. Never escapes `SnapshotStorage`; it is
/// logged there and treated as "nothing persisted".
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
