use serde::Serialize;
use thiserror::Error;

pub type FunnelResult<T> = Result<T, FunnelError>;

#[derive(Error, Debug)]
pub enum FunnelError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigurationError),

    #[error("Malformed input: {0}")]
    MalformedRecords(#[from] MalformedRecordError),

    #[error("Unknown funnel: {0}")]
    UnknownFunnel(String),

    #[error("Input error: {0}")]
    Input(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl FunnelError {
    /// Whether a source error must abort the run rather than drop one row.
    pub fn is_fatal(&self) -> bool {
        match self {
            FunnelError::Io(_) | FunnelError::Internal(_) => true,
            FunnelError::Csv(e) => e.is_io_error(),
            _ => false,
        }
    }
}

/// Invalid caller configuration, reported before any record is processed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("funnel needs at least 2 steps, got {0}")]
    TooFewSteps(usize),

    #[error("funnel step {0} is blank")]
    BlankStep(usize),

    #[error("funnel step `{0}` appears more than once")]
    DuplicateStep(String),

    #[error("top_n_groups must be positive, got {0}")]
    InvalidTopN(i64),

    #[error("unknown_group_label must not be blank")]
    BlankUnknownLabel,
}

/// Why a raw row was dropped by the normalizer.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    #[error("missing required field `{0}`")]
    MissingField(String),

    #[error("field `{field}` is invalid: {detail}")]
    InvalidField { field: String, detail: String },

    #[error("unreadable row: {0}")]
    Unreadable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedRow {
    /// Zero-based position of the row in the input stream.
    pub index: u64,
    pub reason: DropReason,
}

/// Summary of rows dropped during normalization: the total count plus a
/// bounded sample of the offending rows.
#[derive(Error, Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[error("{dropped} malformed record(s) dropped{}", sample_suffix(.samples))]
pub struct MalformedRecordError {
    pub dropped: u64,
    pub samples: Vec<DroppedRow>,
}

fn sample_suffix(samples: &[DroppedRow]) -> String {
    match samples.first() {
        Some(first) => format!(" (first at row {}: {})", first.index, first.reason),
        None => String::new(),
    }
}
