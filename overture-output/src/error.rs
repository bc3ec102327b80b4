use arrow::error::ArrowError;
use parquet::errors::ParquetError;

pub type OutputResult<T> = Result<T, OutputError>;

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("Unsupported schema: {0}")]
    UnsupportedSchema(String),
    #[error("Unknown output format: {0}")]
    UnknownFormat(String),
    #[error("Failed to decode geometry of row {row}: {reason}")]
    Geometry { row: usize, reason: String },
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Writer is already closed")]
    Closed,
}
