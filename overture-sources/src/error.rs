use std::error::Error;

use arrow::error::ArrowError;
use datafusion::{error::DataFusionError, parquet::errors::ParquetError};

pub type ReaderResult<T> = Result<T, ReaderError>;

#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("Failed to reach {path}: {source}")]
    Connection {
        path: String,
        source: DataFusionError,
    },
    #[error("Failed to open dataset {path}: {source}")]
    Open {
        path: String,
        source: DataFusionError,
    },
    #[error("No parquet files found at {0}")]
    NoDataFiles(String),
    #[error("Failed while streaming {path}: {source}")]
    Stream {
        path: String,
        source: DataFusionError,
    },
    #[error("Batch does not match the dataset schema: {0}")]
    SchemaMismatch(ArrowError),
}

impl ReaderError {
    /// Object store failures (unreachable host, timeouts, missing objects)
    /// are connection errors, everything else is an open error.
    pub fn open(path: &str, source: DataFusionError) -> Self {
        if is_object_store_error(&source) {
            ReaderError::Connection {
                path: path.to_string(),
                source,
            }
        } else {
            ReaderError::Open {
                path: path.to_string(),
                source,
            }
        }
    }

    pub fn stream(path: &str, source: DataFusionError) -> Self {
        if is_object_store_error(&source) {
            ReaderError::Connection {
                path: path.to_string(),
                source,
            }
        } else {
            ReaderError::Stream {
                path: path.to_string(),
                source,
            }
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, ReaderError::Connection { .. })
    }
}

/// The parquet reader hands store failures back boxed inside its own error
/// types, so the external variants are unwrapped before giving up.
fn is_object_store_error(error: &DataFusionError) -> bool {
    match error.find_root() {
        DataFusionError::ObjectStore(_) => true,
        DataFusionError::ParquetError(ParquetError::External(inner))
        | DataFusionError::ArrowError(ArrowError::ExternalError(inner), _)
        | DataFusionError::External(inner) => has_object_store_source(inner.as_ref()),
        _ => false,
    }
}

fn has_object_store_source(mut error: &(dyn Error + 'static)) -> bool {
    loop {
        if error.is::<object_store::Error>() {
            return true;
        }
        if let Some(inner) = error.downcast_ref::<DataFusionError>() {
            return is_object_store_error(inner);
        }
        if let Some(ParquetError::External(inner)) = error.downcast_ref::<ParquetError>() {
            error = inner.as_ref();
            continue;
        }
        if let Some(ArrowError::ExternalError(inner)) = error.downcast_ref::<ArrowError>() {
            error = inner.as_ref();
            continue;
        }
        match error.source() {
            Some(source) => error = source,
            None => return false,
        }
    }
}
