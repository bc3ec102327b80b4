use overture_object_storage::StorageError;
use overture_sources::ReaderError;

pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Unknown feature type: {0}")]
    UnknownType(String),
    #[error("Failed to fetch registry manifest {path}: {source}")]
    ManifestFetch { path: String, source: StorageError },
    #[error("Invalid registry manifest: {0}")]
    Manifest(String),
    #[error("Failed to parse registry manifest: {0}")]
    ManifestParse(#[from] serde_json::Error),
    #[error("Registry file {file} is malformed: {reason}")]
    Registry { file: String, reason: String },
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
