#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("Object store error: {0}")]
    ObjectStoreError(#[from] object_store::Error),
    #[error("Failed to build object store for {target}: {source}")]
    InitializationError {
        target: String,
        source: object_store::Error,
    },
    #[error("Invalid store URL {url}: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
}
