use datafusion::error::DataFusionError;
use overture_catalog::CatalogError;
use overture_object_storage::StorageError;
use overture_output::OutputError;
use overture_sources::ReaderError;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to initialize query session: {0}")]
    Session(#[from] DataFusionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error("Unexpected sources column: {0}")]
    Sources(String),
    #[error("Failed to load license table: {0}")]
    LicenseTable(String),
}
