//! Streaming access to the remote, partitioned Parquet dataset.

pub mod error;
pub mod geoarrow;
pub mod parquet;
pub mod predicate;
pub mod stream;

pub use error::{ReaderError, ReaderResult};
pub use parquet::{session_config, DatasetReader, DatasetSource};
pub use predicate::{BoundingBox, ReadPredicate};
pub use stream::{BatchStream, NonEmptyBatches};
