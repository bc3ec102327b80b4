use std::sync::Arc;

use arrow::datatypes::{Schema, SchemaRef};
use datafusion::{
    datasource::{
        file_format::{parquet::ParquetFormat, FileFormat},
        listing::{ListingOptions, ListingTable, ListingTableConfig, ListingTableUrl},
    },
    error::DataFusionError,
    prelude::{SessionConfig, SessionContext},
};
use futures::{StreamExt, TryStreamExt};
use object_store::ObjectMeta;

use crate::{
    error::{ReaderError, ReaderResult},
    geoarrow::{geoarrow_schema_adapter, GEO_METADATA_KEY},
    predicate::ReadPredicate,
    stream::BatchStream,
};

const PARQUET_EXTENSION: &str = ".parquet";

/// Session settings every dataset scan relies on: predicate pushdown into the
/// Parquet reader and plain (non view) string/binary types.
pub fn session_config(batch_size: usize) -> SessionConfig {
    let mut config = SessionConfig::new()
        .with_batch_size(batch_size)
        .with_parquet_pruning(true)
        .with_coalesce_batches(true);

    let parquet = &mut config.options_mut().execution.parquet;
    parquet.pushdown_filters = true;
    parquet.reorder_filters = true;
    parquet.schema_force_view_types = false;

    config
}

/// What to scan: a whole partition directory or an explicit list of files
/// (spatial index hits, registry files).
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetSource {
    Partition(String),
    Files(Vec<String>),
}

impl DatasetSource {
    pub fn paths(&self) -> Vec<String> {
        match self {
            DatasetSource::Partition(path) => vec![path.clone()],
            DatasetSource::Files(paths) => paths.clone(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            DatasetSource::Partition(path) => path.clone(),
            DatasetSource::Files(paths) => match paths.as_slice() {
                [] => "<no files>".to_string(),
                [only] => only.clone(),
                [first, rest @ ..] => format!("{} (+{} more files)", first, rest.len()),
            },
        }
    }
}

/// Opens remote Parquet datasets as filtered batch streams.
#[derive(Clone)]
pub struct DatasetReader {
    ctx: Arc<SessionContext>,
}

impl DatasetReader {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self { ctx }
    }

    fn parquet_format(skip_metadata: bool) -> ParquetFormat {
        ParquetFormat::default()
            .with_enable_pruning(true)
            .with_skip_metadata(skip_metadata)
            .with_force_view_types(false)
    }

    /// Open `source`, optionally restricted by `predicate`.
    ///
    /// Fails with [`ReaderError::Connection`] when the store cannot be reached
    /// within the configured timeouts. Nothing is retried here.
    pub async fn open(
        &self,
        source: &DatasetSource,
        predicate: Option<&ReadPredicate>,
    ) -> ReaderResult<BatchStream> {
        let location = source.describe();
        let table_urls = source
            .paths()
            .iter()
            .map(|path| ListingTableUrl::parse(overture_object_storage::dataset_url(path)))
            .collect::<datafusion::error::Result<Vec<_>>>()
            .map_err(|e| ReaderError::open(&location, e))?;

        if table_urls.is_empty() {
            return Err(ReaderError::NoDataFiles(location));
        }

        let state = self.ctx.state();
        let listing_options = ListingOptions::new(Arc::new(Self::parquet_format(true)))
            .with_file_extension(PARQUET_EXTENSION);

        let mut schemas = vec![];
        for table_url in &table_urls {
            tracing::debug!("Infer schema for {}", table_url);
            let schema = listing_options
                .infer_schema(&state, table_url)
                .await
                .map_err(|e| ReaderError::open(&location, e))?;
            schemas.push(schema.as_ref().clone());
        }
        let schema = Schema::try_merge(schemas)
            .map_err(|e| ReaderError::open(&location, DataFusionError::ArrowError(e, None)))?;
        if schema.fields().is_empty() {
            return Err(ReaderError::NoDataFiles(location));
        }

        let geo_metadata = self.geo_metadata(&table_urls[0]).await;

        let config = ListingTableConfig::new_with_multi_paths(table_urls)
            .with_listing_options(listing_options)
            .with_schema(Arc::new(schema));
        let table = ListingTable::try_new(config).map_err(|e| ReaderError::open(&location, e))?;

        let mut df = self
            .ctx
            .read_table(Arc::new(table))
            .map_err(|e| ReaderError::open(&location, e))?;

        if let Some(predicate) = predicate {
            tracing::debug!("Pushing down {:?} into {}", predicate, location);
            df = df
                .filter(predicate.to_expr())
                .map_err(|e| ReaderError::open(&location, e))?;
        }

        let schema: SchemaRef = geoarrow_schema_adapter(df.schema().as_arrow(), geo_metadata);
        let stream = df
            .execute_stream()
            .await
            .map_err(|e| ReaderError::open(&location, e))?;

        Ok(BatchStream::new(schema, location, stream))
    }

    /// GeoParquet metadata of the first data file. Files of one partition
    /// disagree on their extents, so the block is never merged across files.
    async fn geo_metadata(&self, table_url: &ListingTableUrl) -> Option<String> {
        match self.first_file_schema(table_url).await {
            Ok(schema) => schema.metadata().get(GEO_METADATA_KEY).cloned(),
            Err(e) => {
                tracing::debug!("No geo metadata for {}: {}", table_url, e);
                None
            }
        }
    }

    async fn first_file_schema(
        &self,
        table_url: &ListingTableUrl,
    ) -> datafusion::error::Result<SchemaRef> {
        let store = self.ctx.runtime_env().object_store(table_url.object_store())?;

        let first: Option<ObjectMeta> = if table_url.is_collection() {
            store
                .list(Some(table_url.prefix()))
                .try_filter(|meta| {
                    futures::future::ready(
                        meta.location.as_ref().ends_with(PARQUET_EXTENSION),
                    )
                })
                .boxed()
                .next()
                .await
                .transpose()?
        } else {
            Some(store.head(table_url.prefix()).await?)
        };

        let Some(first) = first else {
            return Err(DataFusionError::Execution(format!(
                "No parquet files under {}",
                table_url
            )));
        };

        let state = self.ctx.state();
        let schema = Self::parquet_format(false)
            .infer_schema(&state, &store, &[first])
            .await?;
        Ok(schema)
    }
}

impl std::fmt::Debug for DatasetReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetReader")
            .field("session_id", &self.ctx.session_id())
            .finish()
    }
}
