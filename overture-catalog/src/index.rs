use arrow::{
    array::{Array, AsArray, StructArray},
    compute::cast,
    datatypes::DataType,
    record_batch::RecordBatch,
};
use overture_object_storage::{strip_s3_scheme, OvertureObjectStores, StorageError};
use overture_sources::{BoundingBox, DatasetReader, DatasetSource, ReadPredicate, ReaderError};

use crate::partition::FeatureType;

pub const INDEX_DOCUMENT: &str = "collections.parquet";

/// Path of the S3 href inside the `assets` struct column.
const HREF_PATH: [&str; 4] = ["aws", "alternate", "s3", "href"];

/// Result of consulting the spatial index. Anything but `Files` means the
/// caller has to decide between scanning the whole partition and giving up.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexLookup {
    Files(Vec<String>),
    /// The index was read and no file intersects the box.
    Empty,
    Unavailable,
}

#[derive(Debug, thiserror::Error)]
pub enum MalformedIndexError {
    #[error("Invalid index location: {0}")]
    Location(#[from] StorageError),
    #[error("Failed to read spatial index: {0}")]
    Read(#[from] ReaderError),
    #[error("Spatial index has no column {0}")]
    MissingColumn(String),
    #[error("Spatial index column {column} has unexpected type {data_type}")]
    UnexpectedType { column: String, data_type: DataType },
}

/// The per release `collections.parquet` published next to the STAC catalog.
/// One row per data file with its extent and S3 location.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    stores: OvertureObjectStores,
    reader: DatasetReader,
}

impl SpatialIndex {
    pub fn new(stores: OvertureObjectStores, reader: DatasetReader) -> Self {
        Self { stores, reader }
    }

    pub fn index_url(&self, release: &str) -> Result<String, StorageError> {
        self.stores
            .stac_document_url(&format!("{release}/{INDEX_DOCUMENT}"))
    }

    /// Files of `feature_type` whose extent intersects `bbox`, as `bucket/key`
    /// paths. Failures degrade to [`IndexLookup::Unavailable`].
    pub async fn locate_via_index(
        &self,
        feature_type: FeatureType,
        bbox: BoundingBox,
        release: &str,
    ) -> IndexLookup {
        match self.query(feature_type, bbox, release).await {
            Ok(files) if files.is_empty() => {
                tracing::info!(
                    "Spatial index of {} has no {} files in {:?}",
                    release,
                    feature_type,
                    bbox.to_array()
                );
                IndexLookup::Empty
            }
            Ok(files) => {
                tracing::info!(
                    "Spatial index narrowed {} to {} files",
                    feature_type,
                    files.len()
                );
                IndexLookup::Files(files)
            }
            Err(e) => {
                tracing::warn!("Spatial index unavailable for {}: {}", release, e);
                IndexLookup::Unavailable
            }
        }
    }

    async fn query(
        &self,
        feature_type: FeatureType,
        bbox: BoundingBox,
        release: &str,
    ) -> Result<Vec<String>, MalformedIndexError> {
        let url = self.index_url(release)?;
        let predicate = ReadPredicate::column_equals("collection", feature_type.as_str())
            .and(ReadPredicate::column_equals("type", "Feature"))
            .and(ReadPredicate::Intersects(bbox));

        let batches = self
            .reader
            .open(&DatasetSource::Files(vec![url]), Some(&predicate))
            .await?
            .collect_batches()
            .await?;

        let mut files: Vec<String> = vec![];
        for batch in &batches {
            for href in extract_hrefs(batch)? {
                let path = strip_s3_scheme(&href).to_string();
                if !files.contains(&path) {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }
}

/// Non null `assets.aws.alternate.s3.href` values of `batch`.
pub fn extract_hrefs(batch: &RecordBatch) -> Result<Vec<String>, MalformedIndexError> {
    let assets = batch
        .column_by_name("assets")
        .ok_or_else(|| MalformedIndexError::MissingColumn("assets".to_string()))?;

    let mut levels: Vec<&StructArray> = vec![as_struct("assets", assets.as_ref())?];
    let mut column = "assets".to_string();
    let mut leaf = None;
    for (depth, name) in HREF_PATH.iter().enumerate() {
        column = format!("{column}.{name}");
        let parent = levels[levels.len() - 1];
        let child = parent
            .column_by_name(name)
            .ok_or_else(|| MalformedIndexError::MissingColumn(column.clone()))?;
        if depth + 1 == HREF_PATH.len() {
            leaf = Some(child.clone());
        } else {
            levels.push(as_struct(&column, child.as_ref())?);
        }
    }
    let Some(leaf) = leaf else {
        return Err(MalformedIndexError::MissingColumn(column));
    };

    let hrefs = cast(&leaf, &DataType::Utf8).map_err(|_| MalformedIndexError::UnexpectedType {
        column: column.clone(),
        data_type: leaf.data_type().clone(),
    })?;
    let hrefs = hrefs.as_string::<i32>();

    Ok((0..batch.num_rows())
        .filter(|row| levels.iter().all(|level| level.is_valid(*row)) && hrefs.is_valid(*row))
        .map(|row| hrefs.value(row).to_string())
        .collect())
}

fn as_struct<'a>(column: &str, array: &'a dyn Array) -> Result<&'a StructArray, MalformedIndexError> {
    array
        .as_struct_opt()
        .ok_or_else(|| MalformedIndexError::UnexpectedType {
            column: column.to_string(),
            data_type: array.data_type().clone(),
        })
}
