//! GERS id lookups through the registry published with every release.
//!
//! The registry is a set of Parquet files, each holding a contiguous id range.
//! A small JSON manifest lists the files with their id bounds, so a lookup is
//! one binary search plus one filtered read of a single file.

use arrow::{
    array::{Array, ArrayRef, AsArray, Float64Array, StringArray, StructArray},
    compute::cast,
    datatypes::DataType,
    record_batch::RecordBatch,
};
use overture_object_storage::OvertureObjectStores;
use overture_sources::{BoundingBox, DatasetReader, DatasetSource, ReadPredicate};
use serde::Deserialize;

use crate::{
    error::{CatalogError, CatalogResult},
    partition::release_root,
};

pub const MANIFEST_DOCUMENT: &str = "registry-manifest.json";
const REGISTRY_PREFIX: &str = "registry";

/// One registry file and the id range it covers. `max` is inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub file: String,
    pub min: Option<String>,
    pub max: String,
}

/// Wire shapes the manifest has been published in.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ManifestDocument {
    /// `[[file, max], ...]`
    Pairs(Vec<(String, String)>),
    /// `{"bounds": [[min, max], ...], "files": [...]}`
    Bounds {
        bounds: Vec<(String, String)>,
        files: Vec<String>,
    },
}

/// Entries sorted ascending by upper bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryManifest {
    entries: Vec<ManifestEntry>,
}

impl RegistryManifest {
    pub fn new(mut entries: Vec<ManifestEntry>) -> Self {
        for entry in entries.iter_mut() {
            entry.max = entry.max.to_lowercase();
            entry.min = entry.min.as_ref().map(|min| min.to_lowercase());
        }
        entries.sort_by(|a, b| a.max.cmp(&b.max));
        Self { entries }
    }

    pub fn from_json(bytes: &[u8]) -> CatalogResult<Self> {
        let entries = match serde_json::from_slice::<ManifestDocument>(bytes)? {
            ManifestDocument::Pairs(pairs) => pairs
                .into_iter()
                .map(|(file, max)| ManifestEntry {
                    file,
                    min: None,
                    max,
                })
                .collect(),
            ManifestDocument::Bounds { bounds, files } => {
                if bounds.len() != files.len() {
                    return Err(CatalogError::Manifest(format!(
                        "{} bounds for {} files",
                        bounds.len(),
                        files.len()
                    )));
                }
                files
                    .into_iter()
                    .zip(bounds)
                    .map(|(file, (min, max))| ManifestEntry {
                        file,
                        min: Some(min),
                        max,
                    })
                    .collect()
            }
        };
        Ok(Self::new(entries))
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Leftmost entry whose upper bound is `>= id`. Ids are compared
    /// lowercased. An id below the chosen entry's lower bound falls into a gap
    /// between files and has no entry.
    pub fn search(&self, id: &str) -> Option<&ManifestEntry> {
        let key = id.to_lowercase();
        let position = self
            .entries
            .partition_point(|entry| entry.max.as_str() < key.as_str());
        let entry = self.entries.get(position)?;
        match &entry.min {
            Some(min) if key.as_str() < min.as_str() => None,
            _ => Some(entry),
        }
    }
}

/// One registry row. A `None` path means the feature existed in an earlier
/// release but is not part of the current one.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryRow {
    pub id: String,
    pub path: Option<String>,
    pub bbox: Option<BoundingBox>,
    pub version: Option<String>,
    pub first_seen: Option<String>,
    pub last_seen: Option<String>,
    pub last_changed: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegistryHit {
    /// `<bucket>/release/<release>/theme=.../part-....parquet`
    pub path: String,
    pub bbox: Option<BoundingBox>,
    pub row: RegistryRow,
}

impl RegistryHit {
    /// Exact match on id, narrowed by the registry bbox when there is one.
    pub fn predicate(&self) -> ReadPredicate {
        match self.bbox {
            Some(bbox) => ReadPredicate::exact_feature(&self.row.id, bbox),
            None => ReadPredicate::IdEquals(self.row.id.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Found(RegistryHit),
    AbsentFromRelease(RegistryRow),
    NotFound,
}

#[derive(Debug, Clone)]
pub struct Registry {
    stores: OvertureObjectStores,
    reader: DatasetReader,
}

impl Registry {
    pub fn new(stores: OvertureObjectStores, reader: DatasetReader) -> Self {
        Self { stores, reader }
    }

    pub fn manifest_document(release: &str) -> String {
        format!("{release}/{MANIFEST_DOCUMENT}")
    }

    /// `<bucket>/registry/<file>`
    pub fn registry_file_path(&self, file: &str) -> String {
        format!(
            "{}/{REGISTRY_PREFIX}/{}",
            self.stores.options().bucket,
            file.trim_start_matches('/')
        )
    }

    /// Fetched on every lookup, the manifest is never cached.
    pub async fn fetch_manifest(&self, release: &str) -> CatalogResult<RegistryManifest> {
        let document = Self::manifest_document(release);
        let bytes = self
            .stores
            .get_stac_document(&document)
            .await
            .map_err(|source| CatalogError::ManifestFetch {
                path: document.clone(),
                source,
            })?;
        RegistryManifest::from_json(&bytes)
    }

    /// Row for `id` in registry `file`, if present.
    pub async fn fetch_row(&self, file: &str, id: &str) -> CatalogResult<Option<RegistryRow>> {
        let path = self.registry_file_path(file);
        let batches = self
            .reader
            .open(
                &DatasetSource::Files(vec![path.clone()]),
                Some(&ReadPredicate::IdEquals(id.to_string())),
            )
            .await?
            .collect_batches()
            .await?;

        match batches.first() {
            Some(batch) => Ok(Some(parse_row(batch, 0).map_err(|reason| {
                CatalogError::Registry {
                    file: path,
                    reason,
                }
            })?)),
            None => Ok(None),
        }
    }

    /// Resolve `id` against the registry of `release`.
    ///
    /// Misses are outcomes, not errors. Errors are reserved for manifest or
    /// registry files that cannot be fetched or read.
    pub async fn lookup(&self, id: &str, release: &str) -> CatalogResult<LookupOutcome> {
        let key = id.to_lowercase();
        let manifest = self.fetch_manifest(release).await?;

        let Some(entry) = manifest.search(&key) else {
            tracing::info!("GERS id {} is outside every registry file of {}", key, release);
            return Ok(LookupOutcome::NotFound);
        };
        tracing::debug!("GERS id {} maps to registry file {}", key, entry.file);

        let Some(row) = self.fetch_row(&entry.file, &key).await? else {
            tracing::info!("GERS id {} not present in registry file {}", key, entry.file);
            return Ok(LookupOutcome::NotFound);
        };

        let Some(relative) = row.path.clone() else {
            tracing::info!(
                "GERS id {} is not part of release {} (version {:?}, last seen {:?}, last changed {:?})",
                key,
                release,
                row.version,
                row.last_seen,
                row.last_changed
            );
            return Ok(LookupOutcome::AbsentFromRelease(row));
        };

        let path = format!(
            "{}/{}",
            release_root(&self.stores.options().bucket, release),
            relative.trim_start_matches('/')
        );
        Ok(LookupOutcome::Found(RegistryHit {
            path,
            bbox: row.bbox,
            row,
        }))
    }
}

fn parse_row(batch: &RecordBatch, row: usize) -> Result<RegistryRow, String> {
    let id = string_value(batch, "id", row)?.ok_or_else(|| "null id".to_string())?;
    Ok(RegistryRow {
        id,
        path: string_value(batch, "path", row)?,
        bbox: bbox_value(batch, row)?,
        version: string_value(batch, "version", row)?,
        first_seen: string_value(batch, "first_seen", row)?,
        last_seen: string_value(batch, "last_seen", row)?,
        last_changed: string_value(batch, "last_changed", row)?,
    })
}

/// Value of `column` at `row` rendered as a string. Absent columns read as null.
fn string_value(batch: &RecordBatch, column: &str, row: usize) -> Result<Option<String>, String> {
    let Some(array) = batch.column_by_name(column) else {
        return Ok(None);
    };
    let array = as_utf8(array, column)?;
    Ok(array.is_valid(row).then(|| array.value(row).to_string()))
}

fn as_utf8(array: &ArrayRef, column: &str) -> Result<StringArray, String> {
    let casted = cast(array, &DataType::Utf8)
        .map_err(|e| format!("column {column} cannot be read as text: {e}"))?;
    Ok(casted.as_string::<i32>().clone())
}

fn bbox_value(batch: &RecordBatch, row: usize) -> Result<Option<BoundingBox>, String> {
    let Some(array) = batch.column_by_name("bbox") else {
        return Ok(None);
    };
    let bbox: &StructArray = array
        .as_struct_opt()
        .ok_or_else(|| format!("bbox has type {}", array.data_type()))?;
    if bbox.is_null(row) {
        return Ok(None);
    }

    let mut bounds = [0f64; 4];
    for (bound, name) in bounds.iter_mut().zip(["xmin", "ymin", "xmax", "ymax"]) {
        let child = bbox
            .column_by_name(name)
            .ok_or_else(|| format!("bbox has no {name}"))?;
        let values = cast(child, &DataType::Float64).map_err(|e| e.to_string())?;
        let values: &Float64Array = values.as_primitive();
        if values.is_null(row) {
            return Ok(None);
        }
        *bound = values.value(row);
    }
    Ok(Some(BoundingBox::from(bounds)))
}
