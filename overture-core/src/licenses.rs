use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::Path,
};

use arrow::{
    array::{Array, AsArray, GenericListArray, OffsetSizeTrait},
    compute::cast,
    datatypes::DataType,
    record_batch::RecordBatch,
};
use overture_catalog::Theme;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

pub const SOURCES_COLUMN: &str = "sources";
const DATASET_FIELD: &str = "dataset";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseInfo {
    pub license: String,
    #[serde(default)]
    pub attribution: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LicenseStatus {
    Resolved(LicenseInfo),
    Unresolved,
}

/// License terms per theme and source dataset name, e.g.
/// `{"places": {"meta": {"license": "CDLA-Permissive-2.0"}}}`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct LicenseTable {
    themes: HashMap<String, HashMap<String, LicenseInfo>>,
}

impl LicenseTable {
    pub fn from_json(bytes: &[u8]) -> PipelineResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| PipelineError::LicenseTable(e.to_string()))
    }

    pub fn from_path(path: &Path) -> PipelineResult<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| PipelineError::LicenseTable(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&bytes)
    }

    pub fn get(&self, theme: Theme, dataset: &str) -> Option<&LicenseInfo> {
        self.themes.get(theme.as_str())?.get(dataset)
    }
}

/// Accumulates the distinct `sources[].dataset` names seen while streaming.
#[derive(Debug, Default, Clone)]
pub struct SourceCollector {
    datasets: HashSet<String>,
}

impl SourceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batches without a `sources` column contribute nothing.
    pub fn collect(&mut self, batch: &RecordBatch) -> PipelineResult<()> {
        let Some(sources) = batch.column_by_name(SOURCES_COLUMN) else {
            return Ok(());
        };

        match sources.data_type() {
            DataType::List(_) => self.collect_list(sources.as_list::<i32>()),
            DataType::LargeList(_) => self.collect_list(sources.as_list::<i64>()),
            other => Err(PipelineError::Sources(format!(
                "expected a list of structs, found {other}"
            ))),
        }
    }

    /// The `dataset` child is cast once for the whole batch, then each valid
    /// list row is walked through its offsets.
    fn collect_list<O: OffsetSizeTrait>(
        &mut self,
        list: &GenericListArray<O>,
    ) -> PipelineResult<()> {
        let entries = list.values().as_struct_opt().ok_or_else(|| {
            PipelineError::Sources(format!(
                "expected struct entries, found {}",
                list.values().data_type()
            ))
        })?;
        let Some(dataset) = entries.column_by_name(DATASET_FIELD) else {
            return Ok(());
        };
        let dataset =
            cast(dataset, &DataType::Utf8).map_err(|e| PipelineError::Sources(e.to_string()))?;
        let dataset = dataset.as_string::<i32>();

        let offsets = list.value_offsets();
        for row in (0..list.len()).filter(|row| list.is_valid(*row)) {
            let (start, end) = (offsets[row].as_usize(), offsets[row + 1].as_usize());
            for entry in start..end {
                if entries.is_null(entry) || dataset.is_null(entry) {
                    continue;
                }
                let name = dataset.value(entry);
                if !self.datasets.contains(name) {
                    self.datasets.insert(name.to_string());
                }
            }
        }
        Ok(())
    }

    pub fn datasets(&self) -> Vec<&str> {
        let mut datasets: Vec<&str> = self.datasets.iter().map(String::as_str).collect();
        datasets.sort_unstable();
        datasets
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    pub fn report(&self, theme: Theme, table: &LicenseTable) -> BTreeMap<String, LicenseStatus> {
        self.datasets
            .iter()
            .map(|name| {
                let status = match table.get(theme, name) {
                    Some(info) => LicenseStatus::Resolved(info.clone()),
                    None => {
                        tracing::warn!("No license known for {} source {}", theme, name);
                        LicenseStatus::Unresolved
                    }
                };
                (name.clone(), status)
            })
            .collect()
    }
}
