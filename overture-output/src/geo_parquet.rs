use std::{io::Write, sync::Arc};

use arrow::{
    datatypes::{DataType, Schema, SchemaRef},
    record_batch::RecordBatch,
};
use parquet::{
    arrow::ArrowWriter,
    basic::{Compression, ZstdLevel},
    file::properties::WriterProperties,
    format::KeyValue,
};
use serde_json::{json, Map, Value};

use crate::{
    error::{OutputError, OutputResult},
    geo_json::{BBOX_COLUMN, GEOMETRY_COLUMN},
    FeatureWriter,
};

pub const GEO_METADATA_KEY: &str = "geo";
const COVERING_VERSION: (u64, u64, u64) = (1, 1, 0);
const BBOX_FIELDS: [&str; 4] = ["xmin", "ymin", "xmax", "ymax"];

/// Rewrite the `geo` block of `schema` for a new file.
///
/// Column extents describe the source files and are dropped. When the data
/// carries a `bbox` struct column it is advertised as the bbox covering,
/// which needs GeoParquet 1.1. Returns `None` for schemas without geometry.
pub fn rewrite_geo_metadata(schema: &Schema) -> OutputResult<Option<String>> {
    let mut geo: Map<String, Value> = match schema.metadata().get(GEO_METADATA_KEY) {
        Some(raw) => serde_json::from_str(raw)?,
        None if schema.field_with_name(GEOMETRY_COLUMN).is_ok() => default_geo_metadata(),
        None => return Ok(None),
    };

    let primary = geo
        .get("primary_column")
        .and_then(Value::as_str)
        .map(str::to_string);

    let columns = geo
        .get_mut("columns")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| OutputError::UnsupportedSchema("geo metadata lists no columns".into()))?;
    if columns.len() > 1 {
        return Err(OutputError::UnsupportedSchema(format!(
            "{} geometry columns, only one is supported",
            columns.len()
        )));
    }

    for column in columns.values_mut() {
        if let Some(column) = column.as_object_mut() {
            column.remove("bbox");
        }
    }

    let primary = primary.or_else(|| columns.keys().next().cloned());
    let covering = has_bbox_struct(schema);
    if covering {
        if let Some(column) = primary
            .as_ref()
            .and_then(|name| columns.get_mut(name))
            .and_then(Value::as_object_mut)
        {
            column.insert("covering".to_string(), bbox_covering());
        }
    }

    if covering && version_below(geo.get("version"), COVERING_VERSION) {
        let (major, minor, patch) = COVERING_VERSION;
        geo.insert(
            "version".to_string(),
            Value::String(format!("{major}.{minor}.{patch}")),
        );
    }

    Ok(Some(serde_json::to_string(&geo)?))
}

fn default_geo_metadata() -> Map<String, Value> {
    let geo = json!({
        "version": "1.0.0",
        "primary_column": GEOMETRY_COLUMN,
        "columns": {
            GEOMETRY_COLUMN: {
                "encoding": "WKB",
                "geometry_types": []
            }
        }
    });
    match geo {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn bbox_covering() -> Value {
    let mut bbox = Map::new();
    for field in BBOX_FIELDS {
        bbox.insert(field.to_string(), json!([BBOX_COLUMN, field]));
    }
    json!({ "bbox": bbox })
}

fn has_bbox_struct(schema: &Schema) -> bool {
    match schema.field_with_name(BBOX_COLUMN).map(|f| f.data_type()) {
        Ok(DataType::Struct(fields)) => BBOX_FIELDS
            .iter()
            .all(|name| fields.iter().any(|field| field.name() == name)),
        _ => false,
    }
}

/// Missing or unparsable versions count as old.
fn version_below(version: Option<&Value>, minimum: (u64, u64, u64)) -> bool {
    let Some(version) = version.and_then(Value::as_str) else {
        return true;
    };
    let core = version.split(['-', '+']).next().unwrap_or_default();
    let mut parts = core.split('.').map(|part| part.parse::<u64>());
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(major)), Some(Ok(minor)), patch) => {
            let patch = match patch {
                Some(Ok(patch)) => patch,
                None => 0,
                Some(Err(_)) => return true,
            };
            (major, minor, patch) < minimum
        }
        _ => true,
    }
}

/// Writes batches as a ZSTD compressed GeoParquet file.
pub struct GeoParquetWriter<W: Write + Send> {
    writer: Option<ArrowWriter<W>>,
    schema: SchemaRef,
    rows_written: usize,
}

impl<W: Write + Send> GeoParquetWriter<W> {
    /// Fails with [`OutputError::UnsupportedSchema`] before anything is
    /// written when the input has more than one geometry column.
    pub fn try_new(sink: W, schema: &SchemaRef) -> OutputResult<Self> {
        let geo = rewrite_geo_metadata(schema)?;

        let mut metadata = schema.metadata().clone();
        let mut properties = WriterProperties::builder()
            .set_compression(Compression::ZSTD(ZstdLevel::default()));
        match geo {
            Some(geo) => {
                metadata.insert(GEO_METADATA_KEY.to_string(), geo.clone());
                properties = properties.set_key_value_metadata(Some(vec![KeyValue::new(
                    GEO_METADATA_KEY.to_string(),
                    geo,
                )]));
            }
            None => {
                metadata.remove(GEO_METADATA_KEY);
            }
        }
        let schema = Arc::new(Schema::new_with_metadata(schema.fields().clone(), metadata));

        let writer = ArrowWriter::try_new(sink, schema.clone(), Some(properties.build()))?;
        Ok(Self {
            writer: Some(writer),
            schema,
            rows_written: 0,
        })
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }
}

impl<W: Write + Send> FeatureWriter for GeoParquetWriter<W> {
    fn write(&mut self, batch: &RecordBatch) -> OutputResult<()> {
        if batch.num_rows() == 0 {
            return Ok(());
        }
        let writer = self.writer.as_mut().ok_or(OutputError::Closed)?;
        let batch = RecordBatch::try_new(self.schema.clone(), batch.columns().to_vec())?;
        writer.write(&batch)?;
        self.rows_written += batch.num_rows();
        Ok(())
    }

    fn close(&mut self) -> OutputResult<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let mut sink = writer.into_inner()?;
        sink.flush()?;
        tracing::debug!("Wrote {} rows of GeoParquet", self.rows_written);
        Ok(())
    }
}

impl<W: Write + Send> Drop for GeoParquetWriter<W> {
    fn drop(&mut self) {
        if self.writer.is_some() {
            if let Err(e) = self.close() {
                tracing::warn!("Failed to finalize GeoParquet output: {}", e);
            }
        }
    }
}
