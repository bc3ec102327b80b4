use std::io::Write;

use arrow::{
    array::{Array, AsArray},
    compute::cast,
    datatypes::{DataType, SchemaRef},
    json::{writer::JsonArray, WriterBuilder},
    record_batch::RecordBatch,
};
use geojson::{Feature, JsonObject};
use geozero::{wkb::Wkb, ToGeo};
use serde_json::Value;

use crate::{
    error::{OutputError, OutputResult},
    FeatureWriter,
};

pub const GEOMETRY_COLUMN: &str = "geometry";
pub const BBOX_COLUMN: &str = "bbox";

const COLLECTION_HEADER: &[u8] = b"{\"type\": \"FeatureCollection\", \"features\": [\n";
const COLLECTION_SEPARATOR: &[u8] = b",\n";
const COLLECTION_FOOTER: &[u8] = b"]}";

/// Turns record batches into GeoJSON features. `geometry` is decoded from
/// WKB, every other column except `bbox` becomes a property. Null
/// attributes are left out.
#[derive(Debug, Clone)]
pub struct FeatureConverter {
    geometry_index: Option<usize>,
    property_indices: Vec<usize>,
}

impl FeatureConverter {
    pub fn new(schema: &SchemaRef) -> Self {
        let geometry_index = schema.index_of(GEOMETRY_COLUMN).ok();
        let property_indices = schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, field)| field.name() != GEOMETRY_COLUMN && field.name() != BBOX_COLUMN)
            .map(|(index, _)| index)
            .collect();
        Self {
            geometry_index,
            property_indices,
        }
    }

    pub fn features(&self, batch: &RecordBatch) -> OutputResult<Vec<Feature>> {
        let properties = self.properties(batch)?;
        let geometries = self.geometries(batch)?;

        Ok(properties
            .into_iter()
            .zip(geometries)
            .map(|(properties, geometry)| Feature {
                bbox: None,
                geometry,
                id: None,
                properties: Some(properties),
                foreign_members: None,
            })
            .collect())
    }

    fn properties(&self, batch: &RecordBatch) -> OutputResult<Vec<JsonObject>> {
        if self.property_indices.is_empty() {
            return Ok(vec![JsonObject::new(); batch.num_rows()]);
        }
        let projected = batch.project(&self.property_indices)?;

        let mut writer = WriterBuilder::new()
            .with_explicit_nulls(true)
            .build::<_, JsonArray>(Vec::new());
        writer.write(&projected)?;
        writer.finish()?;
        let buffer = writer.into_inner();

        let mut rows: Vec<JsonObject> = serde_json::from_slice(&buffer)?;
        for row in rows.iter_mut() {
            row.retain(|_, value| !value.is_null());
        }
        Ok(rows)
    }

    fn geometries(&self, batch: &RecordBatch) -> OutputResult<Vec<Option<geojson::Geometry>>> {
        let Some(index) = self.geometry_index else {
            return Ok(vec![None; batch.num_rows()]);
        };
        let column = batch.column(index);
        let column = match column.data_type() {
            DataType::Binary => column.clone(),
            _ => cast(column, &DataType::Binary)?,
        };
        let wkb = column.as_binary::<i32>();

        (0..wkb.len())
            .map(|row| {
                if wkb.is_null(row) {
                    return Ok(None);
                }
                let geometry = Wkb(wkb.value(row).to_vec())
                    .to_geo()
                    .map_err(|e| OutputError::Geometry {
                        row,
                        reason: e.to_string(),
                    })?;
                Ok(Some(geojson::Geometry::new(geojson::Value::from(&geometry))))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoJsonLayout {
    /// A single `FeatureCollection` document.
    Collection,
    /// One compact feature per line.
    Sequence,
}

/// Streams features into `sink` without holding more than one batch.
pub struct GeoJsonWriter<W: Write + Send> {
    sink: Option<W>,
    layout: GeoJsonLayout,
    converter: FeatureConverter,
    features_written: usize,
}

impl<W: Write + Send> GeoJsonWriter<W> {
    /// For [`GeoJsonLayout::Collection`] the document header is written right
    /// away, so a writer closed without any batch still yields a valid empty
    /// collection.
    pub fn try_new(mut sink: W, schema: &SchemaRef, layout: GeoJsonLayout) -> OutputResult<Self> {
        if layout == GeoJsonLayout::Collection {
            sink.write_all(COLLECTION_HEADER)?;
        }
        Ok(Self {
            sink: Some(sink),
            layout,
            converter: FeatureConverter::new(schema),
            features_written: 0,
        })
    }

    pub fn features_written(&self) -> usize {
        self.features_written
    }

    fn write_feature(
        sink: &mut W,
        layout: GeoJsonLayout,
        first: bool,
        feature: &Feature,
    ) -> OutputResult<()> {
        match layout {
            GeoJsonLayout::Collection => {
                if !first {
                    sink.write_all(COLLECTION_SEPARATOR)?;
                }
                serde_json::to_writer(&mut *sink, feature)?;
            }
            GeoJsonLayout::Sequence => {
                serde_json::to_writer(&mut *sink, feature)?;
                sink.write_all(b"\n")?;
            }
        }
        Ok(())
    }
}

impl<W: Write + Send> FeatureWriter for GeoJsonWriter<W> {
    fn write(&mut self, batch: &RecordBatch) -> OutputResult<()> {
        if batch.num_rows() == 0 {
            return Ok(());
        }
        let sink = self.sink.as_mut().ok_or(OutputError::Closed)?;
        for feature in self.converter.features(batch)? {
            Self::write_feature(sink, self.layout, self.features_written == 0, &feature)?;
            self.features_written += 1;
        }
        Ok(())
    }

    fn close(&mut self) -> OutputResult<()> {
        let Some(mut sink) = self.sink.take() else {
            return Ok(());
        };
        if self.layout == GeoJsonLayout::Collection {
            sink.write_all(COLLECTION_FOOTER)?;
        }
        sink.flush()?;
        tracing::debug!("Wrote {} GeoJSON features", self.features_written);
        Ok(())
    }
}

impl<W: Write + Send> Drop for GeoJsonWriter<W> {
    fn drop(&mut self) {
        if self.sink.is_some() {
            if let Err(e) = self.close() {
                tracing::warn!("Failed to finalize GeoJSON output: {}", e);
            }
        }
    }
}
