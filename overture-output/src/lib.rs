use std::{
    fmt::Display,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    str::FromStr,
};

use arrow::{datatypes::SchemaRef, record_batch::RecordBatch};

pub mod error;
pub mod geo_parquet;
pub mod geo_json;

pub use error::{OutputError, OutputResult};
pub use geo_parquet::GeoParquetWriter;
pub use geo_json::{GeoJsonLayout, GeoJsonWriter};

/// Incremental feature sink. Batches are written as they arrive; `close`
/// finalizes the output exactly once and later calls are no-ops. Writers
/// also close themselves on drop, logging any failure.
pub trait FeatureWriter: Send {
    /// Empty batches are ignored.
    fn write(&mut self, batch: &RecordBatch) -> OutputResult<()>;
    fn close(&mut self) -> OutputResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    GeoJson,
    GeoJsonSeq,
    GeoParquet,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::GeoJson => "geojson",
            OutputFormat::GeoJsonSeq => "geojsonseq",
            OutputFormat::GeoParquet => "geoparquet",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = OutputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "geojson" => Ok(OutputFormat::GeoJson),
            "geojsonseq" => Ok(OutputFormat::GeoJsonSeq),
            "geoparquet" | "parquet" => Ok(OutputFormat::GeoParquet),
            _ => Err(OutputError::UnknownFormat(s.to_string())),
        }
    }
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Sink = Box<dyn Write + Send>;

/// Build the writer for `format`. Schema problems (e.g. several geometry
/// columns for GeoParquet) surface here, before any row is read.
pub fn create_writer(
    format: OutputFormat,
    sink: Sink,
    schema: &SchemaRef,
) -> OutputResult<Box<dyn FeatureWriter>> {
    tracing::debug!("Creating {} writer", format);
    Ok(match format {
        OutputFormat::GeoJson => Box::new(GeoJsonWriter::try_new(
            sink,
            schema,
            GeoJsonLayout::Collection,
        )?),
        OutputFormat::GeoJsonSeq => Box::new(GeoJsonWriter::try_new(
            sink,
            schema,
            GeoJsonLayout::Sequence,
        )?),
        OutputFormat::GeoParquet => Box::new(GeoParquetWriter::try_new(sink, schema)?),
    })
}

/// Buffered sink for `path`, or stdout when no path is given. Parent
/// directories must already exist.
pub fn open_destination(path: Option<&Path>) -> OutputResult<Sink> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(std::io::stdout())),
    })
}
