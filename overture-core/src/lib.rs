//! Extraction pipeline over the Overture Maps releases: resolve a release,
//! locate and stream the matching features, write them out.

pub mod error;
pub mod licenses;
pub mod logging;
pub mod pipeline;
pub mod session;

pub use error::{PipelineError, PipelineResult};
pub use licenses::{LicenseInfo, LicenseStatus, LicenseTable, SourceCollector};
pub use logging::init_tracing;
pub use pipeline::{copy, CopyStats, DownloadOptions, GersDownload};
pub use session::OvertureSession;

pub use overture_catalog::{FeatureType, Releases, Theme};
pub use overture_output::{create_writer, open_destination, FeatureWriter, OutputFormat};
pub use overture_sources::{BatchStream, BoundingBox};
