use futures::StreamExt;
use overture_catalog::{locate, FeatureType, IndexLookup, LookupOutcome, RegistryHit, RegistryRow};
use overture_output::FeatureWriter;
use overture_sources::{BatchStream, BoundingBox, DatasetSource, ReadPredicate};

use crate::{
    error::{PipelineError, PipelineResult},
    licenses::SourceCollector,
    session::OvertureSession,
};

#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// Defaults to the latest release.
    pub release: Option<String>,
    /// Narrow the scan through the release's spatial index when a bbox is given.
    pub use_index: bool,
}

impl DownloadOptions {
    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = Some(release.into());
        self
    }

    pub fn with_index(mut self, use_index: bool) -> Self {
        self.use_index = use_index;
        self
    }
}

#[derive(Debug)]
pub enum GersDownload {
    Found { hit: RegistryHit, stream: BatchStream },
    /// Known to the registry but not part of the requested release.
    AbsentFromRelease(RegistryRow),
    NotFound,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub batches: usize,
    pub rows: usize,
}

impl OvertureSession {
    async fn release_or_latest(&self, release: Option<&str>) -> String {
        match release {
            Some(release) => release.to_string(),
            None => self.latest_release().await,
        }
    }

    /// Stream the features of `feature_type` intersecting `bbox`, or the whole
    /// partition without one.
    ///
    /// Returns `None` when the spatial index proves that no file intersects
    /// the box. An unknown type fails before any I/O.
    pub async fn download(
        &self,
        feature_type: &str,
        bbox: Option<BoundingBox>,
        options: &DownloadOptions,
    ) -> PipelineResult<Option<BatchStream>> {
        let feature_type: FeatureType = feature_type.parse()?;
        let release = self.release_or_latest(options.release.as_deref()).await;

        let source = match bbox {
            Some(bbox) if options.use_index => {
                match self
                    .index
                    .locate_via_index(feature_type, bbox, &release)
                    .await
                {
                    IndexLookup::Files(files) => DatasetSource::Files(files),
                    IndexLookup::Empty => return Ok(None),
                    IndexLookup::Unavailable => self.partition(feature_type, &release),
                }
            }
            _ => self.partition(feature_type, &release),
        };

        tracing::info!(
            "Downloading {} from {} ({})",
            feature_type,
            release,
            source.describe()
        );
        let predicate = bbox.map(ReadPredicate::Intersects);
        let stream = self.reader.open(&source, predicate.as_ref()).await?;
        Ok(Some(stream))
    }

    fn partition(&self, feature_type: FeatureType, release: &str) -> DatasetSource {
        DatasetSource::Partition(locate(
            &self.stores().options().bucket,
            feature_type,
            release,
        ))
    }

    /// Stream the single feature with GERS id `id`.
    pub async fn download_by_id(
        &self,
        id: &str,
        release: Option<&str>,
    ) -> PipelineResult<GersDownload> {
        let release = self.release_or_latest(release).await;

        match self.registry.lookup(id, &release).await? {
            LookupOutcome::Found(hit) => {
                let stream = self
                    .reader
                    .open(&DatasetSource::Files(vec![hit.path.clone()]), Some(&hit.predicate()))
                    .await?;
                Ok(GersDownload::Found { hit, stream })
            }
            LookupOutcome::AbsentFromRelease(row) => Ok(GersDownload::AbsentFromRelease(row)),
            LookupOutcome::NotFound => Ok(GersDownload::NotFound),
        }
    }
}

/// Drain `stream` into `writer`, feeding `sources` along the way.
///
/// The writer is closed on every path. When the stream fails the partial
/// output is finalized and the stream error is returned.
pub async fn copy(
    mut stream: BatchStream,
    writer: &mut dyn FeatureWriter,
    mut sources: Option<&mut SourceCollector>,
) -> PipelineResult<CopyStats> {
    let mut stats = CopyStats::default();

    let result = async {
        while let Some(batch) = stream.next().await {
            let batch = batch?;
            if let Some(collector) = sources.as_deref_mut() {
                collector.collect(&batch)?;
            }
            writer.write(&batch)?;
            stats.batches += 1;
            stats.rows += batch.num_rows();
        }
        Ok::<(), PipelineError>(())
    }
    .await;

    if let Err(e) = result {
        if let Err(close_err) = writer.close() {
            tracing::warn!("Failed to close writer after error: {}", close_err);
        }
        return Err(e);
    }

    writer.close()?;
    tracing::info!(
        "Copied {} rows in {} batches from {} ({} empty batches skipped)",
        stats.rows,
        stats.batches,
        stream.location(),
        stream.skipped_empty_batches()
    );
    Ok(stats)
}
