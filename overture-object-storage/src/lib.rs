use std::{fmt::Display, sync::Arc, time::Duration};

use bytes::Bytes;
use object_store::{
    aws::AmazonS3Builder, http::HttpBuilder, path::Path, ClientOptions, ObjectStore,
};
use url::Url;

pub mod error;

pub use error::StorageError;

pub type StorageResult<T> = Result<T, StorageError>;

const S3_SCHEME: &str = "s3://";

/// Where the remote data lives and how patient we are with it.
#[derive(Debug, Clone)]
pub struct StorageOptions {
    pub bucket: String,
    pub region: String,
    pub stac_url: String,
    pub connect_timeout: Option<Duration>,
    pub request_timeout: Option<Duration>,
}

impl StorageOptions {
    pub fn from_config() -> Self {
        let config = &overture_config::CONFIG;
        Self {
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            stac_url: config.stac_url.clone(),
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
        }
    }

    pub fn with_timeouts(
        mut self,
        connect_timeout: Option<Duration>,
        request_timeout: Option<Duration>,
    ) -> Self {
        self.connect_timeout = connect_timeout;
        self.request_timeout = request_timeout;
        self
    }

    /// `s3://<bucket>`, the URL the bucket store is registered under.
    pub fn bucket_url(&self) -> StorageResult<Url> {
        parse_url(&format!("{S3_SCHEME}{}", self.bucket))
    }

    pub fn stac_base_url(&self) -> StorageResult<Url> {
        parse_url(self.stac_url.trim_end_matches('/'))
    }

    fn client_options(&self) -> ClientOptions {
        let mut options = ClientOptions::new();
        if let Some(timeout) = self.connect_timeout {
            options = options.with_connect_timeout(timeout);
        }
        if let Some(timeout) = self.request_timeout {
            options = options.with_timeout(timeout);
        }
        options
    }
}

/// The two remote stores every query touches: the public data bucket
/// (anonymous S3) and the STAC catalog host (plain HTTPS).
#[derive(Debug, Clone)]
pub struct OvertureObjectStores {
    options: StorageOptions,
    bucket: Arc<dyn ObjectStore>,
    stac: Arc<dyn ObjectStore>,
}

impl OvertureObjectStores {
    pub fn remote(options: StorageOptions) -> StorageResult<Self> {
        tracing::debug!(
            "Using anonymous S3 store for bucket {} in {}",
            options.bucket,
            options.region
        );
        let bucket = AmazonS3Builder::new()
            .with_bucket_name(&options.bucket)
            .with_region(&options.region)
            .with_skip_signature(true)
            .with_client_options(options.client_options())
            .build()
            .map_err(|source| StorageError::InitializationError {
                target: options.bucket.clone(),
                source,
            })?;

        let stac = HttpBuilder::new()
            .with_url(options.stac_url.clone())
            .with_client_options(options.client_options())
            .build()
            .map_err(|source| StorageError::InitializationError {
                target: options.stac_url.clone(),
                source,
            })?;

        Ok(Self {
            options,
            bucket: Arc::new(bucket),
            stac: Arc::new(stac),
        })
    }

    /// Use caller supplied stores, e.g. in-memory stores in tests.
    pub fn with_stores(
        options: StorageOptions,
        bucket: Arc<dyn ObjectStore>,
        stac: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            options,
            bucket,
            stac,
        }
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    pub fn bucket(&self) -> Arc<dyn ObjectStore> {
        self.bucket.clone()
    }

    pub fn stac(&self) -> Arc<dyn ObjectStore> {
        self.stac.clone()
    }

    /// Fetch a small document (catalog, manifest) from the STAC host.
    pub async fn get_stac_document(&self, relative: &str) -> StorageResult<Bytes> {
        let location = Path::from(relative);
        let bytes = self.stac.get(&location).await?.bytes().await?;
        Ok(bytes)
    }

    /// Full URL of a document on the STAC host, e.g. the spatial index.
    pub fn stac_document_url(&self, relative: &str) -> StorageResult<String> {
        let base = self.options.stac_base_url()?;
        Ok(format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            relative.trim_start_matches('/')
        ))
    }
}

impl Display for OvertureObjectStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "OvertureObjectStores(bucket: {}, stac: {})",
            self.options.bucket, self.options.stac_url
        )
    }
}

/// Turns a `bucket/key` dataset path into a URL the query engine can resolve.
/// Paths that already carry a scheme are returned untouched.
pub fn dataset_url(path: &str) -> String {
    if path.contains("://") {
        path.to_string()
    } else {
        format!("{S3_SCHEME}{}", path.trim_start_matches('/'))
    }
}

/// Inverse of [`dataset_url`] for `s3://` hrefs published by the catalog.
pub fn strip_s3_scheme(href: &str) -> &str {
    href.strip_prefix(S3_SCHEME).unwrap_or(href)
}

fn parse_url(url: &str) -> StorageResult<Url> {
    Url::parse(url).map_err(|source| StorageError::InvalidUrl {
        url: url.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use object_store::memory::InMemory;

    use super::*;

    fn options() -> StorageOptions {
        StorageOptions {
            bucket: "overturemaps-us-west-2".to_string(),
            region: "us-west-2".to_string(),
            stac_url: "https://stac.overturemaps.org/".to_string(),
            connect_timeout: None,
            request_timeout: None,
        }
    }

    #[test]
    fn dataset_url_prefixes_bucket_paths() {
        assert_eq!(
            dataset_url("overturemaps-us-west-2/release/2025-10-22.0/theme=base/type=land/"),
            "s3://overturemaps-us-west-2/release/2025-10-22.0/theme=base/type=land/"
        );
        assert_eq!(dataset_url("memory:///a/b.parquet"), "memory:///a/b.parquet");
    }

    #[test]
    fn strip_s3_scheme_only_touches_s3() {
        assert_eq!(strip_s3_scheme("s3://bucket/key.parquet"), "bucket/key.parquet");
        assert_eq!(strip_s3_scheme("bucket/key.parquet"), "bucket/key.parquet");
    }

    #[test]
    fn urls_are_derived_from_options() {
        let options = options();
        assert_eq!(
            options.bucket_url().unwrap().as_str(),
            "s3://overturemaps-us-west-2"
        );
        let stores = OvertureObjectStores::with_stores(
            options,
            Arc::new(InMemory::new()),
            Arc::new(InMemory::new()),
        );
        assert_eq!(
            stores
                .stac_document_url("/2025-10-22.0/collections.parquet")
                .unwrap(),
            "https://stac.overturemaps.org/2025-10-22.0/collections.parquet"
        );
    }

    #[test]
    fn remote_stores_build_without_credentials() {
        let options = options().with_timeouts(
            Some(Duration::from_secs(5)),
            Some(Duration::from_secs(30)),
        );
        let stores = OvertureObjectStores::remote(options).unwrap();
        assert_eq!(stores.options().connect_timeout, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn get_stac_document_reads_from_store() {
        let stac = Arc::new(InMemory::new());
        stac.put(&Path::from("catalog.json"), Bytes::from_static(b"{}").into())
            .await
            .unwrap();
        let stores =
            OvertureObjectStores::with_stores(options(), Arc::new(InMemory::new()), stac);

        let bytes = stores.get_stac_document("catalog.json").await.unwrap();
        assert_eq!(bytes.as_ref(), b"{}");
        assert!(stores.get_stac_document("missing.json").await.is_err());
    }
}
