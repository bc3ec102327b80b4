use std::sync::Arc;

use datafusion::{
    execution::{
        disk_manager::DiskManagerConfig,
        memory_pool::{FairSpillPool, MemoryPool},
        runtime_env::RuntimeEnvBuilder,
    },
    prelude::SessionContext,
};
use overture_catalog::{ReleaseCache, ReleaseResolver, Releases, Registry, SpatialIndex};
use overture_object_storage::{OvertureObjectStores, StorageOptions};
use overture_sources::{session_config, DatasetReader};

use crate::error::PipelineResult;

/// Query engine plus everything a download needs: the registered remote
/// stores, the release cache, the registry and the spatial index.
pub struct OvertureSession {
    memory_pool: Arc<FairSpillPool>,
    session_ctx: Arc<SessionContext>,
    stores: OvertureObjectStores,
    releases: Arc<ReleaseCache>,
    resolver: ReleaseResolver,
    pub(crate) reader: DatasetReader,
    pub(crate) registry: Registry,
    pub(crate) index: SpatialIndex,
}

impl OvertureSession {
    /// Session against the public bucket, configured from the environment.
    pub fn new() -> PipelineResult<Self> {
        let stores = OvertureObjectStores::remote(StorageOptions::from_config())?;
        Self::with_stores(
            stores,
            overture_config::CONFIG.memory_size,
            overture_config::CONFIG.batch_size,
        )
    }

    /// `memory_size` is in MB.
    pub fn with_stores(
        stores: OvertureObjectStores,
        memory_size: usize,
        batch_size: usize,
    ) -> PipelineResult<Self> {
        let memory_pool = Arc::new(FairSpillPool::new(memory_size * 1024 * 1024));
        let session_ctx = Self::init_ctx(memory_pool.clone(), batch_size, &stores)?;

        let reader = DatasetReader::new(session_ctx.clone());
        tracing::info!("Initialized session {} using {}", session_ctx.session_id(), stores);

        Ok(Self {
            memory_pool,
            session_ctx,
            resolver: ReleaseResolver::new(stores.clone()),
            registry: Registry::new(stores.clone(), reader.clone()),
            index: SpatialIndex::new(stores.clone(), reader.clone()),
            releases: Arc::new(ReleaseCache::new()),
            reader,
            stores,
        })
    }

    /// Share a release cache between sessions, or pre-seed one.
    pub fn with_release_cache(mut self, cache: Arc<ReleaseCache>) -> Self {
        self.releases = cache;
        self
    }

    fn init_ctx(
        memory_pool: Arc<FairSpillPool>,
        batch_size: usize,
        stores: &OvertureObjectStores,
    ) -> PipelineResult<Arc<SessionContext>> {
        let runtime_env = RuntimeEnvBuilder::new()
            .with_disk_manager(DiskManagerConfig::NewOs)
            .with_memory_pool(memory_pool)
            .build_arc()?;

        let session_context = SessionContext::new_with_config_rt(session_config(batch_size), runtime_env);

        session_context.register_object_store(&stores.options().bucket_url()?, stores.bucket());
        session_context.register_object_store(&stores.options().stac_base_url()?, stores.stac());

        Ok(Arc::new(session_context))
    }

    pub fn session_ctx(&self) -> Arc<SessionContext> {
        self.session_ctx.clone()
    }

    pub fn stores(&self) -> &OvertureObjectStores {
        &self.stores
    }

    pub fn reader(&self) -> &DatasetReader {
        &self.reader
    }

    /// Bytes currently reserved by running scans.
    pub fn memory_reserved(&self) -> usize {
        self.memory_pool.reserved()
    }

    /// All published releases, newest first. Resolved once per cache fill.
    pub async fn releases(&self) -> Releases {
        self.releases.get_or_resolve(&self.resolver).await
    }

    pub async fn latest_release(&self) -> String {
        self.releases().await.latest
    }

    /// Forget the cached releases; the next call fetches the catalog again.
    pub async fn invalidate_releases(&self) {
        self.releases.invalidate().await;
    }
}

impl std::fmt::Debug for OvertureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OvertureSession")
            .field("session_id", &self.session_ctx.session_id())
            .field("stores", &self.stores.to_string())
            .finish()
    }
}
