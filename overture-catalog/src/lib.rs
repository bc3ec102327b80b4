//! Everything needed to turn a query into dataset paths: releases, partition
//! layout, the spatial index and the GERS registry.

pub mod error;
pub mod index;
pub mod partition;
pub mod registry;
pub mod releases;

pub use error::{CatalogError, CatalogResult};
pub use index::{IndexLookup, SpatialIndex};
pub use partition::{locate, FeatureType, Theme};
pub use registry::{LookupOutcome, Registry, RegistryHit, RegistryManifest, RegistryRow};
pub use releases::{ReleaseCache, ReleaseResolver, Releases};
