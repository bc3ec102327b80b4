use std::time::Duration;

use envconfig::Envconfig;
use lazy_static::lazy_static;

#[derive(Debug, Envconfig)]
pub struct Config {
    /// Public bucket holding the release partitions and the registry.
    #[envconfig(from = "OVERTURE_BUCKET", default = "overturemaps-us-west-2")]
    pub bucket: String,
    #[envconfig(from = "OVERTURE_REGION", default = "us-west-2")]
    pub region: String,
    /// Base URL of the STAC catalog (release list, spatial index, registry manifest).
    #[envconfig(from = "OVERTURE_STAC_URL", default = "https://stac.overturemaps.org")]
    pub stac_url: String,
    #[envconfig(from = "OVERTURE_LOG_LEVEL", default = "info")]
    pub log_level: String,
    //Memory size in MB
    #[envconfig(from = "OVERTURE_MEMORY_SIZE", default = "512")]
    pub memory_size: usize,
    #[envconfig(from = "OVERTURE_BATCH_SIZE", default = "8192")]
    pub batch_size: usize,
    #[envconfig(from = "OVERTURE_CONNECT_TIMEOUT_SECS")]
    pub connect_timeout_secs: Option<u64>,
    #[envconfig(from = "OVERTURE_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,
}

impl Config {
    pub fn init() -> Config {
        Config::init_from_env().expect("Failed to load config")
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

lazy_static! {
    pub static ref CONFIG: Config = Config::init();
}
