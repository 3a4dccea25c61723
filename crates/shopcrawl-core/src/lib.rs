mod config;
mod crawl_config;
mod jobs;

pub use config::{load_crawl_config, load_crawl_config_from_env};
pub use crawl_config::{CrawlConfig, DEFAULT_USER_AGENT};
pub use jobs::{load_brand_jobs, BrandJob, JobsFile};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read jobs file {path}: {source}")]
    JobsFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse jobs file: {0}")]
    JobsFileParse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),
}
