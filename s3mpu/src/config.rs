//! Configuration management

use s3mpu_uploads::UploadConfig;
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub backend: Backend,

    #[serde(default)]
    pub uploads: UploadConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// Storage provider behind the upload manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// AWS S3 or an S3-compatible endpoint
    #[default]
    S3,
    /// In-memory bucket, for local development
    Ephemeral,
}

/// Bucket used by the in-memory backend when none is configured
pub const EPHEMERAL_BUCKET: &str = "s3mpu-local";

fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Reads `path` when given, otherwise an optional `s3mpu.*` file in the
    /// working directory. `S3MPU_*` variables override file values, with `__`
    /// between nested keys (`S3MPU_UPLOADS__BUCKET`).
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path),
            None => config::File::with_name("s3mpu").required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("S3MPU")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("uploads.allowed_extensions"),
            )
            .build()?;

        Ok(config.try_deserialize::<Config>()?)
    }
}
