use thiserror::Error;

use crate::api::ApiError;

#[derive(Debug, Error)]
pub enum CarscanError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Lookup API error: {0}")]
    Api(#[from] ApiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
