pub mod from_env;
pub mod source;

use thiserror::Error;

/// Error that would be returned while building a [`LayerConfig`](crate::LayerConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("value {0:?} for {1:?} is invalid.")]
    InvalidValue(String, &'static str),

    #[error("`{0}` is not a valid proxy address, expected `[label=][scheme://]host:port`")]
    InvalidProxy(String),

    #[error("unknown variant `{0}`, expected one of {1}")]
    UnknownVariant(String, &'static str),

    #[error("proxify-config: IO operation failed with `{0}`")]
    Io(#[from] std::io::Error),

    #[error("proxify-config: `{0}`!")]
    SerdeJson(#[from] serde_json::Error),
}

pub type Result<T, E = ConfigError> = std::result::Result<T, E>;
