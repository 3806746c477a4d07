use crate::registry::Namespace;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unknown {namespace} '{name}'")]
    UnknownPoint { namespace: Namespace, name: String },
    #[error("device transport error: {0}")]
    Transport(String),
    #[error("device returned no data for {0}")]
    NoData(String),
    #[error("device authentication failed: {0}")]
    Auth(String),
    #[error("{name} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("MQTT error: {0}")]
    Mqtt(String),
    #[error("DB error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("Config error: {0}")]
    Config(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// True when the device session should be dropped and re-opened.
    pub fn is_device_failure(&self) -> bool {
        matches!(
            self,
            AppError::Transport(_) | AppError::NoData(_) | AppError::Auth(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
