//! Error types for kubelite

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Key already exists: {0}")]
    AlreadyExists(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    #[error("Container runtime error: {0}")]
    Runtime(String),

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task {id} already exists on {machine}")]
    TaskAlreadyExists { id: String, machine: String },

    #[error("Replication controller not found: {0}")]
    ControllerNotFound(String),

    #[error("No machine available for task {0}")]
    NoMachineAvailable(String),

    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this is a "key/entity does not exist" error.
    ///
    /// Absence is a normal state for most callers, so they branch on this
    /// instead of matching every variant.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::TaskNotFound(_) | Error::ControllerNotFound(_)
        )
    }

    /// Check if this is a create conflict
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists(_) | Error::TaskAlreadyExists { .. })
    }
}
