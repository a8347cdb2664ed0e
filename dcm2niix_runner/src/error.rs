use std::path::PathBuf;
use thiserror::Error;

use crate::runtime::Backend;

/// Result type for dcm2niix_runner operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for option handling, container execution and registry lookups
#[derive(Error, Debug)]
pub enum Error {
    /// The input kind is not accepted by the option
    #[error("{name} setting should be one of '{allowed}', you passed an argument with type '{found}'")]
    InvalidType {
        name: &'static str,
        allowed: String,
        found: &'static str,
    },

    /// The (converted) value is not a valid wire value for the option
    #[error("{name} setting should be one of '{allowed}', you passed '{found}'")]
    InvalidValue {
        name: &'static str,
        allowed: String,
        found: String,
    },

    /// No option is registered under this config key
    #[error("Unknown option '{0}'")]
    UnknownOption(String),

    #[error("Container backend should be either 'docker' or 'singularity'. You passed {0}")]
    UnsupportedBackend(String),

    #[error("You have attempted to run with '{0}' container backend, but {0} is not installed")]
    BackendNotInstalled(Backend),

    #[error("Downloading the container requires the 'singularity' backend, but '{0}' is selected")]
    DownloadRequiresSingularity(Backend),

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The container run or pull failed
    #[error("Container execution failed: {0}")]
    Execution(String),

    #[error("Registry request failed: {0}")]
    Registry(#[from] reqwest::Error),

    #[error("Registry returned unexpected status {status} for {url}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
