use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegdumpError {
    #[error("Invalid plugin option: {0}")]
    InvalidOption(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Socket pattern error: {0}")]
    Pattern(#[from] regex::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RegdumpError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RegdumpError::Io {
            path: path.into(),
            source,
        }
    }
}
