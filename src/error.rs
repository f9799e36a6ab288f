use thiserror::Error;

use crate::cluster::kmeans::InitPolicy;

#[derive(Error, Debug)]
pub enum VqError {
    // Clustering errors
    #[error("insufficient data: requested {requested} clusters from {available} points")]
    InsufficientData { requested: usize, available: usize },

    #[error("initialization policy {0:?} is not supported")]
    UnsupportedInit(InitPolicy),

    #[error("AGORAS did not converge after {attempts} attempts (sample size {sample_size}, last diff {last_diff})")]
    NonConverged {
        attempts: usize,
        sample_size: usize,
        last_diff: i64,
    },

    // Artifact errors
    #[error("corrupt artifact: {0}")]
    CorruptArtifact(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u64, actual: u64 },

    // Validation errors
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("validation error: {0}")]
    Validation(String),

    // Config errors
    #[error("config error: {0}")]
    Config(String),

    // Serialization errors
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VqError>;

impl VqError {
    /// Process exit code used by the command-line front end.
    pub fn exit_code(&self) -> i32 {
        match self {
            VqError::Config(_) | VqError::Validation(_) | VqError::UnsupportedInit(_) => 2,

            VqError::CorruptArtifact(_) | VqError::ChecksumMismatch { .. } => 3,

            VqError::InsufficientData { .. }
            | VqError::NonConverged { .. }
            | VqError::DimensionMismatch { .. } => 4,

            _ => 1,
        }
    }
}
