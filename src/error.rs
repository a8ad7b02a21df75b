//! Recoverable pipeline errors. None of these are fatal: each degrades to a
//! safe mode or a default parameter set.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Serializable error category reported through `PipelineEvent::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SensorUnavailable,
    PermissionDenied,
    StaleData,
    InvalidSample,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("sensor unavailable: {0}")]
    SensorUnavailable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("no sample for {seconds:.1}s, degrading speed estimate")]
    StaleData { seconds: f64 },

    #[error("invalid sample dropped: {0}")]
    InvalidSample(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::SensorUnavailable(_) => ErrorKind::SensorUnavailable,
            PipelineError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            PipelineError::StaleData { .. } => ErrorKind::StaleData,
            PipelineError::InvalidSample(_) => ErrorKind::InvalidSample,
        }
    }
}
