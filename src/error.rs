//! Error taxonomy shared by the pipeline and the library surface.

use std::path::PathBuf;

use thiserror::Error;

use crate::adapters::ToolError;
use crate::domain::ItemId;

/// Errors surfaced to callers of the library and the pipeline
#[derive(Debug, Error)]
pub enum Error {
    #[error("Item not found: {0}")]
    ItemNotFound(ItemId),

    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Image {index} out of range for item {id}")]
    ImageNotFound { id: ItemId, index: usize },

    #[error(transparent)]
    ExternalTool(ToolError),

    #[error("Summary failed: {0}")]
    Summary(#[source] ToolError),

    #[error("Failed to {action} {}: {source}", path.display())]
    Persistence {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {}: {source}", path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            action,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Serialization {
            path: path.into(),
            source,
        }
    }

    /// Whether the error means "the thing asked for does not exist"
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ItemNotFound(_) | Self::NotFound(_) | Self::ImageNotFound { .. }
        )
    }
}

impl From<ToolError> for Error {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::MissingInput(path) => Self::NotFound(path),
            other => Self::ExternalTool(other),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
