pub mod types;
pub mod glyphs;
pub mod grid;
pub mod preprocess;
pub mod templates;
pub mod layout;
pub mod recognize;
pub mod assemble;
pub mod confidence;
pub mod debug;
pub mod orchestrator;

#[cfg(test)]
pub(crate) mod test_support;

pub use types::*;
pub use glyphs::{BitmapFontModel, GlyphModel};
pub use templates::{ScorecardTemplate, TemplateCatalog};
pub use debug::DebugArtifact;
pub use orchestrator::*;

use thiserror::Error;

use crate::pipeline_config::ConfigError;

#[derive(Error, Debug)]
pub enum ScorecardError {
    #[error("Image could not be decoded: {0}")]
    ImageDecode(String),

    #[error("Image too degraded to read: {0}")]
    ImageTooDegraded(String),

    #[error("No ruled grid found ({rows} rows, {columns} columns)")]
    LayoutNotFound { rows: usize, columns: usize },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal pipeline error: {0}")]
    Internal(String),
}

/// Who is at fault for a failed parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The uploaded bytes cannot be turned into a scorecard image.
    BadInput,
    Internal,
}

impl ScorecardError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScorecardError::ImageDecode(_)
            | ScorecardError::ImageTooDegraded(_)
            | ScorecardError::LayoutNotFound { .. } => ErrorKind::BadInput,
            ScorecardError::Config(_) | ScorecardError::Internal(_) => ErrorKind::Internal,
        }
    }
}
