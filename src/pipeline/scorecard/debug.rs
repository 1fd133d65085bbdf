//! Optional diagnostic payload attached to a parse result on request.

use base64::Engine as _;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use super::preprocess::encode_png;
use super::types::{AppliedTransform, Cell, DetectedLayout, Mode, NormalizedImage};

/// Lowercase hex SHA-256 of the uploaded bytes.
pub fn image_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedSummary {
    pub width: u32,
    pub height: u32,
    pub ink_threshold: u8,
    pub transform: AppliedTransform,
    /// Normalized page as base64 PNG.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub png_base64: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugArtifact {
    pub image_digest: String,
    pub mode: Mode,
    /// Absent when normalization failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized: Option<NormalizedSummary>,
    /// Chosen template, rule positions and cell regions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<DetectedLayout>,
    /// Every cell with its state and top-K hypotheses.
    pub cells: Vec<Cell>,
    #[serde(skip)]
    png: Option<Vec<u8>>,
}

impl DebugArtifact {
    /// Raw PNG of the normalized page, for on-disk dumps.
    pub fn normalized_png(&self) -> Option<&[u8]> {
        self.png.as_deref()
    }
}

/// Collects stage outputs as the pipeline produces them.
pub struct DebugArtifactBuilder {
    image_digest: String,
    mode: Mode,
    normalized: Option<NormalizedSummary>,
    png: Option<Vec<u8>>,
    layout: Option<DetectedLayout>,
    cells: Vec<Cell>,
}

impl DebugArtifactBuilder {
    pub fn new(image_bytes: &[u8], mode: Mode) -> Self {
        Self {
            image_digest: image_digest(image_bytes),
            mode,
            normalized: None,
            png: None,
            layout: None,
            cells: Vec::new(),
        }
    }

    /// A PNG encoding failure drops the embedded image, not the artifact.
    pub fn normalized(&mut self, image: &NormalizedImage) -> &mut Self {
        let png = match encode_png(&image.image) {
            Ok(png) => Some(png),
            Err(e) => {
                warn!(error = %e, "Debug artifact: normalized image not embedded");
                None
            }
        };
        self.normalized = Some(NormalizedSummary {
            width: image.image.width(),
            height: image.image.height(),
            ink_threshold: image.ink_threshold,
            transform: image.transform.clone(),
            png_base64: png
                .as_ref()
                .map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes)),
        });
        self.png = png;
        self
    }

    pub fn layout(&mut self, layout: &DetectedLayout) -> &mut Self {
        self.layout = Some(layout.clone());
        self
    }

    pub fn cells(&mut self, cells: &[Cell]) -> &mut Self {
        self.cells = cells.to_vec();
        self
    }

    pub fn build(self) -> DebugArtifact {
        DebugArtifact {
            image_digest: self.image_digest,
            mode: self.mode,
            normalized: self.normalized,
            layout: self.layout,
            cells: self.cells,
            png: self.png,
        }
    }
}
