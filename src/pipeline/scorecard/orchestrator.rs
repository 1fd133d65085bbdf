use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use tracing::{debug, info, warn};

use super::assemble::SemanticAssembler;
use super::confidence::evaluate;
use super::debug::DebugArtifactBuilder;
use super::glyphs::{BitmapFontModel, GlyphModel};
use super::layout::LayoutDetector;
use super::preprocess::ImageNormalizer;
use super::recognize::CellRecognizer;
use super::templates::TemplateCatalog;
use super::types::{CellState, Flag, Mode, NormalizedImage, ParseResult, ScorecardRecord};
use super::ScorecardError;
use crate::pipeline::diagnostic;
use crate::pipeline_config::PipelineConfig;

/// Read-only data shared by every invocation.
pub struct ReferenceData {
    pub catalog: TemplateCatalog,
    pub model: Box<dyn GlyphModel>,
}

impl ReferenceData {
    pub fn new(catalog: TemplateCatalog, model: Box<dyn GlyphModel>) -> Self {
        Self { catalog, model }
    }

    /// Built-in templates and the bitmap font model.
    pub fn builtin() -> Self {
        Self::new(TemplateCatalog::builtin(), Box::new(BitmapFontModel::new()))
    }
}

static BUILTIN_REFERENCE: LazyLock<Arc<ReferenceData>> =
    LazyLock::new(|| Arc::new(ReferenceData::builtin()));

/// Parse with the built-in reference data and default configuration.
pub fn parse_scorecard_image(
    image_bytes: &[u8],
    debug: bool,
    mode: &str,
) -> Result<ParseResult, ScorecardError> {
    ScorecardParser::with_defaults().parse(image_bytes, debug, mode)
}

/// Runs the scorecard stages for one image at a time. Cheap to share across
/// threads; every call is independent.
pub struct ScorecardParser {
    reference: Arc<ReferenceData>,
    config: PipelineConfig,
    normalizer: ImageNormalizer,
}

impl ScorecardParser {
    pub fn new(reference: Arc<ReferenceData>, config: PipelineConfig) -> Result<Self, ScorecardError> {
        config.validate()?;
        Ok(Self {
            normalizer: ImageNormalizer::new(&config),
            reference,
            config,
        })
    }

    pub fn with_defaults() -> Self {
        let config = PipelineConfig::default();
        Self {
            normalizer: ImageNormalizer::new(&config),
            reference: Arc::clone(&BUILTIN_REFERENCE),
            config,
        }
    }

    /// Parse one scorecard photo.
    ///
    /// Fails only when the bytes cannot be turned into a usable image. A
    /// missing grid, an unrecognized `mode` or an expired deadline still
    /// yield a result, with the matching flag.
    pub fn parse(&self, image_bytes: &[u8], debug: bool, mode: &str) -> Result<ParseResult, ScorecardError> {
        let started = Instant::now();
        let debug_requested = debug;

        match self.run(image_bytes, debug, mode, started) {
            Ok(result) => {
                let flags: Vec<&str> = result.flags.iter().map(|f| f.as_str()).collect();
                info!(
                    bytes = image_bytes.len(),
                    mode,
                    debug = debug_requested,
                    confidence = result.confidence,
                    flags = %flags.join(","),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Scorecard parsed"
                );
                Ok(result)
            }
            Err(e) => {
                warn!(
                    bytes = image_bytes.len(),
                    mode,
                    kind = ?e.kind(),
                    error = %e,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Scorecard parse failed"
                );
                Err(e)
            }
        }
    }

    fn run(&self, image_bytes: &[u8], debug: bool, requested: &str, started: Instant) -> Result<ParseResult, ScorecardError> {
        let deadline = self.config.timeout().map(|t| started + t);
        let expired = || deadline.is_some_and(|d| Instant::now() >= d);

        let mut flags = BTreeSet::new();
        let mode = Mode::from_request(requested).unwrap_or_else(|| {
            warn!(mode = requested, "Unrecognized mode, applying generic rules");
            flags.insert(Flag::ModeUnrecognized);
            Mode::Generic
        });

        let mut artifact = debug.then(|| DebugArtifactBuilder::new(image_bytes, mode));

        // Step 1: normalize
        let image = self.normalizer.normalize(image_bytes)?;
        if let Some(a) = artifact.as_mut() {
            a.normalized(&image);
        }
        if expired() {
            return Ok(self.abandon(Flag::Timeout, flags, artifact, "normalization"));
        }

        // Step 2: layout
        let detector = LayoutDetector::new(&self.reference.catalog, &self.config.layout);
        let layout = match detector.detect(&image, mode) {
            Ok(layout) => layout,
            Err(ScorecardError::LayoutNotFound { rows, columns }) => {
                warn!(rows, columns, "No scorecard grid detected");
                return Ok(self.abandon(Flag::LayoutUndetected, flags, artifact, "layout"));
            }
            Err(e) => return Err(e),
        };
        debug!(
            template = ?layout.template,
            rows = layout.rows(),
            columns = layout.columns(),
            "Layout detected"
        );
        if let Some(a) = artifact.as_mut() {
            a.layout(&layout);
        }
        if expired() {
            return Ok(self.abandon(Flag::Timeout, flags, artifact, "layout"));
        }

        // Step 3: cells
        let recognizer = CellRecognizer::new(
            self.reference.model.as_ref(),
            &self.config.recognizer,
            &self.config.rules,
        );
        let cells = recognizer.recognize(&image, &layout.cells, deadline);
        let skipped = cells.iter().filter(|c| c.state == CellState::Skipped).count();
        if skipped > 0 {
            warn!(skipped, total = cells.len(), "Deadline reached during cell recognition");
            flags.insert(Flag::Timeout);
        }
        if let Some(a) = artifact.as_mut() {
            a.cells(&cells);
        }

        // Step 4: assemble and score
        let assembly = SemanticAssembler::new(&self.config.rules, &self.config.assembler)
            .assemble(&cells, &layout, mode);
        let evaluation = evaluate(&assembly, flags, &self.config.evaluator);

        let result = ParseResult {
            record: assembly.record,
            confidence: evaluation.confidence,
            flags: evaluation.flags,
            debug: artifact.map(DebugArtifactBuilder::build),
        };
        self.dump(&result, &image);
        Ok(result)
    }

    /// Empty zero-confidence result for a pipeline that stopped early.
    fn abandon(
        &self,
        flag: Flag,
        mut flags: BTreeSet<Flag>,
        artifact: Option<DebugArtifactBuilder>,
        stage: &str,
    ) -> ParseResult {
        debug!(flag = flag.as_str(), stage, "Returning empty record");
        flags.insert(flag);
        let result = ParseResult {
            record: ScorecardRecord::empty(),
            confidence: 0.0,
            flags,
            debug: artifact.map(DebugArtifactBuilder::build),
        };
        if let Some(artifact) = &result.debug {
            if let Some(dir) = self.dump_dir(&artifact.image_digest) {
                if let Some(png) = artifact.normalized_png() {
                    diagnostic::dump_binary(&dir, "01-normalized.png", png);
                }
                diagnostic::dump_json(&dir, "02-result.json", &result);
            }
        }
        result
    }

    fn dump(&self, result: &ParseResult, image: &NormalizedImage) {
        let Some(artifact) = &result.debug else {
            return;
        };
        let Some(dir) = self.dump_dir(&artifact.image_digest) else {
            return;
        };
        match artifact.normalized_png() {
            Some(png) => diagnostic::dump_binary(&dir, "01-normalized.png", png),
            None => debug!(
                width = image.image.width(),
                height = image.image.height(),
                "Diagnostic dump: no normalized PNG to write"
            ),
        }
        diagnostic::dump_json(&dir, "02-result.json", result);
    }

    fn dump_dir(&self, digest: &str) -> Option<std::path::PathBuf> {
        let base = self.config.dump_dir.as_deref()?;
        diagnostic::dump_dir_for(base, digest)
    }
}
