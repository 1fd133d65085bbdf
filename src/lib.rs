pub mod config;
pub mod pipeline_config;
pub mod pipeline;

pub use pipeline::scorecard::{
    parse_scorecard_image, ParseResult, ReferenceData, ScorecardError, ScorecardParser,
};
pub use pipeline_config::PipelineConfig;

use tracing_subscriber::EnvFilter;

/// Install the stderr log subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .init();
}
