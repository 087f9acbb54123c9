//! Loudness measurement passes
//!
//! The same summary-mode run is used before and after the apply pass. The
//! apply pass itself is driven by the configured target, never by these
//! measurements.

use crate::audio::engine::{Engine, EngineError};
use crate::audio::units::format_number;
use crate::models::{LoudnessMeasurement, ProcessingRequest};
use std::path::Path;
use std::time::Duration;

/// Summary-mode loudness filter for a request
pub fn measurement_filter(request: &ProcessingRequest) -> String {
    format!(
        "loudnorm=I={}:TP={}:LRA={}:print_format=summary",
        format_number(request.target_lufs()),
        format_number(request.true_peak_db()),
        format_number(request.loudness_range_lu())
    )
}

/// Measure loudness of one file
///
/// A non-zero engine exit is tolerated when the summary still parses.
pub async fn measure_loudness(
    engine: &Engine,
    path: &Path,
    request: &ProcessingRequest,
    timeout: Duration,
) -> Result<LoudnessMeasurement, EngineError> {
    let text = engine
        .run_analysis(path, &measurement_filter(request), timeout)
        .await?;
    Ok(engine.parser().loudness_summary(&text)?)
}
