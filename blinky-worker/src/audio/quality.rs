//! Quality estimation from engine statistics

use crate::audio::diagnostics::{mean, DiagnosticsError, FrameStatistics};
use crate::audio::engine::{Engine, EngineError};
use crate::models::QualityMetrics;
use chrono::Utc;
use std::path::Path;
use std::time::Duration;

/// Per-frame statistics mode
pub const FRAME_STATS_FILTER: &str = "astats=metadata=1:reset=1";

/// Mean-volume mode
pub const MEAN_VOLUME_FILTER: &str = "volumedetect";

/// Average each series independently
///
/// SNR is approximated as mean peak minus mean RMS and is unknown unless
/// both are known. Fails only if no series has any reading.
pub fn summarize(stats: &FrameStatistics) -> Result<QualityMetrics, DiagnosticsError> {
    if stats.is_empty() {
        return Err(DiagnosticsError::NoFrameStatistics);
    }

    let rms_level = mean(&stats.rms_db);
    let peak_level = mean(&stats.peak_db);
    let snr = match (peak_level, rms_level) {
        (Some(peak), Some(rms)) => Some(peak - rms),
        _ => None,
    };

    Ok(QualityMetrics {
        snr,
        rms_level,
        peak_level,
        noise_level: mean(&stats.noise_db),
        analyzed_at: Utc::now(),
    })
}

/// Quality snapshot of one file
pub async fn estimate_quality(
    engine: &Engine,
    path: &Path,
    timeout: Duration,
) -> Result<QualityMetrics, EngineError> {
    let text = engine.run_analysis(path, FRAME_STATS_FILTER, timeout).await?;
    let stats = engine.parser().frame_statistics(&text);
    Ok(summarize(&stats)?)
}

/// Noise floor estimate (mean volume, dB)
pub async fn estimate_noise_floor(
    engine: &Engine,
    path: &Path,
    timeout: Duration,
) -> Result<f64, EngineError> {
    let text = engine.run_analysis(path, MEAN_VOLUME_FILTER, timeout).await?;
    Ok(engine.parser().mean_volume(&text)?)
}
