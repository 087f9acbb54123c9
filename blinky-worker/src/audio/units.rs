//! Decibel / linear amplitude conversion
//!
//! The engine's dynamics filters take thresholds as linear amplitudes in
//! `[0.000976563, 1.0]`. Configured thresholds are in dB and are clamped into
//! that range instead of being rejected.

/// Lowest linear amplitude the engine accepts (≈ -60.2 dB)
pub const LINEAR_AMPLITUDE_FLOOR: f64 = 0.000976563;

/// Highest linear amplitude the engine accepts (0 dB)
pub const LINEAR_AMPLITUDE_CEILING: f64 = 1.0;

/// Thresholds below this are pinned to the floor
pub const MIN_THRESHOLD_DB: f64 = -60.0;

/// Thresholds above this are pinned to the ceiling
pub const MAX_THRESHOLD_DB: f64 = 0.0;

/// Convert dB to a clamped linear amplitude: `10^(dB/20)`
///
/// Values outside `[-60, 0]` dB map to the clamp boundary. NaN maps to the
/// floor.
pub fn db_to_linear(db: f64) -> f64 {
    if db.is_nan() || db < MIN_THRESHOLD_DB {
        return LINEAR_AMPLITUDE_FLOOR;
    }
    if db > MAX_THRESHOLD_DB {
        return LINEAR_AMPLITUDE_CEILING;
    }
    10f64
        .powf(db / 20.0)
        .clamp(LINEAR_AMPLITUDE_FLOOR, LINEAR_AMPLITUDE_CEILING)
}

/// Format a number for a filter specification
///
/// Nine fractional digits, then insignificant trailing zeros stripped:
/// `0.1` not `0.100000000`, `-16` not `-16.0`.
pub fn format_number(value: f64) -> String {
    let mut s = format!("{:.9}", value);
    if s.contains('.') {
        let trimmed = s.trim_end_matches('0').trim_end_matches('.').len();
        s.truncate(trimmed);
    }
    if s == "-0" {
        s = "0".to_string();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_to_linear_reference_points() {
        assert!((db_to_linear(-20.0) - 0.1).abs() < 1e-12);
        assert!((db_to_linear(-6.0) - 0.501187).abs() < 1e-6);
        assert_eq!(db_to_linear(0.0), 1.0);
        assert!((db_to_linear(-60.0) - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_range_thresholds_hit_the_boundary() {
        for db in [-60.01, -61.0, -96.0, -200.0, f64::NEG_INFINITY] {
            assert_eq!(db_to_linear(db), LINEAR_AMPLITUDE_FLOOR, "dB {}", db);
        }
        for db in [0.01, 1.0, 6.0, 120.0, f64::INFINITY] {
            assert_eq!(db_to_linear(db), LINEAR_AMPLITUDE_CEILING, "dB {}", db);
        }
        assert_eq!(db_to_linear(f64::NAN), LINEAR_AMPLITUDE_FLOOR);
    }

    #[test]
    fn test_in_range_thresholds_stay_inside_clamp() {
        let mut db = -60.0;
        while db <= 0.0 {
            let linear = db_to_linear(db);
            assert!((LINEAR_AMPLITUDE_FLOOR..=LINEAR_AMPLITUDE_CEILING).contains(&linear));
            db += 0.5;
        }
    }

    #[test]
    fn test_format_strips_trailing_zeros() {
        assert_eq!(format_number(0.1), "0.1");
        assert_eq!(format_number(-16.0), "-16");
        assert_eq!(format_number(3.1), "3.1");
        assert_eq!(format_number(120.0), "120");
        assert_eq!(format_number(LINEAR_AMPLITUDE_FLOOR), "0.000976563");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(db_to_linear(-1.0)), "0.891250938");
    }
}
