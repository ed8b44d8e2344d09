//! Common helper functions for candlestick rules
//!
//! TA-Lib compatible thresholds and comparison functions shared across the detector modules.

use crate::OHLCVExt;

// ============================================================
// TA-Lib THRESHOLDS (from ta_utility.h)
// ============================================================

/// Body is doji-like: body <= avg_range * DOJI_FACTOR
pub const DOJI_FACTOR: f64 = 0.1;
/// Body is short: body < avg_body * SHORT_FACTOR
pub const BODY_SHORT_FACTOR: f64 = 1.0;
/// Body is long: body > avg_body * LONG_FACTOR
pub const BODY_LONG_FACTOR: f64 = 1.0;
/// Shadow very short: shadow < avg_range * SHADOW_VERYSHORT_FACTOR
pub const SHADOW_VERYSHORT_FACTOR: f64 = 0.1;
/// Marubozu: each shadow at most this share of the range
pub const MARUBOZU_SHADOW_RATIO: f64 = 0.05;
/// Lookback for trailing body/range averages
pub const CANDLE_PERIOD: usize = 10;

// Fallback ratio-based thresholds (when the trailing average is not meaningful)
pub const DOJI_RATIO: f64 = 0.1;
pub const BODY_SHORT_RATIO: f64 = 0.3;
pub const BODY_LONG_RATIO: f64 = 0.7;
pub const SHADOW_SHORT_RATIO: f64 = 0.1;

// ============================================================
// FACTOR-PARAMETERIZED COMPARISONS
// ============================================================

/// Body is doji-like against the trailing range. A zero body always is.
#[inline]
pub fn is_doji_f(body: f64, avg_range: f64, range: f64, factor: f64) -> bool {
    if body <= 0.0 {
        return true;
    }
    if avg_range > 0.0 {
        body <= avg_range * factor
    } else {
        range > 0.0 && body / range <= DOJI_RATIO
    }
}

#[inline]
pub fn is_body_short_f(body: f64, avg_body: f64, range: f64, factor: f64) -> bool {
    if avg_body > 0.0 {
        body < avg_body * factor
    } else {
        range > 0.0 && body / range <= BODY_SHORT_RATIO
    }
}

#[inline]
pub fn is_body_long_f(body: f64, avg_body: f64, range: f64, factor: f64) -> bool {
    if avg_body > 0.0 {
        body > avg_body * factor
    } else {
        range > 0.0 && body / range >= BODY_LONG_RATIO
    }
}

/// TA-Lib ShadowLong: compared against the bar's own body, so with a zero
/// body any positive shadow passes.
#[inline]
pub fn is_shadow_long(shadow: f64, body: f64) -> bool {
    shadow > body
}

#[inline]
pub fn is_shadow_very_short_f(shadow: f64, avg_range: f64, range: f64, factor: f64) -> bool {
    if avg_range > 0.0 {
        shadow < avg_range * factor
    } else {
        range > 0.0 && shadow / range <= SHADOW_SHORT_RATIO
    }
}

/// Check if a bar is a marubozu (no/minimal shadows).
/// Returns `Some(true)` if marubozu, `Some(false)` if not, `None` if range is zero.
#[inline]
pub fn is_marubozu<T: OHLCVExt>(bar: &T, shadow_max_ratio: f64) -> Option<bool> {
    let upper = bar.upper_shadow_ratio()?;
    let lower = bar.lower_shadow_ratio()?;
    Some(upper <= shadow_max_ratio && lower <= shadow_max_ratio)
}

// ============================================================
// TRAILING AVERAGES
// ============================================================

/// Average body over the `period` bars before `at`; the bar's own body at the
/// start of the series.
#[inline]
pub fn trailing_avg_body<T: OHLCVExt>(bars: &[T], at: usize, period: usize) -> f64 {
    trailing_avg(bars, at, period, |b| b.body())
}

/// Average high-low range over the `period` bars before `at`.
#[inline]
pub fn trailing_avg_range<T: OHLCVExt>(bars: &[T], at: usize, period: usize) -> f64 {
    trailing_avg(bars, at, period, |b| b.range())
}

fn trailing_avg<T, F>(bars: &[T], at: usize, period: usize, measure: F) -> f64
where
    F: Fn(&T) -> f64,
{
    if at == 0 {
        return bars.first().map_or(0.0, &measure);
    }
    let window = &bars[at.saturating_sub(period)..at.min(bars.len())];
    if window.is_empty() {
        return 0.0;
    }
    window.iter().map(measure).sum::<f64>() / window.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bar;

    fn bar(o: f64, h: f64, l: f64, c: f64) -> Bar {
        Bar::ohlc(1, o, h, l, c)
    }

    #[test]
    fn test_doji_zero_body() {
        assert!(is_doji_f(0.0, 5.0, 2.0, DOJI_FACTOR));
        assert!(!is_doji_f(1.0, 5.0, 2.0, DOJI_FACTOR));
        // Ratio fallback when there is no history
        assert!(is_doji_f(0.05, 0.0, 1.0, DOJI_FACTOR));
    }

    #[test]
    fn test_body_short_long_fallback() {
        assert!(is_body_short_f(0.2, 0.0, 1.0, BODY_SHORT_FACTOR));
        assert!(is_body_long_f(0.8, 0.0, 1.0, BODY_LONG_FACTOR));
        assert!(!is_body_long_f(0.8, 0.0, 0.0, BODY_LONG_FACTOR));
    }

    #[test]
    fn test_marubozu() {
        assert_eq!(is_marubozu(&bar(10.0, 20.0, 10.0, 20.0), 0.05), Some(true));
        assert_eq!(is_marubozu(&bar(10.0, 22.0, 10.0, 20.0), 0.05), Some(false));
        assert_eq!(is_marubozu(&bar(10.0, 10.0, 10.0, 10.0), 0.05), None);
    }

    #[test]
    fn test_trailing_averages() {
        let bars = vec![
            bar(10.0, 12.0, 9.0, 11.0),
            bar(11.0, 14.0, 10.0, 13.0),
            bar(13.0, 13.0, 7.0, 9.0),
        ];
        assert!((trailing_avg_body(&bars, 0, 10) - 1.0).abs() < 1e-12);
        assert!((trailing_avg_body(&bars, 2, 10) - 1.5).abs() < 1e-12);
        assert!((trailing_avg_range(&bars, 2, 1) - 4.0).abs() < 1e-12);
    }
}
