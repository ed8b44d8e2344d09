//! Built-in atomic patterns
//!
//! Candlestick rules with TA-Lib style thresholds, lifted into [`Pattern`]s so
//! they compose with the rest of the algebra.
//!
//! # Pattern Categories
//!
//! - **Single-bar**: Bullish, Bearish, Doji, Hammer, Shooting Star, Marubozu, Long Body
//! - **Two-bar**: Bullish/Bearish Engulfing, Harami
//! - **Multi-bar**: Rising/Falling runs of any length
//!
//! Contextual rules (trailing averages, the previous bar) only see the series
//! they are searched over. Both sides of an overlay search the full input; the
//! right side of a sequence searches the bars after the hand-off.

use std::sync::Arc;

use crate::{Bar, Matches, OHLCVExt, Pattern, PatternId, PatternInstance, Period};

pub mod helpers;

/// Generate `with_defaults()` -> `Self::default()` for multiple detector types.
macro_rules! impl_with_defaults {
    ($($detector:ty),* $(,)?) => {
        $(impl $detector {
            pub fn with_defaults() -> Self { Self::default() }
        })*
    };
}

pub mod multi_bar;
pub mod single_bar;
pub mod two_bar;

pub use multi_bar::*;
pub use single_bar::*;
pub use two_bar::*;

// ============================================================
// BAR DETECTOR TRAIT
// ============================================================

/// A candlestick rule evaluated at one position of a series.
pub trait BarDetector: Send + Sync + 'static {
    fn id(&self) -> PatternId;

    /// Bars needed up to and including the signal bar
    fn min_bars(&self) -> usize;

    /// Positions covered by a signal ending at `index`, if any
    fn detect(&self, bars: &[Bar], index: usize) -> Option<std::ops::RangeInclusive<usize>>;

    /// Lift into an atomic pattern. Every covered bar becomes an anchor and
    /// instances come out in order of their signal bar.
    fn into_pattern(self) -> Pattern
    where
        Self: Sized,
    {
        let id = self.id();
        let detector = Arc::new(self);
        Pattern::atomic(id, move |bars| {
            let detector = Arc::clone(&detector);
            let bars = bars.clone();
            let start = detector.min_bars().saturating_sub(1);
            let matches: Matches = Box::new((start..bars.len()).filter_map(move |index| {
                let covered = detector.detect(&bars, index)?;
                let anchors = bars.get(covered)?.to_vec();
                Some(PatternInstance::new(anchors, Vec::new()))
            }));
            matches
        })
    }
}

// ============================================================
// CONSTRUCTORS
// ============================================================

/// Bars that close above their open.
pub fn bullish() -> Pattern {
    Pattern::each_bar(PatternId("BULLISH"), |bar| bar.is_bullish())
}

/// Bars that close below their open.
pub fn bearish() -> Pattern {
    Pattern::each_bar(PatternId("BEARISH"), |bar| bar.is_bearish())
}

pub fn doji() -> Pattern {
    DojiDetector::default().into_pattern()
}

pub fn hammer() -> Pattern {
    HammerDetector::default().into_pattern()
}

pub fn shooting_star() -> Pattern {
    ShootingStarDetector::default().into_pattern()
}

pub fn marubozu() -> Pattern {
    MarubozuDetector::default().into_pattern()
}

pub fn long_body() -> Pattern {
    LongBodyDetector::default().into_pattern()
}

pub fn bullish_engulfing() -> Pattern {
    EngulfingDetector::bullish().into_pattern()
}

pub fn bearish_engulfing() -> Pattern {
    EngulfingDetector::bearish().into_pattern()
}

pub fn harami() -> Pattern {
    HaramiDetector::default().into_pattern()
}

/// Every run of at least `min_len` consecutive higher closes.
pub fn rising_run(min_len: Period) -> Pattern {
    RunDetector::rising(min_len).into_pattern()
}

/// Every run of at least `min_len` consecutive lower closes.
pub fn falling_run(min_len: Period) -> Pattern {
    RunDetector::falling(min_len).into_pattern()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BarSeries;

    fn series(pairs: &[(f64, f64)]) -> BarSeries {
        pairs
            .iter()
            .enumerate()
            .map(|(i, &(o, c))| Bar::ohlc(i as u64 + 1, o, o.max(c), o.min(c), c))
            .collect()
    }

    fn firsts(pattern: &Pattern, bars: &BarSeries) -> Vec<u64> {
        pattern
            .search(bars)
            .collect_all()
            .unwrap()
            .iter()
            .map(|m| m.span().first)
            .collect()
    }

    #[test]
    fn test_bullish_bearish_partition() {
        let bars = series(&[(10.0, 12.0), (12.0, 11.0), (11.0, 13.0), (13.0, 13.0), (13.0, 10.0)]);
        assert_eq!(firsts(&bullish(), &bars), vec![1, 3]);
        assert_eq!(firsts(&bearish(), &bars), vec![2, 5]);
    }

    #[test]
    fn test_ids() {
        assert_eq!(bullish().to_string(), "BULLISH");
        assert_eq!(doji().to_string(), "CDL_DOJI");
        assert_eq!(rising_run(Period::new_const(3)).to_string(), "RISING_RUN");
    }

    #[test]
    fn test_into_pattern_anchors_covered_bars() {
        let bars = series(&[(11.0, 12.0), (12.5, 10.5)]);
        let found = bearish_engulfing().search(&bars).collect_all().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].anchor_numbers(), vec![1, 2]);

        // A two-bar rule has nothing to say about a lone bar.
        let lone = series(&[(12.5, 10.5)]);
        assert!(bearish_engulfing().search(&lone).collect_all().unwrap().is_empty());
    }

    #[test]
    fn test_with_defaults() {
        let d = DojiDetector::with_defaults();
        assert!((d.doji_factor - helpers::DOJI_FACTOR).abs() < f64::EPSILON);
    }
}
