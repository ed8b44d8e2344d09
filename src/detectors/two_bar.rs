//! Two-bar candlestick rules (TA-Lib style)
//!
//! Engulfing (either direction) and Harami. Instances anchor both bars.

use std::collections::HashMap;

use super::helpers::{self, is_body_long_f, is_body_short_f};
use super::BarDetector;
use crate::params::{get_ratio, ParamMeta, ParameterizedDetector};
use crate::{Bar, Direction, OHLCVExt, PatternId, Result, OHLCV};

impl_with_defaults!(HaramiDetector);

// ============================================================
// ENGULFING PATTERNS
// ============================================================

/// CDLENGULFING - second body engulfs the first, opposite colours.
///
/// `Direction::Neutral` accepts both the bullish and the bearish form.
#[derive(Debug, Clone, Copy)]
pub struct EngulfingDetector {
    pub direction: Direction,
}

impl EngulfingDetector {
    pub fn bullish() -> Self {
        Self {
            direction: Direction::Bullish,
        }
    }

    pub fn bearish() -> Self {
        Self {
            direction: Direction::Bearish,
        }
    }

    fn signal(prev: &Bar, curr: &Bar) -> Option<Direction> {
        // TA-Lib colour: close >= open is white
        let curr_white = curr.close() >= curr.open();
        let prev_white = prev.close() >= prev.open();

        // White engulfs black; at most one end may match
        if curr_white && !prev_white {
            let case_a = curr.close() >= prev.open() && curr.open() < prev.close();
            let case_b = curr.close() > prev.open() && curr.open() <= prev.close();
            if case_a || case_b {
                return Some(Direction::Bullish);
            }
        }

        // Black engulfs white
        if !curr_white && prev_white {
            let case_a = curr.open() >= prev.close() && curr.close() < prev.open();
            let case_b = curr.open() > prev.close() && curr.close() <= prev.open();
            if case_a || case_b {
                return Some(Direction::Bearish);
            }
        }

        None
    }
}

impl BarDetector for EngulfingDetector {
    fn id(&self) -> PatternId {
        match self.direction {
            Direction::Bullish => PatternId("CDL_ENGULFING_BULL"),
            Direction::Bearish => PatternId("CDL_ENGULFING_BEAR"),
            Direction::Neutral => PatternId("CDL_ENGULFING"),
        }
    }

    fn min_bars(&self) -> usize {
        2
    }

    fn detect(&self, bars: &[Bar], index: usize) -> Option<std::ops::RangeInclusive<usize>> {
        if index < 1 {
            return None;
        }
        let prev = bars.get(index - 1)?;
        let curr = bars.get(index)?;
        let found = Self::signal(prev, curr)?;
        (self.direction == Direction::Neutral || self.direction == found)
            .then_some(index - 1..=index)
    }
}

// ============================================================
// HARAMI PATTERNS
// ============================================================

/// CDLHARAMI - short body inside the previous long body
#[derive(Debug, Clone, Copy)]
pub struct HaramiDetector {
    pub body_long_factor: f64,
    pub body_short_factor: f64,
}

impl Default for HaramiDetector {
    fn default() -> Self {
        Self {
            body_long_factor: helpers::BODY_LONG_FACTOR,
            body_short_factor: helpers::BODY_SHORT_FACTOR,
        }
    }
}

impl BarDetector for HaramiDetector {
    fn id(&self) -> PatternId {
        PatternId("CDL_HARAMI")
    }

    fn min_bars(&self) -> usize {
        2
    }

    fn detect(&self, bars: &[Bar], index: usize) -> Option<std::ops::RangeInclusive<usize>> {
        if index < 1 {
            return None;
        }
        let prev = bars.get(index - 1)?;
        let curr = bars.get(index)?;

        let prev_body = prev.body();
        if prev_body <= f64::EPSILON {
            return None;
        }
        // TA-Lib: BodyLong uses avg_body at bar i-1 (not bar i)
        let prev_avg_body = helpers::trailing_avg_body(bars, index - 1, helpers::CANDLE_PERIOD);
        if !is_body_long_f(prev_body, prev_avg_body, prev.range(), self.body_long_factor) {
            return None;
        }
        let curr_avg_body = helpers::trailing_avg_body(bars, index, helpers::CANDLE_PERIOD);
        if !is_body_short_f(curr.body(), curr_avg_body, curr.range(), self.body_short_factor) {
            return None;
        }

        let prev_high = prev.open().max(prev.close());
        let prev_low = prev.open().min(prev.close());
        let curr_high = curr.open().max(curr.close());
        let curr_low = curr.open().min(curr.close());
        if curr_high > prev_high || curr_low < prev_low {
            return None;
        }
        Some(index - 1..=index)
    }
}

// ============================================================
// PARAMETERIZED DETECTOR IMPLEMENTATIONS
// ============================================================

static HARAMI_PARAMS: &[ParamMeta] = &[
    ParamMeta::ratio(
        "body_long_factor",
        helpers::BODY_LONG_FACTOR,
        (0.5, 1.0, 0.1),
        "First body above this share of its trailing average body",
    ),
    ParamMeta::ratio(
        "body_short_factor",
        helpers::BODY_SHORT_FACTOR,
        (0.5, 1.0, 0.1),
        "Second body below this share of its trailing average body",
    ),
];

impl ParameterizedDetector for HaramiDetector {
    fn param_meta() -> &'static [ParamMeta] {
        HARAMI_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            body_long_factor: get_ratio(params, "body_long_factor", helpers::BODY_LONG_FACTOR)?
                .get(),
            body_short_factor: get_ratio(params, "body_short_factor", helpers::BODY_SHORT_FACTOR)?
                .get(),
        })
    }

    fn pattern_id_str() -> &'static str {
        "CDL_HARAMI"
    }
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

    fn spans<D: BarDetector>(detector: D, bars: &BarSeries) -> Vec<(u64, u64)> {
        detector
            .into_pattern()
            .search(bars)
            .collect_all()
            .unwrap()
            .iter()
            .map(|m| (m.span().first, m.span().last))
            .collect()
    }

    #[test]
    fn test_engulfing_directions() {
        // 2 engulfs 1 bearishly, 4 engulfs 3 bullishly
        let bars = series(&[(11.0, 12.0), (12.5, 10.5), (10.0, 9.5), (9.0, 11.0)]);
        assert_eq!(spans(EngulfingDetector::bearish(), &bars), vec![(1, 2)]);
        assert_eq!(spans(EngulfingDetector::bullish(), &bars), vec![(3, 4)]);
        let either = EngulfingDetector {
            direction: Direction::Neutral,
        };
        assert_eq!(spans(either, &bars), vec![(1, 2), (3, 4)]);
    }

    #[test]
    fn test_engulfing_one_end_may_match() {
        let bars = series(&[(12.0, 11.0), (11.0, 12.5)]);
        assert_eq!(spans(EngulfingDetector::bullish(), &bars), vec![(1, 2)]);
        // Equal bodies engulf at neither end
        let bars = series(&[(12.0, 11.0), (11.0, 12.0)]);
        assert!(spans(EngulfingDetector::bullish(), &bars).is_empty());
    }

    #[test]
    fn test_harami() {
        let bars = series(&[(10.0, 11.0), (10.0, 11.0), (10.0, 16.0), (14.0, 13.0)]);
        assert_eq!(spans(HaramiDetector::default(), &bars), vec![(3, 4)]);
    }

    #[test]
    fn test_harami_requires_containment() {
        let bars = series(&[(10.0, 11.0), (10.0, 11.0), (10.0, 16.0), (16.5, 15.5)]);
        assert!(spans(HaramiDetector::default(), &bars).is_empty());
    }
}
