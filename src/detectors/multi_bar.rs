//! Multi-bar rules of variable length
//!
//! A run is a stretch of bars where every close moves the same way against
//! the one before it. Unlike the fixed-width candlestick rules, a run detector
//! reports every qualifying stretch, so one series yields overlapping
//! instances of several lengths.

use std::collections::HashMap;

use crate::params::{get_period, ParamMeta, ParameterizedDetector};
use crate::{Bar, BarSeries, Direction, Matches, Pattern, PatternId, PatternInstance, Period, Result};

/// Consecutive closes moving in one direction.
///
/// `Direction::Neutral` looks for unchanged closes. Lengths count bars, and a
/// run needs at least two, so a `min_len` of one behaves like two.
#[derive(Debug, Clone, Copy)]
pub struct RunDetector {
    pub direction: Direction,
    pub min_len: Period,
}

impl RunDetector {
    pub fn rising(min_len: Period) -> Self {
        Self {
            direction: Direction::Bullish,
            min_len,
        }
    }

    pub fn falling(min_len: Period) -> Self {
        Self {
            direction: Direction::Bearish,
            min_len,
        }
    }

    pub fn id(&self) -> PatternId {
        match self.direction {
            Direction::Bullish => PatternId("RISING_RUN"),
            Direction::Bearish => PatternId("FALLING_RUN"),
            Direction::Neutral => PatternId("FLAT_RUN"),
        }
    }

    fn steps(&self, prev: &Bar, curr: &Bar) -> bool {
        match self.direction {
            Direction::Bullish => curr.close > prev.close,
            Direction::Bearish => curr.close < prev.close,
            Direction::Neutral => curr.close == prev.close,
        }
    }

    /// Lift into an atomic pattern. Runs come out longest first, ties by
    /// earliest start, each anchored on its first and last bar.
    pub fn into_pattern(self) -> Pattern {
        Pattern::atomic(self.id(), move |bars| {
            let matches: Matches = Box::new(Runs::new(&self, bars));
            matches
        })
    }
}

impl Default for RunDetector {
    fn default() -> Self {
        Self::rising(Period::new_const(3))
    }
}

/// Enumerates qualifying windows from the longest streak down.
struct Runs {
    bars: BarSeries,
    /// `steps[k]` counts qualifying moves among positions `1..=k`
    steps: Vec<usize>,
    min_len: usize,
    len: usize,
    start: usize,
}

impl Runs {
    fn new(detector: &RunDetector, bars: &BarSeries) -> Self {
        let mut steps = Vec::with_capacity(bars.len());
        let mut longest = 0;
        let mut streak = 0;
        for (k, pair) in std::iter::once(None)
            .chain(bars.windows(2).map(Some))
            .enumerate()
        {
            let moved = matches!(pair, Some([prev, curr]) if detector.steps(prev, curr));
            let before = if k == 0 { 0 } else { steps[k - 1] };
            steps.push(before + usize::from(moved));
            streak = if moved { streak + 1 } else { 0 };
            longest = longest.max(streak);
        }

        Self {
            bars: bars.clone(),
            steps,
            min_len: detector.min_len.get().max(2),
            // A streak of n moves spans n + 1 bars
            len: longest + 1,
            start: 0,
        }
    }
}

impl Iterator for Runs {
    type Item = Result<PatternInstance>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.len >= self.min_len {
            while self.start + self.len <= self.bars.len() {
                let first = self.start;
                let last = first + self.len - 1;
                self.start += 1;
                if self.steps[last] - self.steps[first] == last - first {
                    return Some(PatternInstance::spanning(&self.bars[first..=last]));
                }
            }
            self.len -= 1;
            self.start = 0;
        }
        None
    }
}

// ============================================================
// PARAMETERIZED DETECTOR IMPLEMENTATIONS
// ============================================================

static RUN_PARAMS: &[ParamMeta] = &[ParamMeta::period(
    "min_len",
    3.0,
    (2.0, 10.0, 1.0),
    "Shortest run reported, in bars",
)];

/// Builds the rising form; set `direction` afterwards for the others.
impl ParameterizedDetector for RunDetector {
    fn param_meta() -> &'static [ParamMeta] {
        RUN_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self::rising(get_period(params, "min_len", 3)?))
    }

    fn pattern_id_str() -> &'static str {
        "RISING_RUN"
    }
}
