//! Indicator-backed atoms
//!
//! Simple moving average over closes and the patterns that compare a bar's
//! close with it. The average at a bar includes that bar, so nothing matches
//! before `period` bars of history exist in the searched series.

use crate::detectors::BarDetector;
use crate::{Bar, Direction, Pattern, PatternId, Period};

/// Trailing simple moving average of closes; `None` during warm-up.
pub fn sma(bars: &[Bar], period: Period) -> Vec<Option<f64>> {
    let period = period.get();
    let mut result = Vec::with_capacity(bars.len());
    let mut sum = 0.0;
    for (i, bar) in bars.iter().enumerate() {
        sum += bar.close;
        if i >= period {
            sum -= bars[i - period].close;
        }
        result.push((i + 1 >= period).then(|| sum / period as f64));
    }
    result
}

/// Average of the `period` closes ending at `index`.
fn sma_at(bars: &[Bar], index: usize, period: usize) -> Option<f64> {
    let start = (index + 1).checked_sub(period)?;
    let window = bars.get(start..=index)?;
    Some(window.iter().map(|b| b.close).sum::<f64>() / period as f64)
}

/// Close strictly above (`Bullish`) or below (`Bearish`) its moving average.
#[derive(Debug, Clone, Copy)]
pub struct SmaCrossDetector {
    pub direction: Direction,
    pub period: Period,
}

impl BarDetector for SmaCrossDetector {
    fn id(&self) -> PatternId {
        match self.direction {
            Direction::Bearish => PatternId("CLOSE_BELOW_SMA"),
            _ => PatternId("CLOSE_ABOVE_SMA"),
        }
    }

    fn min_bars(&self) -> usize {
        self.period.get()
    }

    fn detect(&self, bars: &[Bar], index: usize) -> Option<std::ops::RangeInclusive<usize>> {
        let close = bars.get(index)?.close;
        let average = sma_at(bars, index, self.period.get())?;
        let hit = match self.direction {
            Direction::Bearish => close < average,
            _ => close > average,
        };
        hit.then_some(index..=index)
    }
}

pub fn close_above_sma(period: Period) -> Pattern {
    SmaCrossDetector {
        direction: Direction::Bullish,
        period,
    }
    .into_pattern()
}

pub fn close_below_sma(period: Period) -> Pattern {
    SmaCrossDetector {
        direction: Direction::Bearish,
        period,
    }
    .into_pattern()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BarSeries;

    fn closes(values: &[f64]) -> BarSeries {
        values
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::ohlc(i as u64 + 1, c, c, c, c))
            .collect()
    }

    fn firsts(pattern: Pattern, bars: &BarSeries) -> Vec<u64> {
        pattern
            .search(bars)
            .collect_all()
            .unwrap()
            .iter()
            .map(|m| m.span().first)
            .collect()
    }

    #[test]
    fn test_sma_warmup_and_values() {
        let bars = closes(&[1.0, 2.0, 3.0, 4.0]);
        let avg = sma(&bars, Period::new_const(3));
        assert_eq!(avg[..2], [None, None]);
        assert!((avg[2].unwrap() - 2.0).abs() < 1e-12);
        assert!((avg[3].unwrap() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_sma_period_one_is_close() {
        let bars = closes(&[5.0, 7.0]);
        assert_eq!(sma(&bars, Period::new_const(1)), vec![Some(5.0), Some(7.0)]);
    }

    #[test]
    fn test_close_above_and_below() {
        // Averages over 2: -, 10.5, 11.5, 10.5, 10.0
        let bars = closes(&[10.0, 11.0, 12.0, 9.0, 11.0]);
        let period = Period::new_const(2);
        assert_eq!(firsts(close_above_sma(period), &bars), vec![2, 3, 5]);
        assert_eq!(firsts(close_below_sma(period), &bars), vec![4]);
    }

    #[test]
    fn test_agrees_with_sma() {
        let bars = closes(&[3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0]);
        let period = Period::new_const(3);
        let expected: Vec<u64> = sma(&bars, period)
            .iter()
            .zip(bars.iter())
            .filter(|(avg, bar)| avg.is_some_and(|a| bar.close > a))
            .map(|(_, bar)| bar.number)
            .collect();
        assert_eq!(firsts(close_above_sma(period), &bars), expected);
    }
}
