//! # CPL - Composable Pattern Language for bar series
//!
//! A small algebra for describing structural patterns over ordered OHLCV data
//! and searching for them. Primitive per-bar predicates are lifted into
//! [`Pattern`] values, which are then composed with a handful of combinators:
//!
//! - [`Pattern::constrained_by`] filters found instances with a predicate
//! - [`Pattern::followed_by`] chains two patterns end-to-end along the series
//! - [`Pattern::overlay`] requires two patterns to cover the identical span
//! - [`Pattern::at`] targets one slot of a multi-resolution tuple
//!
//! ## Quick Start
//!
//! ```rust
//! use cpl::prelude::*;
//!
//! let bars = BarSeries::new(vec![
//!     Bar::ohlc(1, 10.0, 12.5, 9.5, 12.0),
//!     Bar::ohlc(2, 12.0, 12.5, 10.5, 11.0),
//!     Bar::ohlc(3, 11.0, 13.5, 10.5, 13.0),
//! ]);
//!
//! let reversal = bullish().followed_by(bearish());
//! let found = reversal.search(&bars).collect_all().unwrap();
//!
//! assert_eq!(found.len(), 1);
//! assert_eq!(found[0].span(), Span::new(1, 2).unwrap());
//! ```

use std::{fmt, ops::Deref, sync::Arc};

use chrono::NaiveDate;
use tracing::{debug, warn};

pub mod detectors;
pub mod indicators;
pub mod params;
pub mod pattern;
pub mod resolution;

pub use pattern::{
    Boundary, Constraint, Extractor, Matches, Pattern, PatternKind, Search, DEFAULT_BOUNDARY,
};
pub use resolution::{ResolutionMatch, ResolutionMatches, ResolutionSearch, Resolutions};

pub mod prelude {
    pub use crate::{
        // Built-in atoms
        detectors::*,
        indicators::{close_above_sma, close_below_sma, sma},
        // Parameters
        params::{get_period, get_ratio, ParamMeta, ParamType, ParameterizedDetector},
        // Parallel
        scan_parallel,
        // Data model
        Bar,
        BarSeries,
        Boundary,
        Direction,
        // Errors
        PatternError,
        // Algebra
        Pattern,
        PatternId,
        PatternInstance,
        PatternKind,
        Period,
        Ratio,
        ResolutionMatch,
        Resolutions,
        Result,
        ScanConfig,
        ScanError,
        ScanResult,
        Search,
        Span,
        OHLCVExt,
        DEFAULT_BOUNDARY,
        OHLCV,
    };
}

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, PatternError>;

/// Errors surfaced by series construction and pattern search
#[derive(Debug, Clone, thiserror::Error)]
pub enum PatternError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid OHLCV at index {index}: {reason}")]
    InvalidOHLCV { index: usize, reason: &'static str },

    #[error("Bar numbers not strictly ascending at index {index}: {previous} then {current}")]
    NonMonotonic {
        index: usize,
        previous: u64,
        current: u64,
    },

    #[error("No bar numbered {number} in series")]
    UnknownBarNumber { number: u64 },

    #[error("Pattern instance needs at least one anchor")]
    EmptyAnchors,

    #[error("Resolution slot {slot} out of range for a tuple of {len}")]
    ResolutionOutOfRange { slot: usize, len: usize },

    #[error("Resolution tuple must hold at least one series")]
    EmptyResolutions,

    /// A caller-supplied extractor or constraint failed.
    #[error("Predicate failed: {0}")]
    Predicate(#[source] CallerError),
}

impl PatternError {
    /// Wrap a caller error so it can travel through a search unchanged.
    pub fn predicate<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Predicate(CallerError(Arc::from(error.into())))
    }
}

/// Error raised by caller code during a search. Shared so [`PatternError`]
/// stays `Clone`; derefs to the original error, which is also what
/// `source()` returns.
#[derive(Debug, Clone)]
pub struct CallerError(Arc<dyn std::error::Error + Send + Sync>);

impl Deref for CallerError {
    type Target = dyn std::error::Error + Send + Sync;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl fmt::Display for CallerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    /// Create a new Ratio, validating the value is in [0.0, 1.0]
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || value.is_infinite() {
            return Err(PatternError::InvalidValue(
                "Ratio cannot be NaN or infinite",
            ));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(PatternError::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    /// Create a Ratio from a compile-time constant (library internal use)
    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl serde::Serialize for Ratio {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Ratio {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Ratio::new(value).map_err(serde::de::Error::custom)
    }
}

/// Period (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(PatternError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl serde::Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// OHLCV TRAITS
// ============================================================

/// Core OHLCV data trait
pub trait OHLCV {
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
    fn volume(&self) -> f64;

    fn timestamp(&self) -> Option<i64> {
        None
    }
}

/// Extension trait with computed properties for OHLCV data
pub trait OHLCVExt: OHLCV {
    #[inline]
    fn body(&self) -> f64 {
        (self.close() - self.open()).abs()
    }

    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    #[inline]
    fn upper_shadow(&self) -> f64 {
        self.high() - self.open().max(self.close())
    }

    #[inline]
    fn lower_shadow(&self) -> f64 {
        self.open().min(self.close()) - self.low()
    }

    #[inline]
    fn is_bullish(&self) -> bool {
        self.close() > self.open()
    }

    #[inline]
    fn is_bearish(&self) -> bool {
        self.close() < self.open()
    }

    /// Body as ratio of range. Returns None if range ≈ 0
    #[inline]
    fn body_ratio(&self) -> Option<f64> {
        let range = self.range();
        (range > f64::EPSILON).then(|| self.body() / range)
    }

    #[inline]
    fn upper_shadow_ratio(&self) -> Option<f64> {
        let range = self.range();
        (range > f64::EPSILON).then(|| self.upper_shadow() / range)
    }

    #[inline]
    fn lower_shadow_ratio(&self) -> Option<f64> {
        let range = self.range();
        (range > f64::EPSILON).then(|| self.lower_shadow() / range)
    }

    /// Validate OHLCV data consistency
    fn validate(&self) -> Result<()> {
        if self.high() < self.low() {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "high < low",
            });
        }
        if self.open().is_nan()
            || self.high().is_nan()
            || self.low().is_nan()
            || self.close().is_nan()
        {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "NaN in OHLCV",
            });
        }
        if self.open().is_infinite()
            || self.high().is_infinite()
            || self.low().is_infinite()
            || self.close().is_infinite()
        {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "Infinite value in OHLCV",
            });
        }
        Ok(())
    }
}

impl<T: OHLCV> OHLCVExt for T {}

// ============================================================
// BAR
// ============================================================

/// One time period's price record.
///
/// `number` is a strictly increasing time index shared by every slice of the
/// series the bar belongs to; it is not the bar's position in any slice.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Bar {
    pub number: u64,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub adjusted_close: f64,
}

impl Bar {
    /// Bar with zero volume, default date and `adjusted_close == close`.
    pub fn ohlc(number: u64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            number,
            date: NaiveDate::default(),
            open,
            high,
            low,
            close,
            volume: 0.0,
            adjusted_close: close,
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = date;
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_adjusted_close(mut self, adjusted_close: f64) -> Self {
        self.adjusted_close = adjusted_close;
        self
    }
}

impl OHLCV for Bar {
    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    fn timestamp(&self) -> Option<i64> {
        self.date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
    }
}

// ============================================================
// BAR SERIES
// ============================================================

/// Ordered, immutable sequence of bars ascending by `number`.
///
/// Storage is reference-counted: slicing is O(1), never copies bars and never
/// renumbers them. A slice stays valid for as long as anything holds it.
#[derive(Clone)]
pub struct BarSeries {
    bars: Arc<[Bar]>,
    start: usize,
    end: usize,
}

impl BarSeries {
    /// Wrap bars without checking them. Ordering guarantees of the pattern
    /// algebra only hold for strictly ascending numbers.
    pub fn new(bars: Vec<Bar>) -> Self {
        let bars: Arc<[Bar]> = bars.into();
        let end = bars.len();
        Self {
            bars,
            start: 0,
            end,
        }
    }

    /// Wrap bars after validating OHLC consistency and strict numbering.
    pub fn try_new(bars: Vec<Bar>) -> Result<Self> {
        let series = Self::new(bars);
        series.validate()?;
        Ok(series)
    }

    pub fn validate(&self) -> Result<()> {
        let bars = self.as_slice();
        for (i, bar) in bars.iter().enumerate() {
            bar.validate().map_err(|e| match e {
                PatternError::InvalidOHLCV { reason, .. } => {
                    PatternError::InvalidOHLCV { index: i, reason }
                }
                other => other,
            })?;
            if i > 0 && bars[i - 1].number >= bar.number {
                return Err(PatternError::NonMonotonic {
                    index: i,
                    previous: bars[i - 1].number,
                    current: bar.number,
                });
            }
        }
        Ok(())
    }

    #[inline]
    pub fn as_slice(&self) -> &[Bar] {
        &self.bars[self.start..self.end]
    }

    /// Numbers of the first and last bar, `None` when empty.
    pub fn extent(&self) -> Option<Span> {
        let bars = self.as_slice();
        match (bars.first(), bars.last()) {
            (Some(first), Some(last)) => Span::new(first.number, last.number).ok(),
            _ => None,
        }
    }

    /// Position of the bar numbered `number` within this slice.
    pub fn position_of(&self, number: u64) -> Result<usize> {
        self.as_slice()
            .binary_search_by_key(&number, |b| b.number)
            .map_err(|_| PatternError::UnknownBarNumber { number })
    }

    /// Sub-slice by position. Out-of-range bounds are clamped.
    pub fn slice(&self, range: std::ops::Range<usize>) -> BarSeries {
        let len = self.end - self.start;
        let end = range.end.min(len);
        let start = range.start.min(end);
        Self {
            bars: Arc::clone(&self.bars),
            start: self.start + start,
            end: self.start + end,
        }
    }

    /// Everything from the bar numbered `number` onwards, that bar included.
    pub fn from_number(&self, number: u64) -> Result<BarSeries> {
        let pos = self.position_of(number)?;
        Ok(self.slice(pos..self.len()))
    }

    /// Everything strictly after the bar numbered `number`.
    pub fn after_number(&self, number: u64) -> Result<BarSeries> {
        let pos = self.position_of(number)?;
        Ok(self.slice(pos + 1..self.len()))
    }

    /// Everything numbered `number` or later; no bar needs to carry it.
    pub fn since(&self, number: u64) -> BarSeries {
        let start = self.as_slice().partition_point(|b| b.number < number);
        self.slice(start..self.len())
    }

    /// Bars whose coverage intersects `span`.
    ///
    /// A bar numbered `k` covers numbers from `k` up to the next bar's number,
    /// so a coarse series numbered by the first fine bar of each period yields
    /// the periods overlapping the span. For a series sharing the span's
    /// numbering this is exactly the bars numbered within it.
    pub fn covering(&self, span: Span) -> BarSeries {
        let bars = self.as_slice();
        let end = bars.partition_point(|b| b.number <= span.last);
        let start = bars
            .partition_point(|b| b.number <= span.first)
            .saturating_sub(1);
        self.slice(start.min(end)..end)
    }

    /// Numbers covered by the bars within `span`: from `span.first` up to just
    /// before the bar following `span.last`, or unbounded when no bar follows.
    pub fn coverage(&self, span: Span) -> Span {
        let bars = self.as_slice();
        let next = bars.partition_point(|b| b.number <= span.last);
        let last = bars
            .get(next)
            .map_or(u64::MAX, |b| b.number.saturating_sub(1).max(span.last));
        Span {
            first: span.first,
            last,
        }
    }

    /// Aggregate every `width` consecutive bars into one coarser bar numbered
    /// and dated by its first member. A trailing partial group is kept.
    pub fn resample(&self, width: Period) -> BarSeries {
        self.as_slice()
            .chunks(width.get())
            .map(|group| {
                let first = group[0];
                let last = group[group.len() - 1];
                Bar {
                    number: first.number,
                    date: first.date,
                    open: first.open,
                    high: group.iter().map(|b| b.high).fold(f64::MIN, f64::max),
                    low: group.iter().map(|b| b.low).fold(f64::MAX, f64::min),
                    close: last.close,
                    volume: group.iter().map(|b| b.volume).sum(),
                    adjusted_close: last.adjusted_close,
                }
            })
            .collect()
    }
}

impl Deref for BarSeries {
    type Target = [Bar];

    fn deref(&self) -> &[Bar] {
        self.as_slice()
    }
}

impl From<Vec<Bar>> for BarSeries {
    fn from(bars: Vec<Bar>) -> Self {
        Self::new(bars)
    }
}

impl FromIterator<Bar> for BarSeries {
    fn from_iter<I: IntoIterator<Item = Bar>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl fmt::Debug for BarSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BarSeries")
            .field("len", &self.len())
            .field("extent", &self.extent())
            .finish()
    }
}

// ============================================================
// PATTERN INSTANCE - result of a search
// ============================================================

/// Identifier of an atomic pattern, used in logs and `Display`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatternId(pub &'static str);

impl PatternId {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Direction/bias of a detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Direction {
    Bullish,
    Neutral,
    Bearish,
}

impl Direction {
    #[inline]
    pub fn is_bullish(self) -> bool {
        matches!(self, Direction::Bullish)
    }

    #[inline]
    pub fn is_bearish(self) -> bool {
        matches!(self, Direction::Bearish)
    }
}

/// Inclusive range of bar numbers covered by a match
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct Span {
    pub first: u64,
    pub last: u64,
}

impl Span {
    pub fn new(first: u64, last: u64) -> Result<Self> {
        if first > last {
            return Err(PatternError::InvalidValue("Span first must be <= last"));
        }
        Ok(Self { first, last })
    }

    /// Number of bar numbers covered (gaps in the series count too).
    #[inline]
    pub fn len(&self) -> u64 {
        self.last - self.first + 1
    }

    #[inline]
    pub fn contains(&self, other: &Span) -> bool {
        self.first <= other.first && other.last <= self.last
    }

    #[inline]
    pub fn contains_number(&self, number: u64) -> bool {
        (self.first..=self.last).contains(&number)
    }
}

/// One successful match.
///
/// `span.first` and `span.last` are always the numbers of the first and last
/// anchor, and every sub-instance lies within `span`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PatternInstance {
    anchors: Vec<Bar>,
    span: Span,
    subs: Vec<PatternInstance>,
}

impl PatternInstance {
    /// Build an instance whose span is taken from its first and last anchor.
    pub fn new(anchors: Vec<Bar>, subs: Vec<PatternInstance>) -> Result<Self> {
        let (first, last) = match (anchors.first(), anchors.last()) {
            (Some(first), Some(last)) => (first.number, last.number),
            _ => return Err(PatternError::EmptyAnchors),
        };
        let span = Span::new(first, last)?;
        if subs.iter().any(|sub| !span.contains(&sub.span)) {
            return Err(PatternError::InvalidValue(
                "sub-instance span outside parent span",
            ));
        }
        Ok(Self {
            anchors,
            span,
            subs,
        })
    }

    /// One-bar instance anchored on itself.
    pub fn single(bar: Bar) -> Self {
        Self {
            anchors: vec![bar],
            span: Span {
                first: bar.number,
                last: bar.number,
            },
            subs: Vec::new(),
        }
    }

    /// Instance over a contiguous run, anchored on its first and last bar.
    pub fn spanning(bars: &[Bar]) -> Result<Self> {
        match bars {
            [] => Err(PatternError::EmptyAnchors),
            [only] => Ok(Self::single(*only)),
            [first, .., last] => Self::new(vec![*first, *last], Vec::new()),
        }
    }

    /// Combinator-internal constructor; callers uphold the span invariant.
    pub(crate) fn from_parts(anchors: Vec<Bar>, span: Span, subs: Vec<PatternInstance>) -> Self {
        debug_assert!(!anchors.is_empty());
        Self {
            anchors,
            span,
            subs,
        }
    }

    #[inline]
    pub fn anchors(&self) -> &[Bar] {
        &self.anchors
    }

    #[inline]
    pub fn span(&self) -> Span {
        self.span
    }

    #[inline]
    pub fn subs(&self) -> &[PatternInstance] {
        &self.subs
    }

    #[inline]
    pub fn first_anchor(&self) -> &Bar {
        &self.anchors[0]
    }

    #[inline]
    pub fn last_anchor(&self) -> &Bar {
        &self.anchors[self.anchors.len() - 1]
    }

    pub fn anchor_numbers(&self) -> Vec<u64> {
        self.anchors.iter().map(|b| b.number).collect()
    }
}

// ============================================================
// PARALLEL SCANNING
// ============================================================

use rayon::prelude::*;

/// Options for batch scanning
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    pub validate_data: bool,
    /// Keep only the first `limit` instances of each instrument
    pub limit: Option<usize>,
}

impl ScanConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable/disable data validation
    pub fn validate_data(mut self, enable: bool) -> Self {
        self.validate_data = enable;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Result of scanning a single instrument
#[derive(Debug)]
pub struct ScanResult {
    pub symbol: String,
    pub instances: Vec<PatternInstance>,
}

/// Error from scanning a single instrument
#[derive(Debug)]
pub struct ScanError {
    pub symbol: String,
    pub error: PatternError,
}

/// Search one pattern over many instruments in parallel.
pub fn scan_parallel<'a, I>(
    pattern: &Pattern,
    config: &ScanConfig,
    instruments: I,
) -> (Vec<ScanResult>, Vec<ScanError>)
where
    I: IntoParallelIterator<Item = (&'a str, &'a BarSeries)>,
{
    debug!(pattern = %pattern, "starting parallel scan");

    let results: Vec<_> = instruments
        .into_par_iter()
        .map(|(symbol, bars)| {
            scan_one(pattern, config, bars)
                .map(|instances| ScanResult {
                    symbol: symbol.to_string(),
                    instances,
                })
                .map_err(|error| {
                    warn!(symbol, %error, "scan failed");
                    ScanError {
                        symbol: symbol.to_string(),
                        error,
                    }
                })
        })
        .collect();

    let mut successes = Vec::new();
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(r) => successes.push(r),
            Err(e) => errors.push(e),
        }
    }

    (successes, errors)
}

fn scan_one(pattern: &Pattern, config: &ScanConfig, bars: &BarSeries) -> Result<Vec<PatternInstance>> {
    if config.validate_data {
        bars.validate()?;
    }
    let search = pattern.search(bars);
    match config.limit {
        Some(limit) => search.iter().take(limit).collect(),
        None => search.collect_all(),
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::{bearish, bullish};

    fn series(numbers: &[u64]) -> BarSeries {
        numbers
            .iter()
            .map(|&n| Bar::ohlc(n, 100.0, 101.0, 99.0, 100.5))
            .collect()
    }

    #[test]
    fn test_ratio_validation() {
        assert!(Ratio::new(0.0).is_ok());
        assert!(Ratio::new(1.0).is_ok());
        assert!(Ratio::new(0.5).is_ok());
        assert!(Ratio::new(-0.1).is_err());
        assert!(Ratio::new(1.1).is_err());
        assert!(Ratio::new(f64::NAN).is_err());
        assert!(Ratio::new(f64::INFINITY).is_err());
    }

    #[test]
    fn test_period_validation() {
        assert!(Period::new(1).is_ok());
        assert!(Period::new(100).is_ok());
        assert!(Period::new(0).is_err());
    }

    #[test]
    fn test_ohlcv_ext() {
        let bar = Bar::ohlc(1, 100.0, 110.0, 90.0, 105.0);
        assert_eq!(bar.body(), 5.0);
        assert_eq!(bar.range(), 20.0);
        assert!(bar.is_bullish());
        assert!(!bar.is_bearish());
        assert!((bar.body_ratio().unwrap() - 0.25).abs() < 0.001);
    }

    #[test]
    fn test_validate_rejects_bad_numbering() {
        let bars = vec![
            Bar::ohlc(1, 1.0, 2.0, 0.5, 1.5),
            Bar::ohlc(3, 1.0, 2.0, 0.5, 1.5),
            Bar::ohlc(3, 1.0, 2.0, 0.5, 1.5),
        ];
        match BarSeries::try_new(bars) {
            Err(PatternError::NonMonotonic {
                index,
                previous,
                current,
            }) => {
                assert_eq!(index, 2);
                assert_eq!((previous, current), (3, 3));
            }
            other => panic!("expected NonMonotonic, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_reports_bar_index() {
        let bars = vec![
            Bar::ohlc(1, 1.0, 2.0, 0.5, 1.5),
            Bar::ohlc(2, 1.0, 0.5, 2.0, 1.5),
        ];
        match BarSeries::try_new(bars) {
            Err(PatternError::InvalidOHLCV { index, .. }) => assert_eq!(index, 1),
            other => panic!("expected InvalidOHLCV, got {other:?}"),
        }
    }

    #[test]
    fn test_slices_keep_numbers() {
        let bars = series(&[10, 11, 12, 13, 14]);
        let tail = bars.after_number(11).unwrap();
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].number, 12);
        assert_eq!(tail.position_of(13).unwrap(), 1);

        let from = bars.from_number(11).unwrap();
        assert_eq!(from[0].number, 11);
    }

    #[test]
    fn test_lookup_of_missing_number() {
        let bars = series(&[1, 2, 4]);
        assert!(matches!(
            bars.position_of(3),
            Err(PatternError::UnknownBarNumber { number: 3 })
        ));
        assert!(bars.after_number(3).is_err());
    }

    #[test]
    fn test_since_needs_no_exact_number() {
        let bars = series(&[1, 6, 11, 16]);
        let numbers = |n: u64| -> Vec<u64> { bars.since(n).iter().map(|b| b.number).collect() };
        assert_eq!(numbers(6), vec![6, 11, 16]);
        assert_eq!(numbers(7), vec![11, 16]);
        assert!(numbers(17).is_empty());
    }

    #[test]
    fn test_slice_clamps() {
        let bars = series(&[1, 2, 3]);
        assert_eq!(bars.slice(2..10).len(), 1);
        assert!(bars.slice(5..10).is_empty());
        assert!(bars.after_number(3).unwrap().is_empty());
    }

    #[test]
    fn test_covering_same_numbering() {
        let bars = series(&[1, 2, 3, 4, 5]);
        let window = bars.covering(Span::new(2, 4).unwrap());
        let numbers: Vec<u64> = window.iter().map(|b| b.number).collect();
        assert_eq!(numbers, vec![2, 3, 4]);
    }

    #[test]
    fn test_covering_coarse_numbering() {
        let weekly = series(&[1, 6, 11, 16]);
        let numbers = |span: Span| -> Vec<u64> {
            weekly.covering(span).iter().map(|b| b.number).collect()
        };
        assert_eq!(numbers(Span::new(3, 4).unwrap()), vec![1]);
        assert_eq!(numbers(Span::new(5, 7).unwrap()), vec![1, 6]);
        assert_eq!(numbers(Span::new(20, 25).unwrap()), vec![16]);
    }

    #[test]
    fn test_coverage() {
        let weekly = series(&[1, 6, 11]);
        assert_eq!(weekly.coverage(Span::new(1, 1).unwrap()), Span::new(1, 5).unwrap());
        assert_eq!(weekly.coverage(Span::new(6, 6).unwrap()).last, 10);
        assert_eq!(weekly.coverage(Span::new(11, 11).unwrap()).last, u64::MAX);

        let daily = series(&[1, 2, 3]);
        assert_eq!(daily.coverage(Span::new(1, 2).unwrap()), Span::new(1, 2).unwrap());
    }

    #[test]
    fn test_resample() {
        let bars: BarSeries = (1..=5)
            .map(|n| {
                let base = n as f64;
                Bar::ohlc(n, base, base + 2.0, base - 1.0, base + 1.0).with_volume(10.0)
            })
            .collect();
        let coarse = bars.resample(Period::new(2).unwrap());
        assert_eq!(coarse.len(), 3);
        assert_eq!(coarse[0].number, 1);
        assert_eq!(coarse[0].open, 1.0);
        assert_eq!(coarse[0].close, 3.0);
        assert_eq!(coarse[0].high, 4.0);
        assert_eq!(coarse[0].low, 0.0);
        assert_eq!(coarse[0].volume, 20.0);
        assert_eq!(coarse[2].number, 5);
        assert_eq!(coarse[2].volume, 10.0);
    }

    #[test]
    fn test_instance_invariants() {
        let a = Bar::ohlc(3, 1.0, 2.0, 0.5, 1.5);
        let b = Bar::ohlc(7, 1.0, 2.0, 0.5, 1.5);
        let inner = PatternInstance::single(a);
        let outer = PatternInstance::new(vec![a, b], vec![inner.clone()]).unwrap();
        assert_eq!(outer.span(), Span::new(3, 7).unwrap());
        assert_eq!(outer.span().len(), 5);

        assert!(matches!(
            PatternInstance::new(Vec::new(), Vec::new()),
            Err(PatternError::EmptyAnchors)
        ));
        let stray = PatternInstance::single(Bar::ohlc(9, 1.0, 2.0, 0.5, 1.5));
        assert!(PatternInstance::new(vec![a, b], vec![stray]).is_err());
    }

    #[test]
    fn test_spanning() {
        let bars = series(&[4, 5, 6]);
        let run = PatternInstance::spanning(&bars).unwrap();
        assert_eq!(run.anchor_numbers(), vec![4, 6]);
        assert_eq!(run.span(), Span::new(4, 6).unwrap());
        assert!(PatternInstance::spanning(&[]).is_err());
    }

    #[test]
    fn test_predicate_error_display() {
        let err = PatternError::predicate("threshold missing");
        assert_eq!(err.to_string(), "Predicate failed: threshold missing");
    }

    #[test]
    fn test_predicate_error_source_is_caller_error() {
        use std::error::Error as _;

        #[derive(Debug)]
        struct Missing(&'static str);

        impl fmt::Display for Missing {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "missing {}", self.0)
            }
        }

        impl std::error::Error for Missing {}

        let err = PatternError::predicate(Missing("volume"));
        let source = err.source().expect("caller error exposed as source");
        assert_eq!(source.to_string(), "missing volume");
        let original = source.downcast_ref::<Missing>().expect("downcasts to caller type");
        assert_eq!(original.0, "volume");

        // Clones share the caller error
        let PatternError::Predicate(caller) = err.clone() else {
            panic!("expected predicate error");
        };
        assert!(caller.downcast_ref::<Missing>().is_some());
    }

    #[test]
    fn test_parallel_scan() {
        let up: BarSeries = (1..=10)
            .map(|n| Bar::ohlc(n, 100.0, 102.0, 99.0, 101.0))
            .collect();
        let down: BarSeries = (1..=10)
            .map(|n| Bar::ohlc(n, 101.0, 102.0, 99.0, 100.0))
            .collect();
        let broken = BarSeries::new(vec![
            Bar::ohlc(2, 100.0, 102.0, 99.0, 101.0),
            Bar::ohlc(1, 100.0, 102.0, 99.0, 101.0),
        ]);

        let instruments: Vec<(&str, &BarSeries)> =
            vec![("UP", &up), ("DOWN", &down), ("BROKEN", &broken)];
        let config = ScanConfig::new().validate_data(true).limit(3);
        let (results, errors) = scan_parallel(&bullish(), &config, instruments);

        assert_eq!(results.len(), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].symbol, "BROKEN");
        let up_result = results.iter().find(|r| r.symbol == "UP").unwrap();
        assert_eq!(up_result.instances.len(), 3);
        let down_result = results.iter().find(|r| r.symbol == "DOWN").unwrap();
        assert!(down_result.instances.is_empty());
    }

    #[test]
    fn test_quick_start_shape() {
        let bars = BarSeries::new(vec![
            Bar::ohlc(1, 10.0, 12.5, 9.5, 12.0),
            Bar::ohlc(2, 12.0, 12.5, 10.5, 11.0),
        ]);
        let found = bullish()
            .followed_by(bearish())
            .search(&bars)
            .collect_all()
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].subs().len(), 2);
    }
}
