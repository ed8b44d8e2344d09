//! Pattern algebra: atomic extractors and the combinators that compose them.
//!
//! A [`Pattern`] is an immutable, cheaply clonable value. Building one never
//! touches data; [`Pattern::search`] returns a [`Search`] that re-runs the
//! matching lazily every time it is iterated.
//!
//! # Ordering
//!
//! Atomic patterns yield instances in whatever order their extractor chooses;
//! the built-in extractors yield longest span first, ties broken by ascending
//! `span.first`. Combinators preserve the order of their left operand and,
//! for each left instance, the order of the right operand. A sequential
//! composite is therefore not globally sorted by total length: a long left
//! instance may pair with a short right one and precede a pair that is longer
//! overall.

use std::{
    collections::{HashMap, VecDeque},
    fmt, iter,
    sync::Arc,
};

use tracing::{debug, trace};

use crate::{
    resolution::Resolutions,
    Bar, BarSeries, PatternId, PatternInstance, Result, Span,
};

/// Lazy sequence of search results.
pub type Matches = Box<dyn Iterator<Item = Result<PatternInstance>> + Send>;

/// Raw function lifted by [`Pattern::atomic`].
pub type Extractor = Arc<dyn Fn(&BarSeries) -> Matches + Send + Sync>;

/// Post-hoc predicate applied by [`Pattern::constrained_by`].
pub type Constraint = Arc<dyn Fn(&PatternInstance) -> Result<bool> + Send + Sync>;

// ============================================================
// SEQUENTIAL BOUNDARY
// ============================================================

/// Where the second half of a sequential composite starts searching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// The right pattern searches strictly after the left instance and must
    /// start on the very next bar of the series. Spans do not overlap and no
    /// anchor is shared.
    Exclusive,
    /// The right pattern searches from the left instance's last bar and must
    /// start on it. That pivot bar appears once in the composite's anchors.
    Inclusive,
}

/// Convention used by [`Pattern::followed_by`].
pub const DEFAULT_BOUNDARY: Boundary = Boundary::Exclusive;

impl Boundary {
    /// The frame the right pattern searches after `left`, which ended in
    /// `home`. `None` when nothing follows the left instance.
    fn restart(
        self,
        frame: &Resolutions,
        home: &BarSeries,
        left: &PatternInstance,
    ) -> Result<Option<Resolutions>> {
        let last = left.span().last;
        match self {
            Boundary::Exclusive => {
                let rest = home.after_number(last)?;
                Ok(rest.first().map(|next| frame.since(next.number)))
            }
            Boundary::Inclusive => {
                home.position_of(last)?;
                Ok(Some(frame.reslice(Span {
                    first: last,
                    last: u64::MAX,
                })))
            }
        }
    }
}

// ============================================================
// PATTERN
// ============================================================

/// The closed set of pattern shapes.
pub enum PatternKind {
    Atomic {
        id: PatternId,
        extractor: Extractor,
    },
    Constrained {
        pattern: Pattern,
        constraint: Constraint,
    },
    Sequential {
        first: Pattern,
        then: Pattern,
        boundary: Boundary,
    },
    Conjunction {
        left: Pattern,
        right: Pattern,
    },
    ResolutionIndexed {
        slot: usize,
        pattern: Pattern,
    },
}

/// Composable matcher over a [`BarSeries`].
///
/// Patterns hold no mutable state and are `Send + Sync`, so one value can
/// serve any number of concurrent searches.
#[derive(Clone)]
pub struct Pattern(Arc<PatternKind>);

impl Pattern {
    fn from_kind(kind: PatternKind) -> Self {
        Self(Arc::new(kind))
    }

    #[inline]
    pub fn kind(&self) -> &PatternKind {
        &self.0
    }

    /// Lift a raw extractor. The extractor is responsible for yielding valid
    /// instances drawn from the series it is given, most specific first.
    pub fn atomic<F>(id: PatternId, extractor: F) -> Self
    where
        F: Fn(&BarSeries) -> Matches + Send + Sync + 'static,
    {
        Self::from_kind(PatternKind::Atomic {
            id,
            extractor: Arc::new(extractor),
        })
    }

    /// Every bar satisfying `pred`, as a one-bar instance, in series order.
    pub fn each_bar<F>(id: PatternId, pred: F) -> Self
    where
        F: Fn(&Bar) -> bool + Send + Sync + 'static,
    {
        Self::try_each_bar(id, move |bar| Ok(pred(bar)))
    }

    /// Fallible [`Pattern::each_bar`]; a failing predicate ends up in the
    /// search output as an `Err`.
    pub fn try_each_bar<F>(id: PatternId, pred: F) -> Self
    where
        F: Fn(&Bar) -> Result<bool> + Send + Sync + 'static,
    {
        let pred = Arc::new(pred);
        Self::atomic(id, move |bars| {
            let pred = Arc::clone(&pred);
            let bars = bars.clone();
            let matches: Matches = Box::new((0..bars.len()).filter_map(move |i| {
                let bar = bars[i];
                match pred(&bar) {
                    Ok(true) => Some(Ok(PatternInstance::single(bar))),
                    Ok(false) => None,
                    Err(e) => Some(Err(e)),
                }
            }));
            matches
        })
    }

    /// Every window of `len` consecutive bars satisfying `pred`, anchored on
    /// all of its bars, in series order.
    pub fn each_window<F>(id: PatternId, len: usize, pred: F) -> Self
    where
        F: Fn(&[Bar]) -> bool + Send + Sync + 'static,
    {
        let len = len.max(1);
        let pred = Arc::new(pred);
        Self::atomic(id, move |bars| {
            let pred = Arc::clone(&pred);
            let bars = bars.clone();
            let starts = bars.len().saturating_sub(len - 1);
            let matches: Matches = Box::new((0..starts).filter_map(move |start| {
                let window = &bars[start..start + len];
                pred(window).then(|| PatternInstance::new(window.to_vec(), Vec::new()))
            }));
            matches
        })
    }

    /// Keep only the instances satisfying `pred`, in their original order.
    pub fn constrained_by<F>(self, pred: F) -> Self
    where
        F: Fn(&PatternInstance) -> bool + Send + Sync + 'static,
    {
        self.try_constrained_by(move |instance| Ok(pred(instance)))
    }

    /// Fallible [`Pattern::constrained_by`]; errors are passed through to the
    /// consumer rather than dropping the instance.
    pub fn try_constrained_by<F>(self, pred: F) -> Self
    where
        F: Fn(&PatternInstance) -> Result<bool> + Send + Sync + 'static,
    {
        Self::from_kind(PatternKind::Constrained {
            pattern: self,
            constraint: Arc::new(pred),
        })
    }

    /// `self → then` with the [`DEFAULT_BOUNDARY`] hand-off.
    pub fn followed_by(self, then: Pattern) -> Self {
        self.followed_by_with(then, DEFAULT_BOUNDARY)
    }

    pub fn followed_by_with(self, then: Pattern, boundary: Boundary) -> Self {
        Self::from_kind(PatternKind::Sequential {
            first: self,
            then,
            boundary,
        })
    }

    /// `self ∧ other`: both patterns must recognize exactly the same span.
    pub fn overlay(self, other: Pattern) -> Self {
        Self::from_kind(PatternKind::Conjunction {
            left: self,
            right: other,
        })
    }

    /// Apply `pattern` to slot `slot` of a [`Resolutions`] tuple. On a plain
    /// series every slot is that series, so the index has no effect there.
    pub fn at(slot: usize, pattern: Pattern) -> Self {
        Self::from_kind(PatternKind::ResolutionIndexed { slot, pattern })
    }

    /// Restartable, lazy search over `bars`.
    pub fn search(&self, bars: &BarSeries) -> Search {
        Search {
            pattern: self.clone(),
            bars: bars.clone(),
        }
    }

    /// Search a plain series: every slot an [`Pattern::at`] names is that
    /// same series.
    pub(crate) fn matches(&self, bars: &BarSeries) -> Matches {
        match Resolutions::uniform(bars.clone(), self.depth()) {
            Ok(frame) => self.matches_in(&frame, 0),
            Err(e) => Box::new(iter::once(Err(e))),
        }
    }

    /// Search `frame`, running atoms on `slot` until an [`Pattern::at`] below
    /// this node picks another one.
    pub(crate) fn matches_in(&self, frame: &Resolutions, slot: usize) -> Matches {
        match self.kind() {
            PatternKind::Atomic { extractor, .. } => match frame.slot(slot) {
                Ok(bars) => extractor(bars),
                Err(e) => Box::new(iter::once(Err(e))),
            },
            PatternKind::Constrained {
                pattern,
                constraint,
            } => {
                let constraint = Arc::clone(constraint);
                Box::new(pattern.matches_in(frame, slot).filter_map(move |found| match found {
                    Ok(instance) => match constraint(&instance) {
                        Ok(true) => Some(Ok(instance)),
                        Ok(false) => {
                            trace!(span = ?instance.span(), "rejected by constraint");
                            None
                        }
                        Err(e) => Some(Err(e)),
                    },
                    Err(e) => Some(Err(e)),
                }))
            }
            PatternKind::Sequential {
                first,
                then,
                boundary,
            } => Box::new(FollowedBy {
                frame: frame.clone(),
                slot,
                left: first.matches_in(frame, slot),
                left_end: first.end_slot(slot),
                then: then.clone(),
                then_start: then.start_slot(slot),
                boundary: *boundary,
                current: None,
            }),
            PatternKind::Conjunction { left, right } => Box::new(Overlay {
                left: left.matches_in(frame, slot),
                right: RightSide::Pending {
                    pattern: right.clone(),
                    frame: frame.clone(),
                    slot,
                },
                index: HashMap::new(),
                waiting: None,
                ready: VecDeque::new(),
            }),
            PatternKind::ResolutionIndexed { slot, pattern } => pattern.matches_in(frame, *slot),
        }
    }

    /// Slots a search needs: one past the highest [`Pattern::at`] index.
    pub(crate) fn depth(&self) -> usize {
        match self.kind() {
            PatternKind::Atomic { .. } => 1,
            PatternKind::Constrained { pattern, .. } => pattern.depth(),
            PatternKind::Sequential { first, then, .. } => first.depth().max(then.depth()),
            PatternKind::Conjunction { left, right } => left.depth().max(right.depth()),
            PatternKind::ResolutionIndexed { slot, pattern } => {
                slot.saturating_add(1).max(pattern.depth())
            }
        }
    }

    /// Slot holding the first bar of every instance when matching on `slot`.
    pub(crate) fn start_slot(&self, slot: usize) -> usize {
        match self.kind() {
            PatternKind::Atomic { .. } => slot,
            PatternKind::Constrained { pattern, .. } => pattern.start_slot(slot),
            PatternKind::Sequential { first, .. } => first.start_slot(slot),
            PatternKind::Conjunction { left, .. } => left.start_slot(slot),
            PatternKind::ResolutionIndexed { slot, pattern } => pattern.start_slot(*slot),
        }
    }

    /// Slot holding the last bar of every instance when matching on `slot`.
    pub(crate) fn end_slot(&self, slot: usize) -> usize {
        match self.kind() {
            PatternKind::Atomic { .. } => slot,
            PatternKind::Constrained { pattern, .. } => pattern.end_slot(slot),
            PatternKind::Sequential { then, .. } => then.end_slot(slot),
            PatternKind::Conjunction { left, .. } => left.end_slot(slot),
            PatternKind::ResolutionIndexed { slot, pattern } => pattern.end_slot(*slot),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            PatternKind::Atomic { id, .. } => write!(f, "{id}"),
            PatternKind::Constrained { pattern, .. } => write!(f, "{pattern}?"),
            PatternKind::Sequential {
                first,
                then,
                boundary: Boundary::Exclusive,
            } => write!(f, "({first} -> {then})"),
            PatternKind::Sequential {
                first,
                then,
                boundary: Boundary::Inclusive,
            } => write!(f, "({first} ~> {then})"),
            PatternKind::Conjunction { left, right } => write!(f, "({left} & {right})"),
            PatternKind::ResolutionIndexed { slot, pattern } => write!(f, "{pattern}@{slot}"),
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&format_args!("{self}")).finish()
    }
}

// ============================================================
// SEARCH
// ============================================================

/// A pattern bound to its input. Every call to [`Search::iter`] starts a
/// fresh traversal, so the same match set can be consumed more than once.
#[derive(Clone)]
pub struct Search {
    pattern: Pattern,
    bars: BarSeries,
}

impl Search {
    pub fn iter(&self) -> Matches {
        debug!(pattern = %self.pattern, bars = self.bars.len(), "starting search");
        self.pattern.matches(&self.bars)
    }

    /// Drain the whole search, stopping at the first error.
    pub fn collect_all(&self) -> Result<Vec<PatternInstance>> {
        self.iter().collect()
    }

    #[inline]
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    #[inline]
    pub fn bars(&self) -> &BarSeries {
        &self.bars
    }
}

impl IntoIterator for Search {
    type Item = Result<PatternInstance>;
    type IntoIter = Matches;

    fn into_iter(self) -> Matches {
        self.iter()
    }
}

impl IntoIterator for &Search {
    type Item = Result<PatternInstance>;
    type IntoIter = Matches;

    fn into_iter(self) -> Matches {
        self.iter()
    }
}

// ============================================================
// COMBINATOR ITERATORS
// ============================================================

struct Pending {
    left: PatternInstance,
    handoff: u64,
    right: Matches,
}

/// Drives `first → then`: one right-hand search per left instance, started
/// only when the previous one is exhausted.
struct FollowedBy {
    frame: Resolutions,
    slot: usize,
    left: Matches,
    left_end: usize,
    then: Pattern,
    then_start: usize,
    boundary: Boundary,
    current: Option<Pending>,
}

impl FollowedBy {
    fn start_right(&self, left: PatternInstance) -> Result<Option<Pending>> {
        let home = self.frame.slot(self.left_end)?;
        let Some(rest) = self.boundary.restart(&self.frame, home, &left)? else {
            return Ok(None);
        };
        let Some(handoff) = rest.slot(self.then_start)?.first().map(|b| b.number) else {
            return Ok(None);
        };
        Ok(Some(Pending {
            right: self.then.matches_in(&rest, self.slot),
            handoff,
            left,
        }))
    }
}

impl Iterator for FollowedBy {
    type Item = Result<PatternInstance>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(pending) = self.current.as_mut() {
                match pending.right.next() {
                    Some(Ok(right)) => {
                        if right.first_anchor().number == pending.handoff {
                            return Some(Ok(join_sequential(&pending.left, right)));
                        }
                        trace!(
                            left = ?pending.left.span(),
                            right = ?right.span(),
                            "no hand-off"
                        );
                        continue;
                    }
                    Some(Err(e)) => return Some(Err(e)),
                    None => self.current = None,
                }
            }

            let left = match self.left.next()? {
                Ok(instance) => instance,
                Err(e) => return Some(Err(e)),
            };
            match self.start_right(left) {
                Ok(pending) => self.current = pending,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Appends the right anchors, dropping a pivot bar the left side already holds.
fn join_sequential(left: &PatternInstance, right: PatternInstance) -> PatternInstance {
    let shared = usize::from(right.first_anchor().number == left.last_anchor().number);
    let mut anchors = left.anchors().to_vec();
    anchors.extend(right.anchors().iter().skip(shared).copied());
    let span = Span {
        first: left.span().first,
        last: right.span().last,
    };
    PatternInstance::from_parts(anchors, span, vec![left.clone(), right])
}

enum RightSide {
    Pending {
        pattern: Pattern,
        frame: Resolutions,
        slot: usize,
    },
    Running(Matches),
    Done,
}

/// Drives `left ∧ right`. The right pattern searches the same input as the
/// left one, once, and is started on the first left instance; its results
/// are indexed by span and paired with every left instance of equal span.
struct Overlay {
    left: Matches,
    right: RightSide,
    index: HashMap<Span, Vec<PatternInstance>>,
    waiting: Option<PatternInstance>,
    ready: VecDeque<PatternInstance>,
}

impl Iterator for Overlay {
    type Item = Result<PatternInstance>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(joined) = self.ready.pop_front() {
                return Some(Ok(joined));
            }

            let left = match self.waiting.take() {
                Some(left) => left,
                None => match self.left.next()? {
                    Ok(instance) => instance,
                    Err(e) => return Some(Err(e)),
                },
            };

            if let RightSide::Pending {
                pattern,
                frame,
                slot,
            } = &self.right
            {
                self.right = RightSide::Running(pattern.matches_in(frame, *slot));
            }
            if let RightSide::Running(right) = &mut self.right {
                match right.next() {
                    Some(Ok(found)) => {
                        self.index.entry(found.span()).or_default().push(found);
                        self.waiting = Some(left);
                        continue;
                    }
                    Some(Err(e)) => {
                        self.waiting = Some(left);
                        return Some(Err(e));
                    }
                    None => self.right = RightSide::Done,
                }
            }

            match self.index.get(&left.span()) {
                Some(found) => self
                    .ready
                    .extend(found.iter().map(|right| join_overlay(&left, right.clone()))),
                None => trace!(left = ?left.span(), "no right instance with this span"),
            }
        }
    }
}

fn join_overlay(left: &PatternInstance, right: PatternInstance) -> PatternInstance {
    let mut anchors = left.anchors().to_vec();
    for bar in right.anchors() {
        if !anchors.iter().any(|seen| seen.number == bar.number) {
            anchors.push(*bar);
        }
    }
    PatternInstance::from_parts(anchors, left.span(), vec![left.clone(), right])
}

#[cfg(test)]
mod tests {
    use std::{
        iter,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::PatternError;

    fn bars(pairs: &[(f64, f64)]) -> BarSeries {
        pairs
            .iter()
            .enumerate()
            .map(|(i, &(o, c))| Bar::ohlc(i as u64 + 1, o, o.max(c) + 1.0, o.min(c) - 1.0, c))
            .collect()
    }

    fn up() -> Pattern {
        Pattern::each_bar(PatternId("UP"), |b| b.close > b.open)
    }

    fn down() -> Pattern {
        Pattern::each_bar(PatternId("DOWN"), |b| b.close < b.open)
    }

    fn spans(found: &[PatternInstance]) -> Vec<(u64, u64)> {
        found.iter().map(|i| (i.span().first, i.span().last)).collect()
    }

    #[test]
    fn test_display() {
        let p = up().followed_by(down()).overlay(Pattern::at(1, up()));
        assert_eq!(p.to_string(), "((UP -> DOWN) & UP@1)");
        let q = up().followed_by_with(down(), Boundary::Inclusive).constrained_by(|_| true);
        assert_eq!(q.to_string(), "(UP ~> DOWN)?");
    }

    #[test]
    fn test_each_window() {
        let series = bars(&[(1.0, 2.0), (2.0, 3.0), (3.0, 2.0), (2.0, 4.0), (4.0, 5.0)]);
        let two_up = Pattern::each_window(PatternId("TWO_UP"), 2, |w| {
            w.iter().all(|b| b.close > b.open)
        });
        let found = two_up.search(&series).collect_all().unwrap();
        assert_eq!(spans(&found), vec![(1, 2), (4, 5)]);
        assert_eq!(found[0].anchor_numbers(), vec![1, 2]);

        let short = bars(&[(1.0, 2.0)]);
        assert!(two_up.search(&short).collect_all().unwrap().is_empty());
    }

    #[test]
    fn test_exclusive_handoff_requires_adjacent_bar() {
        let series = bars(&[(1.0, 2.0), (2.0, 1.0), (1.0, 2.0), (2.0, 2.0), (2.0, 1.0)]);
        let found = up().followed_by(down()).search(&series).collect_all().unwrap();
        assert_eq!(spans(&found), vec![(1, 2)]);
        assert_eq!(found[0].anchor_numbers(), vec![1, 2]);
    }

    #[test]
    fn test_inclusive_handoff_shares_pivot() {
        let series = bars(&[(1.0, 2.0), (2.0, 3.0), (3.0, 2.0), (2.0, 1.0)]);
        let rise = Pattern::each_window(PatternId("RISE"), 2, |w| w[1].close > w[0].close);
        let fall = Pattern::each_window(PatternId("FALL"), 2, |w| w[1].close < w[0].close);
        let peak = rise.followed_by_with(fall, Boundary::Inclusive);
        let found = peak.search(&series).collect_all().unwrap();
        assert_eq!(spans(&found), vec![(1, 3)]);
        assert_eq!(found[0].anchor_numbers(), vec![1, 2, 3]);
        assert_eq!(found[0].subs()[0].span().last, found[0].subs()[1].span().first);
    }

    #[test]
    fn test_constraint_error_propagates() {
        let series = bars(&[(1.0, 2.0), (2.0, 3.0)]);
        let failing = up().try_constrained_by(|i| {
            if i.span().first == 2 {
                Err(PatternError::predicate("boom"))
            } else {
                Ok(true)
            }
        });
        let results: Vec<_> = failing.search(&series).iter().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(PatternError::Predicate(_))));
        assert!(failing.search(&series).collect_all().is_err());
    }

    #[test]
    fn test_search_is_lazy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let counted = Pattern::each_bar(PatternId("COUNTED"), move |b| {
            counter.fetch_add(1, Ordering::SeqCst);
            b.close > b.open
        });
        let series = bars(&[(1.0, 2.0); 50]);
        let first: Vec<_> = counted.search(&series).iter().take(2).collect();
        assert_eq!(first.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_search_is_restartable() {
        let series = bars(&[(1.0, 2.0), (2.0, 1.0), (1.0, 2.0)]);
        let search = up().followed_by(down()).search(&series);
        let once: Vec<_> = search.iter().collect::<Result<_>>().unwrap();
        let twice: Vec<_> = (&search).into_iter().collect::<Result<_>>().unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_extractor_outside_series_is_reported() {
        let series = bars(&[(1.0, 2.0), (2.0, 1.0)]);
        let stray = Pattern::atomic(PatternId("STRAY"), |_| {
            let m: Matches = Box::new(iter::once(Ok(PatternInstance::single(Bar::ohlc(
                99, 1.0, 2.0, 0.5, 1.5,
            )))));
            m
        });
        let result = stray.followed_by(down()).search(&series).collect_all();
        assert!(matches!(result, Err(PatternError::UnknownBarNumber { number: 99 })));
    }

    #[test]
    fn test_overlay_dedups_anchors() {
        let series = bars(&[(1.0, 2.0), (2.0, 1.0), (1.0, 2.0)]);
        let found = up().overlay(up()).search(&series).collect_all().unwrap();
        assert_eq!(spans(&found), vec![(1, 1), (3, 3)]);
        assert_eq!(found[0].anchor_numbers(), vec![1]);
        assert_eq!(found[0].subs().len(), 2);
    }
}
