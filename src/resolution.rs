//! Multi-resolution matching.
//!
//! A [`Resolutions`] tuple holds parallel series covering the same stretch of
//! time at different samplings, e.g. daily bars in slot 0 and weekly bars in
//! slot 1. Searching a pattern over the tuple runs it on slot 0, except where
//! a [`Pattern::at`] anywhere in the pattern picks another slot for its
//! operand. Every instance found is paired with the whole tuple re-sliced to
//! that instance's extent, so the next stage can keep matching inside a window
//! that is consistent across all resolutions.
//!
//! Slots are expected to share one number space (a coarse bar numbered by the
//! first fine bar it aggregates, as produced by [`BarSeries::resample`]); see
//! [`BarSeries::covering`] for the re-slicing rule.

use std::iter;

use tracing::trace;

use crate::{BarSeries, Pattern, PatternError, PatternInstance, Result, Span};

/// Non-empty ordered tuple of series at different resolutions.
#[derive(Debug, Clone)]
pub struct Resolutions {
    slots: Vec<BarSeries>,
}

impl Resolutions {
    pub fn new(slots: Vec<BarSeries>) -> Result<Self> {
        if slots.is_empty() {
            return Err(PatternError::EmptyResolutions);
        }
        Ok(Self { slots })
    }

    /// The same series in each of `len` slots.
    pub fn uniform(series: BarSeries, len: usize) -> Result<Self> {
        Self::new(vec![series; len])
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, slot: usize) -> Result<&BarSeries> {
        self.slots
            .get(slot)
            .ok_or(PatternError::ResolutionOutOfRange {
                slot,
                len: self.slots.len(),
            })
    }

    #[inline]
    pub fn slots(&self) -> &[BarSeries] {
        &self.slots
    }

    /// Every slot narrowed to the bars covering `span`. Searches re-slice by
    /// the found instance's [`BarSeries::coverage`] in its own slot, so a
    /// coarse match narrows finer slots to the whole period it stands for.
    pub fn reslice(&self, span: Span) -> Resolutions {
        Self {
            slots: self.slots.iter().map(|s| s.covering(span)).collect(),
        }
    }

    /// Every slot narrowed to the bars numbered `number` or later.
    pub fn since(&self, number: u64) -> Resolutions {
        Self {
            slots: self.slots.iter().map(|s| s.since(number)).collect(),
        }
    }
}

/// An instance found in one slot, paired with the tuple narrowed to it.
#[derive(Debug, Clone)]
pub struct ResolutionMatch {
    pub instance: PatternInstance,
    pub context: Resolutions,
}

/// Lazy sequence of multi-resolution search results.
pub type ResolutionMatches = Box<dyn Iterator<Item = Result<ResolutionMatch>> + Send>;

/// A pattern bound to a resolution tuple; restartable like [`crate::Search`].
#[derive(Clone)]
pub struct ResolutionSearch {
    pattern: Pattern,
    frame: Resolutions,
}

impl ResolutionSearch {
    pub fn iter(&self) -> ResolutionMatches {
        let end = self.pattern.end_slot(0);
        let home = match self.frame.slot(end) {
            Ok(bars) => bars.clone(),
            Err(e) => return Box::new(iter::once(Err(e))),
        };
        trace!(
            pattern = %self.pattern,
            slots = self.frame.len(),
            end,
            "searching resolutions"
        );

        let frame = self.frame.clone();
        Box::new(self.pattern.matches_in(&frame, 0).map(move |found| {
            found.map(|instance| ResolutionMatch {
                context: frame.reslice(home.coverage(instance.span())),
                instance,
            })
        }))
    }

    pub fn collect_all(&self) -> Result<Vec<ResolutionMatch>> {
        self.iter().collect()
    }
}

impl IntoIterator for ResolutionSearch {
    type Item = Result<ResolutionMatch>;
    type IntoIter = ResolutionMatches;

    fn into_iter(self) -> ResolutionMatches {
        self.iter()
    }
}

impl IntoIterator for &ResolutionSearch {
    type Item = Result<ResolutionMatch>;
    type IntoIter = ResolutionMatches;

    fn into_iter(self) -> ResolutionMatches {
        self.iter()
    }
}

impl Pattern {
    /// Search over a resolution tuple. Operands of [`Pattern::at`] run on
    /// their slot wherever they sit in the pattern; everything else runs on
    /// slot 0. Each context is re-sliced by the instance's coverage in the
    /// slot holding its last bar.
    pub fn search_resolutions(&self, frame: &Resolutions) -> ResolutionSearch {
        ResolutionSearch {
            pattern: self.clone(),
            frame: frame.clone(),
        }
    }
}
