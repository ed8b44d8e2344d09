//! Single-bar candlestick rules (TA-Lib style)
//!
//! Doji, Hammer, Shooting Star, Marubozu and Long Body. Body and shadow sizes
//! are judged against trailing averages over [`helpers::CANDLE_PERIOD`] bars.

use std::collections::HashMap;

use super::helpers::{
    self, is_body_long_f, is_body_short_f, is_doji_f, is_shadow_long, is_shadow_very_short_f,
};
use super::BarDetector;
use crate::params::{get_ratio, ParamMeta, ParameterizedDetector};
use crate::{Bar, OHLCVExt, PatternId, Ratio, Result};

impl_with_defaults!(
    DojiDetector,
    HammerDetector,
    ShootingStarDetector,
    MarubozuDetector,
    LongBodyDetector,
);

// ============================================================
// DOJI
// ============================================================

/// CDLDOJI - open and close (nearly) equal
#[derive(Debug, Clone, Copy)]
pub struct DojiDetector {
    pub doji_factor: f64,
}

impl Default for DojiDetector {
    fn default() -> Self {
        Self {
            doji_factor: helpers::DOJI_FACTOR,
        }
    }
}

impl BarDetector for DojiDetector {
    fn id(&self) -> PatternId {
        PatternId("CDL_DOJI")
    }

    fn min_bars(&self) -> usize {
        1
    }

    fn detect(&self, bars: &[Bar], index: usize) -> Option<std::ops::RangeInclusive<usize>> {
        let bar = bars.get(index)?;
        let avg_range = helpers::trailing_avg_range(bars, index, helpers::CANDLE_PERIOD);
        is_doji_f(bar.body(), avg_range, bar.range(), self.doji_factor).then_some(index..=index)
    }
}

// ============================================================
// HAMMER FAMILY
// ============================================================

/// CDLHAMMER - short body at the top of a long lower shadow
#[derive(Debug, Clone, Copy)]
pub struct HammerDetector {
    pub body_short_factor: f64,
    pub shadow_veryshort_factor: f64,
}

impl Default for HammerDetector {
    fn default() -> Self {
        Self {
            body_short_factor: helpers::BODY_SHORT_FACTOR,
            shadow_veryshort_factor: helpers::SHADOW_VERYSHORT_FACTOR,
        }
    }
}

impl BarDetector for HammerDetector {
    fn id(&self) -> PatternId {
        PatternId("CDL_HAMMER")
    }

    fn min_bars(&self) -> usize {
        1
    }

    fn detect(&self, bars: &[Bar], index: usize) -> Option<std::ops::RangeInclusive<usize>> {
        let bar = bars.get(index)?;
        let body = bar.body();
        let range = bar.range();
        let avg_body = helpers::trailing_avg_body(bars, index, helpers::CANDLE_PERIOD);
        let avg_range = helpers::trailing_avg_range(bars, index, helpers::CANDLE_PERIOD);

        if !is_body_short_f(body, avg_body, range, self.body_short_factor) {
            return None;
        }
        if !is_shadow_long(bar.lower_shadow(), body) {
            return None;
        }
        if !is_shadow_very_short_f(bar.upper_shadow(), avg_range, range, self.shadow_veryshort_factor)
        {
            return None;
        }
        Some(index..=index)
    }
}

/// CDLSHOOTINGSTAR - short body at the bottom of a long upper shadow
#[derive(Debug, Clone, Copy)]
pub struct ShootingStarDetector {
    pub body_short_factor: f64,
    pub shadow_veryshort_factor: f64,
}

impl Default for ShootingStarDetector {
    fn default() -> Self {
        Self {
            body_short_factor: helpers::BODY_SHORT_FACTOR,
            shadow_veryshort_factor: helpers::SHADOW_VERYSHORT_FACTOR,
        }
    }
}

impl BarDetector for ShootingStarDetector {
    fn id(&self) -> PatternId {
        PatternId("CDL_SHOOTINGSTAR")
    }

    fn min_bars(&self) -> usize {
        1
    }

    fn detect(&self, bars: &[Bar], index: usize) -> Option<std::ops::RangeInclusive<usize>> {
        let bar = bars.get(index)?;
        let body = bar.body();
        let range = bar.range();
        let avg_body = helpers::trailing_avg_body(bars, index, helpers::CANDLE_PERIOD);
        let avg_range = helpers::trailing_avg_range(bars, index, helpers::CANDLE_PERIOD);

        if !is_body_short_f(body, avg_body, range, self.body_short_factor) {
            return None;
        }
        if !is_shadow_long(bar.upper_shadow(), body) {
            return None;
        }
        if !is_shadow_very_short_f(bar.lower_shadow(), avg_range, range, self.shadow_veryshort_factor)
        {
            return None;
        }
        Some(index..=index)
    }
}

// ============================================================
// LONG BODIES
// ============================================================

/// CDLMARUBOZU - body fills the range, either colour
#[derive(Debug, Clone, Copy)]
pub struct MarubozuDetector {
    pub shadow_max_ratio: Ratio,
}

impl Default for MarubozuDetector {
    fn default() -> Self {
        Self {
            shadow_max_ratio: Ratio::new_const(helpers::MARUBOZU_SHADOW_RATIO),
        }
    }
}

impl BarDetector for MarubozuDetector {
    fn id(&self) -> PatternId {
        PatternId("CDL_MARUBOZU")
    }

    fn min_bars(&self) -> usize {
        1
    }

    fn detect(&self, bars: &[Bar], index: usize) -> Option<std::ops::RangeInclusive<usize>> {
        let bar = bars.get(index)?;
        helpers::is_marubozu(bar, self.shadow_max_ratio.get())?.then_some(index..=index)
    }
}

/// CDLLONGLINE (body only) - body longer than the trailing average body
#[derive(Debug, Clone, Copy)]
pub struct LongBodyDetector {
    pub body_long_factor: f64,
}

impl Default for LongBodyDetector {
    fn default() -> Self {
        Self {
            body_long_factor: helpers::BODY_LONG_FACTOR,
        }
    }
}

impl BarDetector for LongBodyDetector {
    fn id(&self) -> PatternId {
        PatternId("CDL_LONGBODY")
    }

    fn min_bars(&self) -> usize {
        1
    }

    fn detect(&self, bars: &[Bar], index: usize) -> Option<std::ops::RangeInclusive<usize>> {
        let bar = bars.get(index)?;
        let avg_body = helpers::trailing_avg_body(bars, index, helpers::CANDLE_PERIOD);
        is_body_long_f(bar.body(), avg_body, bar.range(), self.body_long_factor)
            .then_some(index..=index)
    }
}

// ============================================================
// PARAMETERIZED DETECTOR IMPLEMENTATIONS
// ============================================================

static DOJI_PARAMS: &[ParamMeta] = &[ParamMeta::ratio(
    "doji_factor",
    helpers::DOJI_FACTOR,
    (0.05, 0.3, 0.05),
    "Body at most this share of the trailing average range",
)];

static HAMMER_PARAMS: &[ParamMeta] = &[
    ParamMeta::ratio(
        "body_short_factor",
        helpers::BODY_SHORT_FACTOR,
        (0.5, 1.0, 0.1),
        "Body below this share of the trailing average body",
    ),
    ParamMeta::ratio(
        "shadow_veryshort_factor",
        helpers::SHADOW_VERYSHORT_FACTOR,
        (0.05, 0.3, 0.05),
        "Opposite shadow below this share of the trailing average range",
    ),
];

static MARUBOZU_PARAMS: &[ParamMeta] = &[ParamMeta::ratio(
    "shadow_max_ratio",
    helpers::MARUBOZU_SHADOW_RATIO,
    (0.0, 0.1, 0.01),
    "Maximum shadow as a share of the range",
)];

static LONG_BODY_PARAMS: &[ParamMeta] = &[ParamMeta::ratio(
    "body_long_factor",
    helpers::BODY_LONG_FACTOR,
    (0.5, 1.0, 0.1),
    "Body above this share of the trailing average body",
)];

impl ParameterizedDetector for DojiDetector {
    fn param_meta() -> &'static [ParamMeta] {
        DOJI_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            doji_factor: get_ratio(params, "doji_factor", helpers::DOJI_FACTOR)?.get(),
        })
    }

    fn pattern_id_str() -> &'static str {
        "CDL_DOJI"
    }
}

impl ParameterizedDetector for HammerDetector {
    fn param_meta() -> &'static [ParamMeta] {
        HAMMER_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            body_short_factor: get_ratio(params, "body_short_factor", helpers::BODY_SHORT_FACTOR)?
                .get(),
            shadow_veryshort_factor: get_ratio(
                params,
                "shadow_veryshort_factor",
                helpers::SHADOW_VERYSHORT_FACTOR,
            )?
            .get(),
        })
    }

    fn pattern_id_str() -> &'static str {
        "CDL_HAMMER"
    }
}

impl ParameterizedDetector for ShootingStarDetector {
    fn param_meta() -> &'static [ParamMeta] {
        HAMMER_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let hammer = HammerDetector::with_params(params)?;
        Ok(Self {
            body_short_factor: hammer.body_short_factor,
            shadow_veryshort_factor: hammer.shadow_veryshort_factor,
        })
    }

    fn pattern_id_str() -> &'static str {
        "CDL_SHOOTINGSTAR"
    }
}

impl ParameterizedDetector for MarubozuDetector {
    fn param_meta() -> &'static [ParamMeta] {
        MARUBOZU_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            shadow_max_ratio: get_ratio(params, "shadow_max_ratio", helpers::MARUBOZU_SHADOW_RATIO)?,
        })
    }

    fn pattern_id_str() -> &'static str {
        "CDL_MARUBOZU"
    }
}

impl ParameterizedDetector for LongBodyDetector {
    fn param_meta() -> &'static [ParamMeta] {
        LONG_BODY_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            body_long_factor: get_ratio(params, "body_long_factor", helpers::BODY_LONG_FACTOR)?
                .get(),
        })
    }

    fn pattern_id_str() -> &'static str {
        "CDL_LONGBODY"
    }
}
