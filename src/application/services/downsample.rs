//! Downsample planning for bounded decodes.

use crate::domain::errors::FetchError;

/// Default number of factors tried before giving up.
pub const DEFAULT_MAX_DOWNSAMPLE_ATTEMPTS: u32 = 5;

/// Chosen downsample factor and the dimensions it yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownsamplePlan {
    /// Power-of-two divisor applied to both axes. `1` keeps full size.
    pub factor: u32,
    /// Sampled width.
    pub width: u32,
    /// Sampled height.
    pub height: u32,
    /// Factors tried, including the chosen one.
    pub attempts: u32,
}

impl DownsamplePlan {
    /// Returns true if the image is decoded at full size.
    #[must_use]
    pub const fn is_identity(&self) -> bool {
        self.factor == 1
    }
}

/// Dimensions after sampling every `factor`-th pixel, rounded up.
#[must_use]
pub const fn sampled_dimensions(width: u32, height: u32, factor: u32) -> (u32, u32) {
    (width.div_ceil(factor), height.div_ceil(factor))
}

/// Picks the smallest power-of-two factor whose sampled dimensions fit
/// within `max_width` x `max_height`.
///
/// Factors 1, 2, 4, ... are tried, at most `max_attempts` of them (at least
/// one is always tried).
///
/// # Errors
/// Returns [`FetchError::DownsampleBoundsUnreachable`] if no tried factor
/// fits.
pub fn plan_downsample(
    width: u32,
    height: u32,
    max_width: u32,
    max_height: u32,
    max_attempts: u32,
) -> Result<DownsamplePlan, FetchError> {
    let budget = max_attempts.max(1);
    let mut factor = 1u32;

    for attempt in 1..=budget {
        let (w, h) = sampled_dimensions(width, height, factor);
        if w <= max_width && h <= max_height {
            return Ok(DownsamplePlan {
                factor,
                width: w,
                height: h,
                attempts: attempt,
            });
        }
        let Some(next) = factor.checked_mul(2) else {
            return Err(unreachable_bounds(width, height, max_width, max_height, attempt));
        };
        factor = next;
    }

    Err(unreachable_bounds(width, height, max_width, max_height, budget))
}

const fn unreachable_bounds(
    width: u32,
    height: u32,
    max_width: u32,
    max_height: u32,
    attempts: u32,
) -> FetchError {
    FetchError::DownsampleBoundsUnreachable {
        width,
        height,
        max_width,
        max_height,
        attempts,
    }
}
