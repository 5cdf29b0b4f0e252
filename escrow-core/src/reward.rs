//! Rating-to-reward curve

use crate::{settings::ProtocolSettings, types::Amount};

/// Lowest accepted rating
pub const MIN_RATING: u8 = 1;

/// Highest accepted rating
pub const MAX_RATING: u8 = 5;

/// Base reward for a rating, linearly interpolated between the configured bounds.
///
/// `min + (max - min) * (rating - 1) / 4`, rounded down. Ratings outside
/// `1..=5` are clamped; rejecting them is the feedback ledger's job.
///
/// The curve is non-decreasing in the rating. It is strictly increasing only
/// when `max - min` is at least 4 base units; below that, rounding down makes
/// adjacent ratings pay the same.
pub fn calculate_base_reward(rating: u8, settings: &ProtocolSettings) -> Amount {
    let min = settings.min_feedback_reward;
    let spread = settings
        .max_feedback_reward
        .checked_sub(min)
        .unwrap_or(Amount::ZERO);

    let steps = u128::from(rating.clamp(MIN_RATING, MAX_RATING) - MIN_RATING);
    let span = u128::from(MAX_RATING - MIN_RATING);

    // spread * steps / span <= spread, so the sum is bounded by max
    min.saturating_add(spread.mul_ratio(steps, span))
}
