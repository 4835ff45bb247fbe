//! Exponential time decay applied uniformly to keyword relevance scores.

/// Half-life of the recency boost, in days.
pub const HALF_LIFE_DAYS: f64 = 7.0;

/// Weight of the relevance score in the final blend.
pub const RELEVANCE_WEIGHT: f64 = 0.85;

/// Weight of the recency boost in the final blend.
pub const RECENCY_WEIGHT: f64 = 0.15;

/// Recency boost in `(0, 1]`: 1.0 for content updated `now`, halving every
/// [`HALF_LIFE_DAYS`].
pub fn recency_boost(updated_at: i64, now: i64) -> f64 {
    let age_days = (now - updated_at).max(0) as f64 / 86_400.0;
    let decay_rate = std::f64::consts::LN_2 / HALF_LIFE_DAYS;
    (-decay_rate * age_days).exp()
}

/// Blend a relevance score with a recency boost.
pub fn blend(relevance: f64, boost: f64) -> f64 {
    RELEVANCE_WEIGHT * relevance + RECENCY_WEIGHT * boost
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = 86_400;

    #[test]
    fn test_fresh_content_boost_is_one() {
        assert!((recency_boost(1_000, 1_000) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_half_life() {
        let boost = recency_boost(0, 7 * DAY);
        assert!((boost - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_boost_monotonically_decreases_with_age() {
        let now = 100 * DAY;
        let newer = recency_boost(now - DAY, now);
        let older = recency_boost(now - 10 * DAY, now);
        assert!(newer > older);
    }

    #[test]
    fn test_future_timestamps_clamp_to_now() {
        assert!((recency_boost(2 * DAY, DAY) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_blend_weights() {
        assert!((blend(1.0, 0.0) - 0.85).abs() < 1e-9);
        assert!((blend(0.0, 1.0) - 0.15).abs() < 1e-9);
    }
}
