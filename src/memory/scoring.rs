//! Pure relevance scoring with time decay.
//!
//! `relevance_score` is a total function of `(chunk, now, config)`; a decay
//! pass over a fixed snapshot is reproducible for a fixed `now`.

use crate::memory::chunk::{ConversationChunk, DecayConfig, DecayStrategy};
use chrono::{DateTime, Utc};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Compute the relevance of a chunk at `now`.
///
/// Starts at 1.0, applies the configured time decay over the chunk's age
/// in days, then multiplies in the importance boost for the chunk type,
/// a time-spent boost capped at 2x, and a related-chunk boost. The result
/// is clamped to `[0, 1]`.
pub fn relevance_score(chunk: &ConversationChunk, now: DateTime<Utc>, config: &DecayConfig) -> f64 {
    let age_days = (now - chunk.timestamp).num_seconds().max(0) as f64 / SECONDS_PER_DAY;

    let mut score = 1.0 * decay_factor(age_days, config);

    if let Some(boost) = config.importance_boost.get(&chunk.chunk_type) {
        score *= boost;
    }

    if let Some(minutes) = chunk.metadata.time_spent_minutes {
        if minutes > 0 {
            score *= (1.0 + minutes as f64 / 60.0).min(2.0);
        }
    }

    score *= 1.0 + chunk.related_chunks.len() as f64 / 10.0;

    score.clamp(0.0, 1.0)
}

/// Time-decay multiplier for an age in days
fn decay_factor(days: f64, config: &DecayConfig) -> f64 {
    match config.strategy {
        DecayStrategy::Linear => (1.0 - config.base_decay_rate * days / 30.0).max(0.0),
        DecayStrategy::Exponential => 0.5_f64.powf(days / 30.0),
        DecayStrategy::Adaptive => adaptive_factor(days, config.base_decay_rate),
    }
}

/// Piecewise adaptive decay: gentle inside a week, steeper to day 30,
/// exponential with a 0.6 base after that.
fn adaptive_factor(days: f64, rate: f64) -> f64 {
    if days < 7.0 {
        1.0 - rate * 0.1 * days / 7.0
    } else if days < 30.0 {
        0.9 - rate * 0.3 * (days - 7.0) / 23.0
    } else {
        0.6_f64.powf((days - 30.0) / 30.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::chunk::{ChunkMetadata, ChunkType};
    use chrono::Duration;
    use proptest::prelude::*;

    fn chunk_aged(days: i64) -> ConversationChunk {
        let mut chunk = ConversationChunk::new("s", ChunkType::Discussion, "text");
        chunk.timestamp = Utc::now() - Duration::days(days);
        chunk
    }

    fn bare_config(strategy: DecayStrategy) -> DecayConfig {
        DecayConfig {
            strategy,
            importance_boost: Default::default(),
            ..Default::default()
        }
    }

    #[test]
    fn test_linear_decay_reaches_zero() {
        // With rate 0.1, linear decay hits zero at 300 days.
        let config = bare_config(DecayStrategy::Linear);
        let chunk = chunk_aged(300);
        let score = relevance_score(&chunk, Utc::now(), &config);
        assert!(score < 1e-3, "expected ~0, got {score}");
    }

    #[test]
    fn test_exponential_half_life() {
        let config = bare_config(DecayStrategy::Exponential);
        let now = Utc::now();
        let mut chunk = chunk_aged(0);
        chunk.timestamp = now - Duration::days(30);
        let score = relevance_score(&chunk, now, &config);
        assert!((score - 0.5).abs() < 1e-9, "expected 0.5, got {score}");
    }

    #[test]
    fn test_adaptive_day_zero_is_initial() {
        let config = bare_config(DecayStrategy::Adaptive);
        let now = Utc::now();
        let mut chunk = chunk_aged(0);
        chunk.timestamp = now;
        let score = relevance_score(&chunk, now, &config);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_adaptive_five_days() {
        // 1 - 0.1 * 0.1 * 5/7 = 0.99286
        let config = bare_config(DecayStrategy::Adaptive);
        let now = Utc::now();
        let mut chunk = chunk_aged(0);
        chunk.timestamp = now - Duration::days(5);
        let score = relevance_score(&chunk, now, &config);
        assert!((score - 0.993).abs() < 0.01, "got {score}");
    }

    #[test]
    fn test_importance_boost_applied() {
        let config = DecayConfig::default();
        let now = Utc::now();

        let mut plain = chunk_aged(0);
        plain.timestamp = now - Duration::days(40);

        let mut decision = plain.clone();
        decision.chunk_type = ChunkType::ArchitectureDecision;

        let plain_score = relevance_score(&plain, now, &config);
        let boosted = relevance_score(&decision, now, &config);
        assert!(boosted > plain_score);
    }

    #[test]
    fn test_time_spent_boost_capped() {
        let config = bare_config(DecayStrategy::Adaptive);
        let now = Utc::now();

        let mut chunk = chunk_aged(0);
        chunk.timestamp = now - Duration::days(60);
        chunk.metadata = ChunkMetadata {
            time_spent_minutes: Some(600),
            ..Default::default()
        };

        let mut modest = chunk.clone();
        modest.metadata.time_spent_minutes = Some(60);

        // 600 minutes caps at the same 2x multiplier as anything >= 60.
        let heavy = relevance_score(&chunk, now, &config);
        let capped = relevance_score(&modest, now, &config);
        assert!((heavy - capped).abs() < 1e-9);
    }

    #[test]
    fn test_related_chunks_boost() {
        let config = bare_config(DecayStrategy::Adaptive);
        let now = Utc::now();

        let mut lonely = chunk_aged(0);
        lonely.timestamp = now - Duration::days(45);
        let mut linked = lonely.clone();
        linked.related_chunks = (0..5).map(|i| format!("c{i}")).collect();

        assert!(relevance_score(&linked, now, &config) > relevance_score(&lonely, now, &config));
    }

    proptest! {
        #[test]
        fn score_always_in_unit_interval(
            age_days in 0i64..5000,
            minutes in proptest::option::of(0u32..10_000),
            related in 0usize..50,
            rate in 0.0f64..=1.0,
            strategy_idx in 0usize..3,
        ) {
            let strategy = [DecayStrategy::Linear, DecayStrategy::Exponential, DecayStrategy::Adaptive][strategy_idx];
            let config = DecayConfig { strategy, base_decay_rate: rate, ..Default::default() };
            let now = Utc::now();
            let mut chunk = ConversationChunk::new("s", ChunkType::Solution, "x");
            chunk.timestamp = now - Duration::days(age_days);
            chunk.metadata.time_spent_minutes = minutes;
            chunk.related_chunks = (0..related).map(|i| i.to_string()).collect();

            let score = relevance_score(&chunk, now, &config);
            prop_assert!((0.0..=1.0).contains(&score), "score {} out of range", score);
        }
    }
}
