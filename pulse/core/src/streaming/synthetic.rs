//! Synthetic Sample Generation
//!
//! Produces test/demo data when no real transport is driving the stream,
//! either on request or while the service runs in offline mode. Generation
//! is shaped by a [`Scenario`] and can be temporarily accelerated with a
//! spike.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sample::Sample;
use crate::session::MAX_TIMER_DELAY;

/// Shape of the generated data
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    /// Steady values with small noise
    #[default]
    Normal,
    /// Large swings around the baseline
    Volatile,
    /// Random walk with an upward drift
    Trending,
    /// A fifth of the normal rate
    Sparse,
    /// Normal rate with occasional 5x bursts
    Burst,
}

impl Scenario {
    /// All known scenarios
    pub const ALL: [Scenario; 5] = [
        Scenario::Normal,
        Scenario::Volatile,
        Scenario::Trending,
        Scenario::Sparse,
        Scenario::Burst,
    ];

    /// Lowercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Volatile => "volatile",
            Self::Trending => "trending",
            Self::Sparse => "sparse",
            Self::Burst => "burst",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scenario name that matches nothing in [`Scenario::ALL`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown scenario `{0}`")]
pub struct UnknownScenario(pub String);

impl FromStr for Scenario {
    type Err = UnknownScenario;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|scenario| scenario.as_str() == wanted)
            .ok_or_else(|| UnknownScenario(s.to_string()))
    }
}

/// Synthetic generation settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyntheticConfig {
    /// Baseline samples per second
    pub rate_per_second: f64,
    /// Generation tick
    pub tick: Duration,
    /// Categories rotated through
    pub categories: Vec<String>,
    /// `source` field of generated samples
    pub source: String,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            rate_per_second: 10.0,
            tick: Duration::from_millis(100),
            categories: vec!["cpu".into(), "memory".into(), "network".into()],
            source: "synthetic".into(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Spike {
    until: Instant,
    multiplier: f64,
}

/// Scenario-driven sample generator
pub struct SyntheticGenerator {
    config: SyntheticConfig,
    scenario: Scenario,
    spike: Option<Spike>,
    sequence: u64,
    carry: f64,
    level: f64,
    rng: StdRng,
}

const BASELINE: f64 = 50.0;

impl SyntheticGenerator {
    /// Create a generator seeded from entropy
    #[must_use]
    pub fn new(config: SyntheticConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Create a reproducible generator
    #[must_use]
    pub fn with_seed(config: SyntheticConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: SyntheticConfig, rng: StdRng) -> Self {
        Self {
            config,
            scenario: Scenario::default(),
            spike: None,
            sequence: 0,
            carry: 0.0,
            level: BASELINE,
            rng,
        }
    }

    /// Generation settings
    #[must_use]
    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    /// Active scenario
    #[must_use]
    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    /// Switch scenario; the trend level restarts from the baseline
    pub fn set_scenario(&mut self, scenario: Scenario) {
        if scenario != self.scenario {
            tracing::info!(from = %self.scenario, to = %scenario, "Synthetic scenario changed");
        }
        self.scenario = scenario;
        self.level = BASELINE;
    }

    /// Multiply the generation rate until `now + duration`
    ///
    /// Non-positive or non-finite multipliers are ignored. The duration is
    /// capped at [`MAX_TIMER_DELAY`].
    pub fn spike(&mut self, now: Instant, duration: Duration, multiplier: f64) {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            tracing::warn!(multiplier, "Ignoring invalid spike multiplier");
            return;
        }
        self.spike = Some(Spike {
            until: now
                .checked_add(duration.min(MAX_TIMER_DELAY))
                .unwrap_or(now),
            multiplier,
        });
        tracing::info!(duration_ms = duration.as_millis(), multiplier, "Synthetic spike started");
    }

    /// Whether a spike is active at `now`
    #[must_use]
    pub fn spike_active(&self, now: Instant) -> bool {
        self.spike.is_some_and(|s| now < s.until)
    }

    /// Samples per second at `now`, spike and scenario included
    #[must_use]
    pub fn effective_rate(&self, now: Instant) -> f64 {
        let mut rate = self.config.rate_per_second;
        if self.scenario == Scenario::Sparse {
            rate *= 0.2;
        }
        if let Some(spike) = self.spike {
            if now < spike.until {
                rate *= spike.multiplier;
            }
        }
        rate.max(0.0)
    }

    /// Produce the samples due for `elapsed` time ending at `now`
    ///
    /// Fractional samples carry over to the next call so low rates still
    /// produce output.
    pub fn next_batch(&mut self, now: Instant, elapsed: Duration) -> Vec<Sample> {
        if self.spike.is_some_and(|s| now >= s.until) {
            self.spike = None;
            tracing::info!("Synthetic spike ended");
        }

        let mut due = self.effective_rate(now) * elapsed.as_secs_f64() + self.carry;
        if self.scenario == Scenario::Burst && self.rng.gen_bool(0.1) {
            due *= 5.0;
        }
        let count = due.floor();
        self.carry = due - count;

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let count = count as usize;
        (0..count).map(|_| self.generate_one()).collect()
    }

    fn generate_one(&mut self) -> Sample {
        let value = match self.scenario {
            Scenario::Normal | Scenario::Sparse | Scenario::Burst => {
                BASELINE + self.rng.gen_range(-5.0..5.0)
            }
            Scenario::Volatile => BASELINE + self.rng.gen_range(-40.0..40.0),
            Scenario::Trending => {
                self.level += self.rng.gen_range(-0.5..1.0);
                self.level + self.rng.gen_range(-1.0..1.0)
            }
        };

        let category = if self.config.categories.is_empty() {
            crate::sample::DEFAULT_CATEGORY.to_string()
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let idx = (self.sequence % self.config.categories.len() as u64) as usize;
            self.config.categories[idx].clone()
        };

        let sample = Sample::new(
            format!("syn-{}", self.sequence),
            Utc::now(),
            value,
            category,
            self.config.source.clone(),
        )
        .with_metadata("scenario", self.scenario.as_str())
        .with_metadata("sequence", i64::try_from(self.sequence).unwrap_or(i64::MAX));

        self.sequence += 1;
        sample
    }
}

impl fmt::Debug for SyntheticGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyntheticGenerator")
            .field("scenario", &self.scenario)
            .field("sequence", &self.sequence)
            .field("spike", &self.spike)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn generator() -> SyntheticGenerator {
        SyntheticGenerator::with_seed(SyntheticConfig::default(), 7)
    }

    #[test]
    fn test_scenario_parsing() {
        assert_eq!("volatile".parse::<Scenario>(), Ok(Scenario::Volatile));
        assert_eq!(" Trending ".parse::<Scenario>(), Ok(Scenario::Trending));
        assert_eq!(
            "chaotic".parse::<Scenario>(),
            Err(UnknownScenario("chaotic".into()))
        );
    }

    #[test]
    fn test_rate_over_one_second() {
        let mut generator = generator();
        let now = Instant::now();
        let batch = generator.next_batch(now, Duration::from_secs(1));
        assert_eq!(batch.len(), 10);
        assert_eq!(batch[0].id, "syn-0");
        assert_eq!(batch[9].id, "syn-9");
    }

    #[test]
    fn test_fractional_rate_carries_over() {
        let mut generator = generator();
        let now = Instant::now();
        let mut total = 0;
        // 10/s over 10 ticks of 50ms = 5 samples
        for _ in 0..10 {
            total += generator.next_batch(now, Duration::from_millis(50)).len();
        }
        assert_eq!(total, 5);
    }

    #[test]
    fn test_spike_multiplies_rate_until_deadline() {
        let mut generator = generator();
        let now = Instant::now();
        generator.spike(now, Duration::from_secs(2), 3.0);

        assert!(generator.spike_active(now));
        assert_eq!(generator.next_batch(now, Duration::from_secs(1)).len(), 30);

        let later = now + Duration::from_secs(3);
        assert!(!generator.spike_active(later));
        assert_eq!(generator.next_batch(later, Duration::from_secs(1)).len(), 10);
    }

    #[test]
    fn test_huge_spike_duration_is_capped() {
        let mut generator = generator();
        let now = Instant::now();
        generator.spike(now, Duration::MAX, 2.0);
        assert!(generator.spike_active(now + MAX_TIMER_DELAY - Duration::from_secs(1)));
        assert!(!generator.spike_active(now + MAX_TIMER_DELAY));
    }

    #[test]
    fn test_invalid_spike_ignored() {
        let mut generator = generator();
        let now = Instant::now();
        generator.spike(now, Duration::from_secs(1), -2.0);
        assert!(!generator.spike_active(now));
    }

    #[test]
    fn test_sparse_reduces_rate() {
        let mut generator = generator();
        generator.set_scenario(Scenario::Sparse);
        let batch = generator.next_batch(Instant::now(), Duration::from_secs(5));
        assert_eq!(batch.len(), 10);
    }

    #[test]
    fn test_categories_rotate_and_metadata_tagged() {
        let mut generator = generator();
        generator.set_scenario(Scenario::Volatile);
        let batch = generator.next_batch(Instant::now(), Duration::from_millis(300));
        let categories: Vec<_> = batch.iter().map(|s| s.category.as_str()).collect();
        assert_eq!(categories, vec!["cpu", "memory", "network"]);
        assert_eq!(
            batch[0].metadata["scenario"],
            crate::sample::MetadataValue::Text("volatile".into())
        );
    }

    #[test]
    fn test_normal_values_stay_near_baseline() {
        let mut generator = generator();
        for sample in generator.next_batch(Instant::now(), Duration::from_secs(10)) {
            assert!((sample.value - BASELINE).abs() <= 5.0);
        }
    }
}
