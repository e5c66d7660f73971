use rand::SeedableRng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Increase,
    Decrease,
    Hold,
}

/// Tuning knobs for [`ConcurrencySearch`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Weight of a new bandwidth sample in the per-level moving average.
    pub alpha: f64,
    /// Draw weight of a neighbouring level that was never sampled.
    pub unsampled_bonus: f64,
    /// Draw weight of staying at the current level.
    pub hold_weight: f64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self { alpha: 0.3, unsampled_bonus: 3.0, hold_weight: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Level {
    bandwidth: f64,
    samples: u32,
}

/// Bandit-style search over the number of concurrent workers.
///
/// Every observation is folded into the moving average of the *current*
/// level, then the search moves one step up, one step down, or holds. The
/// less a neighbour has been sampled, the likelier it is to be picked, and a
/// neighbour that was never sampled always wins over one that was.
#[derive(Debug)]
pub struct ConcurrencySearch {
    current: usize,
    max: usize,
    levels: BTreeMap<usize, Level>,
    settings: SearchSettings,
    rng: StdRng,
}

impl ConcurrencySearch {
    /// Start in the middle of `[1, max]`.
    pub fn new(max: usize, settings: SearchSettings) -> Self {
        Self::with_rng(max, settings, StdRng::from_os_rng())
    }

    pub fn seeded(max: usize, settings: SearchSettings, seed: u64) -> Self {
        Self::with_rng(max, settings, StdRng::seed_from_u64(seed))
    }

    fn with_rng(max: usize, settings: SearchSettings, rng: StdRng) -> Self {
        let max = max.max(1);
        Self { current: (max / 2).max(1), max, levels: BTreeMap::new(), settings, rng }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn samples(&self, level: usize) -> u32 {
        self.levels.get(&level).map_or(0, |l| l.samples)
    }

    /// Moving average of the bandwidth observed at `level`, in bytes/second.
    pub fn bandwidth(&self, level: usize) -> Option<f64> {
        self.levels.get(&level).filter(|l| l.samples > 0).map(|l| l.bandwidth)
    }

    /// Fold a bandwidth sample into the current level.
    pub fn record(&mut self, bandwidth: f64) {
        let alpha = self.settings.alpha;
        let level = self.levels.entry(self.current).or_default();
        level.bandwidth = if level.samples == 0 {
            bandwidth
        } else {
            level.bandwidth * (1.0 - alpha) + bandwidth * alpha
        };
        level.samples = level.samples.saturating_add(1);
    }

    /// Draw weight for moving to `level`. Out-of-bounds levels weigh nothing.
    pub fn weight(&self, level: usize) -> f64 {
        if level < 1 || level > self.max {
            return 0.0;
        }
        match self.samples(level) {
            0 => self.settings.unsampled_bonus,
            n => (-2.0 * f64::from(n).ln() + 2.0).max(0.0),
        }
    }

    fn neighbour(&self, step: Step) -> Option<usize> {
        let level = match step {
            Step::Increase => self.current.checked_add(1)?,
            Step::Decrease => self.current.checked_sub(1)?,
            Step::Hold => self.current,
        };
        (1..=self.max).contains(&level).then_some(level)
    }

    /// Pick the next move without applying it.
    pub fn choose(&mut self) -> Step {
        let moves = [Step::Increase, Step::Decrease];
        let unexplored: Vec<Step> = moves
            .into_iter()
            .filter(|step| self.neighbour(*step).is_some_and(|level| self.samples(level) == 0))
            .collect();

        let (steps, weights): (Vec<Step>, Vec<f64>) = if unexplored.is_empty() {
            moves
                .into_iter()
                .map(|step| (step, self.neighbour(step).map_or(0.0, |level| self.weight(level))))
                .chain([(Step::Hold, self.settings.hold_weight)])
                .unzip()
        } else {
            let bonus = self.settings.unsampled_bonus;
            unexplored.into_iter().map(|step| (step, bonus)).unzip()
        };

        match WeightedIndex::new(&weights) {
            Ok(index) => steps[index.sample(&mut self.rng)],
            // Every weight is zero (or the bonus is misconfigured).
            Err(_) => match steps.as_slice() {
                [only] => *only,
                _ => Step::Hold,
            },
        }
    }

    pub fn apply(&mut self, step: Step) -> usize {
        if let Some(level) = self.neighbour(step) {
            self.current = level;
        }
        self.current
    }

    /// Record `bandwidth` for the current level and take one step.
    pub fn observe(&mut self, bandwidth: f64) -> usize {
        self.record(bandwidth);
        let step = self.choose();
        let workers = self.apply(step);
        trace!(target: "throttle", bandwidth, ?step, workers, "concurrency search step");
        workers
    }
}
