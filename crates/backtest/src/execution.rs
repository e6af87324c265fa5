use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use common::{Side, VolatilityRegime};

/// Fill behaviour for one volatility bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecutionProfile {
    /// Chance an order is not filled at all.
    pub failure_probability: f64,
    /// Adverse price move as a fraction of price.
    pub slippage: f64,
}

/// Execution table keyed by volatility bucket, plus Gaussian price noise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionModel {
    pub low: ExecutionProfile,
    pub medium: ExecutionProfile,
    pub high: ExecutionProfile,
    pub extreme: ExecutionProfile,
    /// Standard deviation of fill noise as a fraction of price.
    pub noise_stdev: f64,
}

impl Default for ExecutionModel {
    fn default() -> Self {
        Self {
            low: ExecutionProfile { failure_probability: 0.01, slippage: 0.0005 },
            medium: ExecutionProfile { failure_probability: 0.02, slippage: 0.001 },
            high: ExecutionProfile { failure_probability: 0.05, slippage: 0.002 },
            extreme: ExecutionProfile { failure_probability: 0.10, slippage: 0.004 },
            noise_stdev: 0.0001,
        }
    }
}

impl ExecutionModel {
    /// Every order fills at exactly the requested price.
    pub fn frictionless() -> Self {
        let none = ExecutionProfile { failure_probability: 0.0, slippage: 0.0 };
        Self {
            low: none,
            medium: none,
            high: none,
            extreme: none,
            noise_stdev: 0.0,
        }
    }

    /// Rescale every bucket's slippage so the MEDIUM bucket equals
    /// `slippage`, keeping the ratios between buckets.
    pub fn with_slippage(self, slippage: f64) -> Self {
        let base = self.medium.slippage;
        let scale = |p: ExecutionProfile| ExecutionProfile {
            slippage: if base > 0.0 { p.slippage / base * slippage } else { slippage },
            ..p
        };
        Self {
            low: scale(self.low),
            medium: scale(self.medium),
            high: scale(self.high),
            extreme: scale(self.extreme),
            ..self
        }
    }

    pub fn profile(&self, regime: VolatilityRegime) -> ExecutionProfile {
        match regime {
            VolatilityRegime::Low => self.low,
            VolatilityRegime::Medium => self.medium,
            VolatilityRegime::High => self.high,
            VolatilityRegime::Extreme => self.extreme,
        }
    }
}

/// Seeded fill simulator. The same seed and call sequence always produce the
/// same fills.
#[derive(Debug, Clone)]
pub struct ExecutionSimulator {
    model: ExecutionModel,
    rng: StdRng,
}

impl ExecutionSimulator {
    pub fn new(model: ExecutionModel, seed: u64) -> Self {
        Self {
            model,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Open a position at `price`. `None` when the order fails; otherwise
    /// the fill, slipped against the trade (up for buys, down for sells).
    pub fn enter(&mut self, side: Side, price: f64, regime: VolatilityRegime) -> Option<f64> {
        let profile = self.model.profile(regime);
        if self.rng.gen::<f64>() < profile.failure_probability {
            return None;
        }
        Some(self.slipped(side.direction(), price, profile.slippage))
    }

    /// Close a position at `price`. Exits always fill, slipped against the
    /// position being closed.
    pub fn exit(&mut self, side: Side, price: f64, regime: VolatilityRegime) -> f64 {
        let profile = self.model.profile(regime);
        self.slipped(-side.direction(), price, profile.slippage)
    }

    fn slipped(&mut self, direction: f64, price: f64, slippage: f64) -> f64 {
        let noise = self.gaussian() * self.model.noise_stdev;
        price * (1.0 + direction * slippage + noise)
    }

    /// Standard normal draw (Box-Muller).
    fn gaussian(&mut self) -> f64 {
        let u1: f64 = self.rng.gen::<f64>().max(f64::MIN_POSITIVE);
        let u2: f64 = self.rng.gen();
        (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }
}
