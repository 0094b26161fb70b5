//! Two-way ranging distance model
//!
//! Converts time-of-flight to distance and back, and simulates ranging
//! exchanges with optional clock drift and Gaussian noise. The random source
//! is owned by the model, so each producer thread owns its own model.

use crate::core::{RangeLink, RangeSample, NANOS_PER_SECOND, SPEED_OF_LIGHT_M_S, DS_TWR_DENOMINATOR_EPSILON};
use crate::validation::error::{ensure_finite, ensure_non_negative, PositioningError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Convert a distance (meters) to one-way time-of-flight (nanoseconds)
pub fn distance_to_tof_ns(distance_m: f64) -> f64 {
    distance_m / SPEED_OF_LIGHT_M_S * NANOS_PER_SECOND
}

/// Convert one-way time-of-flight (nanoseconds) to distance (meters)
pub fn tof_ns_to_distance(tof_ns: f64) -> f64 {
    tof_ns / NANOS_PER_SECOND * SPEED_OF_LIGHT_M_S
}

/// Six timestamps (nanoseconds) of a double-sided two-way ranging exchange
///
/// The estimator combines the four intervals `T1−T0`, `T5−T2`, `T3−T2` and
/// `T4−T1`. Each interval is measured on a single clock, so the absolute
/// offset between the two clocks cancels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DsTwrTimestamps {
    pub t: [f64; 6],
}

impl DsTwrTimestamps {
    pub fn new(t: [f64; 6]) -> Self {
        Self { t }
    }

    /// Time-of-flight term `[(T1−T0)(T5−T2) − (T3−T2)(T4−T1)] / [(T1−T0) + (T5−T2) + (T3−T2) + (T4−T1)]`
    pub fn time_of_flight_ns(&self) -> Result<f64> {
        for (i, value) in self.t.iter().enumerate() {
            ensure_finite(&format!("T{}", i), *value)?;
        }
        let [t0, t1, t2, t3, t4, t5] = self.t;
        let round_a = t1 - t0;
        let round_b = t5 - t2;
        let reply_b = t3 - t2;
        let reply_a = t4 - t1;

        let denominator = round_a + round_b + reply_b + reply_a;
        if denominator.abs() < DS_TWR_DENOMINATOR_EPSILON {
            return Err(PositioningError::DegenerateInput {
                denominator_ns: denominator,
            });
        }

        Ok((round_a * round_b - reply_b * reply_a) / denominator)
    }

    /// Distance estimate `ToF · c / 2` (meters)
    pub fn distance_m(&self) -> Result<f64> {
        let tof_ns = self.time_of_flight_ns()?;
        Ok(tof_ns_to_distance(tof_ns) / 2.0)
    }
}

/// Synthetic ranging exchange produced by the simulator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulatedExchange {
    pub sample: RangeSample,
    /// One-way time-of-flight including drift (nanoseconds)
    pub tof_ns: f64,
    /// Round-trip time `2·ToF + responder delay` (nanoseconds)
    pub round_trip_ns: f64,
    /// Responder processing delay (nanoseconds)
    pub reply_time_ns: f64,
}

/// Distance model for two-way ranging with injectable randomness
#[derive(Debug, Clone)]
pub struct RangingModel<R = StdRng> {
    rng: R,
}

impl RangingModel<StdRng> {
    /// Model with a reproducible random stream
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Model seeded from OS entropy
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl<R: Rng> RangingModel<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    /// Estimate the distance a ranging exchange would report
    ///
    /// The true distance is converted to time-of-flight, `clock_drift_ns` is
    /// added in the time domain, and the result is converted back. Gaussian
    /// noise with standard deviation `noise_std_m` is then added in the
    /// distance domain. With `noise_std_m == 0` the random source is never
    /// touched.
    pub fn estimate_distance(
        &mut self,
        link: RangeLink,
        true_distance_m: f64,
        noise_std_m: f64,
        clock_drift_ns: f64,
    ) -> Result<RangeSample> {
        let distance_m = self.measured_distance(true_distance_m, noise_std_m, clock_drift_ns)?;
        Ok(RangeSample::new(link, distance_m).with_variance(noise_std_m * noise_std_m))
    }

    /// Simulate a full exchange, including the round-trip timing record
    pub fn simulate_exchange(
        &mut self,
        link: RangeLink,
        true_distance_m: f64,
        noise_std_m: f64,
        clock_drift_ns: f64,
        responder_delay_ns: f64,
    ) -> Result<SimulatedExchange> {
        let responder_delay_ns = ensure_non_negative("responder_delay_ns", responder_delay_ns)?;
        let sample = self.estimate_distance(link, true_distance_m, noise_std_m, clock_drift_ns)?;
        let tof_ns = distance_to_tof_ns(sample.distance_m);

        Ok(SimulatedExchange {
            sample,
            tof_ns,
            round_trip_ns: 2.0 * tof_ns + responder_delay_ns,
            reply_time_ns: responder_delay_ns,
        })
    }

    fn measured_distance(&mut self, true_distance_m: f64, noise_std_m: f64, clock_drift_ns: f64) -> Result<f64> {
        let true_distance_m = ensure_non_negative("true_distance_m", true_distance_m)?;
        let noise_std_m = ensure_non_negative("noise_std_m", noise_std_m)?;
        let clock_drift_ns = ensure_finite("clock_drift_ns", clock_drift_ns)?;

        let tof_ns = distance_to_tof_ns(true_distance_m) + clock_drift_ns;
        let mut distance_m = tof_ns_to_distance(tof_ns);

        if noise_std_m > 0.0 {
            let n: f64 = self.rng.sample(StandardNormal);
            distance_m += n * noise_std_m;
        }

        // Negative drift or noise near zero range must not produce a negative sample
        Ok(distance_m.max(0.0))
    }
}

impl Default for RangingModel<StdRng> {
    fn default() -> Self {
        Self::from_entropy()
    }
}
