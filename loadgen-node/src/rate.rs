// Rate model module
//
// Pure computation that maps elapsed run time to an instantaneous target RPS
// based on the configured ramp shape. Does not dispatch anything itself; the
// load generator reads it every tick to pace request dispatch.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Curvature constant for the exponential ramp.
const EXPONENTIAL_CURVATURE: i32 = 3;

/// Shape of the target-RPS ramp over the life of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleMode {
    Linear,
    Logarithmic,
    Exponential,
    Step,
}

impl Default for ScaleMode {
    fn default() -> Self {
        ScaleMode::Linear
    }
}

/// Rate model for one run: `(elapsed) -> target RPS`.
///
/// Starts at `min_rps` at t=0 and reaches `max_rps` no later than
/// t=duration for every mode except `step`, which jumps through decade
/// levels clipped to `[min_rps, max_rps]`.
#[derive(Debug, Clone)]
pub struct RateModel {
    mode: ScaleMode,
    min_rps: f64,
    max_rps: f64,
    duration: Duration,
    /// Precomputed decade levels for `step` mode, strictly increasing.
    step_levels: Vec<f64>,
}

impl RateModel {
    pub fn new(mode: ScaleMode, min_rps: f64, max_rps: f64, duration: Duration) -> Self {
        let step_levels = if mode == ScaleMode::Step {
            decade_levels(min_rps, max_rps)
        } else {
            Vec::new()
        };

        Self {
            mode,
            min_rps,
            max_rps,
            duration,
            step_levels,
        }
    }

    /// Instantaneous target RPS at `elapsed`.
    ///
    /// Pure and side-effect free. `elapsed > duration` clamps to `max_rps`;
    /// `min_rps == max_rps` returns that constant regardless of mode.
    pub fn target_rps(&self, elapsed: Duration) -> f64 {
        let span = self.max_rps - self.min_rps;
        if span <= 0.0 {
            return self.max_rps;
        }

        let d = self.duration.as_secs_f64();
        let t = elapsed.as_secs_f64();
        if d <= 0.0 || t >= d {
            return self.max_rps;
        }
        let frac = t / d;

        match self.mode {
            ScaleMode::Linear => self.min_rps + span * frac,
            ScaleMode::Logarithmic => {
                // log1p(9 * t/d) / log1p(9), normalized to hit both endpoints
                self.min_rps + span * (9.0 * frac).ln_1p() / 9.0f64.ln_1p()
            }
            ScaleMode::Exponential => {
                self.min_rps + span * (1.0 - (1.0 - frac).powi(EXPONENTIAL_CURVATURE))
            }
            ScaleMode::Step => {
                let index = (frac * self.step_levels.len() as f64) as usize;
                self.step_levels[index.min(self.step_levels.len() - 1)]
            }
        }
    }

    /// The decade levels a `step` run walks through, for inspection.
    pub fn step_levels(&self) -> &[f64] {
        &self.step_levels
    }
}

/// Decade sequence {1, 10, 100, ...} clipped to `[min_rps, max_rps]`,
/// deduplicated after clamping so the result is strictly increasing and
/// always ends at `max_rps`.
fn decade_levels(min_rps: f64, max_rps: f64) -> Vec<f64> {
    let mut levels: Vec<f64> = Vec::new();
    let mut decade = 1.0;
    while decade < max_rps {
        let clamped = decade.clamp(min_rps.max(0.0), max_rps);
        if levels.last() != Some(&clamped) {
            levels.push(clamped);
        }
        decade *= 10.0;
    }
    if levels.last() != Some(&max_rps) {
        levels.push(max_rps);
    }
    levels
}
