use serde::Serialize;

use crate::error_codes::CompileError;

/// Per-step range accepted by the engine's tempo filter.
pub const MIN_TEMPO_STEP: f64 = 0.5;
pub const MAX_TEMPO_STEP: f64 = 2.0;
/// Residual factors this close to 1.0 are not worth a filter.
pub const TEMPO_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TempoStep {
    pub factor: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TempoPlan {
    speed: f64,
    steps: Vec<TempoStep>,
}

impl TempoPlan {
    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn steps(&self) -> &[TempoStep] {
        &self.steps
    }

    pub fn factors(&self) -> Vec<f64> {
        self.steps.iter().map(|step| step.factor).collect()
    }

    pub fn product(&self) -> f64 {
        self.steps.iter().map(|step| step.factor).product()
    }
}

pub fn is_speed_change(speed: f64) -> bool {
    (speed - 1.0).abs() > TEMPO_TOLERANCE
}

/// Splits `speed` into a chain of steps that each stay within
/// `[MIN_TEMPO_STEP, MAX_TEMPO_STEP]`.
///
/// Slow-downs halve until the remaining factor reaches 1.0, speed-ups double
/// until it drops to 2.0 or below. The remainder is appended unless it is
/// within [`TEMPO_TOLERANCE`] of 1.0 and leaving it out keeps the product
/// within tolerance of `speed`.
pub fn decompose(speed: f64) -> Result<TempoPlan, CompileError> {
    if !speed.is_finite() || speed <= 0.0 {
        return Err(CompileError::InvalidSpeed(speed));
    }

    let mut steps = Vec::new();
    if (MIN_TEMPO_STEP..=MAX_TEMPO_STEP).contains(&speed) {
        steps.push(TempoStep { factor: speed });
        return Ok(TempoPlan { speed, steps });
    }

    let mut remaining = speed;
    if speed < MIN_TEMPO_STEP {
        while remaining < 1.0 {
            steps.push(TempoStep {
                factor: MIN_TEMPO_STEP,
            });
            remaining /= MIN_TEMPO_STEP;
        }
    } else {
        while remaining > MAX_TEMPO_STEP {
            steps.push(TempoStep {
                factor: MAX_TEMPO_STEP,
            });
            remaining /= MAX_TEMPO_STEP;
        }
    }
    let prefix: f64 = steps.iter().map(|step| step.factor).product();
    if (remaining - 1.0).abs() > TEMPO_TOLERANCE || (speed - prefix).abs() >= TEMPO_TOLERANCE {
        steps.push(TempoStep { factor: remaining });
    }

    Ok(TempoPlan { speed, steps })
}
