//! Per-iteration loss weights and per-epoch learning rates.

use serde::{Deserialize, Serialize};
use uda_core::{LrScheduleConfig, WeightSchedule};

/// Weights applied at one iteration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossWeights {
    /// Multiplier of the alignment loss in the total
    pub adaptation: f64,
    /// Gradient reversal coefficient
    pub reversal: f64,
}

/// Evaluates a [`WeightSchedule`] at a training progress in `[0, 1]`
pub fn schedule_value(schedule: &WeightSchedule, progress: f64) -> f64 {
    match *schedule {
        WeightSchedule::Constant { value } => value,
        WeightSchedule::Ramp { floor, gamma } => {
            let p = if progress.is_finite() {
                progress.clamp(0.0, 1.0)
            } else {
                1.0
            };
            floor + (1.0 - floor) * (2.0 / (1.0 + (-gamma * p).exp()) - 1.0)
        }
    }
}

/// Stateless mapping from `(iteration, total_iterations)` to [`LossWeights`]
#[derive(Debug, Clone, PartialEq)]
pub struct LossScheduler {
    adaptation: WeightSchedule,
    reversal: WeightSchedule,
}

impl Default for LossScheduler {
    fn default() -> Self {
        Self::new(WeightSchedule::default(), WeightSchedule::default())
    }
}

impl LossScheduler {
    /// Create a scheduler from the two weight shapes
    pub fn new(adaptation: WeightSchedule, reversal: WeightSchedule) -> Self {
        Self {
            adaptation,
            reversal,
        }
    }

    /// Weights at `iteration` of `total_iterations`
    pub fn weights(&self, iteration: usize, total_iterations: usize) -> LossWeights {
        let progress = if total_iterations == 0 {
            1.0
        } else {
            iteration as f64 / total_iterations as f64
        };
        LossWeights {
            adaptation: schedule_value(&self.adaptation, progress),
            reversal: schedule_value(&self.reversal, progress),
        }
    }
}

/// Learning rate scheduler stepped once per epoch
#[derive(Debug, Clone)]
pub struct LearningRateScheduler {
    schedule: LrScheduleConfig,
    base_lr: f64,
    current_epoch: usize,
}

impl LearningRateScheduler {
    /// Create a new learning rate scheduler
    pub fn new(schedule: LrScheduleConfig, base_lr: f64) -> Self {
        Self {
            schedule,
            base_lr,
            current_epoch: 0,
        }
    }

    /// Learning rate for the current epoch
    pub fn get_lr(&self) -> f64 {
        let epoch = self.current_epoch;
        match &self.schedule {
            LrScheduleConfig::Fix => self.base_lr,
            LrScheduleConfig::Step { milestones, gamma } => {
                let passed = milestones.iter().filter(|&&m| m <= epoch).count();
                self.base_lr * gamma.powi(passed as i32)
            }
            LrScheduleConfig::Exp { gamma } => self.base_lr * gamma.powi(epoch as i32),
            LrScheduleConfig::StepLr { step_size, gamma } => {
                self.base_lr * gamma.powi((epoch / (*step_size).max(1)) as i32)
            }
        }
    }

    /// Advance one epoch
    pub fn step(&mut self) {
        self.current_epoch += 1;
    }

    /// Epochs stepped so far
    pub fn current_epoch(&self) -> usize {
        self.current_epoch
    }

    /// Reset to the first epoch
    pub fn reset(&mut self) {
        self.current_epoch = 0;
    }
}
