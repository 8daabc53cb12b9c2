use std::f64::consts::TAU;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::wheel_selector::segment_width;
use crate::error::WheelResult;

/// Parameters of one spin, drawn once by the authority and shared with every viewer.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct SpinPlan {
    pub target_rotation: f64,
    pub duration_ms: u64,
    pub started_at: u64,
}

impl SpinPlan {
    /// `R = 2π × (k + u)` with whole revolutions `k` in `[min, max]` and `u` in `[0, 1)`.
    pub fn random<R: Rng>(
        rng: &mut R,
        started_at: u64,
        min_revolutions: u32,
        max_revolutions: u32,
        duration_ms: u64,
    ) -> Self {
        let (lo, hi) = if min_revolutions <= max_revolutions {
            (min_revolutions, max_revolutions)
        } else {
            (max_revolutions, min_revolutions)
        };
        let whole = rng.gen_range(lo..=hi) as f64;
        let fraction: f64 = rng.gen();
        Self {
            target_rotation: TAU * (whole + fraction),
            duration_ms: duration_ms.max(1),
            started_at,
        }
    }

    pub fn ends_at(&self) -> u64 {
        self.started_at + self.duration_ms
    }

    pub fn progress_at(&self, now: u64) -> f64 {
        let elapsed = now.saturating_sub(self.started_at) as f64;
        (elapsed / self.duration_ms as f64).clamp(0.0, 1.0)
    }

    pub fn rotation_at(&self, now: u64) -> f64 {
        let progress = self.progress_at(now);
        if progress >= 1.0 {
            return self.target_rotation;
        }
        self.target_rotation * ease_out_quart(progress)
    }
}

/// Fast start, long deceleration, hard stop at 1.0.
pub fn ease_out_quart(progress: f64) -> f64 {
    let p = progress.clamp(0.0, 1.0);
    1.0 - (1.0 - p).powi(4)
}

/// Emitted every time the wheel carries a segment boundary past the pointer.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Tick {
    /// Number of boundaries crossed since the spin started, starting at 1.
    pub count: u64,
    pub rotation: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub rotation: f64,
    pub progress: f64,
    pub ticks: Vec<Tick>,
    pub finished: bool,
}

/// Advances one spin from rotation 0 to its target. One instance per spin.
#[derive(Debug, Clone)]
pub struct SpinAnimator {
    plan: SpinPlan,
    segment_width: f64,
    rotation: f64,
    boundaries_crossed: u64,
    finished: bool,
}

impl SpinAnimator {
    pub fn new(plan: SpinPlan, segment_count: usize) -> WheelResult<Self> {
        Ok(Self {
            plan,
            segment_width: segment_width(segment_count)?,
            rotation: 0.0,
            boundaries_crossed: 0,
            finished: false,
        })
    }

    pub fn plan(&self) -> &SpinPlan {
        &self.plan
    }

    pub fn rotation(&self) -> f64 {
        self.rotation
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn advance(&mut self, now: u64) -> Frame {
        if self.finished {
            return Frame {
                rotation: self.rotation,
                progress: 1.0,
                ticks: Vec::new(),
                finished: true,
            };
        }

        let progress = self.plan.progress_at(now);
        let rotation = self.plan.rotation_at(now).max(self.rotation);

        let crossed = (rotation / self.segment_width).floor() as u64;
        let ticks = (self.boundaries_crossed + 1..=crossed)
            .map(|count| Tick {
                count,
                rotation: count as f64 * self.segment_width,
            })
            .collect();
        self.boundaries_crossed = self.boundaries_crossed.max(crossed);

        self.rotation = rotation;
        self.finished = progress >= 1.0;
        if self.finished {
            log::debug!("spin settled at {:.4} rad after {} ticks", rotation, self.boundaries_crossed);
        }

        Frame {
            rotation,
            progress,
            ticks,
            finished: self.finished,
        }
    }
}
