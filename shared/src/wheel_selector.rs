//! Angle math for reading the winner off the wheel.
//!
//! Participants occupy equal contiguous segments in roster order, starting at
//! angle 0 before rotation. The pointer is fixed at angle 0 and the wheel
//! turns clockwise (positive angles), so the segment under the pointer is
//! found by counter-rotating the pointer by the wheel's final angle.

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::error::{WheelError, WheelResult};
use crate::roster::Participant;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Segment {
    pub index: usize,
    pub start: f64,
    pub end: f64,
}

pub fn segment_width(n: usize) -> WheelResult<f64> {
    if n == 0 {
        return Err(WheelError::EmptyPool);
    }
    Ok(TAU / n as f64)
}

pub fn segments(n: usize) -> WheelResult<Vec<Segment>> {
    let width = segment_width(n)?;
    Ok((0..n)
        .map(|index| Segment {
            index,
            start: width * index as f64,
            // last segment closes the circle exactly
            end: if index + 1 == n { TAU } else { width * (index + 1) as f64 },
        })
        .collect())
}

/// `rotation mod 2π`, always in `[0, 2π)`.
pub fn normalize(rotation: f64) -> f64 {
    let angle = rotation.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs
    if angle >= TAU {
        0.0
    } else {
        angle
    }
}

pub fn pointer_angle(rotation: f64) -> f64 {
    normalize(TAU - normalize(rotation))
}

pub fn winner_index(n: usize, rotation: f64) -> WheelResult<usize> {
    let width = segment_width(n)?;
    let index = (pointer_angle(rotation) / width).floor() as usize;
    Ok(index % n)
}

pub fn resolve_winner(pool: &[Participant], rotation: f64) -> WheelResult<&Participant> {
    let index = winner_index(pool.len(), rotation)?;
    Ok(&pool[index])
}
