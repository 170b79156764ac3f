//! Choice of frame sample points.
//!
//! The default schedule front-loads the opening seconds of short-form video
//! and still spans the whole duration. The downstream vision call accepts at
//! most [`MAX_SAMPLES`] images.

use std::ops::Deref;

pub const MAX_SAMPLES: usize = 5;

/// Ordered, duplicate-free second offsets, each strictly below the duration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleTimestamps(Vec<u32>);

impl SampleTimestamps {
    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u32> {
        self.0
    }
}

impl Deref for SampleTimestamps {
    type Target = [u32];

    fn deref(&self) -> &[u32] {
        &self.0
    }
}

/// Picks the timestamps to capture. A manual override bypasses the default
/// schedule and is only filtered against `duration`.
pub fn sample_timestamps(duration: f64, manual: Option<&[u32]>) -> SampleTimestamps {
    match manual {
        Some(points) => filter_manual(duration, points),
        None => default_timestamps(duration),
    }
}

pub fn default_timestamps(duration: f64) -> SampleTimestamps {
    if !duration.is_finite() || duration <= 0.0 {
        return SampleTimestamps::default();
    }
    let candidates = [
        0.0,
        (0.10 * duration).min(2.0),
        0.25 * duration,
        0.50 * duration,
        0.90 * duration,
    ];
    let mut points: Vec<u32> = candidates
        .iter()
        .map(|point| point.floor())
        .filter(|point| *point < duration)
        .map(|point| point as u32)
        .collect();
    points.sort_unstable();
    points.dedup();
    points.truncate(MAX_SAMPLES);
    SampleTimestamps(points)
}

fn filter_manual(duration: f64, points: &[u32]) -> SampleTimestamps {
    if !duration.is_finite() || duration <= 0.0 {
        return SampleTimestamps::default();
    }
    let mut kept: Vec<u32> = Vec::with_capacity(points.len().min(MAX_SAMPLES));
    for &point in points {
        if kept.len() == MAX_SAMPLES {
            break;
        }
        if f64::from(point) < duration && !kept.contains(&point) {
            kept.push(point);
        }
    }
    SampleTimestamps(kept)
}
