use std::collections::VecDeque;
use std::time::Duration;

use harvestar_geom::{PlotPoint, Pose, Viewport};

/// One plotted point of the replay trail, in the operator frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HistorySample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Milliseconds since the owning replay session started.
    pub captured_at_ms: u64,
}

impl HistorySample {
    pub fn from_pose(pose: &Pose, captured_at_ms: u64) -> Self {
        HistorySample {
            x: pose.x,
            y: pose.y,
            z: pose.z,
            captured_at_ms,
        }
    }

    pub fn project(&self, viewport: Viewport) -> PlotPoint {
        harvestar_geom::project_xy(self.x, self.y, viewport)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryConfig {
    /// The buffer is only swept once it holds more than this many samples.
    pub max_len: usize,
    pub max_age: Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        HistoryConfig {
            max_len: 10,
            max_age: Duration::from_millis(3000),
        }
    }
}

/// A short, fading trail of recent positions.
///
/// Samples arrive in time order. Old samples are not dropped on every
/// append: only when the trail grows past `max_len` are the ones older than
/// `max_age` swept out. With slow telemetry the trail can therefore hold
/// old points for a while, and with fast telemetry it can grow past
/// `max_len` as long as everything in it is recent.
#[derive(Clone, Debug, Default)]
pub struct TelemetryHistory {
    samples: VecDeque<HistorySample>,
    config: HistoryConfig,
}

impl TelemetryHistory {
    pub fn new(config: HistoryConfig) -> Self {
        TelemetryHistory {
            samples: VecDeque::new(),
            config,
        }
    }

    /// Adds a sample. `now_ms` is on the same clock as `captured_at_ms`.
    pub fn append(&mut self, sample: HistorySample, now_ms: u64) {
        self.samples.push_back(sample);
        if self.samples.len() > self.config.max_len {
            self.evict_older_than(now_ms, self.config.max_age);
        }
    }

    pub fn evict_older_than(&mut self, now_ms: u64, max_age: Duration) {
        let max_age_ms = u64::try_from(max_age.as_millis()).unwrap_or(u64::MAX);
        self.samples
            .retain(|s| now_ms.saturating_sub(s.captured_at_ms) < max_age_ms);
    }

    pub fn current(&self) -> impl Iterator<Item = &HistorySample> + '_ {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(t: u64) -> HistorySample {
        HistorySample {
            x: t as f64,
            y: 0.0,
            z: 0.0,
            captured_at_ms: t,
        }
    }

    fn times(h: &TelemetryHistory) -> Vec<u64> {
        h.current().map(|s| s.captured_at_ms).collect()
    }

    #[test]
    fn stale_head_is_swept_once_over_the_limit() {
        let now = 10_000;
        let mut h = TelemetryHistory::default();
        h.append(sample(now - 4000), now);
        for i in 0..10 {
            h.append(sample(now - 500 + i * 50), now);
        }

        assert_eq!(h.len(), 10);
        assert_eq!(
            times(&h),
            (0..10).map(|i| now - 500 + i * 50).collect::<Vec<_>>()
        );
    }

    #[test]
    fn no_sweep_at_or_under_the_limit() {
        let mut h = TelemetryHistory::default();
        for i in 0..10 {
            h.append(sample(i), 60_000);
        }
        // Everything is ancient, but we never went over ten samples.
        assert_eq!(h.len(), 10);
    }

    #[test]
    fn fast_telemetry_can_exceed_the_limit() {
        let mut h = TelemetryHistory::default();
        for i in 0..25 {
            h.append(sample(1000 + i * 10), 1000 + i * 10);
        }
        assert_eq!(h.len(), 25);
    }

    #[test]
    fn age_limit_is_exclusive() {
        let mut h = TelemetryHistory::default();
        h.append(sample(0), 0);
        h.append(sample(1), 0);
        h.evict_older_than(3000, Duration::from_millis(3000));
        assert_eq!(times(&h), vec![1]);
    }

    #[test]
    fn samples_from_the_future_are_kept() {
        let mut h = TelemetryHistory::default();
        h.append(sample(5000), 0);
        h.evict_older_than(100, Duration::from_millis(10));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn projects_like_a_pose() {
        let s = HistorySample::from_pose(&Pose::new(-30.0, 0.0, 7.0, 45.0), 0);
        let p = s.project(Viewport::new(300.0, 200.0));
        assert_eq!((p.x, p.y), (0.0, 200.0));
    }
}
