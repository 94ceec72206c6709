use crate::state::{MetricSample, NetworkDelta};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PreviousSample {
    rx_bytes_cumulative: u64,
    tx_bytes_cumulative: u64,
}

/// Turns cumulative interface counters into per-tick byte counts.
#[derive(Debug, Default)]
pub struct DeltaEngine {
    previous: Option<PreviousSample>,
}

impl DeltaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first call only records a baseline. A counter that went backwards
    /// (reset, wrap, re-enumerated interface) yields zero for that direction;
    /// the new value becomes the baseline either way.
    pub fn compute_delta(&mut self, sample: &MetricSample) -> NetworkDelta {
        let current = PreviousSample {
            rx_bytes_cumulative: sample.rx_bytes_cumulative,
            tx_bytes_cumulative: sample.tx_bytes_cumulative,
        };

        let delta = match self.previous {
            Some(prev) => NetworkDelta {
                download_bytes: current
                    .rx_bytes_cumulative
                    .checked_sub(prev.rx_bytes_cumulative)
                    .unwrap_or(0),
                upload_bytes: current
                    .tx_bytes_cumulative
                    .checked_sub(prev.tx_bytes_cumulative)
                    .unwrap_or(0),
            },
            None => NetworkDelta::default(),
        };

        self.previous = Some(current);
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(rx: u64, tx: u64) -> MetricSample {
        MetricSample {
            timestamp_unix: 0,
            cpu_percent: 0.0,
            memory_percent: 0.0,
            rx_bytes_cumulative: rx,
            tx_bytes_cumulative: tx,
        }
    }

    #[test]
    fn first_call_is_zero() {
        let mut engine = DeltaEngine::new();
        assert_eq!(
            engine.compute_delta(&sample(5_000_000, 7_000_000)),
            NetworkDelta::default()
        );
    }

    #[test]
    fn growing_counters_give_differences() {
        let mut engine = DeltaEngine::new();
        engine.compute_delta(&sample(1_000, 2_000));
        let delta = engine.compute_delta(&sample(4_500, 2_010));
        assert_eq!(delta.download_bytes, 3_500);
        assert_eq!(delta.upload_bytes, 10);

        let delta = engine.compute_delta(&sample(4_500, 2_010));
        assert_eq!(delta, NetworkDelta::default());
    }

    #[test]
    fn counter_reset_clamps_and_rebases() {
        let mut engine = DeltaEngine::new();
        engine.compute_delta(&sample(10_000, 10_000));

        let delta = engine.compute_delta(&sample(300, 10_400));
        assert_eq!(delta.download_bytes, 0);
        assert_eq!(delta.upload_bytes, 400);

        // Measured against the reset value, not the stale 10_000.
        let delta = engine.compute_delta(&sample(800, 10_400));
        assert_eq!(delta.download_bytes, 500);
        assert_eq!(delta.upload_bytes, 0);
    }

    #[test]
    fn handles_counters_near_u64_max() {
        let mut engine = DeltaEngine::new();
        engine.compute_delta(&sample(u64::MAX - 10, 0));
        let delta = engine.compute_delta(&sample(u64::MAX, 0));
        assert_eq!(delta.download_bytes, 10);
    }
}
