use crate::config::ThresholdsConfig;
use crate::state::{Breaches, MetricSample, NetworkDelta};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub network_bytes_per_interval: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from(&ThresholdsConfig::default())
    }
}

impl From<&ThresholdsConfig> for Thresholds {
    fn from(value: &ThresholdsConfig) -> Self {
        Self {
            cpu_percent: value.cpu_percent,
            memory_percent: value.memory_percent,
            network_bytes_per_interval: value.network_bytes_per_interval,
        }
    }
}

impl Thresholds {
    /// A value sitting exactly on a threshold is not a breach.
    pub fn evaluate(&self, sample: &MetricSample, delta: &NetworkDelta) -> Breaches {
        Breaches {
            cpu: sample.cpu_percent > self.cpu_percent,
            memory: sample.memory_percent > self.memory_percent,
            network: delta.download_bytes > self.network_bytes_per_interval
                || delta.upload_bytes > self.network_bytes_per_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn sample(cpu: f64, mem: f64) -> MetricSample {
        MetricSample {
            timestamp_unix: 0,
            cpu_percent: cpu,
            memory_percent: mem,
            rx_bytes_cumulative: 0,
            tx_bytes_cumulative: 0,
        }
    }

    fn delta(down: u64, up: u64) -> NetworkDelta {
        NetworkDelta {
            download_bytes: down,
            upload_bytes: up,
        }
    }

    #[test]
    fn boundaries_are_strict() {
        let t = Thresholds::default();

        let at = t.evaluate(&sample(80.0, 80.0), &delta(2 * MIB, 2 * MIB));
        assert_eq!(at, Breaches::default());

        let above = t.evaluate(&sample(80.01, 80.01), &delta(2 * MIB + 1, 0));
        assert!(above.cpu);
        assert!(above.memory);
        assert!(above.network);
    }

    #[test]
    fn network_breaches_on_either_direction() {
        let t = Thresholds::default();
        assert!(t.evaluate(&sample(0.0, 0.0), &delta(0, 3 * MIB)).network);
        assert!(t.evaluate(&sample(0.0, 0.0), &delta(3 * MIB, 0)).network);
        assert!(!t.evaluate(&sample(0.0, 0.0), &delta(MIB, MIB)).network);
    }

    #[test]
    fn metrics_are_classified_independently() {
        let t = Thresholds::default();
        let b = t.evaluate(&sample(95.0, 10.0), &delta(0, 0));
        assert_eq!(
            b,
            Breaches {
                cpu: true,
                memory: false,
                network: false
            }
        );
    }

    #[test]
    fn configured_values_are_used() {
        let t = Thresholds::from(&ThresholdsConfig {
            cpu_percent: 50.0,
            memory_percent: 90.0,
            network_bytes_per_interval: 100,
        });
        let b = t.evaluate(&sample(60.0, 85.0), &delta(101, 0));
        assert!(b.cpu);
        assert!(!b.memory);
        assert!(b.network);
    }
}
