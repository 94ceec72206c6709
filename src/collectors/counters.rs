use super::{SampleError, Sampler};
use crate::config::ConfigError;
use crate::state::MetricSample;
#[cfg(target_os = "linux")]
use std::fs;
use std::net::IpAddr;
use std::thread;
use std::time::Instant;
use sysinfo::{CpuExt, CpuRefreshKind, RefreshKind, System, SystemExt};
#[cfg(not(target_os = "linux"))]
use sysinfo::{NetworkExt, NetworksExt};
use tracing::{debug, info};

#[cfg(target_os = "linux")]
const PROC_NET_DEV: &str = "/proc/net/dev";

/// Reads CPU and memory through sysinfo and the byte counters of one
/// interface chosen at startup.
pub struct SystemSampler {
    system: System,
    iface: String,
    cpu_refreshed_at: Instant,
}

impl SystemSampler {
    /// Blocks for `MINIMUM_CPU_UPDATE_INTERVAL`: sysinfo's first CPU refresh
    /// only knows the totals since boot, so a second one is taken here and
    /// the first sample already reports current usage.
    pub fn new(iface: String) -> Self {
        let mut system = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(),
        );
        thread::sleep(System::MINIMUM_CPU_UPDATE_INTERVAL);
        system.refresh_cpu();
        Self {
            system,
            iface,
            cpu_refreshed_at: Instant::now(),
        }
    }

    /// A refresh closer than the minimum interval to the previous one would
    /// measure a window too short to mean anything; keep the last reading.
    fn refresh_cpu(&mut self) {
        if self.cpu_refreshed_at.elapsed() >= System::MINIMUM_CPU_UPDATE_INTERVAL {
            self.system.refresh_cpu();
            self.cpu_refreshed_at = Instant::now();
        }
    }

    #[cfg(target_os = "linux")]
    fn read_interface_counters(&mut self) -> Result<(u64, u64), SampleError> {
        let text = fs::read_to_string(PROC_NET_DEV).map_err(|source| SampleError::Read {
            path: PROC_NET_DEV.to_string(),
            source,
        })?;
        parse_proc_net_dev(&text, &self.iface)
    }

    #[cfg(not(target_os = "linux"))]
    fn read_interface_counters(&mut self) -> Result<(u64, u64), SampleError> {
        self.system.refresh_networks_list();
        self.system
            .networks()
            .iter()
            .find(|(name, _)| name.as_str() == self.iface)
            .map(|(_, data)| (data.total_received(), data.total_transmitted()))
            .ok_or_else(|| SampleError::InterfaceMissing(self.iface.clone()))
    }
}

impl Sampler for SystemSampler {
    fn sample(&mut self, now_unix: i64) -> Result<MetricSample, SampleError> {
        self.refresh_cpu();
        self.system.refresh_memory();

        let cpu_percent = f64::from(self.system.global_cpu_info().cpu_usage()).clamp(0.0, 100.0);
        let memory_percent = percent(self.system.used_memory(), self.system.total_memory());
        let (rx_bytes_cumulative, tx_bytes_cumulative) = self.read_interface_counters()?;

        debug!(
            cpu_percent,
            memory_percent,
            rx = rx_bytes_cumulative,
            tx = tx_bytes_cumulative,
            "sampled counters"
        );

        Ok(MetricSample {
            timestamp_unix: now_unix,
            cpu_percent,
            memory_percent,
            rx_bytes_cumulative,
            tx_bytes_cumulative,
        })
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (used as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// Cumulative (rx, tx) bytes for `iface` from `/proc/net/dev` content.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub fn parse_proc_net_dev(text: &str, iface: &str) -> Result<(u64, u64), SampleError> {
    for line in text.lines().skip(2) {
        let Some((name, rest)) = line.split_once(':') else {
            continue;
        };
        if name.trim() != iface {
            continue;
        }

        let fields: Vec<&str> = rest.split_whitespace().collect();
        if fields.len() < 9 {
            return Err(SampleError::Parse {
                iface: iface.to_string(),
                detail: format!("expected at least 9 fields, got {}", fields.len()),
            });
        }
        let rx = parse_counter(fields[0], iface)?;
        let tx = parse_counter(fields[8], iface)?;
        return Ok((rx, tx));
    }

    Err(SampleError::InterfaceMissing(iface.to_string()))
}

fn parse_counter(raw: &str, iface: &str) -> Result<u64, SampleError> {
    raw.parse::<u64>().map_err(|err| SampleError::Parse {
        iface: iface.to_string(),
        detail: format!("{raw:?}: {err}"),
    })
}

/// Startup-only: the configured interface, or the first non-loopback one
/// holding an address.
pub fn select_interface(preferred: Option<&str>) -> Result<String, ConfigError> {
    let ifaces = if_addrs::get_if_addrs()
        .map_err(|err| ConfigError::NoInterface(format!("cannot list interfaces: {err}")))?;

    match pick_interface(ifaces.iter().map(|i| (i.name.as_str(), i.ip())), preferred) {
        Some(name) => {
            info!(iface = %name, "selected network interface");
            Ok(name)
        }
        None => Err(ConfigError::NoInterface(match preferred {
            Some(want) => format!("configured interface {want} has no address"),
            None => "no non-loopback interface has an address".to_string(),
        })),
    }
}

pub fn pick_interface<'a>(
    candidates: impl IntoIterator<Item = (&'a str, IpAddr)>,
    preferred: Option<&str>,
) -> Option<String> {
    let mut candidates = candidates
        .into_iter()
        .filter(|(_, ip)| !ip.is_unspecified());
    match preferred {
        Some(want) => candidates
            .find(|(name, _)| *name == want)
            .map(|(name, _)| name.to_string()),
        None => candidates
            .find(|(_, ip)| !ip.is_loopback())
            .map(|(name, _)| name.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    const NET_DEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 8123456   90000    0    0    0     0          0         0  8123456   90000    0    0    0     0       0          0
  eth0: 1048576000 812345  0    3    0     0          0      1200 52428800  401234    0    0    0     0       0          0
 veth1: 12 1 0 0 0 0 0 0 34 1 0 0 0 0 0 0
";

    #[test]
    fn parses_rx_and_tx_for_named_interface() {
        assert_eq!(
            parse_proc_net_dev(NET_DEV, "eth0").unwrap(),
            (1_048_576_000, 52_428_800)
        );
        assert_eq!(parse_proc_net_dev(NET_DEV, "veth1").unwrap(), (12, 34));
    }

    #[test]
    fn name_must_match_exactly() {
        assert!(matches!(
            parse_proc_net_dev(NET_DEV, "eth"),
            Err(SampleError::InterfaceMissing(name)) if name == "eth"
        ));
        assert!(matches!(
            parse_proc_net_dev(NET_DEV, "th0"),
            Err(SampleError::InterfaceMissing(_))
        ));
    }

    #[test]
    fn truncated_line_is_a_parse_error() {
        let text = "h1\nh2\n  eth0: 1 2 3\n";
        assert!(matches!(
            parse_proc_net_dev(text, "eth0"),
            Err(SampleError::Parse { .. })
        ));
    }

    #[test]
    fn picks_first_non_loopback_with_address() {
        let candidates = vec![
            ("lo", IpAddr::V4(Ipv4Addr::LOCALHOST)),
            ("docker0", IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            ("eth0", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))),
            ("wlan0", IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1))),
        ];
        assert_eq!(
            pick_interface(candidates.clone(), None).as_deref(),
            Some("eth0")
        );
        assert_eq!(
            pick_interface(candidates.clone(), Some("wlan0")).as_deref(),
            Some("wlan0")
        );
        assert_eq!(pick_interface(candidates, Some("docker0")), None);
    }

    #[test]
    fn loopback_only_host_has_no_candidate() {
        let candidates = vec![
            ("lo", IpAddr::V4(Ipv4Addr::LOCALHOST)),
            ("lo", IpAddr::V6(Ipv6Addr::LOCALHOST)),
        ];
        assert_eq!(pick_interface(candidates, None), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn first_sample_reflects_current_cpu_load() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let stop = Arc::new(AtomicBool::new(false));
        let cores = thread::available_parallelism().map_or(1, |n| n.get());
        let spinners: Vec<_> = (0..cores)
            .map(|_| {
                let stop = stop.clone();
                thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        std::hint::spin_loop();
                    }
                })
            })
            .collect();

        let mut sampler = SystemSampler::new("lo".to_string());
        let sample = sampler.sample(0);

        stop.store(true, Ordering::Relaxed);
        for spinner in spinners {
            spinner.join().unwrap();
        }

        let sample = sample.unwrap();
        assert!(
            sample.cpu_percent > 50.0,
            "expected a busy reading, got {}",
            sample.cpu_percent
        );
        assert!(sample.memory_percent > 0.0 && sample.memory_percent <= 100.0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn later_samples_refresh_cpu_after_minimum_interval() {
        let mut sampler = SystemSampler::new("lo".to_string());
        let primed = sampler.cpu_refreshed_at;
        sampler.sample(0).unwrap();
        assert_eq!(sampler.cpu_refreshed_at, primed);

        thread::sleep(System::MINIMUM_CPU_UPDATE_INTERVAL);
        let sample = sampler.sample(1).unwrap();
        assert!(sampler.cpu_refreshed_at > primed);
        assert!((0.0..=100.0).contains(&sample.cpu_percent));
    }

    #[test]
    fn percent_handles_zero_total() {
        assert_eq!(percent(10, 0), 0.0);
        assert_eq!(percent(50, 200), 25.0);
    }
}
