use crate::agent::TickReport;
use crate::incident::Transition;
use crate::state::{MetricKind, State};
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub agent_cpu_usage_percent: Gauge,
    pub agent_memory_usage_percent: Gauge,
    pub agent_net_rx_bytes_total: Gauge,
    pub agent_net_tx_bytes_total: Gauge,
    pub agent_net_download_bytes_per_interval: Gauge,
    pub agent_net_upload_bytes_per_interval: Gauge,
    pub agent_breach: GaugeVec,
    pub agent_incident_open: GaugeVec,
    pub agent_incidents_opened_total: CounterVec,
    pub agent_incidents_closed_total: CounterVec,
    pub agent_remote_errors_total: CounterVec,
    pub agent_sample_errors_total: Counter,
    pub agent_ticks_total: Counter,
    pub agent_uptime_seconds: Gauge,
    pub agent_scrape_count_total: Counter,
    pub agent_last_tick_timestamp_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let agent_cpu_usage_percent = Gauge::with_opts(opts!(
            "agent_cpu_usage_percent",
            "CPU busy share from the last sample in percent (0..100)"
        ))?;
        let agent_memory_usage_percent = Gauge::with_opts(opts!(
            "agent_memory_usage_percent",
            "Used memory from the last sample in percent (0..100)"
        ))?;
        let agent_net_rx_bytes_total = Gauge::with_opts(opts!(
            "agent_net_rx_bytes_total",
            "Cumulative received bytes on the sampled interface"
        ))?;
        let agent_net_tx_bytes_total = Gauge::with_opts(opts!(
            "agent_net_tx_bytes_total",
            "Cumulative transmitted bytes on the sampled interface"
        ))?;
        let agent_net_download_bytes_per_interval = Gauge::with_opts(opts!(
            "agent_net_download_bytes_per_interval",
            "Bytes received since the previous tick"
        ))?;
        let agent_net_upload_bytes_per_interval = Gauge::with_opts(opts!(
            "agent_net_upload_bytes_per_interval",
            "Bytes sent since the previous tick"
        ))?;
        let agent_breach = GaugeVec::new(
            opts!(
                "agent_breach",
                "1 when the metric exceeded its threshold on the last tick"
            ),
            &["metric"],
        )?;
        let agent_incident_open = GaugeVec::new(
            opts!("agent_incident_open", "1 while an incident is open"),
            &["metric"],
        )?;
        let agent_incidents_opened_total = CounterVec::new(
            opts!(
                "agent_incidents_opened_total",
                "Incidents opened on the monitor service"
            ),
            &["metric"],
        )?;
        let agent_incidents_closed_total = CounterVec::new(
            opts!(
                "agent_incidents_closed_total",
                "Incidents closed on the monitor service"
            ),
            &["metric"],
        )?;
        let agent_remote_errors_total = CounterVec::new(
            opts!(
                "agent_remote_errors_total",
                "Failed calls to the monitor service"
            ),
            &["metric"],
        )?;
        let agent_sample_errors_total = Counter::with_opts(opts!(
            "agent_sample_errors_total",
            "Ticks skipped because counters could not be read"
        ))?;
        let agent_ticks_total =
            Counter::with_opts(opts!("agent_ticks_total", "Ticks run since start"))?;
        let agent_uptime_seconds =
            Gauge::with_opts(opts!("agent_uptime_seconds", "Agent uptime in seconds"))?;
        let agent_scrape_count_total = Counter::with_opts(opts!(
            "agent_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let agent_last_tick_timestamp_seconds = Gauge::with_opts(opts!(
            "agent_last_tick_timestamp_seconds",
            "Unix timestamp of the last tick"
        ))?;

        register(&registry, &agent_cpu_usage_percent)?;
        register(&registry, &agent_memory_usage_percent)?;
        register(&registry, &agent_net_rx_bytes_total)?;
        register(&registry, &agent_net_tx_bytes_total)?;
        register(&registry, &agent_net_download_bytes_per_interval)?;
        register(&registry, &agent_net_upload_bytes_per_interval)?;
        register(&registry, &agent_breach)?;
        register(&registry, &agent_incident_open)?;
        register(&registry, &agent_incidents_opened_total)?;
        register(&registry, &agent_incidents_closed_total)?;
        register(&registry, &agent_remote_errors_total)?;
        register(&registry, &agent_sample_errors_total)?;
        register(&registry, &agent_ticks_total)?;
        register(&registry, &agent_uptime_seconds)?;
        register(&registry, &agent_scrape_count_total)?;
        register(&registry, &agent_last_tick_timestamp_seconds)?;

        Ok(Arc::new(Self {
            registry,
            agent_cpu_usage_percent,
            agent_memory_usage_percent,
            agent_net_rx_bytes_total,
            agent_net_tx_bytes_total,
            agent_net_download_bytes_per_interval,
            agent_net_upload_bytes_per_interval,
            agent_breach,
            agent_incident_open,
            agent_incidents_opened_total,
            agent_incidents_closed_total,
            agent_remote_errors_total,
            agent_sample_errors_total,
            agent_ticks_total,
            agent_uptime_seconds,
            agent_scrape_count_total,
            agent_last_tick_timestamp_seconds,
        }))
    }

    /// Counters that only a tick report can tell.
    pub fn record_tick(&self, report: &TickReport) {
        self.agent_ticks_total.inc();
        if report.observation.is_err() {
            self.agent_sample_errors_total.inc();
        }
        for outcome in &report.outcomes {
            let label = [outcome.kind.label()];
            match outcome.result {
                Ok(Transition::Opened) => self
                    .agent_incidents_opened_total
                    .with_label_values(&label)
                    .inc(),
                Ok(Transition::Closed) => self
                    .agent_incidents_closed_total
                    .with_label_values(&label)
                    .inc(),
                Ok(_) => {}
                Err(_) => self
                    .agent_remote_errors_total
                    .with_label_values(&label)
                    .inc(),
            }
        }
    }

    pub fn update_from_state(&self, state: &State) {
        self.agent_last_tick_timestamp_seconds
            .set(state.last_tick_unix as f64);

        if let Some(sample) = &state.last_sample {
            self.agent_cpu_usage_percent.set(sample.cpu_percent);
            self.agent_memory_usage_percent.set(sample.memory_percent);
            self.agent_net_rx_bytes_total
                .set(sample.rx_bytes_cumulative as f64);
            self.agent_net_tx_bytes_total
                .set(sample.tx_bytes_cumulative as f64);
        }
        if let Some(delta) = &state.last_delta {
            self.agent_net_download_bytes_per_interval
                .set(delta.download_bytes as f64);
            self.agent_net_upload_bytes_per_interval
                .set(delta.upload_bytes as f64);
        }

        for kind in MetricKind::ALL {
            let label = [kind.label()];
            if let Some(breaches) = &state.last_breaches {
                self.agent_breach
                    .with_label_values(&label)
                    .set(bool_gauge(breaches.get(kind)));
            }
            self.agent_incident_open
                .with_label_values(&label)
                .set(bool_gauge(state.incident_open(kind)));
        }

        let now = now_unix();
        let uptime = now.saturating_sub(state.started_at_unix) as f64;
        self.agent_uptime_seconds.set(uptime);
    }

    pub fn inc_scrape_count(&self) {
        self.agent_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn bool_gauge(v: bool) -> f64 {
    if v {
        1.0
    } else {
        0.0
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::MetricOutcome;
    use crate::incident::IncidentSet;
    use crate::remote::{RemoteError, RemoteHandle};

    fn encoded(metrics: &Metrics) -> String {
        String::from_utf8(metrics.encode_metrics().unwrap()).unwrap()
    }

    #[test]
    fn tick_outcomes_feed_counters() {
        let metrics = Metrics::new().expect("metrics init");
        let report = TickReport {
            now_unix: 1,
            observation: Err(crate::collectors::SampleError::InterfaceMissing(
                "eth0".to_string(),
            )),
            outcomes: vec![
                MetricOutcome {
                    kind: MetricKind::Cpu,
                    result: Ok(Transition::Opened),
                },
                MetricOutcome {
                    kind: MetricKind::Network,
                    result: Err(RemoteError::Status {
                        url: "http://m".to_string(),
                        status: reqwest::StatusCode::BAD_GATEWAY,
                    }),
                },
            ],
        };
        metrics.record_tick(&report);

        assert_eq!(metrics.agent_ticks_total.get(), 1.0);
        assert_eq!(metrics.agent_sample_errors_total.get(), 1.0);
        assert_eq!(
            metrics
                .agent_incidents_opened_total
                .with_label_values(&["cpu"])
                .get(),
            1.0
        );
        assert_eq!(
            metrics
                .agent_remote_errors_total
                .with_label_values(&["network"])
                .get(),
            1.0
        );
    }

    #[test]
    fn incident_gauge_follows_state() {
        let metrics = Metrics::new().expect("metrics init");
        let mut incidents = IncidentSet::new();
        incidents
            .get_mut(MetricKind::Memory)
            .resume(RemoteHandle::new("r1"));
        let mut state = State::new(0, "eth0");
        state.sync_incidents(&incidents);
        metrics.update_from_state(&state);

        assert_eq!(
            metrics
                .agent_incident_open
                .with_label_values(&["memory"])
                .get(),
            1.0
        );
        assert_eq!(
            metrics.agent_incident_open.with_label_values(&["cpu"]).get(),
            0.0
        );
        assert!(encoded(&metrics).contains("agent_incident_open{metric=\"memory\"} 1"));
    }
}
