use crate::agent::TickReport;
use crate::incident::{IncidentSet, IncidentState};
use crate::remote::RemoteHandle;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Cpu,
    Memory,
    Network,
}

impl MetricKind {
    pub const ALL: [MetricKind; 3] = [MetricKind::Cpu, MetricKind::Memory, MetricKind::Network];

    /// Name used in the monitor service routes (`insertRAMLog`, ...).
    pub fn remote_name(self) -> &'static str {
        match self {
            MetricKind::Cpu => "CPU",
            MetricKind::Memory => "RAM",
            MetricKind::Network => "Network",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
            MetricKind::Network => "network",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    pub timestamp_unix: i64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub rx_bytes_cumulative: u64,
    pub tx_bytes_cumulative: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetworkDelta {
    pub download_bytes: u64,
    pub upload_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Breaches {
    pub cpu: bool,
    pub memory: bool,
    pub network: bool,
}

impl Breaches {
    pub fn get(&self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Cpu => self.cpu,
            MetricKind::Memory => self.memory,
            MetricKind::Network => self.network,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IncidentView {
    pub metric: MetricKind,
    pub open: bool,
    pub handle: Option<RemoteHandle>,
    pub opened_at_unix: Option<i64>,
}

/// Read-only copy of the driver's view, published after every tick.
#[derive(Debug, Clone, Default)]
pub struct State {
    pub started_at_unix: i64,
    pub interface: String,
    pub ticks: u64,
    pub last_tick_unix: i64,
    pub last_sample: Option<MetricSample>,
    pub last_delta: Option<NetworkDelta>,
    pub last_breaches: Option<Breaches>,
    pub incidents: Vec<IncidentView>,
    pub last_errors: Vec<String>,
}

impl State {
    pub fn new(now_unix: i64, interface: impl Into<String>) -> Self {
        Self {
            started_at_unix: now_unix,
            interface: interface.into(),
            ..Self::default()
        }
    }

    /// Keeps the previous sample when the tick could not read counters.
    pub fn record_tick(&mut self, report: &TickReport, incidents: &IncidentSet) {
        self.ticks += 1;
        self.last_tick_unix = report.now_unix;
        if let Ok(obs) = &report.observation {
            self.last_sample = Some(obs.sample.clone());
            self.last_delta = Some(obs.delta);
            self.last_breaches = Some(obs.breaches);
        }
        self.last_errors = report.errors();
        self.sync_incidents(incidents);
    }

    pub fn sync_incidents(&mut self, incidents: &IncidentSet) {
        self.incidents = incidents
            .iter()
            .map(|incident| IncidentView {
                metric: incident.kind(),
                open: incident.is_open(),
                handle: incident.handle().cloned(),
                opened_at_unix: match incident.state() {
                    IncidentState::Open { opened_at_unix, .. } => *opened_at_unix,
                    IncidentState::Idle => None,
                },
            })
            .collect();
    }

    pub fn incident_open(&self, kind: MetricKind) -> bool {
        self.incidents
            .iter()
            .any(|view| view.metric == kind && view.open)
    }
}
