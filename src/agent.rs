use crate::collectors::{SampleError, Sampler};
use crate::delta::DeltaEngine;
use crate::incident::{IncidentSet, Transition};
use crate::remote::{RemoteError, RemoteLog};
use crate::state::{Breaches, MetricKind, MetricSample, NetworkDelta};
use crate::thresholds::Thresholds;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Observation {
    pub sample: MetricSample,
    pub delta: NetworkDelta,
    pub breaches: Breaches,
}

#[derive(Debug)]
pub struct MetricOutcome {
    pub kind: MetricKind,
    pub result: Result<Transition, RemoteError>,
}

#[derive(Debug)]
pub struct TickReport {
    pub now_unix: i64,
    pub observation: Result<Observation, SampleError>,
    pub outcomes: Vec<MetricOutcome>,
}

impl TickReport {
    pub fn errors(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Err(err) = &self.observation {
            out.push(format!("sample: {err}"));
        }
        for outcome in &self.outcomes {
            if let Err(err) = &outcome.result {
                out.push(format!("{}: {err}", outcome.kind));
            }
        }
        out
    }
}

/// Owns every piece of cross-tick state. `tick` takes `&mut self`, so two
/// ticks can never interleave on the same agent.
pub struct Agent<S, R> {
    sampler: S,
    remote: R,
    thresholds: Thresholds,
    delta: DeltaEngine,
    incidents: IncidentSet,
}

impl<S, R> Agent<S, R>
where
    S: Sampler,
    R: RemoteLog,
{
    pub fn new(sampler: S, remote: R, thresholds: Thresholds) -> Self {
        Self {
            sampler,
            remote,
            thresholds,
            delta: DeltaEngine::new(),
            incidents: IncidentSet::new(),
        }
    }

    pub fn incidents(&self) -> &IncidentSet {
        &self.incidents
    }

    /// Adopts records the monitor service still holds open from a previous
    /// run. Lookup failures leave that metric idle.
    pub async fn rehydrate(&mut self) {
        for kind in MetricKind::ALL {
            match self.remote.fetch_open(kind).await {
                Ok(Some(handle)) => {
                    info!(metric = %kind, handle = %handle, "resuming open incident");
                    self.incidents.get_mut(kind).resume(handle);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(metric = %kind, error = %err, "open incident lookup failed, starting idle");
                }
            }
        }
    }

    pub async fn tick(&mut self, now_unix: i64) -> TickReport {
        let sample = match self.sampler.sample(now_unix) {
            Ok(sample) => sample,
            Err(err) => {
                warn!(error = %err, "sampling failed, skipping tick");
                return TickReport {
                    now_unix,
                    observation: Err(err),
                    outcomes: Vec::new(),
                };
            }
        };

        let delta = self.delta.compute_delta(&sample);
        let breaches = self.thresholds.evaluate(&sample, &delta);

        let mut outcomes = Vec::with_capacity(MetricKind::ALL.len());
        for kind in MetricKind::ALL {
            let incident = self.incidents.get_mut(kind);
            let result = incident
                .step(breaches.get(kind), &self.remote, now_unix)
                .await;
            match &result {
                Ok(Transition::Opened) => {
                    info!(metric = %kind, handle = ?incident.handle(), "incident opened")
                }
                Ok(Transition::Closed) => info!(metric = %kind, "incident closed"),
                Ok(_) => {}
                Err(err) => warn!(
                    metric = %kind,
                    breach = breaches.get(kind),
                    error = %err,
                    "incident transition failed, will retry next tick"
                ),
            }
            outcomes.push(MetricOutcome { kind, result });
        }

        TickReport {
            now_unix,
            observation: Ok(Observation {
                sample,
                delta,
                breaches,
            }),
            outcomes,
        }
    }
}
