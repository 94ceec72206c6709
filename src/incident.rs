use crate::remote::{RemoteError, RemoteHandle, RemoteLog};
use crate::state::MetricKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncidentState {
    Idle,
    Open {
        handle: RemoteHandle,
        /// Unknown for incidents resumed from the monitor service.
        opened_at_unix: Option<i64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    StayedIdle,
    Opened,
    KeptOpen,
    Closed,
}

/// Debounced open/close tracking for one metric kind.
#[derive(Debug, Clone)]
pub struct Incident {
    kind: MetricKind,
    state: IncidentState,
}

impl Incident {
    pub fn new(kind: MetricKind) -> Self {
        Self {
            kind,
            state: IncidentState::Idle,
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn state(&self) -> &IncidentState {
        &self.state
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, IncidentState::Open { .. })
    }

    pub fn handle(&self) -> Option<&RemoteHandle> {
        match &self.state {
            IncidentState::Open { handle, .. } => Some(handle),
            IncidentState::Idle => None,
        }
    }

    /// Adopts a record the monitor service still has open.
    pub fn resume(&mut self, handle: RemoteHandle) {
        self.state = IncidentState::Open {
            handle,
            opened_at_unix: None,
        };
    }

    /// Applies one tick's breach flag. On a remote failure the state is left
    /// untouched so the same transition is attempted on the next tick.
    pub async fn step<R>(
        &mut self,
        breach: bool,
        remote: &R,
        now_unix: i64,
    ) -> Result<Transition, RemoteError>
    where
        R: RemoteLog + ?Sized,
    {
        match (&self.state, breach) {
            (IncidentState::Idle, false) => Ok(Transition::StayedIdle),
            (IncidentState::Idle, true) => {
                let handle = remote.open(self.kind).await?;
                self.state = IncidentState::Open {
                    handle,
                    opened_at_unix: Some(now_unix),
                };
                Ok(Transition::Opened)
            }
            (IncidentState::Open { .. }, true) => Ok(Transition::KeptOpen),
            (IncidentState::Open { handle, .. }, false) => {
                remote.close(self.kind, handle).await?;
                self.state = IncidentState::Idle;
                Ok(Transition::Closed)
            }
        }
    }
}

/// One incident per metric kind, alive for the whole process.
#[derive(Debug, Clone)]
pub struct IncidentSet {
    cpu: Incident,
    memory: Incident,
    network: Incident,
}

impl Default for IncidentSet {
    fn default() -> Self {
        Self::new()
    }
}

impl IncidentSet {
    pub fn new() -> Self {
        Self {
            cpu: Incident::new(MetricKind::Cpu),
            memory: Incident::new(MetricKind::Memory),
            network: Incident::new(MetricKind::Network),
        }
    }

    #[cfg(test)]
    pub fn get(&self, kind: MetricKind) -> &Incident {
        match kind {
            MetricKind::Cpu => &self.cpu,
            MetricKind::Memory => &self.memory,
            MetricKind::Network => &self.network,
        }
    }

    pub fn get_mut(&mut self, kind: MetricKind) -> &mut Incident {
        match kind {
            MetricKind::Cpu => &mut self.cpu,
            MetricKind::Memory => &mut self.memory,
            MetricKind::Network => &mut self.network,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Incident> {
        [&self.cpu, &self.memory, &self.network].into_iter()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Call, FakeRemote};
    use super::*;

    async fn run(incident: &mut Incident, remote: &FakeRemote, breaches: &[bool]) -> Vec<Transition> {
        let mut out = Vec::new();
        for (tick, breach) in breaches.iter().enumerate() {
            out.push(
                incident
                    .step(*breach, remote, tick as i64)
                    .await
                    .expect("remote succeeds"),
            );
        }
        out
    }

    #[tokio::test]
    async fn opens_once_per_breach_run() {
        let remote = FakeRemote::default();
        let mut incident = Incident::new(MetricKind::Cpu);

        // 85%, 82%, 79%, 90%
        let transitions = run(&mut incident, &remote, &[true, true, false, true]).await;
        assert_eq!(
            transitions,
            vec![
                Transition::Opened,
                Transition::KeptOpen,
                Transition::Closed,
                Transition::Opened
            ]
        );
        assert_eq!(
            remote.calls(),
            vec![
                Call::Open(MetricKind::Cpu),
                Call::Close(MetricKind::Cpu, RemoteHandle::new("cpu-1")),
                Call::Open(MetricKind::Cpu),
            ]
        );
        assert_eq!(incident.handle(), Some(&RemoteHandle::new("cpu-2")));
    }

    #[tokio::test]
    async fn idle_without_breach_makes_no_calls() {
        let remote = FakeRemote::default();
        let mut incident = Incident::new(MetricKind::Memory);
        let transitions = run(&mut incident, &remote, &[false, false, false]).await;
        assert!(transitions.iter().all(|t| *t == Transition::StayedIdle));
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_open_stays_idle_and_retries() {
        let remote = FakeRemote::default();
        remote.fail_next(&[true]);
        let mut incident = Incident::new(MetricKind::Network);

        assert!(incident.step(true, &remote, 1).await.is_err());
        assert!(!incident.is_open());

        assert_eq!(
            incident.step(true, &remote, 2).await.unwrap(),
            Transition::Opened
        );
        assert_eq!(
            incident.state(),
            &IncidentState::Open {
                handle: RemoteHandle::new("network-1"),
                opened_at_unix: Some(2)
            }
        );
        assert_eq!(
            remote.calls(),
            vec![Call::Open(MetricKind::Network), Call::Open(MetricKind::Network)]
        );
    }

    #[tokio::test]
    async fn failed_close_stays_open_and_retries() {
        let remote = FakeRemote::default();
        let mut incident = Incident::new(MetricKind::Memory);
        incident.step(true, &remote, 0).await.unwrap();

        remote.fail_next(&[true]);
        assert!(incident.step(false, &remote, 1).await.is_err());
        assert!(incident.is_open());

        assert_eq!(
            incident.step(false, &remote, 2).await.unwrap(),
            Transition::Closed
        );
        let handle = RemoteHandle::new("memory-1");
        assert_eq!(
            remote.calls(),
            vec![
                Call::Open(MetricKind::Memory),
                Call::Close(MetricKind::Memory, handle.clone()),
                Call::Close(MetricKind::Memory, handle),
            ]
        );
    }

    #[tokio::test]
    async fn resumed_incident_closes_without_reopening() {
        let remote = FakeRemote::default();
        let mut incident = Incident::new(MetricKind::Cpu);
        incident.resume(RemoteHandle::new("old"));

        assert_eq!(
            incident.step(true, &remote, 0).await.unwrap(),
            Transition::KeptOpen
        );
        assert_eq!(
            incident.step(false, &remote, 1).await.unwrap(),
            Transition::Closed
        );
        assert_eq!(
            remote.calls(),
            vec![Call::Close(MetricKind::Cpu, RemoteHandle::new("old"))]
        );
    }

    #[test]
    fn set_holds_one_incident_per_kind() {
        let mut set = IncidentSet::new();
        set.get_mut(MetricKind::Network)
            .resume(RemoteHandle::new("n"));
        let kinds: Vec<_> = set.iter().map(|i| i.kind()).collect();
        assert_eq!(kinds, MetricKind::ALL.to_vec());
        assert!(set.get(MetricKind::Network).is_open());
        assert!(!set.get(MetricKind::Cpu).is_open());
        assert!(!set.get(MetricKind::Memory).is_open());
    }
}
