use crate::{metrics::ProbeMetrics, reconcile::Event, registry::SharedRegistry};
use ahash::AHashSet as HashSet;
use clusterlink_controller_core::{HealthSignal, Peer, ProbePeer};
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    task::JoinSet,
    time::{self, Duration},
};

/// Probes peers off the reconciler's task and feeds observations back as events.
///
/// Every registered peer is probed on each interval tick; the registry may additionally
/// request a probe when its cached observation has gone stale. At most one probe per peer
/// is in flight at a time.
pub struct Prober<P> {
    registry: SharedRegistry,
    probe: Arc<P>,
    events: mpsc::UnboundedSender<Event>,
    interval: Duration,
    timeout: Duration,
    metrics: ProbeMetrics,
}

impl<P> Prober<P>
where
    P: ProbePeer + Send + Sync + 'static,
{
    pub fn new(
        registry: SharedRegistry,
        probe: P,
        events: mpsc::UnboundedSender<Event>,
        interval: Duration,
        timeout: Duration,
        metrics: ProbeMetrics,
    ) -> Self {
        Self {
            registry,
            probe: Arc::new(probe),
            events,
            interval,
            timeout,
            metrics,
        }
    }

    pub async fn run(self, mut requests: mpsc::UnboundedReceiver<String>) {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        let mut inflight = JoinSet::new();
        let mut probing = HashSet::new();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.events.is_closed() {
                        break;
                    }
                    let peers = self.registry.read().list();
                    for state in peers {
                        self.spawn(state.peer, &mut probing, &mut inflight);
                    }
                }

                Some(name) = requests.recv() => {
                    let peer = self.registry.read().get(&name).map(|s| s.peer);
                    match peer {
                        Some(peer) => self.spawn(peer, &mut probing, &mut inflight),
                        None => tracing::trace!(peer = %name, "No longer registered"),
                    }
                }

                Some(res) = inflight.join_next(), if !inflight.is_empty() => {
                    match res {
                        Ok(name) => {
                            probing.remove(&name);
                        }
                        Err(error) => tracing::warn!(%error, "Probe task failed"),
                    }
                }
            }
        }
        tracing::debug!("Reconciler stopped; prober exiting");
    }

    fn spawn(&self, peer: Peer, probing: &mut HashSet<String>, inflight: &mut JoinSet<String>) {
        if !probing.insert(peer.name.clone()) {
            tracing::trace!(peer = %peer.name, "Probe already in flight");
            return;
        }

        let probe = self.probe.clone();
        let events = self.events.clone();
        let timeout = self.timeout;
        let metrics = self.metrics.clone();
        inflight.spawn(async move {
            let reachable = match time::timeout(timeout, probe.probe(&peer)).await {
                Ok(reachable) => reachable,
                Err(_) => {
                    tracing::debug!(peer = %peer.name, ?timeout, "Probe timed out");
                    false
                }
            };
            metrics.observe(reachable);
            tracing::trace!(peer = %peer.name, reachable);
            let _ = events.send(Event::PeerHealth {
                name: peer.name.clone(),
                signal: HealthSignal::now(reachable),
            });
            peer.name
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PeerRegistry;
    use ahash::AHashMap as HashMap;

    struct MockProbe(HashMap<String, Option<bool>>);

    #[async_trait::async_trait]
    impl ProbePeer for MockProbe {
        async fn probe(&self, peer: &Peer) -> bool {
            match self.0.get(&peer.name).copied().flatten() {
                Some(reachable) => reachable,
                // Never completes; the prober must time out.
                None => std::future::pending().await,
            }
        }
    }

    async fn next_health(rx: &mut mpsc::UnboundedReceiver<Event>) -> (String, bool) {
        match rx.recv().await.expect("prober must send events") {
            Event::PeerHealth { name, signal } => (name, signal.reachable),
            event => panic!("unexpected event: {event:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reports_probe_results() {
        let (registry, requests) = PeerRegistry::shared(Duration::from_secs(30));
        registry.write().register(Peer::new("up", [("10.0.0.2", 443)]));
        registry.write().register(Peer::new("down", [("10.0.0.3", 443)]));
        registry.write().register(Peer::new("hung", [("10.0.0.4", 443)]));

        let probe = MockProbe(
            [
                ("up".to_string(), Some(true)),
                ("down".to_string(), Some(false)),
                ("hung".to_string(), None),
            ]
            .into_iter()
            .collect(),
        );
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let prober = Prober::new(
            registry,
            probe,
            events_tx,
            Duration::from_secs(10),
            Duration::from_secs(3),
            ProbeMetrics::default(),
        );
        let task = tokio::spawn(prober.run(requests));

        let mut results = HashMap::new();
        while results.len() < 3 {
            let (name, reachable) = next_health(&mut events_rx).await;
            results.insert(name, reachable);
        }
        assert!(results["up"]);
        assert!(!results["down"]);
        assert!(!results["hung"], "timed out probes are unreachable");

        drop(events_rx);
        time::sleep(Duration::from_secs(11)).await;
        task.await.expect("prober must exit when the reconciler stops");
    }
}
