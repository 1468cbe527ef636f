use crate::{
    index::{
        metrics::{IndexMetrics, ProbeMetrics, ReconcileMetrics},
        prober::Prober,
        Event, Index, PeerRegistry, Reader, Reconciler, Store,
    },
    k8s, status, TcpProbe,
};
use anyhow::{bail, Result};
use clap::Parser;
use k8s::watcher;
use prometheus_client::registry::Registry;
use std::{path::PathBuf, sync::Arc};
use tokio::{
    sync::mpsc,
    time::{self, Duration},
};
use tracing::{info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "clusterlink", about = "A multi-cluster service connectivity controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "clusterlink=info,warn",
        env = "CLUSTERLINK_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Seconds between reachability probes of every peer.
    #[clap(long, default_value = "10", value_parser = parse_secs)]
    probe_interval: Duration,

    /// Seconds after which a probe that has not completed counts as unreachable.
    #[clap(long, default_value = "3", value_parser = parse_secs)]
    probe_timeout: Duration,

    /// Seconds after which a peer's cached reachability is re-probed on lookup.
    #[clap(long, default_value = "30", value_parser = parse_secs)]
    health_staleness: Duration,

    /// Seconds between full re-resolutions of every import.
    #[clap(long, default_value = "10", value_parser = parse_secs)]
    reconcile_period: Duration,

    #[clap(long, default_value = "5000")]
    patch_timeout_ms: u64,

    /// Persists the object store to this file and restores it on startup.
    #[clap(long, env = "CLUSTERLINK_CONTROLLER_STATE_PATH")]
    state_path: Option<PathBuf>,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    /// Runs the controller without an in-process dataplane.
    pub async fn run(self) -> Result<()> {
        self.run_with(drop).await
    }

    /// Runs the controller, handing the dataplane [`Reader`] to `dataplane` once the
    /// reconciler has been spawned.
    ///
    /// The reader is the only way to consult published bindings and access policies; a
    /// dataplane embedding the controller keeps it for as long as it serves connections.
    pub async fn run_with<F>(self, dataplane: F) -> Result<()>
    where
        F: FnOnce(Reader),
    {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            probe_interval,
            probe_timeout,
            health_staleness,
            reconcile_period,
            patch_timeout_ms,
            state_path,
        } = self;

        // A snapshot that cannot be read must not be silently replaced by an empty store.
        let store = match &state_path {
            Some(path) => Store::restore(path)?,
            None => Store::default(),
        };
        let store = Arc::new(store);

        let mut prom = <Registry>::default();
        let index_metrics = IndexMetrics::register(prom.sub_registry_with_prefix("index"));
        let reconcile_metrics =
            ReconcileMetrics::register(prom.sub_registry_with_prefix("reconcile"));
        let probe_metrics = ProbeMetrics::register(prom.sub_registry_with_prefix("peer_probe"));
        let status_metrics =
            status::ControllerMetrics::register(prom.sub_registry_with_prefix("resource_status"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // Every watch writes through the index; the reconciler consumes its events.
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (registry, probe_requests) = PeerRegistry::shared(health_staleness);
        let index = Index::new(store.clone(), events_tx.clone(), index_metrics).shared();

        // Spawn resource watches.

        let peers = runtime.watch_all::<k8s::Peer>(watcher::Config::default());
        tokio::spawn(kubert::index::cluster(index.clone(), peers).instrument(info_span!("peers")));

        let exports = runtime.watch_all::<k8s::Export>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), exports).instrument(info_span!("exports")),
        );

        let imports = runtime.watch_all::<k8s::Import>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), imports).instrument(info_span!("imports")),
        );

        let access_policies = runtime.watch_all::<k8s::AccessPolicy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), access_policies)
                .instrument(info_span!("accesspolicies")),
        );

        let privileged_policies =
            runtime.watch_all::<k8s::PrivilegedAccessPolicy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index, privileged_policies)
                .instrument(info_span!("privilegedaccesspolicies")),
        );

        // Spawn the reconciler and the tasks that feed it.

        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (reconciler, reader) =
            Reconciler::new(store.clone(), registry.clone(), reconcile_metrics);
        tokio::spawn(
            reconciler
                .with_status(status_tx)
                .run(events_rx)
                .instrument(info_span!("reconciler")),
        );
        dataplane(reader);

        tokio::spawn(resync(events_tx.clone(), reconcile_period).instrument(info_span!("resync")));

        let prober = Prober::new(
            registry,
            TcpProbe,
            events_tx,
            probe_interval,
            probe_timeout,
            probe_metrics,
        );
        tokio::spawn(prober.run(probe_requests).instrument(info_span!("prober")));

        let status_controller = status::Controller::new(
            runtime.client(),
            status_rx,
            Duration::from_millis(patch_timeout_ms),
            reconcile_period,
            status_metrics,
        );
        tokio::spawn(
            status_controller
                .run()
                .instrument(info_span!("status_controller")),
        );

        if let Some(path) = state_path.clone() {
            tokio::spawn(
                persist(store.clone(), path, reconcile_period).instrument(info_span!("persist")),
            );
        }

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        if let Some(path) = state_path {
            store.persist(&path)?;
        }

        Ok(())
    }
}

/// Parses a whole, non-zero number of seconds. Every duration drives a timer interval,
/// which cannot tick at a zero period.
fn parse_secs(s: &str) -> Result<Duration> {
    let secs = s.parse::<u64>()?;
    if secs == 0 {
        bail!("must be at least one second");
    }
    Ok(Duration::from_secs(secs))
}

/// Periodically asks the reconciler to re-resolve every import.
///
/// The first resync fires immediately so that a restored store is reconciled before any
/// watch has delivered its initial state.
async fn resync(events: mpsc::UnboundedSender<Event>, period: Duration) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if events.send(Event::Resync).is_err() {
            tracing::debug!("Reconciler stopped");
            return;
        }
    }
}

/// Writes a snapshot of the store whenever it has changed.
async fn persist(store: Arc<Store>, path: PathBuf, period: Duration) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let mut persisted = store.revision();
    loop {
        interval.tick().await;
        if store.revision() == persisted {
            continue;
        }

        let task = {
            let store = store.clone();
            let path = path.clone();
            tokio::task::spawn_blocking(move || store.persist(&path))
        };
        match task.await {
            Ok(Ok(revision)) => {
                tracing::debug!(?revision, path = %path.display(), "Persisted store");
                persisted = revision;
            }
            Ok(Err(error)) => {
                tracing::warn!(%error, path = %path.display(), "Failed to persist store")
            }
            Err(error) => tracing::warn!(%error, "Persist task failed"),
        }
    }
}
