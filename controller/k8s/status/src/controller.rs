use crate::patch::{import_patch, peer_patch};
use ahash::AHashMap as HashMap;
use clusterlink_controller_core::CONTROLLER_NAME;
use clusterlink_controller_k8s_api::{self as k8s, Api};
use clusterlink_controller_k8s_index::StatusUpdate;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use tokio::{
    sync::mpsc,
    time::{self, Duration},
};

/// Patches import and peer status as the reconciler reports changes.
///
/// Updates for the same resource are coalesced so only the latest is written. Failed
/// patches are retried on the next tick unless a newer update has replaced them; a
/// resource that no longer exists is dropped.
pub struct Controller {
    client: k8s::Client,
    updates: mpsc::UnboundedReceiver<StatusUpdate>,
    patch_timeout: Duration,
    retry_interval: Duration,
    metrics: ControllerMetrics,
}

#[derive(Clone, Debug, Default)]
pub struct ControllerMetrics {
    patches: Family<PatchLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PatchLabels {
    kind: &'static str,
    result: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
enum Target {
    Import { namespace: String, name: String },
    Peer { name: String },
}

enum Outcome {
    Patched,
    Gone,
    Failed,
}

// === impl Controller ===

impl Controller {
    pub fn new(
        client: k8s::Client,
        updates: mpsc::UnboundedReceiver<StatusUpdate>,
        patch_timeout: Duration,
        retry_interval: Duration,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            client,
            updates,
            patch_timeout,
            retry_interval,
            metrics,
        }
    }

    pub async fn run(mut self) {
        let mut pending = HashMap::<Target, StatusUpdate>::new();
        let mut retry = time::interval(self.retry_interval);
        retry.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                update = self.updates.recv() => match update {
                    Some(update) => {
                        coalesce(&mut pending, update);
                        while let Ok(update) = self.updates.try_recv() {
                            coalesce(&mut pending, update);
                        }
                    }
                    None => break,
                },
                _ = retry.tick() => {
                    if pending.is_empty() {
                        continue;
                    }
                    tracing::debug!(pending = pending.len(), "Retrying status patches");
                }
            }

            self.process_updates(&mut pending).await;
        }

        tracing::debug!("Reconciler stopped; status controller exiting");
    }

    async fn process_updates(&self, pending: &mut HashMap<Target, StatusUpdate>) {
        let updates = std::mem::take(pending);
        for (target, update) in updates {
            match self.patch(&update).await {
                Outcome::Patched | Outcome::Gone => {}
                Outcome::Failed => {
                    pending.insert(target, update);
                }
            }
        }
    }

    async fn patch(&self, update: &StatusUpdate) -> Outcome {
        let params = k8s::PatchParams::apply(CONTROLLER_NAME);
        let (kind, name, res) = match update {
            StatusUpdate::Import {
                namespace,
                name,
                status,
                bindings,
            } => {
                let api = Api::<k8s::Import>::namespaced(self.client.clone(), namespace);
                let patch = import_patch(*status, bindings);
                let res =
                    time::timeout(self.patch_timeout, api.patch_status(name, &params, &patch))
                        .await;
                ("Import", name, res.map(|res| res.map(drop)))
            }
            StatusUpdate::Peer {
                name,
                status,
                observed_at,
            } => {
                let api = Api::<k8s::Peer>::all(self.client.clone());
                let patch = peer_patch(*status, *observed_at);
                let res =
                    time::timeout(self.patch_timeout, api.patch_status(name, &params, &patch))
                        .await;
                ("Peer", name, res.map(|res| res.map(drop)))
            }
        };

        let outcome = match res {
            Ok(Ok(())) => {
                tracing::debug!(kind, %name, "Patched status");
                Outcome::Patched
            }
            Ok(Err(k8s::Error::Api(error))) if error.code == 404 => {
                tracing::debug!(kind, %name, "Resource no longer exists");
                Outcome::Gone
            }
            Ok(Err(error)) => {
                tracing::error!(kind, %name, %error, "Failed to patch status");
                Outcome::Failed
            }
            Err(_) => {
                tracing::error!(
                    kind,
                    %name,
                    timeout = ?self.patch_timeout,
                    "Status patch timed out"
                );
                Outcome::Failed
            }
        };
        self.metrics.observe(kind, &outcome);
        outcome
    }
}

fn coalesce(pending: &mut HashMap<Target, StatusUpdate>, update: StatusUpdate) {
    let target = match &update {
        StatusUpdate::Import {
            namespace, name, ..
        } => Target::Import {
            namespace: namespace.clone(),
            name: name.clone(),
        },
        StatusUpdate::Peer { name, .. } => Target::Peer { name: name.clone() },
    };
    pending.insert(target, update);
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "patches",
            "Count of status patches by resource kind and result",
            metrics.patches.clone(),
        );
        metrics
    }

    fn observe(&self, kind: &'static str, outcome: &Outcome) {
        let result = match outcome {
            Outcome::Patched => "ok",
            Outcome::Gone => "not_found",
            Outcome::Failed => "error",
        };
        self.patches
            .get_or_create(&PatchLabels { kind, result })
            .inc();
    }
}
