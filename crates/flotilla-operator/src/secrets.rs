//! Member-cluster registration from kubeconfig Secrets
//!
//! A cluster joins the fleet when a Secret labeled `flotilla.io/sync=true`
//! appears in the operator namespace; each data entry is
//! `<cluster-id> → kubeconfig`. Removing the Secret (or the entry) tears
//! the cluster's watchers down and deregisters it.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::watcher;
use kube::{Client, Config};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use flotilla_common::CLUSTER_SECRET_LABEL;
use flotilla_mesh::api::KubeClusterApi;
use flotilla_mesh::registry::{RemoteController, RemoteRegistry};

use crate::watchers::spawn_cluster_watchers;

/// Tracks per-cluster watcher lifecycles keyed by cluster id
pub struct ClusterLauncher {
    registry: Arc<RemoteRegistry>,
    tokens: DashMap<String, CancellationToken>,
}

impl ClusterLauncher {
    /// Create a launcher over the shared registry
    pub fn new(registry: Arc<RemoteRegistry>) -> Self {
        Self {
            registry,
            tokens: DashMap::new(),
        }
    }

    /// Register a member cluster directly from a kube client
    pub fn launch(&self, cluster_id: &str, client: Client) {
        if self.tokens.contains_key(cluster_id) {
            return;
        }
        let rc = Arc::new(RemoteController::new(
            cluster_id,
            Arc::new(KubeClusterApi::new(client.clone())),
        ));
        self.registry.register_cluster(rc.clone());

        let token = CancellationToken::new();
        spawn_cluster_watchers(self.registry.clone(), rc, client, token.clone());
        self.tokens.insert(cluster_id.to_string(), token);
        info!(cluster = %cluster_id, "cluster watchers started");
    }

    /// Tear down a member cluster
    pub fn teardown(&self, cluster_id: &str) {
        if let Some((_, token)) = self.tokens.remove(cluster_id) {
            token.cancel();
        }
        self.registry.deregister_cluster(cluster_id);
        info!(cluster = %cluster_id, "cluster watchers stopped");
    }

    /// Register every kubeconfig entry carried by a Secret
    pub async fn apply_secret(&self, secret: &Secret) {
        for (cluster_id, bytes) in secret.data.iter().flatten() {
            if self.tokens.contains_key(cluster_id) {
                continue;
            }
            match client_from_kubeconfig(&bytes.0).await {
                Ok(client) => self.launch(cluster_id, client),
                Err(e) => {
                    error!(cluster = %cluster_id, error = %e, "kubeconfig secret entry rejected");
                }
            }
        }
    }

    /// Deregister every cluster a deleted Secret carried
    pub fn remove_secret(&self, secret: &Secret) {
        for (cluster_id, _) in secret.data.iter().flatten() {
            self.teardown(cluster_id);
        }
    }

    /// Cancel every cluster watcher (shutdown path)
    pub fn teardown_all(&self) {
        let ids: HashSet<String> = self.tokens.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.teardown(&id);
        }
    }
}

/// Build a kube client from raw kubeconfig bytes
async fn client_from_kubeconfig(bytes: &[u8]) -> anyhow::Result<Client> {
    let kubeconfig: Kubeconfig = serde_yaml::from_slice(bytes)?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
    Ok(Client::try_from(config)?)
}

/// Watch registration Secrets in the operator namespace until cancelled
pub async fn run(
    launcher: Arc<ClusterLauncher>,
    client: Client,
    namespace: String,
    token: CancellationToken,
) {
    let api: Api<Secret> = Api::namespaced(client, &namespace);
    let config = watcher::Config::default()
        .labels(&format!("{CLUSTER_SECRET_LABEL}=true"));
    let mut stream = watcher(api, config).boxed();

    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            event = stream.try_next() => event,
        };
        match event {
            Ok(Some(watcher::Event::Apply(secret)) | Some(watcher::Event::InitApply(secret))) => {
                launcher.apply_secret(&secret).await;
            }
            Ok(Some(watcher::Event::Delete(secret))) => {
                launcher.remove_secret(&secret);
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "cluster secret watch error, stream will retry");
            }
        }
    }
    info!("cluster secret watcher stopped");
}

/// One-shot listing used at startup so the fleet is known before the
/// watch settles
pub async fn bootstrap_existing(
    launcher: &ClusterLauncher,
    client: &Client,
    namespace: &str,
) -> anyhow::Result<()> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let params = ListParams::default().labels(&format!("{CLUSTER_SECRET_LABEL}=true"));
    for secret in api.list(&params).await?.items {
        launcher.apply_secret(&secret).await;
    }
    Ok(())
}
