//! Flotilla operator — multi-cluster service-mesh control plane daemon

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use flotilla_common::telemetry::{init_telemetry, TelemetryConfig};
use flotilla_common::{LabelSet, MeshParams};
use flotilla_mesh::addresses::AddressStore;
use flotilla_mesh::api::KubeClusterApi;
use flotilla_mesh::registry::RemoteRegistry;
use flotilla_operator::secrets::{self, ClusterLauncher};
use flotilla_operator::ADDRESS_STORE_CONFIG_MAP;

/// Flotilla — reconciles workload identities across a fleet of clusters
/// into ServiceEntry/DestinationRule/Sidecar objects
#[derive(Parser, Debug)]
#[command(name = "flotilla-operator", version, about, long_about = None)]
struct Cli {
    /// Identifier of the cluster this operator runs in
    #[arg(long, env = "FLOTILLA_CLUSTER_ID", default_value = "local")]
    cluster_id: String,

    /// Namespace holding registration Secrets and the address-store ConfigMap
    #[arg(long, env = "FLOTILLA_NAMESPACE", default_value = "flotilla-system")]
    namespace: String,

    /// Label/annotation key carrying a workload's global identity
    #[arg(long, default_value = "identity")]
    workload_identity_label: String,

    /// Label/annotation key carrying a workload's environment
    #[arg(long, default_value = "env")]
    env_label: String,

    /// Label on GlobalTrafficPolicies read as an integer priority
    #[arg(long, default_value = "priority")]
    priority_label: String,

    /// `app` label value of the mesh ingress gateway Service
    #[arg(long, default_value = "istio-ingressgateway")]
    gateway_app: String,

    /// Pod-template label that excludes a workload from reconciliation
    #[arg(long, default_value = "flotilla-ignore")]
    ignore_label: String,

    /// Pod-template annotation marking sidecar injection
    #[arg(long, default_value = "sidecar.istio.io/inject")]
    sidecar_injection_annotation: String,

    /// Suffix appended to `<env>.<identity>` to form the global FQDN
    #[arg(long, default_value = "global")]
    hostname_suffix: String,

    /// Namespace SE/DR objects are written to in every cluster
    #[arg(long, default_value = "flotilla-sync")]
    sync_namespace: String,

    /// First two octets of generated VIPs
    #[arg(long, default_value = "240.0")]
    ip_prefix: String,

    /// Generate SPIFFE SubjectAltNames on ServiceEntries
    #[arg(long)]
    enable_san: bool,

    /// SPIFFE trust-domain prefix used with --enable-san
    #[arg(long, default_value = "")]
    san_prefix: String,

    /// "enabled" appends egress hosts to workload Sidecars
    #[arg(long, default_value = "disabled")]
    workload_sidecar_update: String,

    /// Conventional name of the per-namespace workload Sidecar object
    #[arg(long, default_value = "default")]
    workload_sidecar_name: String,

    /// Seconds after startup during which events populate caches only
    #[arg(long, default_value_t = 300)]
    cache_warmup_seconds: u64,

    /// Full relist period for watchers in seconds (0 = watch only)
    #[arg(long, default_value_t = 0)]
    resync_seconds: u64,

    /// Start in read-only mode (no mesh object writes)
    #[arg(long)]
    read_only: bool,
}

impl Cli {
    fn mesh_params(&self) -> MeshParams {
        MeshParams {
            label_set: LabelSet {
                workload_identity_key: self.workload_identity_label.clone(),
                env_key: self.env_label.clone(),
                priority_key: self.priority_label.clone(),
                gateway_app: self.gateway_app.clone(),
                ignore_label: self.ignore_label.clone(),
                sidecar_injection_annotation: self.sidecar_injection_annotation.clone(),
            },
            hostname_suffix: self.hostname_suffix.clone(),
            sync_namespace: self.sync_namespace.clone(),
            ip_prefix: self.ip_prefix.clone(),
            enable_san: self.enable_san,
            san_prefix: self.san_prefix.clone(),
            workload_sidecar_update: self.workload_sidecar_update.clone(),
            workload_sidecar_name: self.workload_sidecar_name.clone(),
            cache_warmup_duration: Duration::from_secs(self.cache_warmup_seconds),
            resync_period: Duration::from_secs(self.resync_seconds),
            ..MeshParams::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // TLS must work before any kube client exists
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("failed to install the default crypto provider: {e:?}");
        std::process::exit(1);
    }

    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        service_name: "flotilla-operator".to_string(),
        ..Default::default()
    })
    .map_err(|e| anyhow::anyhow!("telemetry init failed: {e}"))?;

    info!(cluster = %cli.cluster_id, "flotilla operator starting");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kubernetes client: {e}"))?;

    let params = cli.mesh_params();

    // the operator's own cluster hosts the shared address store
    let home_api = Arc::new(KubeClusterApi::new(client.clone()));
    let addresses = Arc::new(AddressStore::new(
        home_api,
        cli.namespace.clone(),
        ADDRESS_STORE_CONFIG_MAP,
        params.ip_prefix.clone(),
    ));
    addresses
        .ensure()
        .await
        .map_err(|e| anyhow::anyhow!("address store init failed: {e}"))?;

    let registry = Arc::new(RemoteRegistry::new(params, addresses));
    registry.set_read_only(cli.read_only);

    let launcher = Arc::new(ClusterLauncher::new(registry.clone()));

    // the home cluster is always a member of the fleet
    launcher.launch(&cli.cluster_id, client.clone());

    if let Err(e) = secrets::bootstrap_existing(&launcher, &client, &cli.namespace).await {
        error!(error = %e, "listing existing cluster secrets failed, relying on the watch");
    }

    let shutdown = CancellationToken::new();
    let secret_watch = tokio::spawn(secrets::run(
        launcher.clone(),
        client,
        cli.namespace.clone(),
        shutdown.clone(),
    ));

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("failed to listen for shutdown signal: {e}"))?;
    info!("shutdown signal received, draining watchers");

    shutdown.cancel();
    launcher.teardown_all();
    let _ = secret_watch.await;

    info!("flotilla operator stopped");
    Ok(())
}
