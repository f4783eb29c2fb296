//! The reconciliation entry point
//!
//! One workload event fans out into the full cross-cluster pass: gather the
//! per-cluster view for the (identity, env) key, draft a ServiceEntry per
//! global FQDN, rewrite endpoints per source cluster, then commit to source
//! clusters followed by every cluster with a dependent consumer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use flotilla_common::istio::{ServiceEntrySpec, WorkloadEntry};
use flotilla_common::metrics::ReconcileTimer;
use flotilla_common::naming::{global_fqdn, local_fqdn, preview_fqdn, san, se_name};
use flotilla_common::{DEFAULT_SERVICE_ENTRY_PORT, HTTP_PROTOCOL};

use crate::gtp;
use crate::ingestion::{EventOp, WorkloadEvent};
use crate::registry::{RemoteController, RemoteRegistry};
use crate::sidecar;
use crate::state::WorkloadState;
use crate::strategy;
use crate::workload::{mesh_ports, Strategy, WeightedService, Workload};
use crate::writer;

/// Everything the source-cluster pass needs about one hosting cluster
struct SourceView {
    rc: Arc<RemoteController>,
    workload: Workload,
    weighted: Vec<WeightedService>,
    namespace: String,
    ports: std::collections::BTreeMap<String, u32>,
}

/// Reconcile one workload event across the fleet.
///
/// Returns the drafted entry map (canonical ingress form) keyed by global
/// FQDN; empty when the pass was suppressed or nothing resolved.
#[instrument(skip(event, registry), fields(
    identity = %event.identity,
    env = %event.env,
    cluster = %event.cluster,
))]
pub async fn reconcile(
    event: &WorkloadEvent,
    registry: &RemoteRegistry,
) -> HashMap<String, ServiceEntrySpec> {
    let timer = ReconcileTimer::start(&event.identity);
    let identity = event.identity.as_str();
    let env = event.env.as_str();

    if registry.is_read_only() {
        info!("skipping reconciliation in read-only mode");
        registry.cache.transition(identity, env, WorkloadState::observe);
        timer.skipped();
        return HashMap::new();
    }
    if registry.is_warming_up() {
        info!("skipping reconciliation during cache warmup");
        registry.cache.transition(identity, env, WorkloadState::observe);
        timer.skipped();
        return HashMap::new();
    }

    let params = registry.params().clone();
    let cname = global_fqdn(env, identity, &params.hostname_suffix);
    let subject_alt_names = params
        .enable_san
        .then(|| vec![san(&params.san_prefix, identity)]);

    let mut entries: HashMap<String, ServiceEntrySpec> = HashMap::new();
    let mut source_views: HashMap<String, SourceView> = HashMap::new();
    let mut gtps = Vec::new();
    let mut cnames: HashSet<String> = HashSet::new();

    for cluster_id in registry.cluster_ids() {
        let Some(rc) = registry.get_cluster(&cluster_id) else {
            warn!(cluster = %cluster_id, "remote controller not available for the cluster");
            continue;
        };

        let workload = rc
            .deployment(identity, env)
            .map(|d| Workload::Deployment(Box::new(d)))
            .or_else(|| rc.rollout(identity, env).map(|r| Workload::Rollout(Box::new(r))));
        let Some(workload) = workload else {
            continue;
        };

        registry.cache.put_identity_cluster(identity, &cluster_id);

        let namespace = workload.namespace();
        let services = rc.services_in(&namespace);
        let weighted = workload.matching_services(&services);
        let Some(primary) = weighted.first() else {
            debug!(cluster = %cluster_id, namespace = %namespace, "no matching service, skipping cluster");
            continue;
        };
        let ports = mesh_ports(&primary.service, &params);

        cnames.insert(cname.clone());

        // the preview host gets its own entry before the main one
        if let Strategy::BlueGreen {
            preview_service: Some(preview),
            ..
        } = workload.strategy()
        {
            let preview_exists = weighted
                .iter()
                .any(|ws| ws.service.metadata.name.as_deref() == Some(preview.as_str()));
            if preview_exists {
                let preview_host = preview_fqdn(&cname);
                cnames.insert(preview_host.clone());
                build_draft(
                    event.op,
                    registry,
                    &rc,
                    &ports,
                    &preview_host,
                    subject_alt_names.clone(),
                    &mut entries,
                )
                .await;
            }
        }

        build_draft(
            event.op,
            registry,
            &rc,
            &ports,
            &cname,
            subject_alt_names.clone(),
            &mut entries,
        )
        .await;

        gtps.extend(rc.gtps_in_namespace(identity, env, &namespace));

        registry.cache.put_cname_cluster(&cname, &cluster_id);
        registry.cache.put_cname_identity(&cname, identity);

        source_views.insert(
            cluster_id.clone(),
            SourceView {
                rc: rc.clone(),
                workload,
                weighted,
                namespace,
                ports,
            },
        );
    }

    // the freshest GTP view wins before any DR is derived
    gtp::update_global_cache(
        &registry.cache,
        identity,
        env,
        gtps,
        &params.label_set.priority_key,
    );

    if entries.is_empty() {
        if event.op == EventOp::Delete {
            drain_hosts(registry, identity, env, &cname).await;
        }
        timer.skipped();
        return entries;
    }

    registry.cache.transition(identity, env, WorkloadState::resolve);

    let dependents = registry.cache.identity_dependents(identity);

    // source clusters first: local-FQDN rewrites per strategy
    for (cluster_id, view) in &source_views {
        let ingress = view
            .rc
            .ingress_gateway(&params.label_set.gateway_app)
            .map(|g| g.address)
            .unwrap_or_default();
        let primary_name = view.weighted[0]
            .service
            .metadata
            .name
            .clone()
            .unwrap_or_default();
        let primary_fqdn = local_fqdn(&primary_name, &view.namespace);

        for (host, entry) in &entries {
            let rewritten = if entry.endpoints.is_empty() {
                entry.clone()
            } else {
                match view.workload.strategy() {
                    Strategy::BlueGreen {
                        active_service,
                        preview_service,
                    } => {
                        let (se, local_fqdns) = strategy::rewrite_for_blue_green(
                            host,
                            entry,
                            &ingress,
                            &active_service,
                            preview_service.as_deref(),
                            &view.weighted,
                            &params,
                        );
                        cnames.extend(local_fqdns);
                        se
                    }
                    Strategy::Canary if view.weighted.len() > 1 => {
                        strategy::rewrite_for_canary(entry, &ingress, &view.weighted, &view.ports)
                    }
                    _ => strategy::rewrite_for_deployment(
                        entry,
                        &ingress,
                        &primary_name,
                        &view.namespace,
                        &view.ports,
                    ),
                }
            };

            let single = HashMap::from([(host.clone(), rewritten)]);
            writer::add_service_entries_with_dr(registry, &[cluster_id.clone()], &single).await;
        }

        if params.sidecar_update_enabled() {
            let egress_map = registry.cache.dependency_namespaces(identity);
            if let Err(e) = sidecar::update_workload_sidecar(
                &view.rc.api,
                &view.namespace,
                &params.workload_sidecar_name,
                &egress_map,
            )
            .await
            {
                error!(cluster = %cluster_id, error = %e, "sidecar egress update failed");
            }
        }

        for dependent in &dependents {
            registry
                .cache
                .put_dependency_namespace(dependent, &view.namespace, &primary_fqdn, &cnames);
        }
    }

    // then every cluster hosting a dependent, in canonical ingress form
    let mut dependent_clusters: HashSet<String> = HashSet::new();
    for dependent in &dependents {
        for cluster in registry.cache.identity_clusters(dependent) {
            if !source_views.contains_key(&cluster) {
                dependent_clusters.insert(cluster);
            }
        }
    }
    for cluster in &dependent_clusters {
        registry.cache.put_cname_dependent_cluster(&cname, cluster);
    }

    let mut dependent_clusters: Vec<String> = dependent_clusters.into_iter().collect();
    dependent_clusters.sort();
    writer::add_service_entries_with_dr(registry, &dependent_clusters, &entries).await;

    let drained = entries.values().all(|e| e.endpoints.is_empty());
    registry.cache.transition(
        identity,
        env,
        if drained {
            WorkloadState::drain
        } else {
            WorkloadState::publish
        },
    );

    timer.success();
    entries
}

/// Draft (or extend) the ServiceEntry for one global FQDN from one cluster.
///
/// Allocates the VIP, installs the skeleton on first sight, then appends
/// this cluster's ingress endpoint (or removes it on Delete). A VIP
/// allocation failure skips the FQDN for this round; caches stay intact.
async fn build_draft(
    op: EventOp,
    registry: &RemoteRegistry,
    rc: &RemoteController,
    ports: &std::collections::BTreeMap<String, u32>,
    fqdn: &str,
    subject_alt_names: Option<Vec<String>>,
    entries: &mut HashMap<String, ServiceEntrySpec>,
) {
    registry.cache.put_cname_cluster(fqdn, &rc.cluster_id);

    let protocol = ports
        .keys()
        .next()
        .cloned()
        .unwrap_or_else(|| HTTP_PROTOCOL.to_string());

    if !entries.contains_key(fqdn) {
        let vip = match registry.addresses.resolve(&se_name(fqdn)).await {
            Ok(vip) => vip,
            Err(e) => {
                error!(fqdn = %fqdn, error = %e, "could not get a unique address, skipping this host for the round");
                return;
            }
        };
        entries.insert(
            fqdn.to_string(),
            ServiceEntrySpec::draft(
                fqdn,
                &vip,
                &protocol,
                DEFAULT_SERVICE_ENTRY_PORT,
                subject_alt_names,
            ),
        );
    }
    let entry = entries.get_mut(fqdn).expect("just inserted");

    let gateway = rc.ingress_gateway(&registry.params().label_set.gateway_app);
    let (address, port) = gateway
        .map(|g| (g.address, g.port))
        .unwrap_or((String::new(), flotilla_common::DEFAULT_MTLS_PORT));
    let endpoint = WorkloadEntry::remote(&address, rc.region().as_deref(), &protocol, port);

    match op {
        EventOp::Add | EventOp::Update => entry.endpoints.push(endpoint),
        EventOp::Delete => entry.endpoints.retain(|ep| ep != &endpoint),
    }
}

/// Delete the SE/DR pairs for hosts whose identity vanished everywhere.
///
/// The empty drafts drive the writer's zero-endpoint cascade in every
/// cluster still holding an object for the host.
async fn drain_hosts(registry: &RemoteRegistry, identity: &str, env: &str, cname: &str) {
    for host in [cname.to_string(), preview_fqdn(cname)] {
        let mut clusters: Vec<String> = registry.cache.se_clusters(&host).into_iter().collect();
        if clusters.is_empty() {
            continue;
        }
        clusters.sort();

        let empty = ServiceEntrySpec {
            hosts: vec![host.clone()],
            location: flotilla_common::istio::MESH_INTERNAL.to_string(),
            resolution: flotilla_common::istio::RESOLUTION_DNS.to_string(),
            ..Default::default()
        };
        let map = HashMap::from([(host.clone(), empty)]);
        writer::add_service_entries_with_dr(registry, &clusters, &map).await;
        info!(host = %host, "drained service entry everywhere");
    }
    registry.cache.transition(identity, env, WorkloadState::drain);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addresses::AddressStore;
    use crate::api::ClusterApi;
    use crate::ingestion::EventKind;
    use crate::testutil::{self, InMemoryClusterApi};
    use flotilla_common::crd::{
        BlueGreenStrategy, CanaryStrategy, CanaryStatus, CanaryWeights, RolloutStrategy,
        RolloutStatus, WeightDestination,
    };
    use flotilla_common::MeshParams;
    use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, ServiceStatus};
    use std::time::Duration;

    fn event(op: EventOp, kind: EventKind) -> WorkloadEvent {
        WorkloadEvent {
            kind,
            op,
            identity: "greeting".to_string(),
            env: "stage".to_string(),
            cluster: "cluster-x".to_string(),
        }
    }

    fn gateway_service(address: &str) -> k8s_openapi::api::core::v1::Service {
        let mut svc = testutil::make_service(
            "istio-ingressgateway",
            "istio-system",
            &[],
            &[("tls", 15443)],
        );
        svc.metadata.labels = Some(
            [("app".to_string(), "istio-ingressgateway".to_string())]
                .into_iter()
                .collect(),
        );
        svc.status = Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![LoadBalancerIngress {
                    ip: Some(address.to_string()),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        });
        svc
    }

    struct Fixture {
        registry: RemoteRegistry,
        api_x: Arc<InMemoryClusterApi>,
        api_y: Arc<InMemoryClusterApi>,
    }

    /// Cluster X hosts the workload; cluster Y hosts the dependent `webapp`.
    async fn fixture(params: MeshParams) -> Fixture {
        let api_x = Arc::new(InMemoryClusterApi::new());
        let api_y = Arc::new(InMemoryClusterApi::new());

        let addresses = Arc::new(AddressStore::new(
            api_x.clone(),
            "flotilla-sync",
            "flotilla-addresses",
            "240.0",
        ));
        addresses.ensure().await.unwrap();

        let registry = RemoteRegistry::new(params, addresses);

        let rc_x = Arc::new(RemoteController::new("cluster-x", api_x.clone()));
        rc_x.set_region("us-west-2");
        rc_x.put_service(gateway_service("10.0.0.1"));

        let rc_y = Arc::new(RemoteController::new("cluster-y", api_y.clone()));
        rc_y.set_region("us-east-2");

        registry.register_cluster(rc_x);
        registry.register_cluster(rc_y);

        registry.cache.put_identity_dependency("greeting", "webapp");
        registry.cache.put_identity_cluster("webapp", "cluster-y");

        Fixture {
            registry,
            api_x,
            api_y,
        }
    }

    fn no_warmup_params() -> MeshParams {
        let mut params = MeshParams::default();
        params.cache_warmup_duration = Duration::ZERO;
        params
    }

    fn seed_deployment(registry: &RemoteRegistry) {
        let rc = registry.get_cluster("cluster-x").unwrap();
        rc.put_deployment(
            "greeting",
            "stage",
            testutil::make_deployment("foo", "bar", "greeting", "stage"),
        );
        rc.put_service(testutil::make_service(
            "foo-svc",
            "bar",
            &[("app", "foo")],
            &[("http", 8080)],
        ));
    }

    #[tokio::test]
    async fn deployment_rewrites_locally_and_fans_out_remotely() {
        let fx = fixture(no_warmup_params()).await;
        seed_deployment(&fx.registry);

        let entries = reconcile(&event(EventOp::Add, EventKind::Deployment), &fx.registry).await;
        assert_eq!(entries.len(), 1);

        // source cluster sees the local Kubernetes FQDN with mesh ports
        let se_x = fx
            .api_x
            .get_service_entry("flotilla-sync", "stage.greeting.global-se")
            .await
            .unwrap()
            .expect("SE in source cluster");
        assert_eq!(se_x.spec.endpoints.len(), 1);
        assert_eq!(se_x.spec.endpoints[0].address, "foo-svc.bar.svc.cluster.local");
        assert_eq!(se_x.spec.endpoints[0].ports.get("http"), Some(&8080));

        // dependent cluster sees the remote ingress gateway on the mTLS port
        let se_y = fx
            .api_y
            .get_service_entry("flotilla-sync", "stage.greeting.global-se")
            .await
            .unwrap()
            .expect("SE in dependent cluster");
        assert_eq!(se_y.spec.endpoints.len(), 1);
        assert_eq!(se_y.spec.endpoints[0].address, "10.0.0.1");
        assert_eq!(se_y.spec.endpoints[0].ports.get("http"), Some(&15443));

        // both carry the same VIP and a DR
        assert_eq!(se_x.spec.addresses, se_y.spec.addresses);
        assert!(fx
            .api_y
            .get_destination_rule("flotilla-sync", "stage.greeting.global-default-dr")
            .await
            .unwrap()
            .is_some());

        assert_eq!(
            fx.registry.cache.workload_state("greeting", "stage"),
            WorkloadState::Published
        );
        assert!(fx
            .registry
            .cache
            .cname_dependent_clusters("stage.greeting.global")
            .contains("cluster-y"));
    }

    #[tokio::test]
    async fn blue_green_preview_yields_two_entries() {
        let fx = fixture(no_warmup_params()).await;
        let rc = fx.registry.get_cluster("cluster-x").unwrap();

        let mut rollout = testutil::make_rollout("foo", "bar", "greeting", "stage");
        rollout.spec.strategy = RolloutStrategy {
            blue_green: Some(BlueGreenStrategy {
                active_service: "foo-a".to_string(),
                preview_service: Some("foo-p".to_string()),
            }),
            canary: None,
        };
        rc.put_rollout("greeting", "stage", rollout);
        rc.put_service(testutil::make_service(
            "foo-a",
            "bar",
            &[("app", "foo")],
            &[("http", 8080)],
        ));
        rc.put_service(testutil::make_service(
            "foo-p",
            "bar",
            &[("app", "foo")],
            &[("http", 8080)],
        ));

        let entries = reconcile(&event(EventOp::Add, EventKind::Rollout), &fx.registry).await;
        assert_eq!(entries.len(), 2);
        assert!(entries.contains_key("stage.greeting.global"));
        assert!(entries.contains_key("preview.stage.greeting.global"));

        let se_active = fx
            .api_x
            .get_service_entry("flotilla-sync", "stage.greeting.global-se")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            se_active.spec.endpoints[0].address,
            "foo-a.bar.svc.cluster.local"
        );

        let se_preview = fx
            .api_x
            .get_service_entry("flotilla-sync", "preview.stage.greeting.global-se")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            se_preview.spec.endpoints[0].address,
            "foo-p.bar.svc.cluster.local"
        );

        // distinct VIPs per host
        assert_ne!(se_active.spec.addresses, se_preview.spec.addresses);
    }

    #[tokio::test]
    async fn canary_weights_expand_in_source_cluster() {
        let fx = fixture(no_warmup_params()).await;
        let rc = fx.registry.get_cluster("cluster-x").unwrap();

        let mut rollout = testutil::make_rollout("foo", "bar", "greeting", "stage");
        rollout.spec.strategy = RolloutStrategy {
            blue_green: None,
            canary: Some(CanaryStrategy {
                stable_service: Some("foo-stable".to_string()),
                canary_service: Some("foo-canary".to_string()),
            }),
        };
        rollout.status = Some(RolloutStatus {
            canary: Some(CanaryStatus {
                weights: Some(CanaryWeights {
                    canary: Some(WeightDestination {
                        service_name: "foo-canary".to_string(),
                        weight: 20,
                    }),
                    stable: Some(WeightDestination {
                        service_name: "foo-stable".to_string(),
                        weight: 80,
                    }),
                }),
            }),
        });
        rc.put_rollout("greeting", "stage", rollout);
        rc.put_service(testutil::make_service(
            "foo-stable",
            "bar",
            &[("app", "foo")],
            &[("http", 8080)],
        ));
        rc.put_service(testutil::make_service(
            "foo-canary",
            "bar",
            &[("app", "foo")],
            &[("http", 8080)],
        ));

        reconcile(&event(EventOp::Add, EventKind::Rollout), &fx.registry).await;

        let se_x = fx
            .api_x
            .get_service_entry("flotilla-sync", "stage.greeting.global-se")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(se_x.spec.endpoints.len(), 2);
        let weights: Vec<_> = se_x
            .spec
            .endpoints
            .iter()
            .map(|ep| (ep.address.clone(), ep.weight))
            .collect();
        assert!(weights.contains(&("foo-stable.bar.svc.cluster.local".to_string(), Some(80))));
        assert!(weights.contains(&("foo-canary.bar.svc.cluster.local".to_string(), Some(20))));

        // the dependent cluster still sees the single ingress endpoint
        let se_y = fx
            .api_y
            .get_service_entry("flotilla-sync", "stage.greeting.global-se")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(se_y.spec.endpoints.len(), 1);
        assert_eq!(se_y.spec.endpoints[0].address, "10.0.0.1");
    }

    #[tokio::test]
    async fn warmup_suppresses_writes_until_reconciled_again() {
        let mut warm = MeshParams::default();
        warm.cache_warmup_duration = Duration::from_secs(3600);
        let fx = fixture(warm).await;
        seed_deployment(&fx.registry);

        let entries = reconcile(&event(EventOp::Add, EventKind::Deployment), &fx.registry).await;
        assert!(entries.is_empty());
        assert!(fx
            .api_x
            .service_entry_names("flotilla-sync")
            .is_empty());
        assert_eq!(
            fx.registry.cache.workload_state("greeting", "stage"),
            WorkloadState::Observed
        );

        // the per-cluster caches survived; a post-warmup registry reconciles them
        let registry = RemoteRegistry::new(no_warmup_params(), fx.registry.addresses.clone());
        registry.register_cluster(fx.registry.get_cluster("cluster-x").unwrap());
        registry.register_cluster(fx.registry.get_cluster("cluster-y").unwrap());
        registry.cache.put_identity_dependency("greeting", "webapp");
        registry.cache.put_identity_cluster("webapp", "cluster-y");

        let entries = reconcile(&event(EventOp::Add, EventKind::Deployment), &registry).await;
        assert_eq!(entries.len(), 1);
        assert!(!fx.api_x.service_entry_names("flotilla-sync").is_empty());
    }

    #[tokio::test]
    async fn read_only_mode_suppresses_writes() {
        let fx = fixture(no_warmup_params()).await;
        seed_deployment(&fx.registry);
        fx.registry.set_read_only(true);

        let entries = reconcile(&event(EventOp::Add, EventKind::Deployment), &fx.registry).await;
        assert!(entries.is_empty());
        assert!(fx.api_x.service_entry_names("flotilla-sync").is_empty());
    }

    #[tokio::test]
    async fn deleting_the_last_source_drains_everywhere() {
        let fx = fixture(no_warmup_params()).await;
        seed_deployment(&fx.registry);

        reconcile(&event(EventOp::Add, EventKind::Deployment), &fx.registry).await;
        assert!(!fx.api_y.service_entry_names("flotilla-sync").is_empty());

        // the watcher dropped the workload from the cluster cache
        let rc = fx.registry.get_cluster("cluster-x").unwrap();
        rc.delete_deployment("greeting", "stage");

        reconcile(&event(EventOp::Delete, EventKind::Deployment), &fx.registry).await;

        assert!(fx.api_x.service_entry_names("flotilla-sync").is_empty());
        assert!(fx.api_y.service_entry_names("flotilla-sync").is_empty());
        assert!(fx.api_x.destination_rule_names("flotilla-sync").is_empty());
        assert!(fx.api_y.destination_rule_names("flotilla-sync").is_empty());
        assert!(fx
            .registry
            .cache
            .se_clusters("stage.greeting.global")
            .is_empty());
        assert_eq!(
            fx.registry.cache.workload_state("greeting", "stage"),
            WorkloadState::Drained
        );
    }

    #[tokio::test]
    async fn sidecar_egress_updates_in_source_namespace() {
        let mut params = no_warmup_params();
        params.workload_sidecar_update = "enabled".to_string();
        let fx = fixture(params).await;
        seed_deployment(&fx.registry);

        // greeting itself depends on `payments`, registered when payments reconciled
        let mut cnames = HashSet::new();
        cnames.insert("stage.payments.global".to_string());
        fx.registry.cache.put_dependency_namespace(
            "greeting",
            "payments-ns",
            "payments-svc.payments-ns.svc.cluster.local",
            &cnames,
        );

        fx.api_x.put_sidecar_object(
            "bar",
            flotilla_common::istio::Sidecar::new(
                "default",
                flotilla_common::istio::SidecarSpec {
                    workload_selector: None,
                    egress: vec![flotilla_common::istio::EgressListener {
                        hosts: vec!["istio-system/*".to_string()],
                    }],
                },
            ),
        );

        reconcile(&event(EventOp::Add, EventKind::Deployment), &fx.registry).await;
        reconcile(&event(EventOp::Update, EventKind::Deployment), &fx.registry).await;

        let sidecar = fx
            .api_x
            .get_sidecar("bar", "default")
            .await
            .unwrap()
            .unwrap();
        let hosts = &sidecar.spec.egress[0].hosts;
        assert!(hosts.contains(&"payments-ns/payments-svc.payments-ns.svc.cluster.local".to_string()));
        assert!(hosts.contains(&"payments-ns/stage.payments.global".to_string()));
        let unique: HashSet<_> = hosts.iter().collect();
        assert_eq!(unique.len(), hosts.len(), "egress hosts must not duplicate");
    }

    #[tokio::test]
    async fn dependency_namespaces_recorded_for_dependents() {
        let fx = fixture(no_warmup_params()).await;
        seed_deployment(&fx.registry);

        reconcile(&event(EventOp::Add, EventKind::Deployment), &fx.registry).await;

        let map = fx.registry.cache.dependency_namespaces("webapp");
        let egress = map.get("bar").expect("webapp gets egress for bar");
        assert_eq!(egress.fqdn, "foo-svc.bar.svc.cluster.local");
        assert!(egress.cnames.contains("stage.greeting.global"));
    }
}
