//! The fleet registry: one `RemoteController` per member cluster
//!
//! Each controller aggregates the per-resource caches the watchers keep
//! warm (Deployment, Rollout, Service, GTP, node locality) plus the write
//! client for that cluster. The registry bundles them with the shared
//! caches, the VIP store, and the warmup/read-only gates.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use dashmap::DashMap;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use tracing::info;

use flotilla_common::crd::{GlobalTrafficPolicy, Rollout};
use flotilla_common::metrics::set_clusters_registered;
use flotilla_common::{MeshParams, DEFAULT_MTLS_PORT, ISTIO_SYSTEM_NS};

use crate::addresses::AddressStore;
use crate::api::ClusterApi;
use crate::cache::{IdentityEnv, MeshCache};

/// Namespace-qualified object name
type NsName = (String, String);

/// Mesh ingress gateway endpoint of a cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngressGateway {
    /// LoadBalancer address (IP or hostname)
    pub address: String,
    /// mTLS port
    pub port: u32,
}

/// Caches and write client of one member cluster
pub struct RemoteController {
    /// Cluster identifier
    pub cluster_id: String,
    /// Read/write client for mesh objects in this cluster
    pub api: Arc<dyn ClusterApi>,

    deployments: DashMap<IdentityEnv, Deployment>,
    rollouts: DashMap<IdentityEnv, Rollout>,
    services: DashMap<String, BTreeMap<String, Service>>,
    gtps: DashMap<IdentityEnv, BTreeMap<NsName, GlobalTrafficPolicy>>,
    region: RwLock<Option<String>>,
}

impl RemoteController {
    /// Create an empty controller for a cluster
    pub fn new(cluster_id: impl Into<String>, api: Arc<dyn ClusterApi>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            api,
            deployments: DashMap::new(),
            rollouts: DashMap::new(),
            services: DashMap::new(),
            gtps: DashMap::new(),
            region: RwLock::new(None),
        }
    }

    // ------------------------------------------------------------------
    // workloads
    // ------------------------------------------------------------------

    /// Cache a Deployment under its reconciliation key
    pub fn put_deployment(&self, identity: &str, env: &str, deployment: Deployment) {
        self.deployments
            .insert((identity.to_string(), env.to_string()), deployment);
    }

    /// Drop a Deployment from the cache
    pub fn delete_deployment(&self, identity: &str, env: &str) {
        self.deployments
            .remove(&(identity.to_string(), env.to_string()));
    }

    /// Cached Deployment for a key
    pub fn deployment(&self, identity: &str, env: &str) -> Option<Deployment> {
        self.deployments
            .get(&(identity.to_string(), env.to_string()))
            .map(|e| e.value().clone())
    }

    /// Cache a Rollout under its reconciliation key
    pub fn put_rollout(&self, identity: &str, env: &str, rollout: Rollout) {
        self.rollouts
            .insert((identity.to_string(), env.to_string()), rollout);
    }

    /// Drop a Rollout from the cache
    pub fn delete_rollout(&self, identity: &str, env: &str) {
        self.rollouts
            .remove(&(identity.to_string(), env.to_string()));
    }

    /// Cached Rollout for a key
    pub fn rollout(&self, identity: &str, env: &str) -> Option<Rollout> {
        self.rollouts
            .get(&(identity.to_string(), env.to_string()))
            .map(|e| e.value().clone())
    }

    // ------------------------------------------------------------------
    // services
    // ------------------------------------------------------------------

    /// Cache a Service
    pub fn put_service(&self, service: Service) {
        let namespace = service.metadata.namespace.clone().unwrap_or_default();
        let name = service.metadata.name.clone().unwrap_or_default();
        self.services
            .entry(namespace)
            .or_default()
            .insert(name, service);
    }

    /// Drop a Service from the cache
    pub fn delete_service(&self, namespace: &str, name: &str) {
        if let Some(mut entry) = self.services.get_mut(namespace) {
            entry.value_mut().remove(name);
        }
    }

    /// All cached Services of a namespace, ordered by name
    pub fn services_in(&self, namespace: &str) -> Vec<Service> {
        self.services
            .get(namespace)
            .map(|e| e.value().values().cloned().collect())
            .unwrap_or_default()
    }

    /// The mesh ingress gateway of this cluster, discovered from the
    /// `{app=<gateway_app>}` Service in istio-system. None until the
    /// LoadBalancer is provisioned.
    pub fn ingress_gateway(&self, gateway_app: &str) -> Option<IngressGateway> {
        let services = self.services_in(ISTIO_SYSTEM_NS);
        let gateway = services.iter().find(|svc| {
            svc.metadata
                .labels
                .as_ref()
                .and_then(|l| l.get("app"))
                .map(String::as_str)
                == Some(gateway_app)
        })?;

        let ingress = gateway
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .and_then(|i| i.first())?;
        let address = ingress.ip.clone().or_else(|| ingress.hostname.clone())?;

        let port = gateway
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .and_then(|ports| {
                ports
                    .iter()
                    .find(|p| p.name.as_deref() == Some("tls"))
                    .map(|p| p.port as u32)
            })
            .unwrap_or(DEFAULT_MTLS_PORT);

        Some(IngressGateway { address, port })
    }

    /// Reconciliation keys of every cached workload in a namespace.
    /// Drives re-reconciliation when a Service in that namespace changes.
    pub fn workload_keys_in_namespace(&self, namespace: &str) -> Vec<IdentityEnv> {
        let mut keys: Vec<IdentityEnv> = self
            .deployments
            .iter()
            .filter(|e| e.value().metadata.namespace.as_deref() == Some(namespace))
            .map(|e| e.key().clone())
            .chain(
                self.rollouts
                    .iter()
                    .filter(|e| e.value().metadata.namespace.as_deref() == Some(namespace))
                    .map(|e| e.key().clone()),
            )
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    // ------------------------------------------------------------------
    // global traffic policies
    // ------------------------------------------------------------------

    /// Cache a GTP under its reconciliation key
    pub fn put_gtp(&self, identity: &str, env: &str, gtp: GlobalTrafficPolicy) {
        let namespace = gtp.metadata.namespace.clone().unwrap_or_default();
        let name = gtp.metadata.name.clone().unwrap_or_default();
        self.gtps
            .entry((identity.to_string(), env.to_string()))
            .or_default()
            .insert((namespace, name), gtp);
    }

    /// Drop a GTP from the cache
    pub fn delete_gtp(&self, identity: &str, env: &str, namespace: &str, name: &str) {
        if let Some(mut entry) = self.gtps.get_mut(&(identity.to_string(), env.to_string())) {
            entry
                .value_mut()
                .remove(&(namespace.to_string(), name.to_string()));
        }
    }

    /// GTPs cached for a key within one namespace
    pub fn gtps_in_namespace(
        &self,
        identity: &str,
        env: &str,
        namespace: &str,
    ) -> Vec<GlobalTrafficPolicy> {
        self.gtps
            .get(&(identity.to_string(), env.to_string()))
            .map(|e| {
                e.value()
                    .iter()
                    .filter(|((ns, _), _)| ns == namespace)
                    .map(|(_, gtp)| gtp.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // locality
    // ------------------------------------------------------------------

    /// Record the cluster region (from any Node's region label)
    pub fn set_region(&self, region: impl Into<String>) {
        *self.region.write().expect("region lock poisoned") = Some(region.into());
    }

    /// Cluster region, if discovered
    pub fn region(&self) -> Option<String> {
        self.region.read().expect("region lock poisoned").clone()
    }
}

/// All known clusters plus the shared caches and gates
pub struct RemoteRegistry {
    params: MeshParams,
    /// Shared in-memory indices
    pub cache: MeshCache,
    /// Shared VIP allocator
    pub addresses: Arc<AddressStore>,
    clusters: DashMap<String, Arc<RemoteController>>,
    started_at: Instant,
    read_only: AtomicBool,
}

impl RemoteRegistry {
    /// Create a registry with no member clusters yet
    pub fn new(params: MeshParams, addresses: Arc<AddressStore>) -> Self {
        Self {
            params,
            cache: MeshCache::new(),
            addresses,
            clusters: DashMap::new(),
            started_at: Instant::now(),
            read_only: AtomicBool::new(false),
        }
    }

    /// Configuration surface
    pub fn params(&self) -> &MeshParams {
        &self.params
    }

    /// Add (or replace) a member cluster
    pub fn register_cluster(&self, controller: Arc<RemoteController>) {
        info!(cluster = %controller.cluster_id, "registering member cluster");
        self.clusters
            .insert(controller.cluster_id.clone(), controller);
        set_clusters_registered(self.clusters.len() as i64);
    }

    /// Remove a member cluster
    pub fn deregister_cluster(&self, cluster_id: &str) {
        info!(cluster = %cluster_id, "deregistering member cluster");
        self.clusters.remove(cluster_id);
        set_clusters_registered(self.clusters.len() as i64);
    }

    /// Controller for a cluster, if registered
    pub fn get_cluster(&self, cluster_id: &str) -> Option<Arc<RemoteController>> {
        self.clusters.get(cluster_id).map(|e| e.value().clone())
    }

    /// Identifiers of all registered clusters, sorted for determinism
    pub fn cluster_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.clusters.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Flip read-only mode (no writes while set)
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Whether writes are suppressed
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    /// Whether we are still inside the cache warmup window
    pub fn is_warming_up(&self) -> bool {
        self.started_at.elapsed() < self.params.cache_warmup_duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, InMemoryClusterApi};
    use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, ServiceStatus};

    fn controller() -> RemoteController {
        RemoteController::new("cluster-1", Arc::new(InMemoryClusterApi::new()))
    }

    #[test]
    fn workload_caches_round_trip() {
        let rc = controller();
        let deployment = testutil::make_deployment("foo", "bar", "greeting", "stage");
        rc.put_deployment("greeting", "stage", deployment);

        assert!(rc.deployment("greeting", "stage").is_some());
        assert!(rc.deployment("greeting", "prod").is_none());

        rc.delete_deployment("greeting", "stage");
        assert!(rc.deployment("greeting", "stage").is_none());
    }

    #[test]
    fn services_are_ordered_by_name() {
        let rc = controller();
        rc.put_service(testutil::make_service("zeta", "bar", &[], &[]));
        rc.put_service(testutil::make_service("alpha", "bar", &[], &[]));

        let names: Vec<_> = rc
            .services_in("bar")
            .iter()
            .map(|s| s.metadata.name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn ingress_gateway_requires_load_balancer() {
        let rc = controller();
        let mut gateway =
            testutil::make_service("istio-ingressgateway", "istio-system", &[], &[("tls", 15443)]);
        gateway.metadata.labels = Some(
            [("app".to_string(), "istio-ingressgateway".to_string())]
                .into_iter()
                .collect(),
        );
        rc.put_service(gateway.clone());

        // no LB status yet
        assert!(rc.ingress_gateway("istio-ingressgateway").is_none());

        gateway.status = Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![LoadBalancerIngress {
                    ip: Some("10.0.0.1".to_string()),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        });
        rc.put_service(gateway);

        let gw = rc.ingress_gateway("istio-ingressgateway").unwrap();
        assert_eq!(gw.address, "10.0.0.1");
        assert_eq!(gw.port, 15443);
    }

    #[test]
    fn gtps_are_scoped_to_namespace() {
        let rc = controller();
        let mut gtp = flotilla_common::crd::GlobalTrafficPolicy::new(
            "gtp-1",
            flotilla_common::crd::GlobalTrafficPolicySpec::default(),
        );
        gtp.metadata.namespace = Some("bar".to_string());
        rc.put_gtp("greeting", "stage", gtp);

        assert_eq!(rc.gtps_in_namespace("greeting", "stage", "bar").len(), 1);
        assert!(rc.gtps_in_namespace("greeting", "stage", "other").is_empty());

        rc.delete_gtp("greeting", "stage", "bar", "gtp-1");
        assert!(rc.gtps_in_namespace("greeting", "stage", "bar").is_empty());
    }

    #[test]
    fn registry_membership() {
        let params = MeshParams::default();
        let api = Arc::new(InMemoryClusterApi::new());
        let addresses = Arc::new(AddressStore::new(
            api.clone(),
            "flotilla-sync",
            "flotilla-addresses",
            "240.0",
        ));
        let registry = RemoteRegistry::new(params, addresses);

        registry.register_cluster(Arc::new(RemoteController::new("cluster-2", api.clone())));
        registry.register_cluster(Arc::new(RemoteController::new("cluster-1", api)));

        assert_eq!(registry.cluster_ids(), vec!["cluster-1", "cluster-2"]);
        assert!(registry.get_cluster("cluster-1").is_some());

        registry.deregister_cluster("cluster-1");
        assert!(registry.get_cluster("cluster-1").is_none());
    }

    #[test]
    fn read_only_gate() {
        let api = Arc::new(InMemoryClusterApi::new());
        let addresses = Arc::new(AddressStore::new(api, "ns", "cm", "240.0"));
        let registry = RemoteRegistry::new(MeshParams::default(), addresses);

        assert!(!registry.is_read_only());
        registry.set_read_only(true);
        assert!(registry.is_read_only());
    }

    #[test]
    fn warmup_window_honors_config() {
        let api = Arc::new(InMemoryClusterApi::new());
        let addresses = Arc::new(AddressStore::new(api, "ns", "cm", "240.0"));

        let mut params = MeshParams::default();
        params.cache_warmup_duration = std::time::Duration::ZERO;
        let registry = RemoteRegistry::new(params, addresses);
        assert!(!registry.is_warming_up());

        let api = Arc::new(InMemoryClusterApi::new());
        let addresses = Arc::new(AddressStore::new(api, "ns", "cm", "240.0"));
        let mut params = MeshParams::default();
        params.cache_warmup_duration = std::time::Duration::from_secs(3600);
        let registry = RemoteRegistry::new(params, addresses);
        assert!(registry.is_warming_up());
    }
}
