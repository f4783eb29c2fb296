//! Concurrent caches shared across every reconciliation
//!
//! A bundle of DashMap-backed indices. Each bucket is individually
//! thread-safe; compound read-modify-write sequences are not atomic across
//! buckets and converge through re-reconciliation instead.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;

use flotilla_common::crd::GlobalTrafficPolicy;

use crate::state::WorkloadState;

/// Reconciliation key: (identity, env)
pub type IdentityEnv = (String, String);

/// Egress entry a dependent identity needs in its namespace Sidecar
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SidecarEgress {
    /// Namespace hosting the upstream Service
    pub namespace: String,
    /// Cluster-local FQDN of the upstream Service
    pub fqdn: String,
    /// Global FQDNs (and local rollout FQDNs) of the upstream
    pub cnames: HashSet<String>,
}

/// In-memory indices shared by resolver, writer, and sidecar updater
#[derive(Debug, Default)]
pub struct MeshCache {
    /// identity → clusters hosting it
    identity_clusters: DashMap<String, HashSet<String>>,
    /// cname → clusters hosting the workload
    cname_clusters: DashMap<String, HashSet<String>>,
    /// cname → clusters with dependents
    cname_dependent_clusters: DashMap<String, HashSet<String>>,
    /// cname → identity
    cname_identity: DashMap<String, String>,
    /// identity → identities depending on it
    identity_dependencies: DashMap<String, HashSet<String>>,
    /// dependent identity → namespace → egress entry
    dependency_namespaces: DashMap<String, HashMap<String, SidecarEgress>>,
    /// (identity, env) → active GTP
    global_traffic: DashMap<IdentityEnv, GlobalTrafficPolicy>,
    /// SE host → clusters an SE object exists in
    se_clusters: DashMap<String, HashSet<String>>,
    /// (identity, env) → lifecycle state
    workload_states: DashMap<IdentityEnv, WorkloadState>,
}

impl MeshCache {
    /// Create an empty cache bundle
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // identity → clusters
    // ------------------------------------------------------------------

    /// Record that a cluster hosts an identity
    pub fn put_identity_cluster(&self, identity: &str, cluster: &str) {
        self.identity_clusters
            .entry(identity.to_string())
            .or_default()
            .insert(cluster.to_string());
    }

    /// Snapshot of the clusters hosting an identity
    pub fn identity_clusters(&self, identity: &str) -> HashSet<String> {
        self.identity_clusters
            .get(identity)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Remove a cluster from an identity (cluster deregistration)
    pub fn delete_identity_cluster(&self, identity: &str, cluster: &str) {
        if let Some(mut entry) = self.identity_clusters.get_mut(identity) {
            entry.value_mut().remove(cluster);
        }
    }

    // ------------------------------------------------------------------
    // cname indices
    // ------------------------------------------------------------------

    /// Record that a cluster hosts a cname
    pub fn put_cname_cluster(&self, cname: &str, cluster: &str) {
        self.cname_clusters
            .entry(cname.to_string())
            .or_default()
            .insert(cluster.to_string());
    }

    /// Snapshot of the clusters hosting a cname
    pub fn cname_clusters(&self, cname: &str) -> HashSet<String> {
        self.cname_clusters
            .get(cname)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Record that a cluster has dependents of a cname
    pub fn put_cname_dependent_cluster(&self, cname: &str, cluster: &str) {
        self.cname_dependent_clusters
            .entry(cname.to_string())
            .or_default()
            .insert(cluster.to_string());
    }

    /// Snapshot of the dependent clusters of a cname
    pub fn cname_dependent_clusters(&self, cname: &str) -> HashSet<String> {
        self.cname_dependent_clusters
            .get(cname)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Map a cname back to its identity
    pub fn put_cname_identity(&self, cname: &str, identity: &str) {
        self.cname_identity
            .insert(cname.to_string(), identity.to_string());
    }

    /// Identity owning a cname
    pub fn cname_identity(&self, cname: &str) -> Option<String> {
        self.cname_identity.get(cname).map(|e| e.value().clone())
    }

    // ------------------------------------------------------------------
    // dependencies
    // ------------------------------------------------------------------

    /// Record that `dependent` consumes `identity`
    pub fn put_identity_dependency(&self, identity: &str, dependent: &str) {
        self.identity_dependencies
            .entry(identity.to_string())
            .or_default()
            .insert(dependent.to_string());
    }

    /// Snapshot of the identities depending on `identity`
    pub fn identity_dependents(&self, identity: &str) -> HashSet<String> {
        self.identity_dependencies
            .get(identity)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Drop one dependent of an identity
    pub fn delete_identity_dependency(&self, identity: &str, dependent: &str) {
        if let Some(mut entry) = self.identity_dependencies.get_mut(identity) {
            entry.value_mut().remove(dependent);
        }
    }

    /// Record the egress entry a dependent needs for an upstream namespace
    pub fn put_dependency_namespace(
        &self,
        dependent: &str,
        namespace: &str,
        fqdn: &str,
        cnames: &HashSet<String>,
    ) {
        let mut entry = self.dependency_namespaces.entry(dependent.to_string()).or_default();
        let egress = entry
            .value_mut()
            .entry(namespace.to_string())
            .or_insert_with(|| SidecarEgress {
                namespace: namespace.to_string(),
                ..Default::default()
            });
        egress.fqdn = fqdn.to_string();
        egress.cnames.extend(cnames.iter().cloned());
    }

    /// Snapshot of the namespace → egress map for a dependent identity
    pub fn dependency_namespaces(&self, dependent: &str) -> HashMap<String, SidecarEgress> {
        self.dependency_namespaces
            .get(dependent)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // global traffic policies
    // ------------------------------------------------------------------

    /// Install the active GTP for a key
    pub fn put_gtp(&self, identity: &str, env: &str, gtp: GlobalTrafficPolicy) {
        self.global_traffic
            .insert((identity.to_string(), env.to_string()), gtp);
    }

    /// Active GTP for a key, if any
    pub fn gtp(&self, identity: &str, env: &str) -> Option<GlobalTrafficPolicy> {
        self.global_traffic
            .get(&(identity.to_string(), env.to_string()))
            .map(|e| e.value().clone())
    }

    /// Drop the active GTP for a key
    pub fn delete_gtp(&self, identity: &str, env: &str) {
        self.global_traffic
            .remove(&(identity.to_string(), env.to_string()));
    }

    // ------------------------------------------------------------------
    // SE host → cluster tracking (for deletion)
    // ------------------------------------------------------------------

    /// Record that an SE object for a host exists in a cluster
    pub fn put_se_cluster(&self, host: &str, cluster: &str) {
        self.se_clusters
            .entry(host.to_string())
            .or_default()
            .insert(cluster.to_string());
    }

    /// Snapshot of the clusters holding an SE for a host
    pub fn se_clusters(&self, host: &str) -> HashSet<String> {
        self.se_clusters
            .get(host)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Forget a host entirely (its SEs were deleted)
    pub fn delete_se_host(&self, host: &str) {
        self.se_clusters.remove(host);
    }

    // ------------------------------------------------------------------
    // lifecycle state
    // ------------------------------------------------------------------

    /// Current state of a reconciliation key
    pub fn workload_state(&self, identity: &str, env: &str) -> WorkloadState {
        self.workload_states
            .get(&(identity.to_string(), env.to_string()))
            .map(|e| *e.value())
            .unwrap_or_default()
    }

    /// Apply a state transition for a reconciliation key
    pub fn transition(
        &self,
        identity: &str,
        env: &str,
        f: impl FnOnce(WorkloadState) -> WorkloadState,
    ) -> WorkloadState {
        let mut entry = self
            .workload_states
            .entry((identity.to_string(), env.to_string()))
            .or_default();
        *entry.value_mut() = f(*entry.value());
        *entry.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_common::crd::GlobalTrafficPolicySpec;

    #[test]
    fn identity_cluster_round_trip() {
        let cache = MeshCache::new();
        cache.put_identity_cluster("greeting", "cluster-1");
        cache.put_identity_cluster("greeting", "cluster-2");
        cache.put_identity_cluster("greeting", "cluster-1");

        let clusters = cache.identity_clusters("greeting");
        assert_eq!(clusters.len(), 2);
        assert!(clusters.contains("cluster-1"));

        cache.delete_identity_cluster("greeting", "cluster-1");
        assert_eq!(cache.identity_clusters("greeting").len(), 1);
        assert!(cache.identity_clusters("unknown").is_empty());
    }

    #[test]
    fn cname_indices() {
        let cache = MeshCache::new();
        cache.put_cname_cluster("stage.greeting.global", "cluster-1");
        cache.put_cname_identity("stage.greeting.global", "greeting");
        cache.put_cname_dependent_cluster("stage.greeting.global", "cluster-2");

        assert!(cache
            .cname_clusters("stage.greeting.global")
            .contains("cluster-1"));
        assert_eq!(
            cache.cname_identity("stage.greeting.global").as_deref(),
            Some("greeting")
        );
        assert!(cache
            .cname_dependent_clusters("stage.greeting.global")
            .contains("cluster-2"));
    }

    #[test]
    fn gtp_cache_put_get_delete() {
        let cache = MeshCache::new();
        let gtp = GlobalTrafficPolicy::new("gtp-1", GlobalTrafficPolicySpec::default());

        cache.put_gtp("greeting", "stage", gtp);
        assert!(cache.gtp("greeting", "stage").is_some());
        assert!(cache.gtp("greeting", "prod").is_none());

        cache.delete_gtp("greeting", "stage");
        assert!(cache.gtp("greeting", "stage").is_none());
    }

    #[test]
    fn dependency_namespace_merges_cnames() {
        let cache = MeshCache::new();
        let mut cnames = HashSet::new();
        cnames.insert("stage.greeting.global".to_string());
        cache.put_dependency_namespace("webapp", "ns-a", "greeting.ns-a.svc.cluster.local", &cnames);

        let mut more = HashSet::new();
        more.insert("preview.stage.greeting.global".to_string());
        cache.put_dependency_namespace("webapp", "ns-a", "greeting.ns-a.svc.cluster.local", &more);

        let map = cache.dependency_namespaces("webapp");
        let egress = map.get("ns-a").unwrap();
        assert_eq!(egress.fqdn, "greeting.ns-a.svc.cluster.local");
        assert_eq!(egress.cnames.len(), 2);
    }

    #[test]
    fn se_cluster_tracking() {
        let cache = MeshCache::new();
        cache.put_se_cluster("stage.greeting.global", "cluster-1");
        cache.put_se_cluster("stage.greeting.global", "cluster-2");
        assert_eq!(cache.se_clusters("stage.greeting.global").len(), 2);

        cache.delete_se_host("stage.greeting.global");
        assert!(cache.se_clusters("stage.greeting.global").is_empty());
    }

    #[test]
    fn state_transitions_through_cache() {
        let cache = MeshCache::new();
        assert_eq!(
            cache.workload_state("greeting", "stage"),
            WorkloadState::Unknown
        );

        cache.transition("greeting", "stage", WorkloadState::observe);
        cache.transition("greeting", "stage", WorkloadState::resolve);
        cache.transition("greeting", "stage", WorkloadState::publish);
        assert_eq!(
            cache.workload_state("greeting", "stage"),
            WorkloadState::Published
        );
    }
}
