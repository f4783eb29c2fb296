//! Per-source-cluster endpoint rewriting
//!
//! The resolver drafts every ServiceEntry with ingress-gateway endpoints.
//! Inside a cluster that hosts the workload, the entry written locally must
//! point at the Kubernetes Service instead. Each rewrite builds a fresh
//! copy for its write target; the canonical ingress-form draft is never
//! mutated, so later source clusters see it untouched.

use std::collections::BTreeMap;

use flotilla_common::istio::{ServiceEntrySpec, WorkloadEntry};
use flotilla_common::naming::{is_preview_host, local_fqdn};
use flotilla_common::MeshParams;

use crate::workload::{mesh_ports, WeightedService};

/// Whether an endpoint is the rewritable ingress endpoint of this cluster.
/// An empty address means the ingress LB is not provisioned yet; it is
/// still this cluster's endpoint and still gets rewritten.
fn is_cluster_endpoint(endpoint: &WorkloadEntry, ingress_address: &str) -> bool {
    endpoint.address == ingress_address || endpoint.address.is_empty()
}

/// Rewrite for a plain Deployment: the cluster endpoint becomes the local
/// Service FQDN carrying the mesh ports.
pub fn rewrite_for_deployment(
    se: &ServiceEntrySpec,
    ingress_address: &str,
    service_name: &str,
    namespace: &str,
    ports: &BTreeMap<String, u32>,
) -> ServiceEntrySpec {
    let mut local = se.clone();
    for endpoint in &mut local.endpoints {
        if is_cluster_endpoint(endpoint, ingress_address) {
            endpoint.address = local_fqdn(service_name, namespace);
            endpoint.ports = ports.clone();
        }
    }
    local
}

/// Rewrite for a BlueGreen Rollout.
///
/// The `preview.` host maps to the preview Service when one exists; every
/// other host maps to the active Service. Returns the rewritten copy plus
/// the local FQDNs recorded for sidecar egress.
pub fn rewrite_for_blue_green(
    host: &str,
    se: &ServiceEntrySpec,
    ingress_address: &str,
    active_service: &str,
    preview_service: Option<&str>,
    weighted: &[WeightedService],
    params: &MeshParams,
) -> (ServiceEntrySpec, Vec<String>) {
    let target = if is_preview_host(host) {
        preview_service
            .and_then(|name| find_weighted(weighted, name))
            .or_else(|| find_weighted(weighted, active_service))
    } else {
        find_weighted(weighted, active_service)
    };

    let Some(target) = target else {
        return (se.clone(), Vec::new());
    };

    let service_name = target.service.metadata.name.clone().unwrap_or_default();
    let namespace = target.service.metadata.namespace.clone().unwrap_or_default();
    let ports = mesh_ports(&target.service, params);
    let fqdn = local_fqdn(&service_name, &namespace);

    let mut local = se.clone();
    for endpoint in &mut local.endpoints {
        if is_cluster_endpoint(endpoint, ingress_address) {
            endpoint.address = fqdn.clone();
            endpoint.ports = ports.clone();
        }
    }

    (local, vec![fqdn])
}

/// Rewrite for a Canary Rollout with more than one weighted Service: the
/// cluster endpoint expands into one endpoint per Service, weighted.
/// Services with weight 0 (or less) are omitted entirely.
pub fn rewrite_for_canary(
    se: &ServiceEntrySpec,
    ingress_address: &str,
    weighted: &[WeightedService],
    ports: &BTreeMap<String, u32>,
) -> ServiceEntrySpec {
    let mut local = se.clone();

    let Some(template) = local
        .endpoints
        .iter()
        .find(|ep| is_cluster_endpoint(ep, ingress_address))
        .cloned()
    else {
        return local;
    };

    let mut endpoints: Vec<WorkloadEntry> = local
        .endpoints
        .iter()
        .filter(|ep| !is_cluster_endpoint(ep, ingress_address))
        .cloned()
        .collect();

    for ws in weighted {
        if ws.weight <= 0 {
            continue;
        }
        let service_name = ws.service.metadata.name.clone().unwrap_or_default();
        let namespace = ws.service.metadata.namespace.clone().unwrap_or_default();

        let mut endpoint = template.clone();
        endpoint.address = local_fqdn(&service_name, &namespace);
        endpoint.ports = ports.clone();
        endpoint.weight = Some(ws.weight as u32);
        endpoints.push(endpoint);
    }

    local.endpoints = endpoints;
    local
}

fn find_weighted<'a>(weighted: &'a [WeightedService], name: &str) -> Option<&'a WeightedService> {
    weighted
        .iter()
        .find(|ws| ws.service.metadata.name.as_deref() == Some(name))
}
