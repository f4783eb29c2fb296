//! Workload model: the `{Deployment | Rollout}` variant and its Services
//!
//! The reconciler treats both workload kinds through one capability
//! surface: namespace, pod-template labels/annotations, matching Services,
//! and the progressive-delivery strategy.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;

use flotilla_common::crd::Rollout;
use flotilla_common::naming::{label_or_annotation, workload_env};
use flotilla_common::{MeshParams, HTTP_PROTOCOL};

/// A Service referenced by a Rollout together with its traffic weight.
/// Weight 0 means the Service is excluded from weighted expansion.
#[derive(Clone, Debug, PartialEq)]
pub struct WeightedService {
    /// The Kubernetes Service
    pub service: Service,
    /// Relative traffic weight (0–100)
    pub weight: i32,
}

/// Progressive-delivery strategy of a workload
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Plain Deployment: one Service, no traffic shifting
    Plain,
    /// BlueGreen Rollout: active Service plus optional preview Service
    BlueGreen {
        /// Service receiving live traffic
        active_service: String,
        /// Service exposing the next version
        preview_service: Option<String>,
    },
    /// Canary Rollout: weighted stable/canary Services
    Canary,
}

/// A workload discovered in one member cluster
#[derive(Clone, Debug)]
pub enum Workload {
    /// A plain Kubernetes Deployment
    Deployment(Box<Deployment>),
    /// An Argo Rollout
    Rollout(Box<Rollout>),
}

impl Workload {
    /// Namespace the workload lives in
    pub fn namespace(&self) -> String {
        match self {
            Workload::Deployment(d) => d.metadata.namespace.clone().unwrap_or_default(),
            Workload::Rollout(r) => r.metadata.namespace.clone().unwrap_or_default(),
        }
    }

    /// Pod-template labels
    pub fn pod_labels(&self) -> BTreeMap<String, String> {
        match self {
            Workload::Deployment(d) => d
                .spec
                .as_ref()
                .and_then(|s| s.template.metadata.as_ref())
                .and_then(|m| m.labels.clone())
                .unwrap_or_default(),
            Workload::Rollout(r) => r
                .spec
                .template
                .as_ref()
                .map(|t| t.metadata.labels.clone())
                .unwrap_or_default(),
        }
    }

    /// Pod-template annotations
    pub fn pod_annotations(&self) -> BTreeMap<String, String> {
        match self {
            Workload::Deployment(d) => d
                .spec
                .as_ref()
                .and_then(|s| s.template.metadata.as_ref())
                .and_then(|m| m.annotations.clone())
                .unwrap_or_default(),
            Workload::Rollout(r) => r
                .spec
                .template
                .as_ref()
                .map(|t| t.metadata.annotations.clone())
                .unwrap_or_default(),
        }
    }

    /// Global identity from the configured label (or annotation)
    pub fn identity(&self, params: &MeshParams) -> Option<String> {
        let labels = self.pod_labels();
        let annotations = self.pod_annotations();
        label_or_annotation(&labels, &annotations, &params.label_set.workload_identity_key)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// Environment from the configured label (or annotation), defaulting
    pub fn env(&self, params: &MeshParams) -> String {
        workload_env(
            &self.pod_labels(),
            &self.pod_annotations(),
            &params.label_set.env_key,
        )
    }

    /// Progressive-delivery strategy
    pub fn strategy(&self) -> Strategy {
        match self {
            Workload::Deployment(_) => Strategy::Plain,
            Workload::Rollout(r) => {
                if let Some(bg) = &r.spec.strategy.blue_green {
                    Strategy::BlueGreen {
                        active_service: bg.active_service.clone(),
                        preview_service: bg.preview_service.clone(),
                    }
                } else {
                    Strategy::Canary
                }
            }
        }
    }

    /// Services of this workload with their weights.
    ///
    /// Deployments match a single Service by selector (weight 100).
    /// BlueGreen Rollouts yield the active Service at 100 and the preview
    /// at 0. Canary Rollouts yield the stable/canary Services with weights
    /// from `status.canary.weights`; when status carries no weights yet the
    /// stable Service defaults to 100 and the canary to 0.
    pub fn matching_services(&self, namespace_services: &[Service]) -> Vec<WeightedService> {
        match self {
            Workload::Deployment(_) => select_by_labels(namespace_services, &self.pod_labels())
                .map(|service| {
                    vec![WeightedService {
                        service,
                        weight: 100,
                    }]
                })
                .unwrap_or_default(),
            Workload::Rollout(r) => rollout_services(r, namespace_services, &self.pod_labels()),
        }
    }
}

/// First Service (by name) whose selector matches the pod labels
fn select_by_labels(services: &[Service], pod_labels: &BTreeMap<String, String>) -> Option<Service> {
    let mut candidates: Vec<&Service> = services
        .iter()
        .filter(|svc| {
            svc.spec
                .as_ref()
                .and_then(|s| s.selector.as_ref())
                .is_some_and(|sel| selector_matches(sel, pod_labels))
        })
        .collect();
    candidates.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
    candidates.first().map(|s| (*s).clone())
}

/// Whether a non-empty selector is a subset of the given labels
pub fn selector_matches(
    selector: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> bool {
    !selector.is_empty() && selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

fn find_by_name(services: &[Service], name: &str) -> Option<Service> {
    services
        .iter()
        .find(|svc| svc.metadata.name.as_deref() == Some(name))
        .cloned()
}

fn rollout_services(
    rollout: &Rollout,
    namespace_services: &[Service],
    pod_labels: &BTreeMap<String, String>,
) -> Vec<WeightedService> {
    if let Some(bg) = &rollout.spec.strategy.blue_green {
        let mut out = Vec::new();
        if let Some(active) = find_by_name(namespace_services, &bg.active_service) {
            out.push(WeightedService {
                service: active,
                weight: 100,
            });
        }
        if let Some(preview_name) = &bg.preview_service {
            if let Some(preview) = find_by_name(namespace_services, preview_name) {
                out.push(WeightedService {
                    service: preview,
                    weight: 0,
                });
            }
        }
        return out;
    }

    if let Some(canary) = &rollout.spec.strategy.canary {
        let weights = rollout
            .status
            .as_ref()
            .and_then(|s| s.canary.as_ref())
            .and_then(|c| c.weights.as_ref());

        let mut out = Vec::new();
        if let Some(stable_name) = &canary.stable_service {
            if let Some(service) = find_by_name(namespace_services, stable_name) {
                let weight = weights
                    .and_then(|w| w.stable.as_ref())
                    .map(|d| d.weight)
                    .unwrap_or(100);
                out.push(WeightedService { service, weight });
            }
        }
        if let Some(canary_name) = &canary.canary_service {
            if let Some(service) = find_by_name(namespace_services, canary_name) {
                let weight = weights
                    .and_then(|w| w.canary.as_ref())
                    .map(|d| d.weight)
                    .unwrap_or(0);
                out.push(WeightedService { service, weight });
            }
        }
        if !out.is_empty() {
            return out;
        }
    }

    // canary without named services: fall back to selector matching
    select_by_labels(namespace_services, pod_labels)
        .map(|service| {
            vec![WeightedService {
                service,
                weight: 100,
            }]
        })
        .unwrap_or_default()
}

/// Mesh ports of a Service: named ports intersected with the configured
/// allow-list, keyed by port name. A single unnamed port counts as http.
pub fn mesh_ports(service: &Service, params: &MeshParams) -> BTreeMap<String, u32> {
    let ports = service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .cloned()
        .unwrap_or_default();

    let mut out = BTreeMap::new();
    for port in &ports {
        match port.name.as_deref() {
            Some(name) if params.is_mesh_port(name) => {
                out.insert(name.to_string(), port.port as u32);
            }
            None if ports.len() == 1 => {
                out.insert(HTTP_PROTOCOL.to_string(), port.port as u32);
            }
            _ => {}
        }
    }
    out
}
