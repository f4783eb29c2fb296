//! Runtime configuration for the Flotilla control plane
//!
//! `MeshParams` is built once at startup from CLI flags/env and shared
//! read-only across every reconciliation path.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Label and annotation keys Flotilla reads off workloads and policies
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct LabelSet {
    /// Label/annotation key carrying a workload's global identity
    pub workload_identity_key: String,
    /// Label/annotation key carrying a workload's environment
    pub env_key: String,
    /// Label on GlobalTrafficPolicies read as an integer priority
    pub priority_key: String,
    /// `app` label value of the mesh ingress gateway Service
    pub gateway_app: String,
    /// Pod-template label that excludes a workload from reconciliation
    pub ignore_label: String,
    /// Pod-template annotation marking sidecar injection; workloads without
    /// it are not in the mesh and are skipped
    pub sidecar_injection_annotation: String,
}

impl Default for LabelSet {
    fn default() -> Self {
        Self {
            workload_identity_key: "identity".to_string(),
            env_key: "env".to_string(),
            priority_key: "priority".to_string(),
            gateway_app: "istio-ingressgateway".to_string(),
            ignore_label: "flotilla-ignore".to_string(),
            sidecar_injection_annotation: "sidecar.istio.io/inject".to_string(),
        }
    }
}

/// Top-level configuration surface
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct MeshParams {
    /// Label and annotation keys
    pub label_set: LabelSet,
    /// Suffix appended to `<env>.<identity>` to form the global FQDN
    pub hostname_suffix: String,
    /// Namespace SE/DR objects are written to in every cluster
    pub sync_namespace: String,
    /// First two octets of generated VIPs (e.g. "240.0")
    pub ip_prefix: String,
    /// Whether generated ServiceEntries carry SubjectAltNames
    pub enable_san: bool,
    /// SPIFFE trust-domain prefix used when `enable_san` is set
    pub san_prefix: String,
    /// `"enabled"` appends egress hosts to workload Sidecars
    pub workload_sidecar_update: String,
    /// Conventional name of the per-namespace workload Sidecar object
    pub workload_sidecar_name: String,
    /// Events within this window of startup populate caches but skip writes
    pub cache_warmup_duration: Duration,
    /// Full relist period for watchers (zero means watch-only)
    pub resync_period: Duration,
    /// Service port names eligible to become mesh ports
    pub mesh_port_names: Vec<String>,
}

impl Default for MeshParams {
    fn default() -> Self {
        Self {
            label_set: LabelSet::default(),
            hostname_suffix: "global".to_string(),
            sync_namespace: "flotilla-sync".to_string(),
            ip_prefix: "240.0".to_string(),
            enable_san: false,
            san_prefix: String::new(),
            workload_sidecar_update: "disabled".to_string(),
            workload_sidecar_name: "default".to_string(),
            cache_warmup_duration: Duration::from_secs(300),
            resync_period: Duration::ZERO,
            mesh_port_names: vec![
                "http".to_string(),
                "grpc".to_string(),
                "http2".to_string(),
                "grpc-web".to_string(),
                "tcp".to_string(),
            ],
        }
    }
}

impl MeshParams {
    /// Whether workload Sidecar egress updates are enabled
    pub fn sidecar_update_enabled(&self) -> bool {
        self.workload_sidecar_update == "enabled"
    }

    /// Whether a Service port name is eligible to become a mesh port
    pub fn is_mesh_port(&self, port_name: &str) -> bool {
        self.mesh_port_names.iter().any(|n| n == port_name)
    }
}
