//! Istio Sidecar subset
//!
//! Flotilla only ever appends hosts to the first egress listener of a
//! pre-existing workload Sidecar; it never creates Sidecars from scratch.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Sidecar spec (`networking.istio.io/v1alpha3`)
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "networking.istio.io",
    version = "v1alpha3",
    kind = "Sidecar",
    plural = "sidecars",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SidecarSpec {
    /// Workload selector; absent means namespace-wide
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_selector: Option<SidecarWorkloadSelector>,

    /// Egress listeners; hosts are appended to the first one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub egress: Vec<EgressListener>,
}

/// Pod selector of a Sidecar
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SidecarWorkloadSelector {
    /// Pod labels to match
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// One egress listener of a Sidecar
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EgressListener {
    /// `<namespace>/<host>` entries the proxy may reach
    #[serde(default)]
    pub hosts: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn egress_hosts_round_trip() {
        let spec = SidecarSpec {
            workload_selector: None,
            egress: vec![EgressListener {
                hosts: vec!["ns-a/stage.greeting.global".to_string()],
            }],
        };
        let json = serde_json::to_value(&spec).unwrap();
        let back: SidecarSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back.egress[0].hosts.len(), 1);
    }
}
