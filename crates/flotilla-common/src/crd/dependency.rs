//! Dependency CRD — declares which identities consume which
//!
//! Dependencies drive the cross-cluster fan-out: a ServiceEntry for an
//! identity is written into every cluster hosting one of its dependents.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Spec for a Dependency record
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "flotilla.io",
    version = "v1",
    kind = "Dependency",
    plural = "dependencies",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DependencySpec {
    /// Identity of the consuming workload
    pub source: String,

    /// Label key identities were derived from (informational)
    #[serde(default)]
    pub identity_label: String,

    /// Identities the source depends on
    #[serde(default)]
    pub destinations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal() {
        let spec: DependencySpec = serde_json::from_value(serde_json::json!({
            "source": "webapp",
            "destinations": ["greeting", "payments"]
        }))
        .unwrap();
        assert_eq!(spec.source, "webapp");
        assert_eq!(spec.destinations.len(), 2);
        assert!(spec.identity_label.is_empty());
    }
}
