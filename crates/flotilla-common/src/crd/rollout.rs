//! Argo Rollout subset (`argoproj.io/v1alpha1`)
//!
//! Only the fields the reconciler reads: pod template identity labels,
//! the Service selector, the progressive-delivery strategy, and the canary
//! traffic weights reported in status.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Spec subset of an Argo Rollout
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "argoproj.io",
    version = "v1alpha1",
    kind = "Rollout",
    plural = "rollouts",
    namespaced,
    status = "RolloutStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct RolloutSpec {
    /// Pod selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<RolloutSelector>,

    /// Pod template (labels and annotations only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<RolloutPodTemplate>,

    /// Progressive-delivery strategy
    #[serde(default)]
    pub strategy: RolloutStrategy,
}

/// Label selector of a Rollout
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RolloutSelector {
    /// Labels pods must carry
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

/// Pod template subset
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RolloutPodTemplate {
    /// Pod metadata
    #[serde(default)]
    pub metadata: RolloutPodMeta,
}

/// Pod template metadata subset
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RolloutPodMeta {
    /// Pod labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Pod annotations
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Progressive-delivery strategy; exactly one branch is set in practice
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RolloutStrategy {
    /// BlueGreen: one active Service, optionally one preview Service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blue_green: Option<BlueGreenStrategy>,

    /// Canary: a stable and a canary Service with shifting weights
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canary: Option<CanaryStrategy>,
}

/// BlueGreen strategy fields
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlueGreenStrategy {
    /// Service receiving live traffic
    pub active_service: String,

    /// Service exposing the next version for preview
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_service: Option<String>,
}

/// Canary strategy fields
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CanaryStrategy {
    /// Service pinned to the stable ReplicaSet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_service: Option<String>,

    /// Service pinned to the canary ReplicaSet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canary_service: Option<String>,
}

/// Status subset of an Argo Rollout
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RolloutStatus {
    /// Canary progress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canary: Option<CanaryStatus>,
}

/// Canary status subset
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CanaryStatus {
    /// Current traffic weights
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<CanaryWeights>,
}

/// Current canary/stable traffic split
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CanaryWeights {
    /// Weight routed to the canary Service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canary: Option<WeightDestination>,

    /// Weight routed to the stable Service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable: Option<WeightDestination>,
}

/// A Service and its traffic weight
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WeightDestination {
    /// Target Service name
    #[serde(default)]
    pub service_name: String,
    /// Traffic weight (0–100)
    #[serde(default)]
    pub weight: i32,
}

impl Rollout {
    /// Whether this rollout uses the BlueGreen strategy
    pub fn is_blue_green(&self) -> bool {
        self.spec.strategy.blue_green.is_some()
    }
}
