//! Istio DestinationRule subset
//!
//! Flotilla writes one DestinationRule per ServiceEntry host, carrying
//! mesh-mTLS plus whatever traffic policy the active GlobalTrafficPolicy
//! dictates for that host.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// DestinationRule spec (`networking.istio.io/v1alpha3`)
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "networking.istio.io",
    version = "v1alpha3",
    kind = "DestinationRule",
    plural = "destinationrules",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRuleSpec {
    /// Host this rule applies to (a global FQDN)
    pub host: String,

    /// Traffic policy for the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_policy: Option<TrafficPolicySettings>,
}

/// Traffic policy block of a DestinationRule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrafficPolicySettings {
    /// Client TLS settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<ClientTlsSettings>,

    /// Load balancer settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<LoadBalancerSettings>,

    /// Outlier detection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outlier_detection: Option<OutlierDetection>,

    /// Connection pool settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_pool: Option<ConnectionPoolSettings>,
}

/// Client TLS settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientTlsSettings {
    /// TLS mode (ISTIO_MUTUAL for mesh hosts)
    pub mode: String,
}

impl ClientTlsSettings {
    /// Mesh-internal mutual TLS
    pub fn istio_mutual() -> Self {
        Self {
            mode: super::ISTIO_MUTUAL.to_string(),
        }
    }
}

/// Load balancer settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerSettings {
    /// Simple LB algorithm (e.g. ROUND_ROBIN)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simple: Option<String>,

    /// Locality-aware load balancing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locality_lb_setting: Option<LocalityLbSetting>,
}

/// Locality LB settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalityLbSetting {
    /// Traffic distribution rules
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub distribute: Vec<LocalityLbDistribute>,
}

/// One locality distribution rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalityLbDistribute {
    /// Originating locality (`<region>/*` or `*`)
    pub from: String,
    /// Destination locality → percentage
    pub to: BTreeMap<String, u32>,
}

/// Outlier detection settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutlierDetection {
    /// Gateway errors before ejection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consecutive_gateway_errors: Option<u32>,

    /// Sweep interval (Istio duration string, e.g. "30s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    /// Minimum ejection duration (Istio duration string)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_ejection_time: Option<String>,
}

/// Connection pool settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionPoolSettings {
    /// HTTP connection pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpConnectionPool>,
}

/// HTTP connection pool settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpConnectionPool {
    /// Max concurrent HTTP/2 requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http2_max_requests: Option<u32>,

    /// Max requests per connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_requests_per_connection: Option<u32>,
}
