//! GlobalTrafficPolicy CRD — per-DNS-prefix traffic policies for an identity
//!
//! A GTP is matched to workloads by identity and env labels. Across the
//! whole fleet at most one GTP is active per (identity, env): highest
//! priority wins, ties broken by latest creation timestamp.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Spec for a GlobalTrafficPolicy
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "flotilla.io",
    version = "v1",
    kind = "GlobalTrafficPolicy",
    plural = "globaltrafficpolicies",
    shortname = "gtp",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct GlobalTrafficPolicySpec {
    /// One traffic policy per DNS prefix
    #[serde(default)]
    pub policy: Vec<TrafficPolicy>,
}

/// Traffic policy for one DNS prefix of the global FQDN
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrafficPolicy {
    /// Host prefix this policy governs; the env name or "default" refer to
    /// the un-prefixed host, anything else fans out `<prefix>.<host>`
    #[serde(default)]
    pub dns_prefix: String,

    /// Deprecated: full DNS name. Warned about and otherwise ignored unless
    /// it names the current default host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,

    /// Locality load-balancing scheme
    #[serde(default)]
    pub lb_type: LbType,

    /// Per-region traffic distribution (Failover only)
    #[serde(default)]
    pub target: Vec<TrafficGroup>,

    /// Outlier detection forwarded to the DestinationRule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outlier_detection: Option<GtpOutlierDetection>,

    /// Connection pool forwarded to the DestinationRule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_pool: Option<GtpConnectionPool>,
}

/// Locality load-balancing scheme
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum LbType {
    /// Keep traffic in the caller's region
    #[default]
    Topology,
    /// Distribute per the `target` weights
    Failover,
}

/// Weighted traffic share for one region
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrafficGroup {
    /// Destination region
    pub region: String,
    /// Percentage of traffic (0–100)
    #[serde(default)]
    pub weight: u32,
}

/// Outlier detection knobs
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GtpOutlierDetection {
    /// Gateway errors before ejecting an endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consecutive_gateway_errors: Option<u32>,

    /// Sweep interval in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u64>,

    /// Minimum ejection duration in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_ejection_time_seconds: Option<u64>,
}

/// Connection pool knobs
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GtpConnectionPool {
    /// Max concurrent HTTP/2 requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http2_max_requests: Option<u32>,

    /// Max requests per connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_requests_per_connection: Option<u32>,
}

impl GlobalTrafficPolicy {
    /// Integer priority read from the configured label.
    ///
    /// Missing or unparseable values mean priority 0, never an error: a
    /// mislabeled GTP still participates in selection at the lowest rank.
    pub fn priority(&self, priority_key: &str) -> i32 {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(priority_key))
            .and_then(|v| v.trim().parse::<i32>().ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn gtp_with_priority(label: Option<(&str, &str)>) -> GlobalTrafficPolicy {
        let mut gtp = GlobalTrafficPolicy::new("gtp-test", GlobalTrafficPolicySpec::default());
        if let Some((k, v)) = label {
            gtp.metadata.labels = Some(BTreeMap::from([(k.to_string(), v.to_string())]));
        }
        gtp
    }

    #[test]
    fn priority_parses_label() {
        assert_eq!(gtp_with_priority(Some(("priority", "10"))).priority("priority"), 10);
        assert_eq!(gtp_with_priority(Some(("priority", " 5 "))).priority("priority"), 5);
    }

    #[test]
    fn priority_defaults_to_zero() {
        assert_eq!(gtp_with_priority(None).priority("priority"), 0);
        assert_eq!(
            gtp_with_priority(Some(("priority", "high"))).priority("priority"),
            0
        );
        assert_eq!(
            gtp_with_priority(Some(("other", "10"))).priority("priority"),
            0
        );
    }

    #[test]
    fn lb_type_defaults_to_topology() {
        let policy: TrafficPolicy = serde_json::from_value(serde_json::json!({
            "dnsPrefix": "canary"
        }))
        .unwrap();
        assert_eq!(policy.lb_type, LbType::Topology);
        assert_eq!(policy.dns_prefix, "canary");
        assert!(policy.dns.is_none());
    }
}
