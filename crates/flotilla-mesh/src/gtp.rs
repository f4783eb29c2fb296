//! GlobalTrafficPolicy selection and DestinationRule synthesis
//!
//! GTPs for one (identity, env) can exist in several clusters at once;
//! exactly one wins globally. The winner's per-prefix policies shape the
//! DestinationRules written alongside each ServiceEntry.

use tracing::{debug, error, info};

use flotilla_common::crd::{GlobalTrafficPolicy, LbType, TrafficPolicy};
use flotilla_common::istio::{
    ClientTlsSettings, ConnectionPoolSettings, DestinationRuleSpec, HttpConnectionPool,
    LoadBalancerSettings, LocalityLbDistribute, LocalityLbSetting, OutlierDetection,
    TrafficPolicySettings,
};

use crate::cache::MeshCache;

/// Order GTPs by priority (desc), ties broken by creation time (desc).
///
/// A strict-weak ordering: the head of the sorted list is the active GTP.
/// Missing timestamps rank last within their priority band.
pub fn sort_by_priority_and_creation(gtps: &mut [GlobalTrafficPolicy], priority_key: &str) {
    gtps.sort_by(|a, b| {
        let priority_a = a.priority(priority_key);
        let priority_b = b.priority(priority_key);
        priority_b.cmp(&priority_a).then_with(|| {
            let time_a = a.metadata.creation_timestamp.as_ref().map(|t| t.0);
            let time_b = b.metadata.creation_timestamp.as_ref().map(|t| t.0);
            time_b.cmp(&time_a)
        })
    });
}

/// Pick the active GTP for a key and store it in the global cache.
///
/// An empty candidate list deletes the cache entry: the identity has no
/// policy anywhere anymore.
pub fn update_global_cache(
    cache: &MeshCache,
    identity: &str,
    env: &str,
    mut gtps: Vec<GlobalTrafficPolicy>,
    priority_key: &str,
) {
    if gtps.is_empty() {
        debug!(identity = %identity, env = %env, "no GTPs found, clearing global cache entry");
        cache.delete_gtp(identity, env);
        return;
    }

    if gtps.len() > 1 {
        sort_by_priority_and_creation(&mut gtps, priority_key);
    }

    let active = gtps.into_iter().next().expect("non-empty after check");
    info!(
        identity = %identity,
        env = %env,
        gtp = %active.metadata.name.as_deref().unwrap_or_default(),
        namespace = %active.metadata.namespace.as_deref().unwrap_or_default(),
        "GTP selected as active"
    );
    cache.put_gtp(identity, env, active);
}

/// Build the DestinationRule for a host from the active policy and the
/// region of the cluster being written to. A nil policy (or unknown
/// region) yields the default mesh-mTLS rule.
pub fn destination_rule_for(
    host: &str,
    region: Option<&str>,
    policy: Option<&TrafficPolicy>,
) -> DestinationRuleSpec {
    let mut settings = TrafficPolicySettings {
        tls: Some(ClientTlsSettings::istio_mutual()),
        ..Default::default()
    };

    if let (Some(region), Some(policy)) = (region, policy) {
        settings.load_balancer = Some(LoadBalancerSettings {
            simple: Some("ROUND_ROBIN".to_string()),
            locality_lb_setting: Some(locality_setting(region, policy)),
        });

        if let Some(outlier) = &policy.outlier_detection {
            settings.outlier_detection = Some(OutlierDetection {
                consecutive_gateway_errors: outlier.consecutive_gateway_errors,
                interval: outlier.interval_seconds.map(istio_duration),
                base_ejection_time: outlier.base_ejection_time_seconds.map(istio_duration),
            });
        }

        if let Some(pool) = &policy.connection_pool {
            settings.connection_pool = Some(ConnectionPoolSettings {
                http: Some(HttpConnectionPool {
                    http2_max_requests: pool.http2_max_requests,
                    max_requests_per_connection: pool.max_requests_per_connection,
                }),
            });
        }
    }

    DestinationRuleSpec {
        host: host.to_string(),
        traffic_policy: Some(settings),
    }
}

fn locality_setting(region: &str, policy: &TrafficPolicy) -> LocalityLbSetting {
    let from = format!("{region}/*");
    let to = match policy.lb_type {
        // keep traffic in the caller's region
        LbType::Topology => [(from.clone(), 100u32)].into_iter().collect(),
        LbType::Failover => {
            if policy.target.is_empty() {
                error!(region = %region, "failover GTP has no targets, pinning traffic locally");
                [(from.clone(), 100u32)].into_iter().collect()
            } else {
                policy
                    .target
                    .iter()
                    .map(|t| (format!("{}/*", t.region), t.weight))
                    .collect()
            }
        }
    };

    LocalityLbSetting {
        distribute: vec![LocalityLbDistribute { from, to }],
    }
}

fn istio_duration(seconds: u64) -> String {
    format!("{seconds}s")
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_common::crd::{GlobalTrafficPolicySpec, GtpOutlierDetection, TrafficGroup};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn gtp(name: &str, priority: i32, created_secs: i64) -> GlobalTrafficPolicy {
        use k8s_openapi::chrono::{TimeZone, Utc};
        let mut gtp = GlobalTrafficPolicy::new(name, GlobalTrafficPolicySpec::default());
        gtp.metadata = ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(
                "priority".to_string(),
                priority.to_string(),
            )])),
            creation_timestamp: Some(Time(Utc.timestamp_opt(created_secs, 0).unwrap())),
            ..Default::default()
        };
        gtp
    }

    #[test]
    fn highest_priority_latest_timestamp_wins() {
        let mut gtps = vec![gtp("a", 5, 1), gtp("b", 10, 0), gtp("c", 10, 2)];
        sort_by_priority_and_creation(&mut gtps, "priority");
        assert_eq!(gtps[0].metadata.name.as_deref(), Some("c"));
        assert_eq!(gtps[1].metadata.name.as_deref(), Some("b"));
        assert_eq!(gtps[2].metadata.name.as_deref(), Some("a"));
    }

    #[test]
    fn missing_timestamp_ranks_last_within_priority() {
        let mut no_time = gtp("x", 10, 0);
        no_time.metadata.creation_timestamp = None;
        let mut gtps = vec![no_time, gtp("y", 10, 1)];
        sort_by_priority_and_creation(&mut gtps, "priority");
        assert_eq!(gtps[0].metadata.name.as_deref(), Some("y"));
    }

    #[test]
    fn cache_update_selects_and_deletes() {
        let cache = MeshCache::new();

        update_global_cache(
            &cache,
            "greeting",
            "stage",
            vec![gtp("a", 5, 1), gtp("b", 10, 0), gtp("c", 10, 2)],
            "priority",
        );
        assert_eq!(
            cache.gtp("greeting", "stage").unwrap().metadata.name.as_deref(),
            Some("c")
        );

        update_global_cache(&cache, "greeting", "stage", vec![], "priority");
        assert!(cache.gtp("greeting", "stage").is_none());
    }

    #[test]
    fn nil_policy_yields_mtls_only_rule() {
        let dr = destination_rule_for("stage.greeting.global", Some("us-west-2"), None);
        assert_eq!(dr.host, "stage.greeting.global");
        let settings = dr.traffic_policy.unwrap();
        assert_eq!(settings.tls.unwrap().mode, "ISTIO_MUTUAL");
        assert!(settings.load_balancer.is_none());
        assert!(settings.outlier_detection.is_none());
    }

    #[test]
    fn topology_policy_pins_traffic_to_region() {
        let policy = TrafficPolicy {
            dns_prefix: "default".to_string(),
            lb_type: LbType::Topology,
            ..Default::default()
        };
        let dr = destination_rule_for("stage.greeting.global", Some("us-west-2"), Some(&policy));
        let lb = dr.traffic_policy.unwrap().load_balancer.unwrap();
        let distribute = &lb.locality_lb_setting.unwrap().distribute;
        assert_eq!(distribute.len(), 1);
        assert_eq!(distribute[0].from, "us-west-2/*");
        assert_eq!(distribute[0].to.get("us-west-2/*"), Some(&100));
    }

    #[test]
    fn failover_policy_distributes_per_targets() {
        let policy = TrafficPolicy {
            dns_prefix: "default".to_string(),
            lb_type: LbType::Failover,
            target: vec![
                TrafficGroup {
                    region: "us-west-2".to_string(),
                    weight: 80,
                },
                TrafficGroup {
                    region: "us-east-2".to_string(),
                    weight: 20,
                },
            ],
            ..Default::default()
        };
        let dr = destination_rule_for("stage.greeting.global", Some("us-west-2"), Some(&policy));
        let lb = dr.traffic_policy.unwrap().load_balancer.unwrap();
        let distribute = &lb.locality_lb_setting.unwrap().distribute;
        assert_eq!(distribute[0].to.get("us-west-2/*"), Some(&80));
        assert_eq!(distribute[0].to.get("us-east-2/*"), Some(&20));
    }

    #[test]
    fn outlier_detection_becomes_istio_durations() {
        let policy = TrafficPolicy {
            outlier_detection: Some(GtpOutlierDetection {
                consecutive_gateway_errors: Some(5),
                interval_seconds: Some(30),
                base_ejection_time_seconds: Some(120),
            }),
            ..Default::default()
        };
        let dr = destination_rule_for("stage.greeting.global", Some("us-west-2"), Some(&policy));
        let outlier = dr.traffic_policy.unwrap().outlier_detection.unwrap();
        assert_eq!(outlier.consecutive_gateway_errors, Some(5));
        assert_eq!(outlier.interval.as_deref(), Some("30s"));
        assert_eq!(outlier.base_ejection_time.as_deref(), Some("120s"));
    }

    #[test]
    fn unknown_region_skips_locality_settings() {
        let policy = TrafficPolicy::default();
        let dr = destination_rule_for("stage.greeting.global", None, Some(&policy));
        assert!(dr.traffic_policy.unwrap().load_balancer.is_none());
    }
}
