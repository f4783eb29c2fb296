//! Idempotent SE/DR commits into target clusters
//!
//! For every drafted ServiceEntry and target cluster, derives the SE/DR
//! pair set (default host plus one pair per GTP dnsPrefix), then upserts or
//! deletes against the cluster's sync namespace. Writes are best-effort per
//! object: one cluster failing never short-circuits the rest.

use std::collections::HashMap;

use tracing::{debug, error, info, warn};

use flotilla_common::crd::GlobalTrafficPolicy;
use flotilla_common::istio::{
    DestinationRule, DestinationRuleSpec, ServiceEntry, ServiceEntrySpec,
};
use flotilla_common::metrics::{record_object_write, record_object_write_error};
use flotilla_common::naming::{
    default_dr_name, dr_name, env_from_host, prefixed_host, se_name,
};
use flotilla_common::DEFAULT_DNS_PREFIX;

use crate::addresses::AddressStore;
use crate::gtp::destination_rule_for;
use crate::registry::{RemoteController, RemoteRegistry};

/// One ServiceEntry/DestinationRule pair bound for a cluster
#[derive(Clone, Debug)]
pub struct SeDrTuple {
    /// ServiceEntry object name
    pub se_name: String,
    /// DestinationRule object name
    pub dr_name: String,
    /// Host both objects govern
    pub host: String,
    /// ServiceEntry spec
    pub se: ServiceEntrySpec,
    /// DestinationRule spec
    pub dr: DestinationRuleSpec,
}

/// Derive the SE/DR pairs for one drafted entry and one target cluster.
///
/// The default host always yields a `<host>-se` / `<host>-default-dr` pair.
/// Each GTP policy whose dnsPrefix is neither the env nor "default" (and
/// whose deprecated `dns` does not name the default host) fans out a
/// `<prefix>.<host>` pair with its own VIP and `-se`/`-dr` names.
pub async fn build_se_dr_set(
    se: &ServiceEntrySpec,
    env: &str,
    region: Option<&str>,
    gtp: Option<&GlobalTrafficPolicy>,
    addresses: &AddressStore,
) -> Vec<SeDrTuple> {
    let default_host = se.host().to_string();
    let mut set: HashMap<String, SeDrTuple> = HashMap::new();

    if let Some(gtp) = gtp {
        for policy in &gtp.spec.policy {
            if let Some(dns) = &policy.dns {
                warn!(
                    gtp = %gtp.metadata.name.as_deref().unwrap_or_default(),
                    namespace = %gtp.metadata.namespace.as_deref().unwrap_or_default(),
                    dns = %dns,
                    "GTP uses the deprecated `dns` field"
                );
            }

            let fans_out = policy.dns_prefix != env
                && policy.dns_prefix != DEFAULT_DNS_PREFIX
                && policy.dns.as_deref() != Some(default_host.as_str());

            if fans_out {
                let host = prefixed_host(&policy.dns_prefix, &default_host);
                let vip = match addresses.resolve(&se_name(&host)).await {
                    Ok(vip) => vip,
                    Err(e) => {
                        error!(host = %host, error = %e, "no VIP for GTP host, skipping this prefix");
                        continue;
                    }
                };

                let mut modified = se.clone();
                modified.hosts = vec![host.clone()];
                modified.addresses = vec![vip];

                set.insert(
                    host.clone(),
                    SeDrTuple {
                        se_name: se_name(&host),
                        dr_name: dr_name(&host),
                        dr: destination_rule_for(&host, region, Some(policy)),
                        se: modified,
                        host,
                    },
                );
            } else {
                set.insert(
                    default_host.clone(),
                    SeDrTuple {
                        se_name: se_name(&default_host),
                        dr_name: default_dr_name(&default_host),
                        dr: destination_rule_for(&default_host, region, Some(policy)),
                        se: se.clone(),
                        host: default_host.clone(),
                    },
                );
            }
        }
    }

    // default pair stays even when no policy names it
    set.entry(default_host.clone()).or_insert_with(|| SeDrTuple {
        se_name: se_name(&default_host),
        dr_name: default_dr_name(&default_host),
        dr: destination_rule_for(&default_host, region, None),
        se: se.clone(),
        host: default_host,
    });

    let mut tuples: Vec<SeDrTuple> = set.into_values().collect();
    tuples.sort_by(|a, b| a.host.cmp(&b.host));
    tuples
}

/// Commit a drafted entry map into each target cluster.
///
/// Entries with endpoints are upserted (SE labeled with the workload
/// identity, resourceVersion carried over); entries without endpoints
/// cascade-delete both objects and drop the host from the SE cluster
/// cache. Every failure is logged and counted, never propagated.
pub async fn add_service_entries_with_dr(
    registry: &RemoteRegistry,
    target_clusters: &[String],
    entries: &HashMap<String, ServiceEntrySpec>,
) {
    let params = registry.params();
    let sync_namespace = &params.sync_namespace;

    for entry in entries.values() {
        let host = entry.host().to_string();
        let identity = registry.cache.cname_identity(&host).unwrap_or_default();
        let env = env_from_host(&host).to_string();
        let gtp = registry.cache.gtp(&identity, &env);

        for cluster_id in target_clusters {
            let Some(rc) = registry.get_cluster(cluster_id) else {
                warn!(cluster = %cluster_id, "cluster not registered, skipping writes");
                continue;
            };
            let region = rc.region();
            if region.is_none() {
                warn!(cluster = %cluster_id, "cluster locality unknown, skipping writes");
                continue;
            }

            let tuples = build_se_dr_set(
                entry,
                &env,
                region.as_deref(),
                gtp.as_ref(),
                &registry.addresses,
            )
            .await;

            for tuple in tuples {
                commit_tuple(registry, &rc, sync_namespace, &identity, &tuple).await;
            }
        }
    }
}

async fn commit_tuple(
    registry: &RemoteRegistry,
    rc: &RemoteController,
    sync_namespace: &str,
    identity: &str,
    tuple: &SeDrTuple,
) {
    let cluster = rc.cluster_id.as_str();

    let old_se = match rc.api.get_service_entry(sync_namespace, &tuple.se_name).await {
        Ok(se) => se,
        Err(e) => {
            info!(name = %tuple.se_name, cluster = %cluster, error = %e, "fetching old ServiceEntry failed");
            None
        }
    };
    let old_dr = match rc
        .api
        .get_destination_rule(sync_namespace, &tuple.dr_name)
        .await
    {
        Ok(dr) => dr,
        Err(e) => {
            info!(name = %tuple.dr_name, cluster = %cluster, error = %e, "fetching old DestinationRule failed");
            None
        }
    };

    if tuple.se.endpoints.is_empty() {
        // an SE with no endpoints is deleted, not left empty
        if let Err(e) = rc.api.delete_service_entry(sync_namespace, &tuple.se_name).await {
            error!(name = %tuple.se_name, cluster = %cluster, error = %e, "deleting ServiceEntry failed");
            record_object_write_error(cluster, "ServiceEntry");
        } else if old_se.is_some() {
            info!(name = %tuple.se_name, cluster = %cluster, "deleted ServiceEntry");
            record_object_write(cluster, "ServiceEntry", "delete");
        }
        registry.cache.delete_se_host(&tuple.host);

        if let Err(e) = rc
            .api
            .delete_destination_rule(sync_namespace, &tuple.dr_name)
            .await
        {
            error!(name = %tuple.dr_name, cluster = %cluster, error = %e, "deleting DestinationRule failed");
            record_object_write_error(cluster, "DestinationRule");
        } else if old_dr.is_some() {
            record_object_write(cluster, "DestinationRule", "delete");
        }
        return;
    }

    let mut se = ServiceEntry::new(&tuple.se_name, tuple.se.clone());
    se.metadata.namespace = Some(sync_namespace.to_string());
    se.metadata.labels = Some(
        [(
            registry.params().label_set.workload_identity_key.clone(),
            identity.to_string(),
        )]
        .into_iter()
        .collect(),
    );
    se.metadata.resource_version = old_se.and_then(|o| o.metadata.resource_version);

    let op = if se.metadata.resource_version.is_some() {
        "update"
    } else {
        "create"
    };
    match rc.api.upsert_service_entry(sync_namespace, &se).await {
        Ok(()) => {
            record_object_write(cluster, "ServiceEntry", op);
            registry.cache.put_se_cluster(&tuple.host, cluster);
        }
        Err(e) if e.is_conflict() => {
            debug!(name = %tuple.se_name, cluster = %cluster, "ServiceEntry write conflict, next event drives convergence");
            record_object_write_error(cluster, "ServiceEntry");
        }
        Err(e) => {
            error!(name = %tuple.se_name, cluster = %cluster, error = %e, "writing ServiceEntry failed");
            record_object_write_error(cluster, "ServiceEntry");
        }
    }

    let mut dr = DestinationRule::new(&tuple.dr_name, tuple.dr.clone());
    dr.metadata.namespace = Some(sync_namespace.to_string());
    dr.metadata.resource_version = old_dr.and_then(|o| o.metadata.resource_version);

    let op = if dr.metadata.resource_version.is_some() {
        "update"
    } else {
        "create"
    };
    match rc.api.upsert_destination_rule(sync_namespace, &dr).await {
        Ok(()) => record_object_write(cluster, "DestinationRule", op),
        Err(e) if e.is_conflict() => {
            debug!(name = %tuple.dr_name, cluster = %cluster, "DestinationRule write conflict, next event drives convergence");
            record_object_write_error(cluster, "DestinationRule");
        }
        Err(e) => {
            error!(name = %tuple.dr_name, cluster = %cluster, error = %e, "writing DestinationRule failed");
            record_object_write_error(cluster, "DestinationRule");
        }
    }
}
