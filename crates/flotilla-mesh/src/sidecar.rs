//! Workload Sidecar egress maintenance
//!
//! Local callers only reach a global FQDN if their namespace Sidecar lists
//! it as an egress host. After writing a source cluster, the updater
//! appends `<namespace>/<fqdn>` entries for every dependency to the
//! conventional workload Sidecar of each caller namespace. Hosts already
//! present are never duplicated.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use flotilla_common::Result;

use crate::api::ClusterApi;
use crate::cache::SidecarEgress;

/// Merge the egress entries into an existing host list.
///
/// Produces the full new list: existing hosts in their original order,
/// missing `<ns>/<fqdn>` and `<ns>/<cname>` entries appended in sorted
/// order. Re-running with the same inputs returns the list unchanged.
pub fn merge_egress_hosts(
    existing: &[String],
    egress_map: &HashMap<String, SidecarEgress>,
) -> Vec<String> {
    let mut wanted: Vec<String> = Vec::new();
    for egress in egress_map.values() {
        wanted.push(format!("{}/{}", egress.namespace, egress.fqdn));
        for cname in &egress.cnames {
            wanted.push(format!("{}/{}", egress.namespace, cname));
        }
    }
    wanted.sort();
    wanted.dedup();

    let mut merged = existing.to_vec();
    for host in wanted {
        if !merged.contains(&host) {
            merged.push(host);
        }
    }
    merged
}

/// Append dependency egress hosts to the workload Sidecar of a namespace.
///
/// Skips silently when the Sidecar is absent or carries no egress
/// listener, and when the merge changes nothing.
pub async fn update_workload_sidecar(
    api: &Arc<dyn ClusterApi>,
    namespace: &str,
    sidecar_name: &str,
    egress_map: &HashMap<String, SidecarEgress>,
) -> Result<()> {
    if egress_map.is_empty() {
        return Ok(());
    }

    let Some(mut sidecar) = api.get_sidecar(namespace, sidecar_name).await? else {
        debug!(namespace = %namespace, name = %sidecar_name, "no workload sidecar, skipping egress update");
        return Ok(());
    };

    let Some(listener) = sidecar.spec.egress.first_mut() else {
        debug!(namespace = %namespace, name = %sidecar_name, "sidecar has no egress listener, skipping");
        return Ok(());
    };

    let merged = merge_egress_hosts(&listener.hosts, egress_map);
    if merged == listener.hosts {
        return Ok(());
    }

    let added = merged.len() - listener.hosts.len();
    listener.hosts = merged;

    api.update_sidecar(namespace, &sidecar).await?;
    info!(namespace = %namespace, name = %sidecar_name, added, "appended sidecar egress hosts");
    Ok(())
}
