//! Per-cluster watcher tasks
//!
//! One task per resource kind per member cluster. Each task keeps its
//! cluster's caches warm and dispatches reconciliation for the affected
//! (identity, env) keys. Within one cluster and kind, events are handled
//! in arrival order; across clusters nothing is ordered and the
//! reconciliation is idempotent.

use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Service};
use kube::api::Api;
use kube::runtime::watcher;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use flotilla_common::crd::{Dependency, GlobalTrafficPolicy, Rollout};
use flotilla_common::naming::{label_or_annotation, workload_env};
use flotilla_common::NODE_REGION_LABEL;
use flotilla_mesh::ingestion::{self, EventKind, EventOp, WorkloadEvent};
use flotilla_mesh::registry::{RemoteController, RemoteRegistry};
use flotilla_mesh::resolver;
use flotilla_mesh::workload::Workload;

/// Spawn all watcher tasks for one member cluster. Tasks end when the
/// token is cancelled (cluster deregistered or shutdown).
pub fn spawn_cluster_watchers(
    registry: Arc<RemoteRegistry>,
    rc: Arc<RemoteController>,
    client: Client,
    token: CancellationToken,
) {
    let tasks = [
        tokio::spawn(watch_deployments(
            registry.clone(),
            rc.clone(),
            client.clone(),
            token.clone(),
        )),
        tokio::spawn(watch_rollouts(
            registry.clone(),
            rc.clone(),
            client.clone(),
            token.clone(),
        )),
        tokio::spawn(watch_services(
            registry.clone(),
            rc.clone(),
            client.clone(),
            token.clone(),
        )),
        tokio::spawn(watch_nodes(rc.clone(), client.clone(), token.clone())),
        tokio::spawn(watch_gtps(
            registry.clone(),
            rc.clone(),
            client.clone(),
            token.clone(),
        )),
        tokio::spawn(watch_dependencies(registry, rc, client, token)),
    ];
    // tasks are detached; the token is their only lifecycle handle
    drop(tasks);
}

fn watcher_config(registry: &RemoteRegistry) -> watcher::Config {
    let resync = registry.params().resync_period;
    if resync.is_zero() {
        watcher::Config::default()
    } else {
        watcher::Config::default().timeout(resync.as_secs().min(3600) as u32)
    }
}

async fn watch_deployments(
    registry: Arc<RemoteRegistry>,
    rc: Arc<RemoteController>,
    client: Client,
    token: CancellationToken,
) {
    let api: Api<Deployment> = Api::all(client);
    let config = watcher_config(&registry);
    let mut stream = watcher(api, config).boxed();

    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            event = stream.try_next() => event,
        };
        match event {
            Ok(Some(watcher::Event::Apply(d)) | Some(watcher::Event::InitApply(d))) => {
                handle_deployment(&registry, &rc, d, EventOp::Update).await;
            }
            Ok(Some(watcher::Event::Delete(d))) => {
                handle_deployment(&registry, &rc, d, EventOp::Delete).await;
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) => {
                warn!(cluster = %rc.cluster_id, error = %e, "deployment watch error, stream will retry");
            }
        }
    }
    info!(cluster = %rc.cluster_id, "deployment watcher stopped");
}

async fn handle_deployment(
    registry: &RemoteRegistry,
    rc: &RemoteController,
    deployment: Deployment,
    op: EventOp,
) {
    let params = registry.params();
    let object_annotations = deployment.metadata.annotations.clone().unwrap_or_default();
    let workload = Workload::Deployment(Box::new(deployment.clone()));
    let Some(identity) = workload.identity(params) else {
        return;
    };
    let env = workload.env(params);

    if op == EventOp::Delete {
        rc.delete_deployment(&identity, &env);
        let event = WorkloadEvent {
            kind: EventKind::Deployment,
            op,
            identity,
            env,
            cluster: rc.cluster_id.clone(),
        };
        resolver::reconcile(&event, registry).await;
        return;
    }

    let namespace_annotations = match rc.api.namespace_annotations(&workload.namespace()).await {
        Ok(a) => a,
        Err(e) => {
            warn!(cluster = %rc.cluster_id, error = %e, "namespace annotation lookup failed");
            Default::default()
        }
    };

    match ingestion::normalize(
        EventKind::Deployment,
        op,
        &workload,
        &object_annotations,
        &namespace_annotations,
        &rc.cluster_id,
        params,
    ) {
        Some(event) => {
            rc.put_deployment(&identity, &env, deployment);
            resolver::reconcile(&event, registry).await;
        }
        None => {
            debug!(cluster = %rc.cluster_id, identity = %identity, "deployment filtered out");
            rc.delete_deployment(&identity, &env);
        }
    }
}

async fn watch_rollouts(
    registry: Arc<RemoteRegistry>,
    rc: Arc<RemoteController>,
    client: Client,
    token: CancellationToken,
) {
    let api: Api<Rollout> = Api::all(client);
    let config = watcher_config(&registry);
    let mut stream = watcher(api, config).boxed();

    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            event = stream.try_next() => event,
        };
        match event {
            Ok(Some(watcher::Event::Apply(r)) | Some(watcher::Event::InitApply(r))) => {
                handle_rollout(&registry, &rc, r, EventOp::Update).await;
            }
            Ok(Some(watcher::Event::Delete(r))) => {
                handle_rollout(&registry, &rc, r, EventOp::Delete).await;
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) => {
                warn!(cluster = %rc.cluster_id, error = %e, "rollout watch error, stream will retry");
            }
        }
    }
    info!(cluster = %rc.cluster_id, "rollout watcher stopped");
}

async fn handle_rollout(
    registry: &RemoteRegistry,
    rc: &RemoteController,
    rollout: Rollout,
    op: EventOp,
) {
    let params = registry.params();
    let object_annotations = rollout.metadata.annotations.clone().unwrap_or_default();
    let workload = Workload::Rollout(Box::new(rollout.clone()));
    let Some(identity) = workload.identity(params) else {
        return;
    };
    let env = workload.env(params);

    if op == EventOp::Delete {
        rc.delete_rollout(&identity, &env);
        let event = WorkloadEvent {
            kind: EventKind::Rollout,
            op,
            identity,
            env,
            cluster: rc.cluster_id.clone(),
        };
        resolver::reconcile(&event, registry).await;
        return;
    }

    let namespace_annotations = match rc.api.namespace_annotations(&workload.namespace()).await {
        Ok(a) => a,
        Err(e) => {
            warn!(cluster = %rc.cluster_id, error = %e, "namespace annotation lookup failed");
            Default::default()
        }
    };

    match ingestion::normalize(
        EventKind::Rollout,
        op,
        &workload,
        &object_annotations,
        &namespace_annotations,
        &rc.cluster_id,
        params,
    ) {
        Some(event) => {
            rc.put_rollout(&identity, &env, rollout);
            resolver::reconcile(&event, registry).await;
        }
        None => {
            debug!(cluster = %rc.cluster_id, identity = %identity, "rollout filtered out");
            rc.delete_rollout(&identity, &env);
        }
    }
}

async fn watch_services(
    registry: Arc<RemoteRegistry>,
    rc: Arc<RemoteController>,
    client: Client,
    token: CancellationToken,
) {
    let api: Api<Service> = Api::all(client);
    let config = watcher_config(&registry);
    let mut stream = watcher(api, config).boxed();

    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            event = stream.try_next() => event,
        };
        match event {
            Ok(Some(watcher::Event::Apply(s)) | Some(watcher::Event::InitApply(s))) => {
                rc.put_service(s.clone());
                reconcile_namespace_workloads(&registry, &rc, &s).await;
            }
            Ok(Some(watcher::Event::Delete(s))) => {
                let namespace = s.metadata.namespace.clone().unwrap_or_default();
                let name = s.metadata.name.clone().unwrap_or_default();
                rc.delete_service(&namespace, &name);
                reconcile_namespace_workloads(&registry, &rc, &s).await;
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) => {
                warn!(cluster = %rc.cluster_id, error = %e, "service watch error, stream will retry");
            }
        }
    }
    info!(cluster = %rc.cluster_id, "service watcher stopped");
}

/// A Service change re-reconciles every cached workload of its namespace
async fn reconcile_namespace_workloads(
    registry: &RemoteRegistry,
    rc: &RemoteController,
    service: &Service,
) {
    let namespace = service.metadata.namespace.clone().unwrap_or_default();
    for (identity, env) in rc.workload_keys_in_namespace(&namespace) {
        let event = WorkloadEvent {
            kind: EventKind::Deployment,
            op: EventOp::Update,
            identity,
            env,
            cluster: rc.cluster_id.clone(),
        };
        resolver::reconcile(&event, registry).await;
    }
}

async fn watch_nodes(rc: Arc<RemoteController>, client: Client, token: CancellationToken) {
    let api: Api<Node> = Api::all(client);
    let mut stream = watcher(api, watcher::Config::default()).boxed();

    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            event = stream.try_next() => event,
        };
        match event {
            Ok(Some(watcher::Event::Apply(node)) | Some(watcher::Event::InitApply(node))) => {
                if rc.region().is_none() {
                    let region = node
                        .metadata
                        .labels
                        .as_ref()
                        .and_then(|l| l.get(NODE_REGION_LABEL))
                        .cloned();
                    if let Some(region) = region {
                        info!(cluster = %rc.cluster_id, region = %region, "cluster locality discovered");
                        rc.set_region(region);
                    }
                }
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) => {
                warn!(cluster = %rc.cluster_id, error = %e, "node watch error, stream will retry");
            }
        }
    }
}

async fn watch_gtps(
    registry: Arc<RemoteRegistry>,
    rc: Arc<RemoteController>,
    client: Client,
    token: CancellationToken,
) {
    let api: Api<GlobalTrafficPolicy> = Api::all(client);
    let config = watcher_config(&registry);
    let mut stream = watcher(api, config).boxed();

    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            event = stream.try_next() => event,
        };
        match event {
            Ok(Some(watcher::Event::Apply(gtp)) | Some(watcher::Event::InitApply(gtp))) => {
                handle_gtp(&registry, &rc, gtp, EventOp::Update).await;
            }
            Ok(Some(watcher::Event::Delete(gtp))) => {
                handle_gtp(&registry, &rc, gtp, EventOp::Delete).await;
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) => {
                warn!(cluster = %rc.cluster_id, error = %e, "gtp watch error, stream will retry");
            }
        }
    }
    info!(cluster = %rc.cluster_id, "gtp watcher stopped");
}

/// GTPs are keyed by the identity/env labels on the GTP object itself
async fn handle_gtp(
    registry: &RemoteRegistry,
    rc: &RemoteController,
    gtp: GlobalTrafficPolicy,
    op: EventOp,
) {
    let params = registry.params();
    let labels = gtp.metadata.labels.clone().unwrap_or_default();
    let annotations = gtp.metadata.annotations.clone().unwrap_or_default();

    let Some(identity) = label_or_annotation(
        &labels,
        &annotations,
        &params.label_set.workload_identity_key,
    )
    .map(str::to_string) else {
        debug!(
            gtp = %gtp.metadata.name.as_deref().unwrap_or_default(),
            "GTP carries no identity label, ignoring"
        );
        return;
    };
    let env = workload_env(&labels, &annotations, &params.label_set.env_key);

    match op {
        EventOp::Delete => {
            let namespace = gtp.metadata.namespace.clone().unwrap_or_default();
            let name = gtp.metadata.name.clone().unwrap_or_default();
            rc.delete_gtp(&identity, &env, &namespace, &name);
        }
        _ => rc.put_gtp(&identity, &env, gtp),
    }

    // GTP churn alone re-publishes; endpoints are untouched
    let event = WorkloadEvent {
        kind: EventKind::Deployment,
        op: EventOp::Update,
        identity,
        env,
        cluster: rc.cluster_id.clone(),
    };
    resolver::reconcile(&event, registry).await;
}

async fn watch_dependencies(
    registry: Arc<RemoteRegistry>,
    rc: Arc<RemoteController>,
    client: Client,
    token: CancellationToken,
) {
    let api: Api<Dependency> = Api::all(client);
    let config = watcher_config(&registry);
    let mut stream = watcher(api, config).boxed();

    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            event = stream.try_next() => event,
        };
        match event {
            Ok(Some(watcher::Event::Apply(dep)) | Some(watcher::Event::InitApply(dep))) => {
                for destination in &dep.spec.destinations {
                    registry
                        .cache
                        .put_identity_dependency(destination, &dep.spec.source);
                }
            }
            Ok(Some(watcher::Event::Delete(dep))) => {
                for destination in &dep.spec.destinations {
                    registry
                        .cache
                        .delete_identity_dependency(destination, &dep.spec.source);
                }
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) => {
                error!(cluster = %rc.cluster_id, error = %e, "dependency watch error, stream will retry");
            }
        }
    }
    info!(cluster = %rc.cluster_id, "dependency watcher stopped");
}
