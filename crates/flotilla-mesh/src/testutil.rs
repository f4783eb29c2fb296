//! In-memory `ClusterApi` fake for engine tests
//!
//! Models the two Kubernetes behaviors the engine depends on: NotFound as
//! `None`, and optimistic concurrency on writes (a stale or missing
//! resourceVersion conflicts when the object already exists).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{ConfigMap, PodTemplateSpec, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta as K8sObjectMeta};

use flotilla_common::crd::{Rollout, RolloutPodMeta, RolloutPodTemplate, RolloutSpec};
use flotilla_common::istio::{DestinationRule, ServiceEntry, Sidecar};
use flotilla_common::{Error, Result};

use crate::api::ClusterApi;

fn string_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// A Deployment whose pod template carries `app`, identity, and env labels
pub fn make_deployment(app: &str, namespace: &str, identity: &str, env: &str) -> Deployment {
    Deployment {
        metadata: kube::api::ObjectMeta {
            name: Some(app.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            selector: LabelSelector {
                match_labels: Some(string_map(&[("app", app)])),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(K8sObjectMeta {
                    labels: Some(string_map(&[
                        ("app", app),
                        ("identity", identity),
                        ("env", env),
                    ])),
                    annotations: Some(string_map(&[("sidecar.istio.io/inject", "true")])),
                    ..Default::default()
                }),
                spec: None,
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A Rollout whose pod template carries `app`, identity, and env labels
pub fn make_rollout(app: &str, namespace: &str, identity: &str, env: &str) -> Rollout {
    let mut rollout = Rollout::new(
        app,
        RolloutSpec {
            template: Some(RolloutPodTemplate {
                metadata: RolloutPodMeta {
                    labels: string_map(&[("app", app), ("identity", identity), ("env", env)]),
                    annotations: string_map(&[("sidecar.istio.io/inject", "true")]),
                },
            }),
            ..Default::default()
        },
    );
    rollout.metadata.namespace = Some(namespace.to_string());
    rollout
}

/// A Service with the given selector and named ports
pub fn make_service(
    name: &str,
    namespace: &str,
    selector: &[(&str, &str)],
    ports: &[(&str, i32)],
) -> Service {
    Service {
        metadata: kube::api::ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: if selector.is_empty() {
                None
            } else {
                Some(string_map(selector))
            },
            ports: if ports.is_empty() {
                None
            } else {
                Some(
                    ports
                        .iter()
                        .map(|(name, port)| ServicePort {
                            name: Some(name.to_string()),
                            port: *port,
                            ..Default::default()
                        })
                        .collect(),
                )
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn conflict(kind: &str, name: &str) -> Error {
    // modelled as a retryable internal error; the engine only cares about
    // is_retryable(), not the exact kube status
    Error::internal_with_context("fake-api", format!("conflict writing {kind} {name}"))
}

type Key = (String, String);

/// In-memory cluster state
#[derive(Default)]
pub struct InMemoryClusterApi {
    config_maps: Mutex<BTreeMap<Key, ConfigMap>>,
    service_entries: Mutex<BTreeMap<Key, ServiceEntry>>,
    destination_rules: Mutex<BTreeMap<Key, DestinationRule>>,
    sidecars: Mutex<BTreeMap<Key, Sidecar>>,
    namespaces: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
    next_rv: AtomicU64,
    forced_cm_failures: AtomicU32,
}

impl InMemoryClusterApi {
    /// Create an empty fake cluster
    pub fn new() -> Self {
        Self {
            next_rv: AtomicU64::new(1),
            ..Default::default()
        }
    }

    fn bump_rv(&self) -> String {
        self.next_rv.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// Make the next `n` ConfigMap writes fail with a retryable error
    pub fn fail_next_config_map_puts(&self, n: u32) {
        self.forced_cm_failures.store(n, Ordering::SeqCst);
    }

    /// Seed a Sidecar object
    pub fn put_sidecar_object(&self, namespace: &str, sidecar: Sidecar) {
        let name = sidecar.metadata.name.clone().unwrap_or_default();
        self.sidecars
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name), sidecar);
    }

    /// Seed namespace annotations
    pub fn put_namespace(&self, namespace: &str, annotations: BTreeMap<String, String>) {
        self.namespaces
            .lock()
            .unwrap()
            .insert(namespace.to_string(), annotations);
    }

    /// Names of all ServiceEntries currently stored in a namespace
    pub fn service_entry_names(&self, namespace: &str) -> Vec<String> {
        self.service_entries
            .lock()
            .unwrap()
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Names of all DestinationRules currently stored in a namespace
    pub fn destination_rule_names(&self, namespace: &str) -> Vec<String> {
        self.destination_rules
            .lock()
            .unwrap()
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }
}

#[async_trait]
impl ClusterApi for InMemoryClusterApi {
    async fn get_service_entry(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceEntry>> {
        Ok(self
            .service_entries
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn upsert_service_entry(&self, namespace: &str, se: &ServiceEntry) -> Result<()> {
        let name = se.metadata.name.clone().unwrap_or_default();
        let key = (namespace.to_string(), name.clone());
        let mut map = self.service_entries.lock().unwrap();

        let existing_rv = map.get(&key).and_then(|o| o.metadata.resource_version.clone());
        if existing_rv.is_some() && se.metadata.resource_version != existing_rv {
            return Err(conflict("ServiceEntry", &name));
        }

        let mut stored = se.clone();
        stored.metadata.resource_version = Some(self.bump_rv());
        map.insert(key, stored);
        Ok(())
    }

    async fn delete_service_entry(&self, namespace: &str, name: &str) -> Result<()> {
        self.service_entries
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn get_destination_rule(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DestinationRule>> {
        Ok(self
            .destination_rules
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn upsert_destination_rule(&self, namespace: &str, dr: &DestinationRule) -> Result<()> {
        let name = dr.metadata.name.clone().unwrap_or_default();
        let key = (namespace.to_string(), name.clone());
        let mut map = self.destination_rules.lock().unwrap();

        let existing_rv = map.get(&key).and_then(|o| o.metadata.resource_version.clone());
        if existing_rv.is_some() && dr.metadata.resource_version != existing_rv {
            return Err(conflict("DestinationRule", &name));
        }

        let mut stored = dr.clone();
        stored.metadata.resource_version = Some(self.bump_rv());
        map.insert(key, stored);
        Ok(())
    }

    async fn delete_destination_rule(&self, namespace: &str, name: &str) -> Result<()> {
        self.destination_rules
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn get_sidecar(&self, namespace: &str, name: &str) -> Result<Option<Sidecar>> {
        Ok(self
            .sidecars
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn update_sidecar(&self, namespace: &str, sidecar: &Sidecar) -> Result<()> {
        let name = sidecar.metadata.name.clone().unwrap_or_default();
        let mut stored = sidecar.clone();
        stored.metadata.resource_version = Some(self.bump_rv());
        self.sidecars
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name), stored);
        Ok(())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        Ok(self
            .config_maps
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn put_config_map(&self, namespace: &str, cm: &ConfigMap) -> Result<()> {
        let name = cm.metadata.name.clone().unwrap_or_default();

        if self.forced_cm_failures.load(Ordering::SeqCst) > 0 {
            self.forced_cm_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(conflict("ConfigMap", &name));
        }

        let key = (namespace.to_string(), name.clone());
        let mut map = self.config_maps.lock().unwrap();

        let existing_rv = map.get(&key).and_then(|o| o.metadata.resource_version.clone());
        if existing_rv.is_some() && cm.metadata.resource_version != existing_rv {
            return Err(conflict("ConfigMap", &name));
        }

        let mut stored = cm.clone();
        stored.metadata.resource_version = Some(self.bump_rv());
        map.insert(key, stored);
        Ok(())
    }

    async fn namespace_annotations(&self, namespace: &str) -> Result<BTreeMap<String, String>> {
        Ok(self
            .namespaces
            .lock()
            .unwrap()
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }
}
