//! Per-cluster read/write seam for mesh objects
//!
//! Everything the engine writes (ServiceEntry, DestinationRule, Sidecar) and
//! the ConfigMap state it coordinates through goes via `ClusterApi`. The
//! kube-backed implementation is the only one in production; tests use an
//! in-memory fake.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;

use flotilla_common::istio::{DestinationRule, ServiceEntry, Sidecar};
use flotilla_common::{Error, Result};

/// Read/write surface of one member cluster
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch a ServiceEntry, None on NotFound
    async fn get_service_entry(&self, namespace: &str, name: &str)
        -> Result<Option<ServiceEntry>>;

    /// Create or replace a ServiceEntry. A set `resourceVersion` means
    /// replace (riding optimistic concurrency), unset means create.
    async fn upsert_service_entry(&self, namespace: &str, se: &ServiceEntry) -> Result<()>;

    /// Delete a ServiceEntry; NotFound is not an error
    async fn delete_service_entry(&self, namespace: &str, name: &str) -> Result<()>;

    /// Fetch a DestinationRule, None on NotFound
    async fn get_destination_rule(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DestinationRule>>;

    /// Create or replace a DestinationRule (same resourceVersion contract)
    async fn upsert_destination_rule(&self, namespace: &str, dr: &DestinationRule) -> Result<()>;

    /// Delete a DestinationRule; NotFound is not an error
    async fn delete_destination_rule(&self, namespace: &str, name: &str) -> Result<()>;

    /// Fetch a Sidecar, None on NotFound
    async fn get_sidecar(&self, namespace: &str, name: &str) -> Result<Option<Sidecar>>;

    /// Replace an existing Sidecar
    async fn update_sidecar(&self, namespace: &str, sidecar: &Sidecar) -> Result<()>;

    /// Fetch a ConfigMap, None on NotFound
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    /// Create or replace a ConfigMap (same resourceVersion contract);
    /// a conflict surfaces as a retryable error
    async fn put_config_map(&self, namespace: &str, cm: &ConfigMap) -> Result<()>;

    /// Annotations of a namespace (empty map when absent)
    async fn namespace_annotations(&self, namespace: &str) -> Result<BTreeMap<String, String>>;
}

/// kube-rs backed implementation of `ClusterApi`
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn has_resource_version(meta: &kube::api::ObjectMeta) -> bool {
        meta.resource_version.as_deref().is_some_and(|rv| !rv.is_empty())
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_service_entry(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceEntry>> {
        let api: Api<ServiceEntry> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn upsert_service_entry(&self, namespace: &str, se: &ServiceEntry) -> Result<()> {
        let api: Api<ServiceEntry> = Api::namespaced(self.client.clone(), namespace);
        let pp = PostParams::default();
        let name = se.metadata.name.as_deref().unwrap_or_default();
        if Self::has_resource_version(&se.metadata) {
            api.replace(name, &pp, se).await?;
        } else {
            api.create(&pp, se).await?;
        }
        Ok(())
    }

    async fn delete_service_entry(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<ServiceEntry> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_destination_rule(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DestinationRule>> {
        let api: Api<DestinationRule> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn upsert_destination_rule(&self, namespace: &str, dr: &DestinationRule) -> Result<()> {
        let api: Api<DestinationRule> = Api::namespaced(self.client.clone(), namespace);
        let pp = PostParams::default();
        let name = dr.metadata.name.as_deref().unwrap_or_default();
        if Self::has_resource_version(&dr.metadata) {
            api.replace(name, &pp, dr).await?;
        } else {
            api.create(&pp, dr).await?;
        }
        Ok(())
    }

    async fn delete_destination_rule(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<DestinationRule> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_sidecar(&self, namespace: &str, name: &str) -> Result<Option<Sidecar>> {
        let api: Api<Sidecar> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn update_sidecar(&self, namespace: &str, sidecar: &Sidecar) -> Result<()> {
        let api: Api<Sidecar> = Api::namespaced(self.client.clone(), namespace);
        let name = sidecar
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::internal_with_context("sidecar", "sidecar missing name"))?;
        api.replace(name, &PostParams::default(), sidecar).await?;
        Ok(())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn put_config_map(&self, namespace: &str, cm: &ConfigMap) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let pp = PostParams::default();
        let name = cm.metadata.name.as_deref().unwrap_or_default();
        if Self::has_resource_version(&cm.metadata) {
            api.replace(name, &pp, cm).await?;
        } else {
            api.create(&pp, cm).await?;
        }
        Ok(())
    }

    async fn namespace_annotations(&self, namespace: &str) -> Result<BTreeMap<String, String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api
            .get_opt(namespace)
            .await?
            .and_then(|ns| ns.metadata.annotations)
            .unwrap_or_default())
    }
}
