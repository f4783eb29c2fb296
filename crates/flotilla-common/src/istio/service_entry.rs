//! Istio ServiceEntry subset
//!
//! The host of each ServiceEntry is a Flotilla global FQDN; its endpoints
//! are either remote mesh-ingress gateways or cluster-local Service FQDNs.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ServiceEntry spec (`networking.istio.io/v1alpha3`)
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "networking.istio.io",
    version = "v1alpha3",
    kind = "ServiceEntry",
    plural = "serviceentries",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEntrySpec {
    /// Hosts this entry resolves; exactly one global FQDN per entry
    pub hosts: Vec<String>,

    /// Virtual IPs assigned to the hosts (one VIP per entry)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,

    /// Declared ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ServiceEntryPort>,

    /// MESH_INTERNAL or MESH_EXTERNAL
    pub location: String,

    /// DNS, STATIC, or NONE
    pub resolution: String,

    /// SPIFFE SubjectAltNames, present only when SAN generation is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_alt_names: Option<Vec<String>>,

    /// One endpoint per hosting cluster (or per weighted Service locally)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<WorkloadEntry>,
}

/// A port declared on a ServiceEntry
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEntryPort {
    /// Port number
    pub number: u32,
    /// Port name
    pub name: String,
    /// Protocol (HTTP, GRPC, TCP, ...)
    pub protocol: String,
}

/// An endpoint of a ServiceEntry (inlined WorkloadEntry)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadEntry {
    /// Endpoint address: ingress LB address remotely, Service FQDN locally.
    /// May be empty when the hosting cluster's ingress is not provisioned yet.
    #[serde(default)]
    pub address: String,

    /// Port name → target port
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ports: BTreeMap<String, u32>,

    /// Endpoint locality (region of the hosting cluster)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,

    /// Relative traffic weight (canary expansion only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

impl WorkloadEntry {
    /// Endpoint pointing at a cluster's mesh-ingress gateway
    pub fn remote(address: &str, locality: Option<&str>, protocol: &str, port: u32) -> Self {
        Self {
            address: address.to_string(),
            ports: BTreeMap::from([(protocol.to_string(), port)]),
            locality: locality.map(str::to_string),
            weight: None,
        }
    }
}

impl ServiceEntrySpec {
    /// Initial draft for a global FQDN: VIP assigned, no endpoints yet
    pub fn draft(
        host: &str,
        address: &str,
        protocol: &str,
        port: u32,
        subject_alt_names: Option<Vec<String>>,
    ) -> Self {
        Self {
            hosts: vec![host.to_string()],
            addresses: vec![address.to_string()],
            ports: vec![ServiceEntryPort {
                number: port,
                name: protocol.to_string(),
                protocol: protocol.to_string(),
            }],
            location: super::MESH_INTERNAL.to_string(),
            resolution: super::RESOLUTION_DNS.to_string(),
            subject_alt_names,
            endpoints: Vec::new(),
        }
    }

    /// The single host of this entry
    pub fn host(&self) -> &str {
        self.hosts.first().map(String::as_str).unwrap_or_default()
    }
}
