//! Istio networking resource types
//!
//! Typed subsets of `networking.istio.io/v1alpha3` covering the fields
//! Flotilla reads and writes. Declared as CRDs so `Api<ServiceEntry>` etc.
//! round-trip `resourceVersion` for optimistic-concurrency updates.

mod destination_rule;
mod service_entry;
mod sidecar;

pub use destination_rule::{
    ClientTlsSettings, ConnectionPoolSettings, DestinationRule, DestinationRuleSpec,
    HttpConnectionPool, LoadBalancerSettings, LocalityLbDistribute, LocalityLbSetting,
    OutlierDetection, TrafficPolicySettings,
};
pub use service_entry::{ServiceEntry, ServiceEntryPort, ServiceEntrySpec, WorkloadEntry};
pub use sidecar::{EgressListener, Sidecar, SidecarSpec, SidecarWorkloadSelector};

/// `location` value for hosts that are part of the mesh
pub const MESH_INTERNAL: &str = "MESH_INTERNAL";

/// `resolution` value for hosts resolved through DNS
pub const RESOLUTION_DNS: &str = "DNS";

/// TLS mode for mesh-internal mutual TLS
pub const ISTIO_MUTUAL: &str = "ISTIO_MUTUAL";
