//! Common types for Flotilla: CRDs, Istio resources, errors, and utilities

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod istio;
pub mod metrics;
pub mod naming;
pub mod retry;
pub mod telemetry;

pub use config::{LabelSet, MeshParams};
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Port number written on every generated ServiceEntry port
pub const DEFAULT_SERVICE_ENTRY_PORT: u32 = 80;

/// mTLS port of the mesh ingress gateway (remote endpoints point here)
pub const DEFAULT_MTLS_PORT: u32 = 15443;

/// Separator used in hostnames and VIP addresses
pub const SEP: char = '.';

/// Suffix rewriting a `<service>.<namespace>` pair into a cluster-local FQDN
pub const LOCAL_DOMAIN_SUFFIX: &str = ".svc.cluster.local";

/// Host prefix for the BlueGreen preview variant of a global FQDN
pub const PREVIEW_PREFIX: &str = "preview";

/// Namespace holding the mesh ingress gateway Service
pub const ISTIO_SYSTEM_NS: &str = "istio-system";

/// Fallback environment when a workload carries no env label or annotation
pub const DEFAULT_ENV: &str = "default";

/// Default protocol for generated ServiceEntry ports
pub const HTTP_PROTOCOL: &str = "http";

/// Annotation that excludes a workload or namespace from reconciliation
pub const IGNORE_ANNOTATION: &str = "flotilla.io/ignore";

/// Label on kubeconfig Secrets that registers a member cluster
pub const CLUSTER_SECRET_LABEL: &str = "flotilla.io/sync";

/// Node label the cluster locality region is read from
pub const NODE_REGION_LABEL: &str = "topology.kubernetes.io/region";

/// The `dnsPrefix` value that refers to the default (un-prefixed) host
pub const DEFAULT_DNS_PREFIX: &str = "default";
