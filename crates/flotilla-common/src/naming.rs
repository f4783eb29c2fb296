//! Naming helpers for global FQDNs, local FQDNs, and mesh resource names
//!
//! All cross-cluster coordination keys off deterministic names derived here;
//! every caller must agree on these formats or caches will diverge.

use std::collections::BTreeMap;

use crate::{DEFAULT_ENV, LOCAL_DOMAIN_SUFFIX, PREVIEW_PREFIX, SEP};

/// Build the global FQDN for an identity in an environment.
///
/// Format: `<env>.<identity>.<suffix>`, lowercased. The env segment leads so
/// it can be recovered from a ServiceEntry host without extra state.
pub fn global_fqdn(env: &str, identity: &str, suffix: &str) -> String {
    format!("{env}{SEP}{identity}{SEP}{suffix}")
        .trim()
        .to_lowercase()
}

/// Build the BlueGreen preview variant of a global FQDN
pub fn preview_fqdn(fqdn: &str) -> String {
    format!("{PREVIEW_PREFIX}{SEP}{fqdn}")
}

/// Whether a host is a BlueGreen preview host
pub fn is_preview_host(host: &str) -> bool {
    host.starts_with(&format!("{PREVIEW_PREFIX}{SEP}"))
}

/// Build the cluster-local FQDN of a Kubernetes Service
pub fn local_fqdn(service: &str, namespace: &str) -> String {
    format!("{service}{SEP}{namespace}{LOCAL_DOMAIN_SUFFIX}")
}

/// ServiceEntry object name for a host
pub fn se_name(host: &str) -> String {
    format!("{host}-se")
}

/// DestinationRule object name for the default (un-prefixed) host
pub fn default_dr_name(host: &str) -> String {
    format!("{host}-default-dr")
}

/// DestinationRule object name for a GTP-derived prefixed host
pub fn dr_name(host: &str) -> String {
    format!("{host}-dr")
}

/// Prepend a GTP dnsPrefix to a host
pub fn prefixed_host(prefix: &str, host: &str) -> String {
    format!("{prefix}{SEP}{host}")
}

/// Recover the env segment from a global FQDN (everything before the first dot)
pub fn env_from_host(host: &str) -> &str {
    host.split(SEP).next().unwrap_or(host)
}

/// SPIFFE SubjectAltName for an identity
pub fn san(san_prefix: &str, identity: &str) -> String {
    format!("spiffe://{san_prefix}/{identity}")
}

/// Read a key from labels first, falling back to annotations
pub fn label_or_annotation<'a>(
    labels: &'a BTreeMap<String, String>,
    annotations: &'a BTreeMap<String, String>,
    key: &str,
) -> Option<&'a str> {
    labels
        .get(key)
        .or_else(|| annotations.get(key))
        .map(String::as_str)
}

/// Environment of a workload: env label, env annotation, then "default"
pub fn workload_env(
    labels: &BTreeMap<String, String>,
    annotations: &BTreeMap<String, String>,
    env_key: &str,
) -> String {
    label_or_annotation(labels, annotations, env_key)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_ENV)
        .to_string()
}
