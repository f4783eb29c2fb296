//! Flotilla operator: watcher plumbing around the reconciliation engine

pub mod secrets;
pub mod watchers;

/// Default ConfigMap name holding the VIP address store
pub const ADDRESS_STORE_CONFIG_MAP: &str = "flotilla-addresses";
