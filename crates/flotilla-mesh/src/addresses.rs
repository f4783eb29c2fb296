//! ConfigMap-backed VIP allocation for ServiceEntry hosts
//!
//! One VIP per SE name, unique across the fleet, persisted as YAML under a
//! single ConfigMap key. Allocation is a fetch-modify-write loop riding the
//! ConfigMap's resourceVersion: whoever writes first wins, losers re-read
//! and either find the winner's VIP or pick the next free one.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use flotilla_common::metrics::record_address_retry;
use flotilla_common::retry::allocation_backoff;
use flotilla_common::{Error, Result, SEP};

use crate::api::ClusterApi;

/// ConfigMap key the serialized store lives under
pub const ADDRESS_STORE_KEY: &str = "serviceEntryAddressStore";

/// Allocation attempts before giving up for this reconciliation round
const MAX_ALLOCATION_ATTEMPTS: u32 = 3;

/// Persisted allocation state
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AddressStoreState {
    /// Every VIP ever handed out, in allocation order
    #[serde(default)]
    pub addresses: Vec<String>,
    /// SE name → its VIP
    #[serde(default)]
    pub entry_addresses: BTreeMap<String, String>,
}

/// Shared VIP allocator
pub struct AddressStore {
    api: Arc<dyn ClusterApi>,
    namespace: String,
    name: String,
    ip_prefix: String,
    state: RwLock<AddressStoreState>,
}

impl AddressStore {
    /// Create a store against the given ConfigMap coordinates
    pub fn new(
        api: Arc<dyn ClusterApi>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        ip_prefix: impl Into<String>,
    ) -> Self {
        Self {
            api,
            namespace: namespace.into(),
            name: name.into(),
            ip_prefix: ip_prefix.into(),
            state: RwLock::new(AddressStoreState::default()),
        }
    }

    /// Create the backing ConfigMap if absent and load current state.
    /// Called once at startup; VIPs survive process restarts through it.
    pub async fn ensure(&self) -> Result<()> {
        if self.api.get_config_map(&self.namespace, &self.name).await?.is_none() {
            let empty = AddressStoreState::default();
            let cm = render_config_map(&self.namespace, &self.name, None, &empty)?;
            self.api.put_config_map(&self.namespace, &cm).await?;
            info!(name = %self.name, namespace = %self.namespace, "created address-store configmap");
        }
        self.reload().await
    }

    /// Replace the in-memory cache with the persisted state
    pub async fn reload(&self) -> Result<()> {
        let cm = self
            .api
            .get_config_map(&self.namespace, &self.name)
            .await?
            .ok_or_else(|| {
                Error::internal_with_context("addresses", "address-store configmap missing")
            })?;
        let parsed = parse_state(&cm)?;
        *self.state.write().expect("address store lock poisoned") = parsed;
        debug!("reloaded address store from configmap");
        Ok(())
    }

    /// VIP already cached for an SE name, if any
    pub fn cached(&self, se_name: &str) -> Option<String> {
        self.state
            .read()
            .expect("address store lock poisoned")
            .entry_addresses
            .get(se_name)
            .cloned()
    }

    /// The VIP for an SE name, allocating one if needed.
    ///
    /// Up to three attempts; before attempt `n` sleeps a uniformly random
    /// `[0, 100^n)` ms. A fresh allocation triggers a state reload so the
    /// cache reflects whatever else landed in the ConfigMap meanwhile.
    pub async fn resolve(&self, se_name: &str) -> Result<String> {
        let mut last_err = None;

        for attempt in 0..MAX_ALLOCATION_ATTEMPTS {
            let backoff = allocation_backoff(attempt);
            if !backoff.is_zero() {
                record_address_retry();
                tokio::time::sleep(backoff).await;
            }

            if let Some(vip) = self.cached(se_name) {
                return Ok(vip);
            }

            match self.allocate(se_name).await {
                Ok(vip) => {
                    // someone (possibly us) just extended the store
                    if let Err(e) = self.reload().await {
                        warn!(error = %e, "address store reload after allocation failed");
                    }
                    return Ok(vip);
                }
                Err(e) if e.is_retryable() => {
                    warn!(se_name = %se_name, attempt, error = %e, "address allocation attempt failed");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            Error::allocation(se_name, "allocation retries exhausted")
        }))
    }

    /// One fetch-modify-write attempt against the ConfigMap.
    ///
    /// Never mutates the in-memory cache; only a successful write followed
    /// by `reload` does.
    async fn allocate(&self, se_name: &str) -> Result<String> {
        let cm = self
            .api
            .get_config_map(&self.namespace, &self.name)
            .await?
            .ok_or_else(|| Error::allocation(se_name, "address-store configmap missing"))?;

        let mut persisted = parse_state(&cm)?;

        // someone raced us to this name; their allocation wins
        if let Some(existing) = persisted.entry_addresses.get(se_name) {
            return Ok(existing.clone());
        }

        let vip = next_address(&persisted, &self.ip_prefix);
        persisted.addresses.push(vip.clone());
        persisted.entry_addresses.insert(se_name.to_string(), vip.clone());

        validate_state(&persisted)?;

        let updated = render_config_map(
            &self.namespace,
            &self.name,
            cm.metadata.resource_version.clone(),
            &persisted,
        )?;
        self.api
            .put_config_map(&self.namespace, &updated)
            .await
            .map_err(|e| Error::allocation(se_name, format!("configmap write failed: {e}")))?;

        Ok(vip)
    }
}

/// Next free VIP given the persisted state.
///
/// Candidate is `<prefix>.<(n / 255) + 10>.<(n % 255) + 1>` where n is the
/// number of VIPs handed out so far; on collision the last octet scans
/// upward, rolling into the next block at 255.
fn next_address(state: &AddressStoreState, prefix: &str) -> String {
    let n = state.addresses.len();
    let mut second_index = n / 255 + 10;
    let mut first_index = n % 255 + 1;
    let mut address = format!("{prefix}{SEP}{second_index}{SEP}{first_index}");

    while state.addresses.iter().any(|a| a == &address) {
        if first_index < 255 {
            first_index += 1;
        } else {
            second_index += 1;
            first_index = 0;
        }
        address = format!("{prefix}{SEP}{second_index}{SEP}{first_index}");
    }

    address
}

/// Reject stores whose list and map disagree or which repeat a VIP
pub fn validate_state(state: &AddressStoreState) -> Result<()> {
    if state.addresses.len() != state.entry_addresses.len() {
        return Err(Error::validation_for_field(
            "entryAddresses",
            format!(
                "address list has {} entries but entry map has {}",
                state.addresses.len(),
                state.entry_addresses.len()
            ),
        ));
    }

    let mut seen = std::collections::HashSet::with_capacity(state.addresses.len());
    for address in &state.addresses {
        if !seen.insert(address) {
            return Err(Error::validation_for_field(
                "addresses",
                format!("duplicate VIP {address}"),
            ));
        }
    }

    Ok(())
}

/// Parse the persisted state out of a ConfigMap
pub fn parse_state(cm: &ConfigMap) -> Result<AddressStoreState> {
    let raw = cm
        .data
        .as_ref()
        .and_then(|d| d.get(ADDRESS_STORE_KEY))
        .cloned()
        .unwrap_or_default();

    if raw.is_empty() {
        return Ok(AddressStoreState::default());
    }

    serde_yaml::from_str(&raw)
        .map_err(|e| Error::serialization_for_kind("ConfigMap", format!("address store: {e}")))
}

/// Serialize state into a ConfigMap, carrying the resourceVersion that
/// makes the write conditional
fn render_config_map(
    namespace: &str,
    name: &str,
    resource_version: Option<String>,
    state: &AddressStoreState,
) -> Result<ConfigMap> {
    let yaml = serde_yaml::to_string(state)
        .map_err(|e| Error::serialization_for_kind("ConfigMap", format!("address store: {e}")))?;

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            resource_version,
            ..Default::default()
        },
        data: Some(BTreeMap::from([(ADDRESS_STORE_KEY.to_string(), yaml)])),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::InMemoryClusterApi;

    fn store(api: Arc<InMemoryClusterApi>) -> AddressStore {
        AddressStore::new(api, "flotilla-sync", "flotilla-addresses", "240.0")
    }

    #[tokio::test]
    async fn first_allocation_uses_base_indices() {
        let api = Arc::new(InMemoryClusterApi::new());
        let store = store(api);
        store.ensure().await.unwrap();

        let vip = store.resolve("stage.greeting.global-se").await.unwrap();
        assert_eq!(vip, "240.0.10.1");
    }

    #[tokio::test]
    async fn allocations_are_unique_and_members_of_the_list() {
        let api = Arc::new(InMemoryClusterApi::new());
        let store = store(api.clone());
        store.ensure().await.unwrap();

        let mut vips = std::collections::HashSet::new();
        for i in 0..300 {
            let vip = store.resolve(&format!("host-{i}-se")).await.unwrap();
            assert!(vips.insert(vip), "duplicate VIP handed out");
        }

        let cm = api
            .get_config_map("flotilla-sync", "flotilla-addresses")
            .await
            .unwrap()
            .unwrap();
        let state = parse_state(&cm).unwrap();
        assert_eq!(state.addresses.len(), 300);
        for vip in &vips {
            assert!(state.addresses.contains(vip));
        }
        // the 256th allocation crossed into the next /24 block
        assert!(state.addresses.iter().any(|a| a.starts_with("240.0.11.")));
    }

    #[tokio::test]
    async fn resolve_is_idempotent() {
        let api = Arc::new(InMemoryClusterApi::new());
        let store = store(api);
        store.ensure().await.unwrap();

        let first = store.resolve("stage.greeting.global-se").await.unwrap();
        let second = store.resolve("stage.greeting.global-se").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn vips_survive_restart() {
        let api = Arc::new(InMemoryClusterApi::new());
        let store_a = store(api.clone());
        store_a.ensure().await.unwrap();
        let vip = store_a.resolve("stage.greeting.global-se").await.unwrap();

        // a fresh store over the same ConfigMap sees the allocation
        let store_b = store(api);
        store_b.ensure().await.unwrap();
        assert_eq!(
            store_b.resolve("stage.greeting.global-se").await.unwrap(),
            vip
        );
    }

    #[tokio::test]
    async fn racing_allocators_converge_on_one_vip_per_name() {
        let api = Arc::new(InMemoryClusterApi::new());
        let store_a = Arc::new(store(api.clone()));
        let store_b = Arc::new(store(api.clone()));
        store_a.ensure().await.unwrap();
        store_b.ensure().await.unwrap();

        // interleave allocations from two independent stores
        let mut vips = std::collections::HashSet::new();
        for i in 0..20 {
            let name = format!("host-{i}-se");
            let (a, b) = tokio::join!(store_a.resolve(&name), store_b.resolve(&name));
            let (a, b) = (a.unwrap(), b.unwrap());
            assert_eq!(a, b, "both allocators must agree on the VIP for {name}");
            assert!(vips.insert(a));
        }

        let cm = api
            .get_config_map("flotilla-sync", "flotilla-addresses")
            .await
            .unwrap()
            .unwrap();
        validate_state(&parse_state(&cm).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn conflicted_write_is_retried() {
        let api = Arc::new(InMemoryClusterApi::new());
        let store = store(api.clone());
        store.ensure().await.unwrap();

        api.fail_next_config_map_puts(2);
        let vip = store.resolve("stage.greeting.global-se").await.unwrap();
        assert_eq!(vip, "240.0.10.1");
    }

    #[test]
    fn collision_scan_skips_used_addresses() {
        let mut state = AddressStoreState::default();
        state.addresses.push("240.0.10.1".to_string());

        // n == 1, candidate 240.0.10.2 is free
        assert_eq!(next_address(&state, "240.0"), "240.0.10.2");

        // n == 3 puts the candidate at .4, which is already taken
        state.addresses.push("240.0.10.4".to_string());
        state.addresses.push("240.0.10.5".to_string());
        assert_eq!(next_address(&state, "240.0"), "240.0.10.6");
    }

    #[test]
    fn collision_scan_rolls_into_next_block() {
        let mut state = AddressStoreState::default();
        // 251 fillers put the candidate at .254; .254 and .255 are taken,
        // so the scan walks off the end of the block
        for i in 0..251 {
            state.addresses.push(format!("10.9.0.{i}"));
        }
        state.addresses.push("240.0.10.254".to_string());
        state.addresses.push("240.0.10.255".to_string());

        assert_eq!(next_address(&state, "240.0"), "240.0.11.0");
    }

    #[test]
    fn validation_rejects_mismatched_sizes() {
        let mut state = AddressStoreState::default();
        state.addresses.push("240.0.10.1".to_string());
        let err = validate_state(&state).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn validation_rejects_duplicate_vips() {
        let mut state = AddressStoreState::default();
        state.addresses.push("240.0.10.1".to_string());
        state.addresses.push("240.0.10.1".to_string());
        state
            .entry_addresses
            .insert("a-se".to_string(), "240.0.10.1".to_string());
        state
            .entry_addresses
            .insert("b-se".to_string(), "240.0.10.1".to_string());
        assert!(validate_state(&state).is_err());
    }

    #[test]
    fn state_round_trips_through_yaml() {
        let mut state = AddressStoreState::default();
        state.addresses.push("240.0.10.1".to_string());
        state
            .entry_addresses
            .insert("stage.greeting.global-se".to_string(), "240.0.10.1".to_string());

        let cm = render_config_map("ns", "cm", None, &state).unwrap();
        let yaml = cm.data.as_ref().unwrap().get(ADDRESS_STORE_KEY).unwrap();
        assert!(yaml.contains("entryAddresses"));
        assert_eq!(parse_state(&cm).unwrap(), state);
    }
}
