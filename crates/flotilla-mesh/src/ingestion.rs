//! Event normalization and ignore filtering
//!
//! Watcher callbacks for every resource kind funnel into one event shape:
//! `(kind, op, identity, env, cluster)`. Workloads opting out via labels or
//! annotations, namespaces annotated as ignored, and workloads outside the
//! mesh (no sidecar-injection marker) never produce an event.

use std::collections::BTreeMap;

use tracing::debug;

use flotilla_common::{LabelSet, MeshParams, IGNORE_ANNOTATION};

use crate::workload::Workload;

/// What happened to the object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventOp {
    /// Object appeared
    Add,
    /// Object changed
    Update,
    /// Object went away
    Delete,
}

/// Which workload kind produced the event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// apps/v1 Deployment
    Deployment,
    /// argoproj.io Rollout
    Rollout,
}

/// A normalized workload event, the unit the resolver consumes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadEvent {
    /// Workload kind
    pub kind: EventKind,
    /// Operation
    pub op: EventOp,
    /// Global identity
    pub identity: String,
    /// Environment
    pub env: String,
    /// Cluster the event came from
    pub cluster: String,
}

/// Whether a workload must be ignored based on its labels/annotations and
/// the annotations of its namespace.
///
/// Ignored when any of:
/// - the pod template carries the ignore label set to "true"
/// - the pod template lacks the sidecar-injection annotation set to "true"
/// - the workload or its namespace carries the ignore annotation
pub fn should_ignore(
    pod_labels: &BTreeMap<String, String>,
    pod_annotations: &BTreeMap<String, String>,
    object_annotations: &BTreeMap<String, String>,
    namespace_annotations: &BTreeMap<String, String>,
    label_set: &LabelSet,
) -> bool {
    if pod_labels.get(&label_set.ignore_label).map(String::as_str) == Some("true") {
        return true;
    }

    if pod_annotations
        .get(&label_set.sidecar_injection_annotation)
        .map(String::as_str)
        != Some("true")
    {
        return true;
    }

    if object_annotations.get(IGNORE_ANNOTATION).map(String::as_str) == Some("true") {
        return true;
    }

    if namespace_annotations
        .get(IGNORE_ANNOTATION)
        .map(String::as_str)
        == Some("true")
    {
        return true;
    }

    false
}

/// Normalize a workload change into an event, applying the ignore filters.
///
/// Returns None for workloads without an identity or filtered out; the
/// caller drops those without reconciling.
pub fn normalize(
    kind: EventKind,
    op: EventOp,
    workload: &Workload,
    object_annotations: &BTreeMap<String, String>,
    namespace_annotations: &BTreeMap<String, String>,
    cluster: &str,
    params: &MeshParams,
) -> Option<WorkloadEvent> {
    let identity = workload.identity(params)?;

    if should_ignore(
        &workload.pod_labels(),
        &workload.pod_annotations(),
        object_annotations,
        namespace_annotations,
        &params.label_set,
    ) {
        debug!(identity = %identity, cluster = %cluster, "ignoring workload by label/annotation");
        return None;
    }

    Some(WorkloadEvent {
        kind,
        op,
        identity,
        env: workload.env(params),
        cluster: cluster.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    fn annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn base_workload() -> Workload {
        Workload::Deployment(Box::new(testutil::make_deployment(
            "foo", "bar", "greeting", "stage",
        )))
    }

    #[test]
    fn normalizes_identity_env_cluster() {
        let params = MeshParams::default();
        let event = normalize(
            EventKind::Deployment,
            EventOp::Add,
            &base_workload(),
            &BTreeMap::new(),
            &BTreeMap::new(),
            "cluster-1",
            &params,
        )
        .unwrap();

        assert_eq!(event.identity, "greeting");
        assert_eq!(event.env, "stage");
        assert_eq!(event.cluster, "cluster-1");
        assert_eq!(event.op, EventOp::Add);
    }

    #[test]
    fn workload_without_identity_is_dropped() {
        let params = MeshParams::default();
        let mut deployment = testutil::make_deployment("foo", "bar", "greeting", "stage");
        deployment
            .spec
            .as_mut()
            .unwrap()
            .template
            .metadata
            .as_mut()
            .unwrap()
            .labels
            .as_mut()
            .unwrap()
            .remove("identity");

        let event = normalize(
            EventKind::Deployment,
            EventOp::Add,
            &Workload::Deployment(Box::new(deployment)),
            &BTreeMap::new(),
            &BTreeMap::new(),
            "cluster-1",
            &params,
        );
        assert!(event.is_none());
    }

    #[test]
    fn ignore_label_wins() {
        let label_set = LabelSet::default();
        let pod_labels = annotations(&[("flotilla-ignore", "true")]);
        let pod_annotations = annotations(&[("sidecar.istio.io/inject", "true")]);
        assert!(should_ignore(
            &pod_labels,
            &pod_annotations,
            &BTreeMap::new(),
            &BTreeMap::new(),
            &label_set
        ));
    }

    #[test]
    fn missing_injection_annotation_ignores() {
        let label_set = LabelSet::default();
        assert!(should_ignore(
            &BTreeMap::new(),
            &BTreeMap::new(),
            &BTreeMap::new(),
            &BTreeMap::new(),
            &label_set
        ));

        // "false" is as good as missing
        let pod_annotations = annotations(&[("sidecar.istio.io/inject", "false")]);
        assert!(should_ignore(
            &BTreeMap::new(),
            &pod_annotations,
            &BTreeMap::new(),
            &BTreeMap::new(),
            &label_set
        ));
    }

    #[test]
    fn namespace_annotation_ignores() {
        let label_set = LabelSet::default();
        let pod_annotations = annotations(&[("sidecar.istio.io/inject", "true")]);
        let ns_annotations = annotations(&[("flotilla.io/ignore", "true")]);
        assert!(should_ignore(
            &BTreeMap::new(),
            &pod_annotations,
            &BTreeMap::new(),
            &ns_annotations,
            &label_set
        ));
    }

    #[test]
    fn object_annotation_ignores() {
        let label_set = LabelSet::default();
        let pod_annotations = annotations(&[("sidecar.istio.io/inject", "true")]);
        let object_annotations = annotations(&[("flotilla.io/ignore", "true")]);
        assert!(should_ignore(
            &BTreeMap::new(),
            &pod_annotations,
            &object_annotations,
            &BTreeMap::new(),
            &label_set
        ));
    }

    #[test]
    fn injected_unignored_workload_passes() {
        let label_set = LabelSet::default();
        let pod_annotations = annotations(&[("sidecar.istio.io/inject", "true")]);
        assert!(!should_ignore(
            &BTreeMap::new(),
            &pod_annotations,
            &BTreeMap::new(),
            &BTreeMap::new(),
            &label_set
        ));
    }
}
