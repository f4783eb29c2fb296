//! CRDs consumed by Flotilla
//!
//! `GlobalTrafficPolicy` and `Dependency` are owned by Flotilla; `Rollout`
//! is the argoproj.io subset this control plane reads.

mod dependency;
mod global_traffic_policy;
mod rollout;

pub use dependency::{Dependency, DependencySpec};
pub use global_traffic_policy::{
    GlobalTrafficPolicy, GlobalTrafficPolicySpec, GtpConnectionPool, GtpOutlierDetection, LbType,
    TrafficGroup, TrafficPolicy,
};
pub use rollout::{
    BlueGreenStrategy, CanaryStatus, CanaryStrategy, CanaryWeights, Rollout, RolloutPodMeta,
    RolloutPodTemplate, RolloutSelector, RolloutSpec, RolloutStatus, RolloutStrategy,
    WeightDestination,
};
