//! Operator configuration.
//!
//! Everything is read from the environment once at startup. Missing values
//! fall back to defaults suitable for an in-cluster deployment.

use std::time::Duration;

use tracing::warn;

/// Default Kubernetes cluster domain
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";
/// Default steady-state requeue interval
const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 60;
/// Default requeue interval while a cluster is converging
const DEFAULT_UPDATE_POLL_INTERVAL_SECS: u64 = 5;

/// Runtime configuration of the operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Identity used for leader election and event reporting
    pub pod_name: String,
    /// Namespace holding the leader election lease
    pub pod_namespace: String,
    /// Restrict the controller to one namespace; cluster-wide when unset
    pub watch_namespace: Option<String>,
    /// DNS suffix of in-cluster service addresses
    pub cluster_domain: String,
    /// Requeue interval once a cluster is Running and in sync
    pub reconcile_interval: Duration,
    /// Requeue interval while components are converging or an update is in flight
    pub update_poll_interval: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            pod_name: "ytsaurus-operator".to_string(),
            pod_namespace: "default".to_string(),
            watch_namespace: None,
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
            reconcile_interval: Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_SECS),
            update_poll_interval: Duration::from_secs(DEFAULT_UPDATE_POLL_INTERVAL_SECS),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let pod_name = non_empty("POD_NAME").unwrap_or_else(|| {
            warn!("POD_NAME not set, using hostname");
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| defaults.pod_name.clone())
        });
        let pod_namespace = non_empty("POD_NAMESPACE").unwrap_or_else(|| {
            warn!("POD_NAMESPACE not set, using 'default'");
            defaults.pod_namespace.clone()
        });

        Self {
            pod_name,
            pod_namespace,
            watch_namespace: non_empty("WATCH_NAMESPACE"),
            cluster_domain: non_empty("K8S_CLUSTER_DOMAIN").unwrap_or(defaults.cluster_domain),
            reconcile_interval: seconds(&lookup, "RECONCILE_INTERVAL_SECS")
                .unwrap_or(defaults.reconcile_interval),
            update_poll_interval: seconds(&lookup, "UPDATE_POLL_INTERVAL_SECS")
                .unwrap_or(defaults.update_poll_interval),
        }
    }
}

fn seconds<F>(lookup: &F, key: &str) -> Option<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
        _ => {
            warn!(key = %key, value = %raw, "Ignoring invalid interval");
            None
        }
    }
}
