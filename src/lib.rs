//! Kubernetes operator for YTsaurus clusters.
//!
//! One `Ytsaurus` resource describes a whole cluster. The controller builds
//! a component graph from it (primary masters first, then data node
//! groups), drives each component toward its desired workload and walks the
//! cluster through initial rollout and full updates.

pub mod components;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;

pub use config::OperatorConfig;
pub use health::HealthState;

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::runtime::controller::{self as kube_controller, Action};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, metadata_watcher, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::cluster_reconciler::{error_policy, reconcile};
use controller::context::Context;
use controller::error::Error;
use crd::Ytsaurus;

/// `Api::namespaced` when a namespace is given, `Api::all` otherwise.
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    T::DynamicType: Default,
{
    namespace.map_or_else(
        || Api::all(client.clone()),
        |ns| Api::namespaced(client.clone(), ns),
    )
}

/// Reflector-backed watch of the primary resource that only emits objects
/// whose generation changed, so status patches do not retrigger passes.
fn spec_changes<K>(
    api: Api<K>,
    config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    let (store, writer) = reflector::store();
    let changes = reflector(writer, watcher(api, config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    (store, changes)
}

type Outcome = Result<(ObjectRef<Ytsaurus>, Action), kube_controller::Error<Error, watcher::Error>>;

/// A deleted cluster still gets passes queued by its owned objects. Those
/// end in not-found and only deserve a debug line.
fn log_outcome(outcome: Outcome) {
    match outcome {
        Ok((cluster, _)) => debug!(cluster = %cluster, "Reconciled"),
        Err(kube_controller::Error::ObjectNotFound(cluster)) => {
            debug!(cluster = %cluster, "Cluster is gone");
        }
        Err(kube_controller::Error::ReconcilerFailed(err, cluster)) if err.is_not_found() => {
            debug!(cluster = %cluster, error = %err, "Cluster is gone");
        }
        Err(err) => error!(error = ?err, "Reconciliation failed"),
    }
}

/// Watch `Ytsaurus` resources and reconcile them until the stream ends.
///
/// StatefulSets and Jobs are watched in full since their status drives
/// readiness and job completion. Services and ConfigMaps only need to
/// trigger a pass, so their metadata is enough.
pub async fn run_controller(
    client: Client,
    config: OperatorConfig,
    health_state: Option<Arc<HealthState>>,
) {
    let namespace = config.watch_namespace.clone();
    let namespace = namespace.as_deref();
    info!(
        scope = namespace.unwrap_or("cluster-wide"),
        "Starting Ytsaurus controller"
    );

    if let Some(state) = &health_state {
        state.set_ready(true);
    }

    let watch = WatcherConfig::default().any_semantic();
    let (store, clusters) = spec_changes(scoped_api::<Ytsaurus>(client.clone(), namespace), watch.clone());
    let services = metadata_watcher(scoped_api::<Service>(client.clone(), namespace), watch.clone());
    let configmaps = metadata_watcher(scoped_api::<ConfigMap>(client.clone(), namespace), watch.clone());

    let ctx = Arc::new(Context::new(client.clone(), Arc::new(config), health_state));

    Controller::for_stream(clusters, store)
        .owns(scoped_api::<StatefulSet>(client.clone(), namespace), watch.clone())
        .owns(scoped_api::<Job>(client, namespace), watch)
        .owns_stream(services.touched_objects())
        .owns_stream(configmaps.touched_objects())
        .run(reconcile, error_policy, ctx)
        .for_each(|outcome| async move { log_outcome(outcome) })
        .await;

    error!("Controller stream ended");
}
