//! Probe and metrics endpoints.
//!
//! | Path | Meaning |
//! |------|---------|
//! | `/healthz` | process is alive |
//! | `/readyz` | this replica leads and runs the controller |
//! | `/metrics` | Prometheus text exposition |
//!
//! The server starts before leader election so that probes answer on
//! standby replicas too.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tracing::{error, info};

use crate::crd::ClusterState;

/// Port of the health server.
pub const HEALTH_PORT: u16 = 8080;

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ClusterLabels {
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ClusterStateLabels {
    pub namespace: String,
    pub name: String,
    pub state: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ComponentLabels {
    pub namespace: String,
    pub name: String,
    pub component: String,
}

/// Metric families exported by the operator, all prefixed `ytsaurus_operator_`.
pub struct Metrics {
    pub reconciliations: Family<ClusterLabels, Counter>,
    pub reconciliation_errors: Family<ClusterLabels, Counter>,
    pub reconcile_duration: Family<ClusterLabels, Histogram>,
    /// One-hot over every [`ClusterState`].
    pub cluster_state: Family<ClusterStateLabels, Gauge>,
    pub component_ready: Family<ComponentLabels, Gauge>,
    /// Cluster or update state changes persisted by the coordinator.
    pub state_transitions: Family<ClusterLabels, Counter>,
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("ytsaurus_operator");

        let reconciliations = Family::default();
        registry.register(
            "reconciliations",
            "Reconcile passes that finished without error",
            reconciliations.clone(),
        );
        let reconciliation_errors = Family::default();
        registry.register(
            "reconciliation_errors",
            "Reconcile passes that returned an error",
            reconciliation_errors.clone(),
        );
        let reconcile_duration =
            Family::<ClusterLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.005, 2.0, 12))
            });
        registry.register(
            "reconcile_duration_seconds",
            "Wall time of one reconcile pass",
            reconcile_duration.clone(),
        );
        let cluster_state = Family::default();
        registry.register(
            "cluster_state",
            "1 for the current cluster state, 0 for every other state",
            cluster_state.clone(),
        );
        let component_ready = Family::default();
        registry.register(
            "component_ready",
            "1 when the component reported Ready in the last pass",
            component_ready.clone(),
        );
        let state_transitions = Family::default();
        registry.register(
            "state_transitions",
            "Cluster or update state changes",
            state_transitions.clone(),
        );

        Self {
            reconciliations,
            reconciliation_errors,
            reconcile_duration,
            cluster_state,
            component_ready,
            state_transitions,
            registry,
        }
    }

    fn cluster(namespace: &str, name: &str) -> ClusterLabels {
        ClusterLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn record_reconcile(&self, namespace: &str, name: &str, seconds: f64) {
        let labels = Self::cluster(namespace, name);
        self.reconciliations.get_or_create(&labels).inc();
        self.reconcile_duration.get_or_create(&labels).observe(seconds);
    }

    pub fn record_error(&self, namespace: &str, name: &str) {
        self.reconciliation_errors
            .get_or_create(&Self::cluster(namespace, name))
            .inc();
    }

    pub fn record_transition(&self, namespace: &str, name: &str) {
        self.state_transitions
            .get_or_create(&Self::cluster(namespace, name))
            .inc();
    }

    pub fn set_cluster_state(&self, namespace: &str, name: &str, current: ClusterState) {
        for state in ClusterState::ALL {
            let labels = ClusterStateLabels {
                namespace: namespace.to_string(),
                name: name.to_string(),
                state: state.to_string(),
            };
            self.cluster_state
                .get_or_create(&labels)
                .set(i64::from(state == current));
        }
    }

    pub fn set_component_ready(&self, namespace: &str, name: &str, component: &str, ready: bool) {
        let labels = ComponentLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
            component: component.to_string(),
        };
        self.component_ready
            .get_or_create(&labels)
            .set(i64::from(ready));
    }

    /// Text exposition of every registered family.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut body = String::new();
        prometheus_client::encoding::text::encode(&mut body, &self.registry)?;
        Ok(body)
    }
}

/// Readiness flag, metrics and the time of the last successful pass.
#[derive(Default)]
pub struct HealthState {
    ready: AtomicBool,
    pub metrics: Metrics,
    /// Unix seconds of the last pass that finished without error.
    pub last_reconcile: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the health endpoints on all interfaces until the process exits.
pub async fn serve(state: Arc<HealthState>) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], HEALTH_PORT));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Health server listening");
    axum::serve(listener, router(state)).await
}
