//! Reconciliation loop for Ytsaurus.
//!
//! One pass looks like this:
//!
//! 1. Fetch every component of the cluster.
//! 2. Compute the dry-run status of every component in dependency order.
//! 3. Let the update coordinator decide whether the cluster changes state.
//!    A state change is persisted on its own and nothing is synced in that
//!    pass, so that the next pass observes the new state from scratch.
//! 4. Otherwise sync every component, gated by the statuses from step 2.
//! 5. Patch the status subresource if anything changed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use kube::{
    Api, ResourceExt,
    api::{Patch, PatchParams},
    runtime::controller::Action,
    runtime::events::EventType,
};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::components::{ComponentGraph, ComponentStatus, SyncStatus};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::status::{ConditionBuilder, UpdateConditions};
use crate::controller::update_coordinator::{
    CoordinatorInput, NO_POSSIBILITY, StateChange, UpdateCoordinator,
};
use crate::crd::{ClusterState, Condition, UpdateState, UpdateStatus, Ytsaurus, YtsaurusStatus};

/// Reconcile a Ytsaurus cluster
///
/// This is the main reconciliation function called by the controller.
pub async fn reconcile(obj: Arc<Ytsaurus>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    debug!(name = %name, namespace = %namespace, "Reconciling Ytsaurus");

    let result = reconcile_cluster(&obj, &ctx, &namespace).await;

    match &result {
        Ok(_) => {
            if let Some(metrics) = ctx.metrics() {
                metrics.record_reconcile(&namespace, &name, start_time.elapsed().as_secs_f64());
            }
            if let Some(health_state) = ctx.health_state.as_deref() {
                let now = jiff::Timestamp::now().as_second();
                health_state
                    .last_reconcile
                    .store(u64::try_from(now).unwrap_or_default(), Ordering::Relaxed);
            }
        }
        Err(e) if e.is_invariant() => {
            error!(name = %name, error = %e, "Reconciliation stopped on invariant violation");
            ctx.notify(
                &obj,
                EventType::Warning,
                "InvariantViolated",
                "Reconciling",
                Some(e.to_string()),
            )
            .await;
        }
        Err(_) => {}
    }

    result
}

/// Result of one pass over the component graph.
#[derive(Clone, Debug)]
pub struct PassOutcome {
    /// Cluster state to persist.
    pub cluster_state: ClusterState,
    /// Update state to persist.
    pub update_state: UpdateState,
    /// Update conditions after the pass.
    pub conditions: UpdateConditions,
    /// Dry-run statuses computed at the start of the pass.
    pub statuses: BTreeMap<String, ComponentStatus>,
    /// State change decided by the coordinator. Nothing was synced when set.
    pub change: Option<StateChange>,
}

/// Fetch, evaluate, and either advance the cluster state or sync every
/// component. Only the returned outcome needs persisting.
pub async fn run_pass(
    graph: &mut ComponentGraph,
    cluster_state: ClusterState,
    update_state: UpdateState,
    enable_full_update: bool,
    mut conditions: UpdateConditions,
) -> Result<PassOutcome> {
    graph.fetch_all().await?;

    let statuses = graph
        .statuses(cluster_state, update_state, &conditions)
        .await?;

    let input = CoordinatorInput {
        cluster_state,
        update_state,
        enable_full_update,
        statuses: &statuses,
    };
    if let Some(change) = UpdateCoordinator::new().advance(&input, &mut conditions)? {
        return Ok(PassOutcome {
            cluster_state: change.cluster_state,
            update_state: change.update_state,
            conditions,
            statuses,
            change: Some(change),
        });
    }

    let synced = graph
        .sync_all(cluster_state, update_state, &mut conditions, &statuses)
        .await?;
    for (component, status) in &synced {
        if statuses.get(component) != Some(status) {
            debug!(component = %component, status = %status, "Component moved during sync");
        }
    }

    Ok(PassOutcome {
        cluster_state,
        update_state,
        conditions,
        statuses,
        change: None,
    })
}

async fn reconcile_cluster(obj: &Ytsaurus, ctx: &Context, namespace: &str) -> Result<Action> {
    let name = obj.name_any();
    let cluster_state = obj.cluster_state();
    let update_state = obj.update_state();
    let conditions = UpdateConditions::new(
        obj.status
            .as_ref()
            .map(|s| s.update_status.conditions.clone())
            .unwrap_or_default(),
    );

    let mut graph =
        ComponentGraph::for_cluster(ctx.client.clone(), obj, &ctx.config.cluster_domain)?;
    let outcome = run_pass(
        &mut graph,
        cluster_state,
        update_state,
        obj.spec.enable_full_update,
        conditions,
    )
    .await?;

    let blocked = find_condition(outcome.conditions.as_slice(), NO_POSSIBILITY)
        .map(|c| c.message.clone());
    let status = desired_status(
        obj,
        outcome.cluster_state,
        outcome.update_state,
        outcome.conditions,
        &outcome.statuses,
    );
    patch_status(obj, ctx, namespace, status).await?;
    record_metrics(ctx, namespace, &name, outcome.cluster_state, &outcome.statuses);

    if let Some(change) = outcome.change {
        announce(obj, ctx, cluster_state, update_state, &change, blocked).await;
        if let Some(metrics) = ctx.metrics() {
            metrics.record_transition(namespace, &name);
        }
        return Ok(Action::requeue(ctx.config.update_poll_interval));
    }

    Ok(Action::requeue(requeue_interval(
        ctx,
        outcome.cluster_state,
        &outcome.statuses,
    )))
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<Ytsaurus>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    if let Some(metrics) = ctx.metrics() {
        metrics.record_error(&namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}

/// Steady clusters are revisited rarely, converging ones often.
fn requeue_interval(
    ctx: &Context,
    cluster_state: ClusterState,
    statuses: &BTreeMap<String, ComponentStatus>,
) -> std::time::Duration {
    if cluster_state == ClusterState::Running && statuses.values().all(ComponentStatus::is_ready) {
        ctx.config.reconcile_interval
    } else {
        ctx.config.update_poll_interval
    }
}

/// Status to persist after a pass.
///
/// Long-lived conditions keep their transition time when unchanged, so a
/// pass that changed nothing produces a status equal to the current one.
pub fn desired_status(
    obj: &Ytsaurus,
    cluster_state: ClusterState,
    update_state: UpdateState,
    conditions: UpdateConditions,
    statuses: &BTreeMap<String, ComponentStatus>,
) -> YtsaurusStatus {
    let existing = obj
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();

    let not_ready: Vec<&str> = statuses
        .iter()
        .filter(|(_, s)| !s.is_ready())
        .map(|(name, _)| name.as_str())
        .collect();
    let need_full_update: Vec<&str> = statuses
        .iter()
        .filter(|(_, s)| s.sync_status == SyncStatus::NeedFullUpdate)
        .map(|(name, _)| name.as_str())
        .collect();

    let mut builder = ConditionBuilder::new(existing);
    if cluster_state == ClusterState::Running && not_ready.is_empty() {
        builder.ready(true, "AllComponentsReady", "All components are in sync");
    } else if not_ready.is_empty() {
        builder.ready(false, "ClusterNotRunning", &format!("Cluster is {cluster_state}"));
    } else {
        builder.ready(
            false,
            "ComponentsNotReady",
            &format!("Waiting for {}", not_ready.join(", ")),
        );
    }
    if need_full_update.is_empty() {
        builder.full_update_required(false, "UpToDate", "No component needs its pods recreated");
    } else {
        builder.full_update_required(
            true,
            "PodTemplateChanged",
            &format!("Pods must be recreated for {}", need_full_update.join(", ")),
        );
    }

    YtsaurusStatus {
        state: cluster_state,
        update_status: UpdateStatus {
            state: update_state,
            conditions: conditions.into_vec(),
        },
        components: statuses
            .iter()
            .map(|(name, status)| status.to_entry(name))
            .collect(),
        conditions: builder.build(),
        observed_generation: obj.metadata.generation,
    }
}

/// Merge patch that replaces every list, including empty ones.
fn status_patch(status: &YtsaurusStatus) -> serde_json::Value {
    json!({
        "status": {
            "state": status.state,
            "updateStatus": {
                "state": status.update_status.state,
                "conditions": status.update_status.conditions,
            },
            "components": status.components,
            "conditions": status.conditions,
            "observedGeneration": status.observed_generation,
        }
    })
}

async fn patch_status(
    obj: &Ytsaurus,
    ctx: &Context,
    namespace: &str,
    status: YtsaurusStatus,
) -> Result<()> {
    if obj.status.as_ref() == Some(&status) {
        debug!(name = %obj.name_any(), "Status unchanged, skipping patch");
        return Ok(());
    }

    let api: Api<Ytsaurus> = Api::namespaced(ctx.client.clone(), namespace);
    api.patch_status(
        &obj.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&status_patch(&status)),
    )
    .await?;
    Ok(())
}

fn record_metrics(
    ctx: &Context,
    namespace: &str,
    name: &str,
    cluster_state: ClusterState,
    statuses: &BTreeMap<String, ComponentStatus>,
) {
    let Some(metrics) = ctx.metrics() else {
        return;
    };
    metrics.set_cluster_state(namespace, name, cluster_state);
    for (component, status) in statuses {
        metrics.set_component_ready(namespace, name, component, status.is_ready());
    }
}

/// Publish events for a persisted state change.
async fn announce(
    obj: &Ytsaurus,
    ctx: &Context,
    cluster_state: ClusterState,
    update_state: UpdateState,
    change: &StateChange,
    blocked: Option<String>,
) {
    let name = obj.name_any();
    let note = Some(change.description.to_string());

    if change.cluster_state != cluster_state {
        info!(
            name = %name,
            from = %cluster_state,
            to = %change.cluster_state,
            "Cluster state changed"
        );
        let reason = match change.cluster_state {
            ClusterState::Updating => "UpdateStarted",
            ClusterState::Running if cluster_state == ClusterState::Updating => "UpdateFinished",
            ClusterState::CancelUpdate => "UpdateCancelled",
            _ => "StateChanged",
        };
        ctx.notify(obj, EventType::Normal, reason, &change.event, note)
            .await;
        return;
    }

    if change.update_state != update_state {
        info!(
            name = %name,
            from = %update_state,
            to = %change.update_state,
            "Update state changed"
        );
        if change.update_state == UpdateState::ImpossibleToStart {
            ctx.notify(obj, EventType::Warning, "UpdateImpossible", &change.event, blocked)
                .await;
        } else {
            ctx.notify(obj, EventType::Normal, "UpdateProgressed", &change.event, note)
                .await;
        }
    }
}

/// Long-lived condition of the given type, if present.
pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}
