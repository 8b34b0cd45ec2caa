//! Cluster-wide update coordinator.
//!
//! Runs once per pass after the component statuses were computed and before
//! anything is synced. It combines the cluster and update state machines:
//! the cluster machine decides when an episode starts or ends, the update
//! machine sequences the steps in between. Episode-scoped conditions are
//! wiped together with the state change that starts or ends an episode.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::components::master::{EXITED_READ_ONLY, MASTER};
use crate::components::phases::PODS_REMOVED;
use crate::components::{ComponentStatus, SyncStatus};
use crate::controller::cluster_state_machine::{
    ClusterEvent, ClusterStateMachine, TransitionContext, TransitionResult, determine_event,
};
use crate::controller::error::{Error, Result};
use crate::controller::status::{ConditionStore, UpdateConditions};
use crate::controller::update_state_machine::{
    UpdateEvent, UpdateStateMachine, UpdateTransitionContext, determine_update_event,
};
use crate::crd::{ClusterState, ConditionStatus, UpdateState};

/// Condition recording why an update could not start.
pub const NO_POSSIBILITY: &str = "NoPossibility";

/// What the coordinator looks at.
#[derive(Clone, Copy, Debug)]
pub struct CoordinatorInput<'a> {
    pub cluster_state: ClusterState,
    pub update_state: UpdateState,
    pub enable_full_update: bool,
    pub statuses: &'a BTreeMap<String, ComponentStatus>,
}

impl CoordinatorInput<'_> {
    fn all_ready(&self) -> bool {
        self.statuses.values().all(ComponentStatus::is_ready)
    }

    fn need_full_update(&self) -> bool {
        self.statuses
            .values()
            .any(|s| s.sync_status == SyncStatus::NeedFullUpdate)
    }

    fn blocked_components(&self) -> Vec<String> {
        self.statuses
            .iter()
            .filter(|(_, s)| {
                !matches!(s.sync_status, SyncStatus::Ready | SyncStatus::NeedFullUpdate)
            })
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// A state change to persist before any component is synced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateChange {
    pub cluster_state: ClusterState,
    pub update_state: UpdateState,
    /// Name of the event that fired.
    pub event: String,
    pub description: &'static str,
}

/// Combines the cluster and update state machines.
#[derive(Default)]
pub struct UpdateCoordinator {
    cluster: ClusterStateMachine,
    update: UpdateStateMachine,
}

impl UpdateCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether the cluster moves to another state in this pass.
    ///
    /// Returns `None` when the cluster stays where it is; components are then
    /// synced as usual. Writes the conditions owned by the coordinator.
    pub fn advance(
        &self,
        input: &CoordinatorInput<'_>,
        conditions: &mut UpdateConditions,
    ) -> Result<Option<StateChange>> {
        if input.cluster_state == ClusterState::Updating && input.update_state == UpdateState::None
        {
            return Err(Error::Invariant(
                "cluster is updating without an update state".to_string(),
            ));
        }

        let ctx = TransitionContext::new(input.update_state, input.enable_full_update)
            .with_all_ready(input.all_ready())
            .with_need_full_update(input.need_full_update());

        if let Some(event) = determine_event(input.cluster_state, &ctx) {
            match self.cluster.transition(input.cluster_state, event, &ctx) {
                TransitionResult::Success {
                    from,
                    to,
                    event,
                    description,
                } => {
                    let update_state = self.update_state_after(event, input.update_state, conditions);
                    info!(
                        from = %from,
                        to = %to,
                        event = %event,
                        update_state = %update_state,
                        "{}",
                        description
                    );
                    return Ok(Some(StateChange {
                        cluster_state: to,
                        update_state,
                        event: event.to_string(),
                        description,
                    }));
                }
                TransitionResult::GuardFailed { reason, event, .. } => {
                    debug!(event = %event, reason = %reason, "Cluster transition blocked");
                }
                TransitionResult::InvalidTransition { current, event } => {
                    return Err(Error::Invariant(format!(
                        "no transition from {current} on {event}"
                    )));
                }
            }
        }

        if input.cluster_state != ClusterState::Updating {
            return Ok(None);
        }

        let update_ctx = UpdateTransitionContext {
            all_ready: input.all_ready(),
            blocked_components: input.blocked_components(),
            all_pods_removed: input
                .statuses
                .keys()
                .all(|name| conditions.is_true(&format!("{name}{PODS_REMOVED}"))),
            master_exited_read_only: conditions.is_true(&format!("{MASTER}{EXITED_READ_ONLY}")),
        };

        let Some(event) = determine_update_event(input.update_state, &update_ctx) else {
            return Ok(None);
        };
        let Some(transition) = self.update.transition(input.update_state, event, &update_ctx) else {
            debug!(update_state = %input.update_state, event = %event, "Update transition blocked");
            return Ok(None);
        };

        if transition.to == UpdateState::ImpossibleToStart {
            conditions.set(
                NO_POSSIBILITY,
                ConditionStatus::True,
                "Update",
                &format!(
                    "Components are not ready: {}",
                    update_ctx.blocked_components.join(", ")
                ),
            );
        }

        info!(
            from = %transition.from,
            to = %transition.to,
            event = %event,
            "{}",
            transition.description
        );
        Ok(Some(StateChange {
            cluster_state: input.cluster_state,
            update_state: transition.to,
            event: event.to_string(),
            description: transition.description,
        }))
    }

    /// Update state that goes with a cluster transition.
    fn update_state_after(
        &self,
        event: ClusterEvent,
        current: UpdateState,
        conditions: &mut UpdateConditions,
    ) -> UpdateState {
        let empty = UpdateTransitionContext::default();
        match event {
            ClusterEvent::FullUpdateRequested => {
                conditions.clear();
                self.update
                    .transition(current, UpdateEvent::EpisodeStarted, &empty)
                    .map(|t| t.to)
                    .unwrap_or(UpdateState::PossibilityCheck)
            }
            ClusterEvent::UpdateFinished | ClusterEvent::CancelCompleted => {
                conditions.clear();
                UpdateState::None
            }
            ClusterEvent::Initialize
            | ClusterEvent::AllComponentsReady
            | ClusterEvent::UpdateCancelled => current,
        }
    }
}
