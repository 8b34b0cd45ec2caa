//! Update phase handlers.
//!
//! While the cluster is `Updating`, a component hands control to the handler
//! registered for the current `UpdateState` instead of running its normal
//! decision path. Handlers only talk to the component through [`PhaseStep`],
//! so they can be shared between roles.

use async_trait::async_trait;

use crate::components::{ComponentStatus, InitJob, Server, SyncStatus};
use crate::controller::error::{Error, Result};
use crate::controller::status::{ConditionStore, ScopedConditions};
use crate::crd::{ConditionStatus, UpdateState};

/// Condition (relative to the component) set once its pods are gone.
pub const PODS_REMOVED: &str = "PodsRemoved";

/// Everything a phase handler may touch.
pub struct PhaseStep<'a> {
    pub component: &'a str,
    pub server: &'a dyn Server,
    pub jobs: &'a mut [InitJob],
    pub conditions: ScopedConditions<'a>,
}

impl PhaseStep<'_> {
    /// Init job registered under `name`.
    pub fn job(&mut self, name: &str) -> Result<&mut InitJob> {
        let component = self.component;
        self.jobs
            .iter_mut()
            .find(|job| job.name() == name)
            .ok_or_else(|| {
                Error::Invariant(format!("component {component} has no init job {name}"))
            })
    }
}

/// Handler for one or more update states.
#[async_trait]
pub trait UpdatePhase: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether this handler owns `state`.
    fn handles(&self, state: UpdateState) -> bool;

    /// Run one step. Must not mutate anything when `dry` is set.
    async fn run(&self, step: PhaseStep<'_>, dry: bool) -> Result<ComponentStatus>;
}

/// Scales the workload to zero and reports once every pod is gone.
#[derive(Debug, Default)]
pub struct PodsRemovalPhase;

#[async_trait]
impl UpdatePhase for PodsRemovalPhase {
    fn name(&self) -> &'static str {
        "pods-removal"
    }

    fn handles(&self, state: UpdateState) -> bool {
        state == UpdateState::WaitingForPodsRemoval
    }

    async fn run(&self, mut step: PhaseStep<'_>, dry: bool) -> Result<ComponentStatus> {
        if step.conditions.is_true(PODS_REMOVED) {
            return Ok(ComponentStatus::waiting(SyncStatus::Updating, "pods removed"));
        }

        if step.server.are_pods_removed() {
            if !dry {
                step.conditions.set(
                    PODS_REMOVED,
                    ConditionStatus::True,
                    "PodsRemoved",
                    &format!("Pods of {} removed", step.component),
                );
            }
            return Ok(ComponentStatus::waiting(SyncStatus::Updating, "pods removed"));
        }

        if !dry {
            step.server.remove_pods().await?;
        }
        Ok(ComponentStatus::waiting(SyncStatus::Updating, "pods removal"))
    }
}

/// Keeps a component still while the coordinator decides what to do.
///
/// Reports `Ready` as long as the current pods are healthy so that the
/// possibility check can tell broken components apart from outdated ones.
#[derive(Debug)]
pub struct HoldPhase {
    states: Vec<UpdateState>,
}

impl Default for HoldPhase {
    fn default() -> Self {
        Self {
            states: vec![
                UpdateState::None,
                UpdateState::PossibilityCheck,
                UpdateState::ImpossibleToStart,
                UpdateState::Done,
            ],
        }
    }
}

#[async_trait]
impl UpdatePhase for HoldPhase {
    fn name(&self) -> &'static str {
        "hold"
    }

    fn handles(&self, state: UpdateState) -> bool {
        self.states.contains(&state)
    }

    async fn run(&self, step: PhaseStep<'_>, _dry: bool) -> Result<ComponentStatus> {
        if step.server.are_pods_ready() {
            Ok(ComponentStatus::waiting(SyncStatus::Ready, "nothing to do now"))
        } else {
            Ok(ComponentStatus::waiting(SyncStatus::Blocked, "pods"))
        }
    }
}
