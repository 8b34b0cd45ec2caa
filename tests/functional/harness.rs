//! Reconcile passes against the simulated world.
//!
//! The harness plays the part of the controller: it keeps the persisted
//! status fields of one cluster, rebuilds the component graph every pass
//! and runs the same pass function the reconciler uses.

use std::collections::BTreeMap;

use ytsaurus_operator::components::{ComponentStatus, SyncStatus};
use ytsaurus_operator::controller::cluster_reconciler::{PassOutcome, run_pass};
use ytsaurus_operator::controller::error::Result;
use ytsaurus_operator::controller::status::{ConditionStore, UpdateConditions};
use ytsaurus_operator::crd::{ClusterState, Condition, ConditionStatus, UpdateState, Ytsaurus};

use crate::fakes::{World, graph};

pub struct Harness {
    pub world: World,
    pub cluster: Ytsaurus,
    pub cluster_state: ClusterState,
    pub update_state: UpdateState,
    pub conditions: Vec<Condition>,
    pub statuses: BTreeMap<String, ComponentStatus>,
}

impl Harness {
    pub fn new(cluster: Ytsaurus) -> Self {
        Self {
            world: World::new(),
            cluster,
            cluster_state: ClusterState::Created,
            update_state: UpdateState::None,
            conditions: Vec::new(),
            statuses: BTreeMap::new(),
        }
    }

    /// One reconcile pass; the outcome is persisted like a status patch.
    pub async fn try_pass(&mut self) -> Result<PassOutcome> {
        let mut graph = graph(&self.world, &self.cluster);
        let outcome = run_pass(
            &mut graph,
            self.cluster_state,
            self.update_state,
            self.cluster.spec.enable_full_update,
            UpdateConditions::new(self.conditions.clone()),
        )
        .await?;

        self.cluster_state = outcome.cluster_state;
        self.update_state = outcome.update_state;
        self.conditions = outcome.conditions.as_slice().to_vec();
        self.statuses = outcome.statuses.clone();
        Ok(outcome)
    }

    pub async fn pass(&mut self) -> PassOutcome {
        self.try_pass().await.expect("pass should succeed")
    }

    /// Pass, then let pods and jobs catch up.
    pub async fn step(&mut self) -> PassOutcome {
        let outcome = self.pass().await;
        self.world.settle();
        self.world.complete_jobs();
        outcome
    }

    /// Step until `done` holds, failing after `max_passes`.
    pub async fn step_until<F>(&mut self, max_passes: usize, done: F) -> Vec<PassOutcome>
    where
        F: Fn(&Harness) -> bool,
    {
        let mut outcomes = Vec::new();
        for _ in 0..max_passes {
            if done(self) {
                return outcomes;
            }
            outcomes.push(self.step().await);
        }
        assert!(
            done(self),
            "not converged after {max_passes} passes: {} / {} / {:?}",
            self.cluster_state,
            self.update_state,
            self.statuses
        );
        outcomes
    }

    /// Bring a fresh cluster to Running with every component Ready.
    pub async fn converge(&mut self) {
        self.step_until(30, |h| h.is_running_and_ready()).await;
        self.world.take_mutations();
    }

    pub fn is_running_and_ready(&self) -> bool {
        self.cluster_state == ClusterState::Running
            && !self.statuses.is_empty()
            && self.statuses.values().all(ComponentStatus::is_ready)
    }

    pub fn status(&self, component: &str) -> &ComponentStatus {
        self.statuses
            .get(component)
            .unwrap_or_else(|| panic!("no status for {component}"))
    }

    pub fn sync_status(&self, component: &str) -> SyncStatus {
        self.status(component).sync_status
    }

    pub fn condition(&self, name: &str) -> ConditionStatus {
        UpdateConditions::new(self.conditions.clone()).get(name)
    }

    /// Apply a spec change the way `kubectl edit` would.
    pub fn edit<F>(&mut self, change: F)
    where
        F: FnOnce(&mut Ytsaurus),
    {
        change(&mut self.cluster);
        let generation = self.cluster.metadata.generation.unwrap_or(1);
        self.cluster.metadata.generation = Some(generation + 1);
    }
}
