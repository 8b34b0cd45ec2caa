//! Cluster components.
//!
//! A component is one server role of the cluster (the primary masters, one
//! group of data nodes). Every component exposes the same three operations:
//!
//! - `fetch`: re-attach to the Kubernetes objects created in earlier passes
//! - `status`: decide the next action without performing it
//! - `sync`: decide the next action and perform it
//!
//! `status` and `sync` run the same decision function; a `dry` flag guards
//! every mutation so both always agree on the outcome.
//!
//! ## Layout
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `server` | StatefulSet + headless Service of a role, drift detection |
//! | `init_job` | One-shot idempotent Job with script replacement |
//! | `phases` | Update phase handlers keyed by `UpdateState` |
//! | `component` | The shared decision function |
//! | `master` / `data_node` | Role definitions |
//! | `graph` | Dependency graph and evaluation order |
//! | `scripts` | Shell script builders for init jobs |

use std::collections::BTreeMap;
use std::fmt;

use crate::crd::{ClusterState, ComponentStatusEntry, UpdateState};

pub mod component;
pub mod data_node;
pub mod graph;
pub mod init_job;
pub mod master;
pub mod phases;
pub mod scripts;
pub mod server;

pub use component::{Component, Role};
pub use graph::ComponentGraph;
pub use init_job::{ExecutionUnit, InitJob, JobBackend, UnitState};
pub use phases::{HoldPhase, PhaseStep, PodsRemovalPhase, UpdatePhase};
pub use server::Server;

/// Outcome of a component decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    /// In sync; dependents may proceed.
    Ready,
    /// Converging toward the desired state.
    Pending,
    /// Waiting for something outside the component (a dependency, pods).
    Blocked,
    /// Taking part in an update episode.
    Updating,
    /// Pods must be recreated, which needs an update episode.
    NeedFullUpdate,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Ready => write!(f, "Ready"),
            SyncStatus::Pending => write!(f, "Pending"),
            SyncStatus::Blocked => write!(f, "Blocked"),
            SyncStatus::Updating => write!(f, "Updating"),
            SyncStatus::NeedFullUpdate => write!(f, "NeedFullUpdate"),
        }
    }
}

/// Sync status with an optional explanation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentStatus {
    pub sync_status: SyncStatus,
    pub message: String,
}

impl ComponentStatus {
    pub fn simple(sync_status: SyncStatus) -> Self {
        Self {
            sync_status,
            message: String::new(),
        }
    }

    pub fn waiting(sync_status: SyncStatus, message: impl Into<String>) -> Self {
        Self {
            sync_status,
            message: message.into(),
        }
    }

    pub fn ready() -> Self {
        Self::simple(SyncStatus::Ready)
    }

    pub fn is_ready(&self) -> bool {
        self.sync_status == SyncStatus::Ready
    }

    /// Status as persisted in `status.components`.
    pub fn to_entry(&self, name: &str) -> ComponentStatusEntry {
        ComponentStatusEntry {
            name: name.to_string(),
            sync_status: self.sync_status.to_string(),
            message: self.message.clone(),
        }
    }
}

impl fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.sync_status)
        } else {
            write!(f, "{} ({})", self.sync_status, self.message)
        }
    }
}

/// Cluster-wide facts a component decision depends on.
#[derive(Clone, Copy, Debug)]
pub struct ClusterView<'a> {
    pub cluster_state: ClusterState,
    pub update_state: UpdateState,
    /// Statuses of components evaluated earlier in this pass.
    pub statuses: &'a BTreeMap<String, ComponentStatus>,
}

impl<'a> ClusterView<'a> {
    pub fn new(
        cluster_state: ClusterState,
        update_state: UpdateState,
        statuses: &'a BTreeMap<String, ComponentStatus>,
    ) -> Self {
        Self {
            cluster_state,
            update_state,
            statuses,
        }
    }
}
