//! The component decision function.
//!
//! Every role goes through the same priority list; roles only differ in the
//! data they carry ([`Role`]), the init jobs they own and the update phases
//! they register. `status` and `sync` both call [`Component::decide`], the
//! former with `dry` set and on a copy of the update conditions.

use tracing::debug;

use crate::components::data_node::DataNodeRole;
use crate::components::master::MasterRole;
use crate::components::{
    ClusterView, ComponentStatus, InitJob, PhaseStep, Server, SyncStatus, UpdatePhase,
};
use crate::controller::error::{Error, Result};
use crate::controller::status::UpdateConditions;
use crate::crd::ClusterState;

/// Role specific data and hooks.
pub enum Role {
    Master(Box<MasterRole>),
    DataNode(DataNodeRole),
}

impl Role {
    /// Short role name for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Role::Master(_) => "master",
            Role::DataNode(_) => "data-node",
        }
    }

    /// Load role inputs that live outside the workload, such as credentials.
    pub async fn fetch(&mut self) -> Result<()> {
        match self {
            Role::Master(master) => master.fetch().await,
            Role::DataNode(_) => Ok(()),
        }
    }

    /// Name and script of the bootstrap init job, if the role has one.
    pub fn bootstrap(&self) -> Option<(&'static str, String)> {
        match self {
            Role::Master(master) => Some(master.bootstrap()),
            Role::DataNode(_) => None,
        }
    }
}

/// One role of the cluster together with everything it manages.
pub struct Component {
    name: String,
    role: Role,
    dependencies: Vec<String>,
    server: Box<dyn Server>,
    jobs: Vec<InitJob>,
    phases: Vec<Box<dyn UpdatePhase>>,
}

impl Component {
    pub fn new(name: &str, role: Role, server: Box<dyn Server>) -> Self {
        Self {
            name: name.to_string(),
            role,
            dependencies: Vec::new(),
            server,
            jobs: Vec::new(),
            phases: Vec::new(),
        }
    }

    /// Require `name` to be `Ready` before this component acts.
    pub fn with_dependency(mut self, name: &str) -> Self {
        self.dependencies.push(name.to_string());
        self
    }

    pub fn with_job(mut self, job: InitJob) -> Self {
        self.jobs.push(job);
        self
    }

    /// Register a handler for one or more update states. The first handler
    /// claiming a state wins.
    pub fn with_phase(mut self, phase: impl UpdatePhase + 'static) -> Self {
        self.phases.push(Box::new(phase));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn job(&self, name: &str) -> Option<&InitJob> {
        self.jobs.iter().find(|job| job.name() == name)
    }

    /// Re-attach to the objects created in earlier passes.
    pub async fn fetch(&mut self) -> Result<()> {
        self.server.fetch().await?;
        for job in &mut self.jobs {
            job.fetch().await?;
        }
        self.role.fetch().await
    }

    /// Decide the next action without performing it.
    pub async fn status(
        &mut self,
        view: ClusterView<'_>,
        conditions: &UpdateConditions,
    ) -> Result<ComponentStatus> {
        let mut scratch = conditions.clone();
        self.decide(view, &mut scratch, true).await
    }

    /// Decide the next action and perform it.
    pub async fn sync(
        &mut self,
        view: ClusterView<'_>,
        conditions: &mut UpdateConditions,
    ) -> Result<ComponentStatus> {
        self.decide(view, conditions, false).await
    }

    async fn decide(
        &mut self,
        view: ClusterView<'_>,
        conditions: &mut UpdateConditions,
        dry: bool,
    ) -> Result<ComponentStatus> {
        if view.cluster_state == ClusterState::Running && self.server.need_update() {
            return Ok(ComponentStatus::simple(SyncStatus::NeedFullUpdate));
        }

        if view.cluster_state == ClusterState::Updating {
            if let Some(phase) = self.phases.iter().find(|p| p.handles(view.update_state)) {
                debug!(
                    component = %self.name,
                    phase = phase.name(),
                    update_state = %view.update_state,
                    dry,
                    "Running update phase"
                );
                let step = PhaseStep {
                    component: &self.name,
                    server: self.server.as_ref(),
                    jobs: &mut self.jobs,
                    conditions: conditions.scoped(&self.name),
                };
                return phase.run(step, dry).await;
            }
        }

        for dependency in &self.dependencies {
            let status = view.statuses.get(dependency).ok_or_else(|| {
                Error::Invariant(format!(
                    "dependency {} of {} was not evaluated before it",
                    dependency, self.name
                ))
            })?;
            if !status.is_ready() {
                return Ok(ComponentStatus::waiting(
                    SyncStatus::Blocked,
                    dependency.clone(),
                ));
            }
        }

        if self.server.need_sync() {
            if !dry {
                self.server.sync().await?;
            }
            return Ok(ComponentStatus::waiting(SyncStatus::Pending, "components"));
        }

        if !self.server.are_pods_ready() {
            return Ok(ComponentStatus::waiting(SyncStatus::Blocked, "pods"));
        }

        if let Some((job_name, script)) = self.role.bootstrap() {
            let job = self
                .jobs
                .iter_mut()
                .find(|job| job.name() == job_name)
                .ok_or_else(|| {
                    Error::Invariant(format!("component {} has no init job {}", self.name, job_name))
                })?;
            job.set_script(script);
            let mut scoped = conditions.scoped(&self.name);
            return job.sync(&mut scoped, dry).await;
        }

        Ok(ComponentStatus::ready())
    }
}
