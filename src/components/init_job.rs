//! One-shot idempotent init jobs.
//!
//! An init job runs a script to completion exactly once per script content.
//! At most one execution unit (Job + ConfigMap) exists at any time:
//!
//! | Observed unit | Action | Status |
//! |---------------|--------|--------|
//! | built from another script | delete | Pending |
//! | none | create, clear restart flag | Pending |
//! | running or terminating | wait | Pending |
//! | failed | delete for recreation, record reason | Pending (with reason) |
//! | succeeded | clear recorded failure | Ready |
//!
//! The failure reason is kept in `<Job>InitJobFailed` so that every
//! `Pending` status carries it until a unit built from the same script
//! succeeds or the script changes.
//!
//! Restarting a job that already succeeded with the same script (as the
//! master read-only exit needs on every update episode) goes through
//! [`InitJob::prepare_restart`], which tears the unit down and records the
//! fact in an update-scoped condition.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use tracing::{debug, info, warn};

use crate::components::{ComponentStatus, SyncStatus};
use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::{Error, Result};
use crate::controller::status::{ConditionStore, ScopedConditions, UpdateConditions};
use crate::crd::ConditionStatus;
use crate::resources::common::sha256_hex;
use crate::resources::job::{
    InitJobTemplate, generate_init_job, generate_script_configmap, recorded_script_hash,
};

/// Lifecycle state of an execution unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnitState {
    Running,
    Succeeded,
    Failed(String),
}

/// The single Job of an init job as observed at the start of a pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionUnit {
    /// Hash of the script the unit was built from.
    pub script_hash: String,
    pub state: UnitState,
    /// Deletion has been requested but the object still exists.
    pub terminating: bool,
}

impl ExecutionUnit {
    /// Derive the unit from an observed Job.
    pub fn from_job(job: &Job) -> Self {
        let status = job.status.as_ref();
        let condition_true = |kind: &str| {
            status
                .and_then(|s| s.conditions.as_ref())
                .and_then(|conditions| {
                    conditions
                        .iter()
                        .find(|c| c.type_ == kind && c.status == "True")
                })
        };

        let state = if condition_true("Complete").is_some()
            || status.and_then(|s| s.succeeded).unwrap_or(0) > 0
        {
            UnitState::Succeeded
        } else if let Some(failed) = condition_true("Failed") {
            UnitState::Failed(
                failed
                    .message
                    .clone()
                    .or_else(|| failed.reason.clone())
                    .unwrap_or_else(|| "job failed".to_string()),
            )
        } else {
            UnitState::Running
        };

        Self {
            script_hash: recorded_script_hash(job).unwrap_or_default().to_string(),
            state,
            terminating: job.metadata.deletion_timestamp.is_some(),
        }
    }
}

/// Storage of execution units.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Load the current unit, if any.
    async fn fetch(&mut self) -> Result<()>;

    /// Unit observed by the last fetch.
    fn unit(&self) -> Option<&ExecutionUnit>;

    /// Create a unit running `script`.
    async fn create(&self, script: &str, script_hash: &str) -> Result<()>;

    /// Delete the current unit.
    async fn delete(&self) -> Result<()>;
}

/// Init job of a component.
pub struct InitJob {
    name: String,
    condition_prefix: String,
    script: Option<String>,
    backend: Box<dyn JobBackend>,
}

impl InitJob {
    /// `name` is the short job name, e.g. `default` or `exit-read-only`.
    pub fn new(name: &str, backend: Box<dyn JobBackend>) -> Self {
        Self {
            name: name.to_string(),
            condition_prefix: camel_case(name),
            script: None,
            backend,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn fetch(&mut self) -> Result<()> {
        self.backend.fetch().await
    }

    /// Assign the script the next unit must run.
    pub fn set_script(&mut self, script: String) {
        self.script = Some(script);
    }

    pub fn script(&self) -> Option<&str> {
        self.script.as_deref()
    }

    /// Name of the restart condition relative to the owning component, e.g.
    /// `ExitReadOnlyInitJobRestartPrepared`.
    pub fn restart_condition(&self) -> String {
        format!("{}InitJobRestartPrepared", self.condition_prefix)
    }

    /// Name of the condition holding the last failure reason, e.g.
    /// `DefaultInitJobFailed`.
    pub fn failure_condition(&self) -> String {
        format!("{}InitJobFailed", self.condition_prefix)
    }

    /// `Pending` status, with the recorded failure appended while one is set.
    fn pending(&self, conditions: &ScopedConditions<'_>, message: String) -> ComponentStatus {
        let failure = self.failure_condition();
        let message = match conditions.message(&failure) {
            Some(reason) if conditions.is_true(&failure) => {
                format!("{message}; last run failed: {reason}")
            }
            _ => message,
        };
        ComponentStatus::waiting(SyncStatus::Pending, message)
    }

    fn clear_failure(&self, conditions: &mut ScopedConditions<'_>, reason: &str) {
        let failure = self.failure_condition();
        if conditions.is_true(&failure) {
            conditions.set(&failure, ConditionStatus::False, reason, "");
        }
    }

    pub fn is_restart_prepared(&self, conditions: &ScopedConditions<'_>) -> bool {
        conditions.is_true(&self.restart_condition())
    }

    /// Tear down any unit left from a previous run, even one built from the
    /// current script, and mark the job as prepared for a restart.
    pub async fn prepare_restart(
        &self,
        conditions: &mut ScopedConditions<'_>,
        dry: bool,
    ) -> Result<()> {
        if dry {
            return Ok(());
        }

        if let Some(unit) = self.backend.unit() {
            if !unit.terminating {
                info!(job = %self.name, "Removing previous init job before restart");
                self.backend.delete().await?;
            }
        }

        conditions.set(
            &self.restart_condition(),
            ConditionStatus::True,
            "RestartPrepared",
            &format!("Init job {} prepared for restart", self.name),
        );
        Ok(())
    }

    fn script_hash(&self) -> Option<String> {
        self.script.as_deref().map(|s| sha256_hex(s.as_bytes()))
    }

    /// The unit finished successfully and was built from the current script.
    pub fn is_completed(&self) -> bool {
        let Some(unit) = self.backend.unit() else {
            return false;
        };
        if unit.terminating || unit.state != UnitState::Succeeded {
            return false;
        }
        match self.script_hash() {
            Some(hash) => unit.script_hash == hash,
            None => true,
        }
    }

    /// Status without side effects.
    pub async fn status(&self) -> Result<ComponentStatus> {
        let mut scratch = UpdateConditions::default();
        let mut conditions = scratch.scoped("");
        self.sync(&mut conditions, true).await
    }

    /// Drive the unit one step toward completion.
    pub async fn sync(
        &self,
        conditions: &mut ScopedConditions<'_>,
        dry: bool,
    ) -> Result<ComponentStatus> {
        let script = self.script.as_deref().ok_or_else(|| {
            Error::Invariant(format!("init job {} synced without a script", self.name))
        })?;
        let hash = sha256_hex(script.as_bytes());

        let Some(unit) = self.backend.unit() else {
            if !dry {
                self.backend.create(script, &hash).await?;
                conditions.set(
                    &self.restart_condition(),
                    ConditionStatus::False,
                    "JobCreated",
                    &format!("Init job {} created", self.name),
                );
                info!(job = %self.name, "Created init job");
            }
            return Ok(self.pending(conditions, format!("{} init job created", self.name)));
        };

        if unit.terminating {
            return Ok(self.pending(conditions, format!("{} init job terminating", self.name)));
        }

        if unit.script_hash != hash {
            if !dry {
                info!(job = %self.name, "Init job script changed, removing stale job");
                self.backend.delete().await?;
                self.clear_failure(conditions, "ScriptChanged");
            }
            return Ok(ComponentStatus::waiting(
                SyncStatus::Pending,
                format!("{} init job script changed", self.name),
            ));
        }

        match &unit.state {
            UnitState::Running => {
                debug!(job = %self.name, "Init job running");
                Ok(self.pending(conditions, format!("{} init job running", self.name)))
            }
            UnitState::Failed(reason) => {
                if !dry {
                    warn!(job = %self.name, reason = %reason, "Init job failed, recreating");
                    self.backend.delete().await?;
                    conditions.set(
                        &self.failure_condition(),
                        ConditionStatus::True,
                        "JobFailed",
                        reason,
                    );
                }
                Ok(ComponentStatus::waiting(
                    SyncStatus::Pending,
                    format!("{} init job failed: {}", self.name, reason),
                ))
            }
            UnitState::Succeeded => {
                if !dry {
                    self.clear_failure(conditions, "JobSucceeded");
                }
                Ok(ComponentStatus::ready())
            }
        }
    }
}

/// `exit-read-only` -> `ExitReadOnly`
fn camel_case(name: &str) -> String {
    name.split(['-', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Job backend backed by the Kubernetes API.
pub struct KubeJobBackend {
    template: InitJobTemplate,
    jobs: Api<Job>,
    config_maps: Api<ConfigMap>,
    unit: Option<ExecutionUnit>,
}

impl KubeJobBackend {
    pub fn new(client: Client, template: InitJobTemplate) -> Self {
        let namespace = template.labeller.namespace().to_string();
        Self {
            template,
            jobs: Api::namespaced(client.clone(), &namespace),
            config_maps: Api::namespaced(client, &namespace),
            unit: None,
        }
    }
}

#[async_trait]
impl JobBackend for KubeJobBackend {
    async fn fetch(&mut self) -> Result<()> {
        self.unit = self
            .jobs
            .get_opt(&self.template.job_name())
            .await?
            .as_ref()
            .map(ExecutionUnit::from_job);
        Ok(())
    }

    fn unit(&self) -> Option<&ExecutionUnit> {
        self.unit.as_ref()
    }

    async fn create(&self, script: &str, script_hash: &str) -> Result<()> {
        let config_map = generate_script_configmap(&self.template, script);
        let params = PatchParams::apply(FIELD_MANAGER).force();
        self.config_maps
            .patch(
                &self.template.config_map_name(),
                &params,
                &Patch::Apply(&config_map),
            )
            .await?;

        let job = generate_init_job(&self.template, script_hash);
        match self.jobs.create(&PostParams::default(), &job).await {
            Ok(_) => Ok(()),
            // Created by an earlier pass whose result was not observed yet
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self) -> Result<()> {
        match self
            .jobs
            .delete(&self.template.job_name(), &DeleteParams::foreground())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
