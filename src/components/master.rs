//! Primary masters.
//!
//! The master has no dependencies. It owns two init jobs: `default`
//! bootstraps a fresh cluster, `exit-read-only` takes the masters out of
//! read-only mode at the end of every update episode.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Affinity, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm, Secret,
};
use kube::{Api, Client};
use tracing::{debug, info};

use crate::components::scripts::{
    AdminCredentials, MasterInit, exit_read_only_script, master_init_script,
};
use crate::components::{
    Component, ComponentStatus, HoldPhase, InitJob, JobBackend, PhaseStep, PodsRemovalPhase,
    Role, Server, SyncStatus, UpdatePhase,
};
use crate::controller::error::{Error, Result};
use crate::controller::status::ConditionStore;
use crate::crd::{ConditionStatus, MastersSpec, UpdateState, Ytsaurus};
use crate::resources::common::Labeller;
use crate::resources::services::pod_addresses;
use crate::resources::statefulset::ServerSpec;

/// Component name of the primary masters.
pub const MASTER: &str = "Master";
/// Component label of the primary masters.
pub const MASTER_LABEL: &str = "yt-master";
/// Bootstrap init job.
pub const INIT_JOB: &str = "default";
/// Init job leaving read-only mode.
pub const EXIT_READ_ONLY_JOB: &str = "exit-read-only";
/// Set once the exit-read-only job was prepared for a restart.
pub const EXIT_READ_ONLY_PREPARED: &str = "ExitReadOnlyPrepared";
/// Set once the masters left read-only mode.
pub const EXITED_READ_ONLY: &str = "ExitedReadOnly";

const DEFAULT_HOST_ADDRESS_LABEL: &str = "kubernetes.io/hostname";
const RPC_PORT: i32 = 9010;
const MONITORING_PORT: i32 = 10010;

const LOGIN_KEY: &str = "login";
const PASSWORD_KEY: &str = "password";
const TOKEN_KEY: &str = "token";

/// Source of Secret data.
#[async_trait]
pub trait SecretReader: Send + Sync {
    /// Data of the Secret `name`, `None` when it does not exist.
    async fn read(&self, name: &str) -> Result<Option<BTreeMap<String, String>>>;
}

/// Secret reader backed by the Kubernetes API.
pub struct KubeSecretReader {
    secrets: Api<Secret>,
}

impl KubeSecretReader {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            secrets: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl SecretReader for KubeSecretReader {
    async fn read(&self, name: &str) -> Result<Option<BTreeMap<String, String>>> {
        let Some(secret) = self.secrets.get_opt(name).await? else {
            return Ok(None);
        };

        let mut data: BTreeMap<String, String> = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, String::from_utf8_lossy(&v.0).into_owned()))
            .collect();
        if let Some(plain) = secret.string_data {
            data.extend(plain);
        }
        Ok(Some(data))
    }
}

/// Admin credentials from Secret data, defaulting every missing key.
pub fn admin_credentials(data: &BTreeMap<String, String>) -> AdminCredentials {
    let defaults = AdminCredentials::default();
    AdminCredentials {
        login: data.get(LOGIN_KEY).cloned().unwrap_or(defaults.login),
        password: data.get(PASSWORD_KEY).cloned().unwrap_or(defaults.password),
        token: data.get(TOKEN_KEY).cloned().unwrap_or(defaults.token),
    }
}

/// Data of the master role.
pub struct MasterRole {
    cell_tag: i32,
    master_addresses: Vec<String>,
    extra_media: Vec<String>,
    credentials_secret: Option<String>,
    secrets: Box<dyn SecretReader>,
    admin: AdminCredentials,
}

impl MasterRole {
    pub fn new(cluster: &Ytsaurus, cluster_domain: &str, secrets: Box<dyn SecretReader>) -> Self {
        Self {
            cell_tag: cluster.spec.primary_masters.cell_tag,
            master_addresses: pod_addresses(
                &master_labeller(cluster),
                &master_server_spec(cluster),
                cluster_domain,
            ),
            extra_media: cluster.extra_media(),
            credentials_secret: cluster
                .spec
                .admin_credentials
                .as_ref()
                .map(|secret| secret.name.clone()),
            secrets,
            admin: AdminCredentials::default(),
        }
    }

    pub fn admin(&self) -> &AdminCredentials {
        &self.admin
    }

    pub fn master_addresses(&self) -> &[String] {
        &self.master_addresses
    }

    /// Load the admin credentials Secret when one is referenced.
    pub async fn fetch(&mut self) -> Result<()> {
        let Some(name) = self.credentials_secret.as_deref() else {
            return Ok(());
        };
        let data = self.secrets.read(name).await?.ok_or_else(|| {
            Error::MissingField(format!("admin credentials secret {name} not found"))
        })?;
        self.admin = admin_credentials(&data);
        debug!(secret = %name, login = %self.admin.login, "Loaded admin credentials");
        Ok(())
    }

    /// Bootstrap job name and script.
    pub fn bootstrap(&self) -> (&'static str, String) {
        let script = master_init_script(&MasterInit {
            cell_tag: self.cell_tag,
            master_addresses: &self.master_addresses,
            admin: &self.admin,
            extra_media: &self.extra_media,
        });
        (INIT_JOB, script)
    }
}

pub fn master_labeller(cluster: &Ytsaurus) -> Labeller {
    Labeller::new(cluster, MASTER, MASTER_LABEL)
}

/// Workload of the primary masters.
pub fn master_server_spec(cluster: &Ytsaurus) -> ServerSpec {
    let masters = &cluster.spec.primary_masters;
    ServerSpec {
        statefulset_name: "ms".to_string(),
        service_name: "masters".to_string(),
        binary: "/usr/bin/ytserver-master",
        config_file: "ytserver-master.yson",
        rpc_port: RPC_PORT,
        monitoring_port: MONITORING_PORT,
        image: masters
            .instance
            .image
            .clone()
            .unwrap_or_else(|| cluster.spec.core_image.clone()),
        image_pull_secrets: cluster.spec.image_pull_secrets.clone(),
        instance: masters.instance.clone(),
        locations: Vec::new(),
        affinity: host_affinity(masters),
    }
}

/// Pin masters to `hostAddresses` when given.
pub fn host_affinity(masters: &MastersSpec) -> Option<Affinity> {
    if masters.host_addresses.is_empty() {
        return None;
    }

    let label = masters
        .host_address_label
        .as_deref()
        .filter(|label| !label.is_empty())
        .unwrap_or(DEFAULT_HOST_ADDRESS_LABEL);

    Some(Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_expressions: Some(vec![NodeSelectorRequirement {
                        key: label.to_string(),
                        operator: "In".to_string(),
                        values: Some(masters.host_addresses.clone()),
                    }]),
                    ..Default::default()
                }],
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Takes the masters out of read-only mode once their pods are recreated.
///
/// Each pass performs at most one of: prepare the job for a restart, drive
/// the job, record completion.
#[derive(Debug, Default)]
pub struct ExitReadOnlyPhase;

#[async_trait]
impl UpdatePhase for ExitReadOnlyPhase {
    fn name(&self) -> &'static str {
        "master-exit-read-only"
    }

    fn handles(&self, state: UpdateState) -> bool {
        state == UpdateState::WaitingForMasterExitReadOnly
    }

    async fn run(&self, mut step: PhaseStep<'_>, dry: bool) -> Result<ComponentStatus> {
        if !step.conditions.is_true(EXIT_READ_ONLY_PREPARED) {
            let mut conditions = step.conditions;
            let job = find_job(step.jobs, step.component)?;
            if !job.is_restart_prepared(&conditions) {
                job.prepare_restart(&mut conditions, dry).await?;
            }
            if !dry {
                conditions.set(
                    EXIT_READ_ONLY_PREPARED,
                    ConditionStatus::True,
                    "MasterExitReadOnlyPrepared",
                    "Masters are ready to exit read-only state",
                );
            }
            return Ok(ComponentStatus::simple(SyncStatus::Updating));
        }

        let completed = step.job(EXIT_READ_ONLY_JOB)?.is_completed();
        if !completed {
            let mut conditions = step.conditions;
            let job = find_job(step.jobs, step.component)?;
            job.set_script(exit_read_only_script());
            return job.sync(&mut conditions, dry).await;
        }

        if !dry {
            info!(component = %step.component, "Masters exited read-only state");
            step.conditions.set(
                EXITED_READ_ONLY,
                ConditionStatus::True,
                "MasterExitedReadOnly",
                "Masters exited read-only state",
            );
            step.conditions.set(
                EXIT_READ_ONLY_PREPARED,
                ConditionStatus::False,
                "MasterExitReadOnlyPrepared",
                "Masters are ready to exit read-only state",
            );
        }
        Ok(ComponentStatus::simple(SyncStatus::Updating))
    }
}

fn find_job<'a>(jobs: &'a mut [InitJob], component: &str) -> Result<&'a mut InitJob> {
    jobs.iter_mut()
        .find(|job| job.name() == EXIT_READ_ONLY_JOB)
        .ok_or_else(|| {
            Error::Invariant(format!(
                "component {component} has no init job {EXIT_READ_ONLY_JOB}"
            ))
        })
}

/// Backends the master component runs against.
pub struct MasterBackends {
    pub server: Box<dyn Server>,
    pub init_job: Box<dyn JobBackend>,
    pub exit_read_only_job: Box<dyn JobBackend>,
    pub secrets: Box<dyn SecretReader>,
}

/// Build the master component.
pub fn master(cluster: &Ytsaurus, cluster_domain: &str, backends: MasterBackends) -> Component {
    let role = MasterRole::new(cluster, cluster_domain, backends.secrets);
    Component::new(MASTER, Role::Master(Box::new(role)), backends.server)
        .with_job(InitJob::new(INIT_JOB, backends.init_job))
        .with_job(InitJob::new(EXIT_READ_ONLY_JOB, backends.exit_read_only_job))
        .with_phase(PodsRemovalPhase)
        .with_phase(ExitReadOnlyPhase)
        .with_phase(HoldPhase::default())
}
