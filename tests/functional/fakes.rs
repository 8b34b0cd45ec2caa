//! In-memory stand-ins for the Kubernetes objects the components manage.
//!
//! A [`World`] holds the simulated state of every StatefulSet, Job and
//! Secret. The fake backends read it in `fetch` and write it in their
//! mutating calls, so effects of one pass are only observed by the next,
//! just like against a real API server. Pods do not move on their own:
//! tests call [`World::settle`] and [`World::complete_jobs`] between passes
//! to play the part of the kubelet and the job controller.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use ytsaurus_operator::components::master::{
    EXIT_READ_ONLY_JOB, INIT_JOB, MASTER, MasterBackends, SecretReader, master, master_labeller,
    master_server_spec,
};
use ytsaurus_operator::components::data_node::{
    data_node, data_node_labeller, data_node_name, data_node_server_spec,
};
use ytsaurus_operator::components::server::DesiredWorkload;
use ytsaurus_operator::components::{
    Component, ComponentGraph, ExecutionUnit, JobBackend, Server, UnitState,
};
use ytsaurus_operator::controller::error::Result;
use ytsaurus_operator::crd::Ytsaurus;
use ytsaurus_operator::resources::common::Labeller;
use ytsaurus_operator::resources::statefulset::ServerSpec;

pub const CLUSTER_DOMAIN: &str = "cluster.local";

/// Observed state of one StatefulSet and its pods.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Workload {
    pub template_hash: String,
    pub replicas: i32,
    pub pods: i32,
    pub ready_pods: i32,
    /// Pods never become ready.
    pub broken: bool,
}

#[derive(Debug, Default)]
pub struct WorldState {
    pub workloads: BTreeMap<String, Workload>,
    pub jobs: BTreeMap<String, ExecutionUnit>,
    /// Every script a job was created with, in creation order.
    pub job_scripts: Vec<(String, String)>,
    pub secrets: BTreeMap<String, BTreeMap<String, String>>,
    pub mutations: Vec<String>,
}

/// Shared handle to the simulated cluster.
#[derive(Clone, Debug, Default)]
pub struct World(Arc<Mutex<WorldState>>);

pub fn job_key(component: &str, job: &str) -> String {
    format!("{component}/{job}")
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, WorldState> {
        self.0.lock().unwrap()
    }

    pub fn server(&self, component: &str, desired: &DesiredWorkload) -> Box<dyn Server> {
        Box::new(FakeServer {
            component: component.to_string(),
            template_hash: desired.template_hash().to_string(),
            replicas: desired.replicas(),
            world: self.clone(),
            observed: None,
        })
    }

    pub fn job(&self, component: &str, job: &str) -> Box<dyn JobBackend> {
        Box::new(FakeJobBackend {
            key: job_key(component, job),
            world: self.clone(),
            observed: None,
        })
    }

    pub fn secrets(&self) -> Box<dyn SecretReader> {
        Box::new(FakeSecrets {
            world: self.clone(),
        })
    }

    pub fn add_secret(&self, name: &str, data: &[(&str, &str)]) {
        self.state().secrets.insert(
            name.to_string(),
            data.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
    }

    /// Pods follow the replica count and become ready unless broken.
    pub fn settle(&self) {
        for workload in self.state().workloads.values_mut() {
            workload.pods = workload.replicas;
            workload.ready_pods = if workload.broken { 0 } else { workload.replicas };
        }
    }

    /// Every running job finishes successfully.
    pub fn complete_jobs(&self) {
        for unit in self.state().jobs.values_mut() {
            if unit.state == UnitState::Running {
                unit.state = UnitState::Succeeded;
            }
        }
    }

    pub fn fail_job(&self, component: &str, job: &str, reason: &str) {
        if let Some(unit) = self.state().jobs.get_mut(&job_key(component, job)) {
            unit.state = UnitState::Failed(reason.to_string());
        }
    }

    pub fn break_pods(&self, component: &str) {
        if let Some(workload) = self.state().workloads.get_mut(component) {
            workload.broken = true;
            workload.ready_pods = 0;
        }
    }

    pub fn workload(&self, component: &str) -> Option<Workload> {
        self.state().workloads.get(component).cloned()
    }

    pub fn unit(&self, component: &str, job: &str) -> Option<ExecutionUnit> {
        self.state().jobs.get(&job_key(component, job)).cloned()
    }

    /// Scripts the given job was created with.
    pub fn scripts(&self, component: &str, job: &str) -> Vec<String> {
        let key = job_key(component, job);
        self.state()
            .job_scripts
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, script)| script.clone())
            .collect()
    }

    pub fn take_mutations(&self) -> Vec<String> {
        std::mem::take(&mut self.state().mutations)
    }
}

struct FakeServer {
    component: String,
    template_hash: String,
    replicas: i32,
    world: World,
    observed: Option<Workload>,
}

#[async_trait]
impl Server for FakeServer {
    async fn fetch(&mut self) -> Result<()> {
        self.observed = self.world.workload(&self.component);
        Ok(())
    }

    fn need_sync(&self) -> bool {
        match &self.observed {
            None => true,
            Some(w) => w.template_hash != self.template_hash || w.replicas != self.replicas,
        }
    }

    fn need_update(&self) -> bool {
        self.observed
            .as_ref()
            .is_some_and(|w| w.template_hash != self.template_hash)
    }

    fn are_pods_ready(&self) -> bool {
        self.observed
            .as_ref()
            .is_some_and(|w| w.pods == self.replicas && w.ready_pods == w.pods)
    }

    fn are_pods_removed(&self) -> bool {
        self.observed.as_ref().is_none_or(|w| w.pods == 0)
    }

    async fn sync(&self) -> Result<()> {
        let mut state = self.world.state();
        let workload = state.workloads.entry(self.component.clone()).or_default();
        workload.template_hash = self.template_hash.clone();
        workload.replicas = self.replicas;
        state.mutations.push(format!("sync {}", self.component));
        Ok(())
    }

    async fn remove_pods(&self) -> Result<()> {
        let mut state = self.world.state();
        if let Some(workload) = state.workloads.get_mut(&self.component) {
            workload.replicas = 0;
        }
        state.mutations.push(format!("remove-pods {}", self.component));
        Ok(())
    }
}

struct FakeJobBackend {
    key: String,
    world: World,
    observed: Option<ExecutionUnit>,
}

#[async_trait]
impl JobBackend for FakeJobBackend {
    async fn fetch(&mut self) -> Result<()> {
        self.observed = self.world.state().jobs.get(&self.key).cloned();
        Ok(())
    }

    fn unit(&self) -> Option<&ExecutionUnit> {
        self.observed.as_ref()
    }

    async fn create(&self, script: &str, script_hash: &str) -> Result<()> {
        let mut state = self.world.state();
        state.jobs.insert(
            self.key.clone(),
            ExecutionUnit {
                script_hash: script_hash.to_string(),
                state: UnitState::Running,
                terminating: false,
            },
        );
        state
            .job_scripts
            .push((self.key.clone(), script.to_string()));
        state.mutations.push(format!("create-job {}", self.key));
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        let mut state = self.world.state();
        state.jobs.remove(&self.key);
        state.mutations.push(format!("delete-job {}", self.key));
        Ok(())
    }
}

struct FakeSecrets {
    world: World,
}

#[async_trait]
impl SecretReader for FakeSecrets {
    async fn read(&self, name: &str) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self.world.state().secrets.get(name).cloned())
    }
}

fn desired(labeller: &Labeller, spec: &ServerSpec) -> DesiredWorkload {
    DesiredWorkload::new(labeller, spec).unwrap()
}

/// Master component of `cluster` against the simulated world.
pub fn master_component(world: &World, cluster: &Ytsaurus) -> Component {
    let desired = desired(&master_labeller(cluster), &master_server_spec(cluster));
    master(
        cluster,
        CLUSTER_DOMAIN,
        MasterBackends {
            server: world.server(MASTER, &desired),
            init_job: world.job(MASTER, INIT_JOB),
            exit_read_only_job: world.job(MASTER, EXIT_READ_ONLY_JOB),
            secrets: world.secrets(),
        },
    )
}

/// Build the component graph of `cluster` against the simulated world.
pub fn graph(world: &World, cluster: &Ytsaurus) -> ComponentGraph {
    let mut components = vec![master_component(world, cluster)];
    for group in &cluster.spec.data_nodes {
        let name = data_node_name(group);
        let spec = data_node_server_spec(cluster, group);
        let desired = desired(&data_node_labeller(cluster, group), &spec);
        components.push(data_node(group, world.server(&name, &desired)));
    }
    ComponentGraph::new(components).unwrap()
}
