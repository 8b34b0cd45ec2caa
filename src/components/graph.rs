//! Dependency graph of the components of one cluster.
//!
//! Components are kept in a topological order fixed at construction, so a
//! component is always evaluated after everything it depends on. Duplicate
//! names, unknown dependencies and cycles are rejected as invariant
//! violations.

use std::collections::{BTreeMap, BTreeSet};

use kube::Client;
use tracing::debug;

use crate::components::data_node::{data_node, data_node_labeller, data_node_server_spec};
use crate::components::init_job::KubeJobBackend;
use crate::components::master::{
    EXIT_READ_ONLY_JOB, INIT_JOB, KubeSecretReader, MasterBackends, master, master_labeller,
    master_server_spec,
};
use crate::components::server::{DesiredWorkload, StatefulServer};
use crate::components::{ClusterView, Component, ComponentStatus};
use crate::controller::error::{Error, Result};
use crate::controller::status::UpdateConditions;
use crate::crd::{ClusterState, UpdateState, Ytsaurus};
use crate::resources::common::Labeller;
use crate::resources::job::InitJobTemplate;

/// Components of one cluster in evaluation order.
pub struct ComponentGraph {
    components: Vec<Component>,
}

impl std::fmt::Debug for ComponentGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentGraph")
            .field("order", &self.names())
            .finish()
    }
}

impl ComponentGraph {
    /// Order `components` so that dependencies come first. Among components
    /// whose dependencies are satisfied, the input order is kept.
    pub fn new(components: Vec<Component>) -> Result<Self> {
        let mut known = BTreeSet::new();
        for component in &components {
            if !known.insert(component.name().to_string()) {
                return Err(Error::Invariant(format!(
                    "duplicate component {}",
                    component.name()
                )));
            }
        }
        for component in &components {
            if let Some(unknown) = component
                .dependencies()
                .iter()
                .find(|dep| !known.contains(dep.as_str()))
            {
                return Err(Error::Invariant(format!(
                    "component {} depends on unknown component {}",
                    component.name(),
                    unknown
                )));
            }
        }

        let mut pending = components;
        let mut ordered = Vec::with_capacity(pending.len());
        let mut placed = BTreeSet::new();
        while !pending.is_empty() {
            let next = pending.iter().position(|component| {
                component
                    .dependencies()
                    .iter()
                    .all(|dep| placed.contains(dep.as_str()))
            });
            let Some(index) = next else {
                let names: Vec<&str> = pending.iter().map(Component::name).collect();
                return Err(Error::Invariant(format!(
                    "dependency cycle between components {}",
                    names.join(", ")
                )));
            };
            let component = pending.remove(index);
            placed.insert(component.name().to_string());
            ordered.push(component);
        }

        Ok(Self {
            components: ordered,
        })
    }

    /// Build the components of `cluster` against the Kubernetes API.
    pub fn for_cluster(client: Client, cluster: &Ytsaurus, cluster_domain: &str) -> Result<Self> {
        let image_pull_secrets = cluster.spec.image_pull_secrets.clone();
        let job_template = |labeller: Labeller, job: &str| InitJobTemplate {
            labeller,
            job: job.to_string(),
            image: cluster.spec.core_image.clone(),
            image_pull_secrets: image_pull_secrets.clone(),
        };

        let labeller = master_labeller(cluster);
        let desired = DesiredWorkload::new(&labeller, &master_server_spec(cluster))?;
        let mut components = vec![master(
            cluster,
            cluster_domain,
            MasterBackends {
                server: Box::new(StatefulServer::new(client.clone(), labeller.clone(), desired)),
                init_job: Box::new(KubeJobBackend::new(
                    client.clone(),
                    job_template(labeller.clone(), INIT_JOB),
                )),
                exit_read_only_job: Box::new(KubeJobBackend::new(
                    client.clone(),
                    job_template(labeller.clone(), EXIT_READ_ONLY_JOB),
                )),
                secrets: Box::new(KubeSecretReader::new(client.clone(), labeller.namespace())),
            },
        )];

        for group in &cluster.spec.data_nodes {
            let labeller = data_node_labeller(cluster, group);
            let desired = DesiredWorkload::new(&labeller, &data_node_server_spec(cluster, group))?;
            components.push(data_node(
                group,
                Box::new(StatefulServer::new(client.clone(), labeller, desired)),
            ));
        }

        Self::new(components)
    }

    /// Component names in evaluation order.
    pub fn names(&self) -> Vec<&str> {
        self.components.iter().map(Component::name).collect()
    }

    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name() == name)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Fetch every component.
    pub async fn fetch_all(&mut self) -> Result<()> {
        for component in &mut self.components {
            component.fetch().await?;
        }
        Ok(())
    }

    /// Status of every component, each one seeing the statuses of the
    /// components evaluated before it.
    pub async fn statuses(
        &mut self,
        cluster_state: ClusterState,
        update_state: UpdateState,
        conditions: &UpdateConditions,
    ) -> Result<BTreeMap<String, ComponentStatus>> {
        let mut statuses = BTreeMap::new();
        for component in &mut self.components {
            let view = ClusterView::new(cluster_state, update_state, &statuses);
            let status = component.status(view, conditions).await?;
            debug!(component = %component.name(), status = %status, "Component status");
            statuses.insert(component.name().to_string(), status);
        }
        Ok(statuses)
    }

    /// Sync every component in order. Dependency gating uses `statuses`, the
    /// dry-run statuses computed at the start of the pass, so that a
    /// dependency mutated earlier in the same pass is only trusted once its
    /// effects were observed.
    pub async fn sync_all(
        &mut self,
        cluster_state: ClusterState,
        update_state: UpdateState,
        conditions: &mut UpdateConditions,
        statuses: &BTreeMap<String, ComponentStatus>,
    ) -> Result<BTreeMap<String, ComponentStatus>> {
        let view = ClusterView::new(cluster_state, update_state, statuses);
        let mut results = BTreeMap::new();
        for component in &mut self.components {
            let status = component.sync(view, conditions).await?;
            debug!(component = %component.name(), status = %status, "Component synced");
            results.insert(component.name().to_string(), status);
        }
        Ok(results)
    }
}
