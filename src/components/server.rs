//! Server workload of a component.
//!
//! A server is the StatefulSet plus headless Service running one role. The
//! decision logic only needs a handful of yes/no answers about it, which the
//! [`Server`] trait exposes. [`StatefulServer`] implements them against the
//! Kubernetes API; the pure comparisons live on [`ObservedWorkload`].

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client};
use tracing::{debug, info};

use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::{Error, Result};
use crate::resources::common::Labeller;
use crate::resources::services::generate_headless_service;
use crate::resources::statefulset::{ServerSpec, generate_statefulset, recorded_template_hash};

/// Workload operations used by the component decision function.
#[async_trait]
pub trait Server: Send + Sync {
    /// Load the StatefulSet, Service and pods as they currently exist.
    async fn fetch(&mut self) -> Result<()>;

    /// Objects are missing or differ from the desired state.
    fn need_sync(&self) -> bool;

    /// Pods run an outdated template and must be recreated.
    fn need_update(&self) -> bool;

    /// Every desired pod exists and reports Ready.
    fn are_pods_ready(&self) -> bool;

    /// The workload is scaled to zero and no pod is left.
    fn are_pods_removed(&self) -> bool;

    /// Create or update the StatefulSet and Service.
    async fn sync(&self) -> Result<()>;

    /// Scale the StatefulSet down to zero.
    async fn remove_pods(&self) -> Result<()>;
}

/// Desired StatefulSet and Service of a role.
#[derive(Clone, Debug)]
pub struct DesiredWorkload {
    pub statefulset: StatefulSet,
    pub service: Service,
    template_hash: String,
    replicas: i32,
}

impl DesiredWorkload {
    pub fn new(labeller: &Labeller, server: &ServerSpec) -> Result<Self> {
        let statefulset = generate_statefulset(labeller, server)?;
        let template_hash = recorded_template_hash(&statefulset)
            .map(str::to_string)
            .ok_or_else(|| Error::MissingField("pod template hash annotation".to_string()))?;
        Ok(Self {
            statefulset,
            service: generate_headless_service(labeller, server),
            template_hash,
            replicas: server.instance.instance_count,
        })
    }

    pub fn template_hash(&self) -> &str {
        &self.template_hash
    }

    pub fn replicas(&self) -> i32 {
        self.replicas
    }
}

/// Workload objects as observed at the start of a pass.
#[derive(Clone, Debug, Default)]
pub struct ObservedWorkload {
    pub statefulset: Option<StatefulSet>,
    pub service: Option<Service>,
    pub pods: Vec<Pod>,
}

impl ObservedWorkload {
    fn replicas(&self) -> Option<i32> {
        self.statefulset
            .as_ref()
            .and_then(|sts| sts.spec.as_ref())
            .and_then(|spec| spec.replicas)
    }

    fn template_drifted(&self, desired: &DesiredWorkload) -> bool {
        self.statefulset
            .as_ref()
            .is_some_and(|sts| recorded_template_hash(sts) != Some(desired.template_hash()))
    }

    pub fn need_sync(&self, desired: &DesiredWorkload) -> bool {
        self.statefulset.is_none()
            || self.service.is_none()
            || self.template_drifted(desired)
            || self.replicas() != Some(desired.replicas())
    }

    pub fn need_update(&self, desired: &DesiredWorkload) -> bool {
        self.template_drifted(desired)
    }

    pub fn are_pods_ready(&self, desired: &DesiredWorkload) -> bool {
        let expected = usize::try_from(desired.replicas()).unwrap_or(0);
        self.pods.len() == expected && self.pods.iter().all(is_pod_ready)
    }

    pub fn are_pods_removed(&self) -> bool {
        match &self.statefulset {
            None => true,
            Some(_) => self.replicas() == Some(0) && self.pods.is_empty(),
        }
    }
}

/// Pod is running, not being deleted and reports the Ready condition.
pub fn is_pod_ready(pod: &Pod) -> bool {
    if pod.metadata.deletion_timestamp.is_some() {
        return false;
    }
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Server backed by the Kubernetes API.
pub struct StatefulServer {
    labeller: Labeller,
    desired: DesiredWorkload,
    observed: ObservedWorkload,
    statefulsets: Api<StatefulSet>,
    services: Api<Service>,
    pods: Api<Pod>,
}

impl StatefulServer {
    pub fn new(client: Client, labeller: Labeller, desired: DesiredWorkload) -> Self {
        let namespace = labeller.namespace().to_string();
        Self {
            labeller,
            desired,
            observed: ObservedWorkload::default(),
            statefulsets: Api::namespaced(client.clone(), &namespace),
            services: Api::namespaced(client.clone(), &namespace),
            pods: Api::namespaced(client, &namespace),
        }
    }

    fn statefulset_name(&self) -> String {
        self.desired.statefulset.metadata.name.clone().unwrap_or_default()
    }

    fn service_name(&self) -> String {
        self.desired.service.metadata.name.clone().unwrap_or_default()
    }
}

#[async_trait]
impl Server for StatefulServer {
    async fn fetch(&mut self) -> Result<()> {
        let statefulset = self.statefulsets.get_opt(&self.statefulset_name()).await?;
        let service = self.services.get_opt(&self.service_name()).await?;
        let pods = self
            .pods
            .list(&ListParams::default().labels(&self.labeller.pod_selector()))
            .await?
            .items;

        debug!(
            component = %self.labeller.component_name,
            statefulset = statefulset.is_some(),
            service = service.is_some(),
            pods = pods.len(),
            "Fetched server workload"
        );

        self.observed = ObservedWorkload {
            statefulset,
            service,
            pods,
        };
        Ok(())
    }

    fn need_sync(&self) -> bool {
        self.observed.need_sync(&self.desired)
    }

    fn need_update(&self) -> bool {
        self.observed.need_update(&self.desired)
    }

    fn are_pods_ready(&self) -> bool {
        self.observed.are_pods_ready(&self.desired)
    }

    fn are_pods_removed(&self) -> bool {
        self.observed.are_pods_removed()
    }

    async fn sync(&self) -> Result<()> {
        let params = PatchParams::apply(FIELD_MANAGER).force();

        self.services
            .patch(
                &self.service_name(),
                &params,
                &Patch::Apply(&self.desired.service),
            )
            .await?;
        self.statefulsets
            .patch(
                &self.statefulset_name(),
                &params,
                &Patch::Apply(&self.desired.statefulset),
            )
            .await?;

        info!(
            component = %self.labeller.component_name,
            statefulset = %self.statefulset_name(),
            replicas = self.desired.replicas(),
            "Applied server workload"
        );
        Ok(())
    }

    async fn remove_pods(&self) -> Result<()> {
        if self.observed.statefulset.is_none() {
            return Ok(());
        }

        let patch = serde_json::json!({ "spec": { "replicas": 0 } });
        self.statefulsets
            .patch(
                &self.statefulset_name(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;

        info!(
            component = %self.labeller.component_name,
            statefulset = %self.statefulset_name(),
            "Scaled server workload to zero"
        );
        Ok(())
    }
}
