//! Common resource generation utilities.
//!
//! Provides labels, owner references, object names and the pod template hash
//! shared by every object a component manages.

use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::controller::error::Result;
use crate::crd::Ytsaurus;

/// Value of `app.kubernetes.io/managed-by` on every managed object
pub const MANAGED_BY: &str = "ytsaurus-operator";

/// Annotation carrying the hash of the pod template a StatefulSet was built from
pub const POD_TEMPLATE_HASH_ANNOTATION: &str = "ytsaurus.tech/pod-template-hash";

/// Annotation carrying the hash of the script an init job was built from
pub const SCRIPT_HASH_ANNOTATION: &str = "ytsaurus.tech/script-hash";

/// Create owner reference for a Ytsaurus cluster
pub fn owner_reference(resource: &Ytsaurus) -> OwnerReference {
    OwnerReference {
        api_version: Ytsaurus::api_version(&()).to_string(),
        kind: Ytsaurus::kind(&()).to_string(),
        name: resource.name_any(),
        uid: resource.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Lowercase hex SHA-256 of arbitrary bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Hash of a pod template, used for drift detection.
pub fn pod_template_hash(template: &PodTemplateSpec) -> Result<String> {
    let bytes = serde_json::to_vec(template)?;
    Ok(sha256_hex(&bytes))
}

/// Labels and object names of one component.
///
/// Everything a component creates is named and labelled through this type so
/// that selectors and ownership stay consistent.
#[derive(Clone, Debug)]
pub struct Labeller {
    cluster_name: String,
    namespace: String,
    /// Human readable component name, e.g. `Master` or `DataNode-hot`.
    pub component_name: String,
    /// Label value, e.g. `yt-master` or `yt-data-node-hot`.
    pub component_label: String,
    extra_labels: BTreeMap<String, String>,
    owner: OwnerReference,
}

impl Labeller {
    pub fn new(resource: &Ytsaurus, component_name: &str, component_label: &str) -> Self {
        Self {
            cluster_name: resource.name_any(),
            namespace: resource.namespace().unwrap_or_else(|| "default".to_string()),
            component_name: component_name.to_string(),
            component_label: component_label.to_string(),
            extra_labels: resource.spec.labels.clone(),
            owner: owner_reference(resource),
        }
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Labels used in pod selectors. Must never change for a live object.
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(
            "app.kubernetes.io/instance".to_string(),
            self.cluster_name.clone(),
        );
        labels.insert(
            "app.kubernetes.io/component".to_string(),
            self.component_label.clone(),
        );
        labels
    }

    /// Standard labels applied to all managed resources
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.selector_labels();
        labels.insert("app.kubernetes.io/name".to_string(), "ytsaurus".to_string());
        labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            MANAGED_BY.to_string(),
        );
        labels.insert(
            "ytsaurus.tech/cluster-name".to_string(),
            self.cluster_name.clone(),
        );

        // Merge user-defined labels without letting them override selectors
        for (key, value) in &self.extra_labels {
            labels.entry(key.clone()).or_insert_with(|| value.clone());
        }

        labels
    }

    /// Metadata for an owned object with the given name
    pub fn object_meta(&self, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.namespace.clone()),
            labels: Some(self.labels()),
            owner_references: Some(vec![self.owner.clone()]),
            ..Default::default()
        }
    }

    /// Label selector string for listing pods
    pub fn pod_selector(&self) -> String {
        self.selector_labels()
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Name of the Job running the init job `job`
    pub fn init_job_name(&self, job: &str) -> String {
        format!("{}-init-job-{}", self.component_label, job)
    }

    /// Name of the ConfigMap holding the script of the init job `job`
    pub fn init_job_config_name(&self, job: &str) -> String {
        format!("{}-config", self.init_job_name(job))
    }
}

/// `DataNode` for the default group, `DataNode-hot` for a group named `hot`.
pub fn format_with_default(base: &str, name: &str) -> String {
    if name.is_empty() {
        base.to_string()
    } else {
        format!("{base}-{name}")
    }
}
