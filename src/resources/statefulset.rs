//! StatefulSet generation for server components.
//!
//! Every server role runs as one StatefulSet behind a headless Service:
//! - Stable network identity (`ms-0.masters.<ns>.svc.<domain>`)
//! - Parallel pod management, rolling updates outside of update episodes
//! - The hash of the pod template is stored in an annotation so that drift
//!   can be detected without diffing the whole object

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy};
use k8s_openapi::api::core::v1::{
    Affinity, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource,
    LocalObjectReference, ObjectFieldSelector, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, TCPSocketAction, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

use crate::controller::error::Result;
use crate::crd::{InstanceSpec, LocationSpec};
use crate::resources::common::{Labeller, POD_TEMPLATE_HASH_ANNOTATION, pod_template_hash};

/// Mount point of the server configuration
const CONFIG_MOUNT_PATH: &str = "/config";
/// Grace period for servers to flush state on shutdown
const TERMINATION_GRACE_PERIOD: i64 = 60;

/// Everything needed to build the workload of one server role.
#[derive(Clone, Debug)]
pub struct ServerSpec {
    pub statefulset_name: String,
    pub service_name: String,
    /// Server binary, e.g. `/usr/bin/ytserver-master`
    pub binary: &'static str,
    /// Config file name inside the config ConfigMap
    pub config_file: &'static str,
    pub rpc_port: i32,
    pub monitoring_port: i32,
    pub image: String,
    pub image_pull_secrets: Vec<String>,
    pub instance: InstanceSpec,
    pub locations: Vec<LocationSpec>,
    /// Role specific scheduling constraints
    pub affinity: Option<Affinity>,
}

impl ServerSpec {
    /// ConfigMap with the server config, produced by the config generator.
    pub fn config_map_name(labeller: &Labeller) -> String {
        format!("{}-config", labeller.component_label)
    }
}

/// Generate the StatefulSet for a server role.
///
/// The returned object carries the pod template hash annotation; two specs
/// producing the same template always produce the same hash.
pub fn generate_statefulset(labeller: &Labeller, server: &ServerSpec) -> Result<StatefulSet> {
    let template = generate_pod_template(labeller, server);
    let hash = pod_template_hash(&template)?;

    let mut metadata = labeller.object_meta(&server.statefulset_name);
    metadata.annotations = Some(BTreeMap::from([(
        POD_TEMPLATE_HASH_ANNOTATION.to_string(),
        hash,
    )]));

    Ok(StatefulSet {
        metadata,
        spec: Some(StatefulSetSpec {
            replicas: Some(server.instance.instance_count),
            service_name: Some(server.service_name.clone()),
            selector: LabelSelector {
                match_labels: Some(labeller.selector_labels()),
                ..Default::default()
            },
            pod_management_policy: Some("Parallel".to_string()),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                ..Default::default()
            }),
            template,
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Hash recorded on an observed StatefulSet, if any.
pub fn recorded_template_hash(sts: &StatefulSet) -> Option<&str> {
    sts.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(POD_TEMPLATE_HASH_ANNOTATION))
        .map(String::as_str)
}

/// Pod template shared by every replica of the component.
fn generate_pod_template(labeller: &Labeller, server: &ServerSpec) -> PodTemplateSpec {
    let node_selector = if server.instance.node_selector.is_empty() {
        None
    } else {
        Some(server.instance.node_selector.clone())
    };

    let image_pull_secrets = if server.image_pull_secrets.is_empty() {
        None
    } else {
        Some(
            server
                .image_pull_secrets
                .iter()
                .map(|name| LocalObjectReference { name: name.clone() })
                .collect(),
        )
    };

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labeller.labels()),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD),
            containers: vec![generate_server_container(server)],
            volumes: Some(generate_volumes(labeller, server)),
            affinity: server.affinity.clone(),
            node_selector,
            image_pull_secrets,
            ..Default::default()
        }),
    }
}

fn generate_server_container(server: &ServerSpec) -> Container {
    Container {
        name: "ytserver".to_string(),
        image: Some(
            server
                .instance
                .image
                .clone()
                .unwrap_or_else(|| server.image.clone()),
        ),
        command: Some(vec![
            server.binary.to_string(),
            "--config".to_string(),
            format!("{}/{}", CONFIG_MOUNT_PATH, server.config_file),
        ]),
        ports: Some(vec![
            ContainerPort {
                container_port: server.rpc_port,
                name: Some("rpc".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                container_port: server.monitoring_port,
                name: Some("monitoring".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ]),
        env: Some(vec![
            downward_env("POD_NAME", "metadata.name"),
            downward_env("POD_NAMESPACE", "metadata.namespace"),
        ]),
        resources: Some(generate_resource_requirements(&server.instance)),
        volume_mounts: Some(generate_volume_mounts(server)),
        readiness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::String("rpc".to_string()),
                ..Default::default()
            }),
            initial_delay_seconds: Some(5),
            period_seconds: Some(10),
            failure_threshold: Some(3),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn downward_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn to_quantities(values: &BTreeMap<String, String>) -> Option<BTreeMap<String, Quantity>> {
    if values.is_empty() {
        return None;
    }
    Some(
        values
            .iter()
            .map(|(k, v)| (k.clone(), Quantity(v.clone())))
            .collect(),
    )
}

/// Container requests and limits from the instance spec.
fn generate_resource_requirements(instance: &InstanceSpec) -> ResourceRequirements {
    ResourceRequirements {
        requests: to_quantities(&instance.requests),
        limits: to_quantities(&instance.limits),
        ..Default::default()
    }
}

fn generate_volumes(labeller: &Labeller, server: &ServerSpec) -> Vec<Volume> {
    let mut volumes = vec![Volume {
        name: "config".to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: ServerSpec::config_map_name(labeller),
            ..Default::default()
        }),
        ..Default::default()
    }];

    volumes.extend(server.locations.iter().enumerate().map(|(i, _)| Volume {
        name: format!("location-{i}"),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }));

    volumes
}

/// Mounts for the config map, locations and scratch space.
fn generate_volume_mounts(server: &ServerSpec) -> Vec<VolumeMount> {
    let mut mounts = vec![VolumeMount {
        name: "config".to_string(),
        mount_path: CONFIG_MOUNT_PATH.to_string(),
        read_only: Some(true),
        ..Default::default()
    }];

    mounts.extend(
        server
            .locations
            .iter()
            .enumerate()
            .map(|(i, location)| VolumeMount {
                name: format!("location-{i}"),
                mount_path: location.path.clone(),
                ..Default::default()
            }),
    );

    mounts
}
