//! Init job generation.
//!
//! An init job is a batch/v1 Job running a shell script stored in a sibling
//! ConfigMap. The hash of the script is recorded on the Job so that a job
//! built from an outdated script can be recognised and replaced.

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, LocalObjectReference, PodSpec, PodTemplateSpec,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

use crate::resources::common::{Labeller, SCRIPT_HASH_ANNOTATION};

/// Key of the script inside the ConfigMap
pub const SCRIPT_KEY: &str = "init-cluster.sh";
/// Mount point of the script ConfigMap
const SCRIPT_MOUNT_PATH: &str = "/opt/ytsaurus";
/// Name of the ConfigMap with the native client config, produced by the config generator
pub const CLIENT_CONFIG_MAP: &str = "yt-client-config";
/// Pod retries before the Job is reported as failed
const BACKOFF_LIMIT: i32 = 3;

/// Static part of one init job: names and pod settings.
#[derive(Clone, Debug)]
pub struct InitJobTemplate {
    pub labeller: Labeller,
    /// Short job name, e.g. `default` or `exit-read-only`
    pub job: String,
    pub image: String,
    pub image_pull_secrets: Vec<String>,
}

impl InitJobTemplate {
    pub fn job_name(&self) -> String {
        self.labeller.init_job_name(&self.job)
    }

    pub fn config_map_name(&self) -> String {
        self.labeller.init_job_config_name(&self.job)
    }
}

/// Generate the ConfigMap holding the script.
pub fn generate_script_configmap(template: &InitJobTemplate, script: &str) -> ConfigMap {
    ConfigMap {
        metadata: template.labeller.object_meta(&template.config_map_name()),
        data: Some(BTreeMap::from([(SCRIPT_KEY.to_string(), script.to_string())])),
        ..Default::default()
    }
}

/// Generate the Job running the script.
pub fn generate_init_job(template: &InitJobTemplate, script_hash: &str) -> Job {
    let mut metadata = template.labeller.object_meta(&template.job_name());
    metadata.annotations = Some(BTreeMap::from([(
        SCRIPT_HASH_ANNOTATION.to_string(),
        script_hash.to_string(),
    )]));

    let image_pull_secrets = if template.image_pull_secrets.is_empty() {
        None
    } else {
        Some(
            template
                .image_pull_secrets
                .iter()
                .map(|name| LocalObjectReference { name: name.clone() })
                .collect(),
        )
    };

    Job {
        metadata,
        spec: Some(JobSpec {
            backoff_limit: Some(BACKOFF_LIMIT),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(template.labeller.labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![Container {
                        name: "ytsaurus-init".to_string(),
                        image: Some(template.image.clone()),
                        command: Some(vec![
                            "bash".to_string(),
                            "-x".to_string(),
                            format!("{SCRIPT_MOUNT_PATH}/{SCRIPT_KEY}"),
                        ]),
                        volume_mounts: Some(vec![
                            VolumeMount {
                                name: "init-script".to_string(),
                                mount_path: SCRIPT_MOUNT_PATH.to_string(),
                                read_only: Some(true),
                                ..Default::default()
                            },
                            VolumeMount {
                                name: "client-config".to_string(),
                                mount_path: "/config".to_string(),
                                read_only: Some(true),
                                ..Default::default()
                            },
                        ]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![
                        Volume {
                            name: "init-script".to_string(),
                            config_map: Some(ConfigMapVolumeSource {
                                name: template.config_map_name(),
                                default_mode: Some(0o755),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                        Volume {
                            name: "client-config".to_string(),
                            config_map: Some(ConfigMapVolumeSource {
                                name: CLIENT_CONFIG_MAP.to_string(),
                                optional: Some(true),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                    ]),
                    image_pull_secrets,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Script hash recorded on an observed Job, if any.
pub fn recorded_script_hash(job: &Job) -> Option<&str> {
    job.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(SCRIPT_HASH_ANNOTATION))
        .map(String::as_str)
}
