//! Test fixtures and builder patterns for Ytsaurus.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use ytsaurus_operator::crd::{
    DataNodesSpec, InstanceSpec, LocationSpec, MastersSpec, SecretReference, Ytsaurus,
    YtsaurusSpec,
};

/// Builder for creating Ytsaurus test fixtures.
///
/// # Example
/// ```
/// let cluster = YtsaurusBuilder::new("minisaurus")
///     .namespace("yt")
///     .masters(3)
///     .data_nodes("", 3)
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct YtsaurusBuilder {
    name: String,
    namespace: String,
    core_image: String,
    masters: MastersSpec,
    data_nodes: Vec<DataNodesSpec>,
    admin_credentials: Option<String>,
    enable_full_update: bool,
    labels: BTreeMap<String, String>,
    generation: Option<i64>,
    uid: Option<String>,
}

impl YtsaurusBuilder {
    /// Create a new builder with the given cluster name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: "default".to_string(),
            core_image: "ytsaurus/ytsaurus:stable-23.2.0".to_string(),
            masters: MastersSpec::default(),
            data_nodes: Vec::new(),
            admin_credentials: None,
            enable_full_update: false,
            labels: BTreeMap::new(),
            generation: Some(1),
            uid: Some("4f1c2a9e-0000-4000-8000-000000000001".to_string()),
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn core_image(mut self, image: impl Into<String>) -> Self {
        self.core_image = image.into();
        self
    }

    /// Set the number of primary masters.
    pub fn masters(mut self, count: i32) -> Self {
        self.masters.instance.instance_count = count;
        self
    }

    /// Override the image of the masters only.
    pub fn master_image(mut self, image: impl Into<String>) -> Self {
        self.masters.instance.image = Some(image.into());
        self
    }

    /// Pin the masters to the given hosts.
    pub fn master_hosts(mut self, hosts: &[&str]) -> Self {
        self.masters.host_addresses = hosts.iter().map(|h| h.to_string()).collect();
        self
    }

    /// Add a data node group; an empty name is the default group.
    pub fn data_nodes(mut self, name: &str, count: i32) -> Self {
        self.data_nodes.push(DataNodesSpec {
            name: name.to_string(),
            instance: InstanceSpec {
                instance_count: count,
                ..Default::default()
            },
            locations: Vec::new(),
        });
        self
    }

    /// Add a location with `medium` to the last data node group.
    pub fn medium(mut self, medium: &str) -> Self {
        if let Some(group) = self.data_nodes.last_mut() {
            group.locations.push(LocationSpec {
                medium: medium.to_string(),
                ..Default::default()
            });
        }
        self
    }

    pub fn admin_credentials(mut self, secret: impl Into<String>) -> Self {
        self.admin_credentials = Some(secret.into());
        self
    }

    pub fn enable_full_update(mut self, enabled: bool) -> Self {
        self.enable_full_update = enabled;
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn generation(mut self, generation: i64) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn build(self) -> Ytsaurus {
        let mut cluster = Ytsaurus::new(
            &self.name,
            YtsaurusSpec {
                core_image: self.core_image,
                image_pull_secrets: Vec::new(),
                admin_credentials: self
                    .admin_credentials
                    .map(|name| SecretReference { name }),
                enable_full_update: self.enable_full_update,
                primary_masters: self.masters,
                data_nodes: self.data_nodes,
                labels: self.labels,
            },
        );
        cluster.metadata = ObjectMeta {
            name: Some(self.name),
            namespace: Some(self.namespace),
            generation: self.generation,
            uid: self.uid,
            ..Default::default()
        };
        cluster
    }
}
