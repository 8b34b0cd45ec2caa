//! Ytsaurus Custom Resource Definition.
//!
//! Describes the desired state of a whole cluster: the primary masters, one or
//! more groups of data nodes, and the knobs the update coordinator consults
//! (`enableFullUpdate`). The status carries the cluster-wide state machine
//! (`state`, `updateStatus`) and the last computed status of every component.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Ytsaurus is a custom resource describing one YTsaurus cluster.
///
/// Example:
/// ```yaml
/// apiVersion: cluster.ytsaurus.tech/v1
/// kind: Ytsaurus
/// metadata:
///   name: minisaurus
/// spec:
///   coreImage: ytsaurus/ytsaurus:stable-23.2.0
///   enableFullUpdate: false
///   adminCredentials:
///     name: ytadminsec
///   primaryMasters:
///     instanceCount: 3
///   dataNodes:
///     - instanceCount: 3
///       locations:
///         - medium: default
///         - medium: ssd_blobs
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cluster.ytsaurus.tech",
    version = "v1",
    kind = "Ytsaurus",
    plural = "ytsaurus",
    shortname = "yt",
    status = "YtsaurusStatus",
    namespaced,
    printcolumn = r#"{"name":"ClusterState", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"UpdateState", "type":"string", "jsonPath":".status.updateStatus.state"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct YtsaurusSpec {
    /// Image used by every server role and by init jobs.
    pub core_image: String,

    /// Image pull secrets for all pods.
    #[serde(default)]
    pub image_pull_secrets: Vec<String>,

    /// Secret with `login`, `password` and `token` keys for the admin user.
    /// Defaults are used for missing keys or when no secret is referenced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_credentials: Option<SecretReference>,

    /// Operator approval for updates that require recreating pods.
    /// Without it a structural change only surfaces as `NeedFullUpdate`.
    #[serde(default)]
    pub enable_full_update: bool,

    /// Primary master cell.
    pub primary_masters: MastersSpec,

    /// Groups of data nodes.
    #[serde(default)]
    pub data_nodes: Vec<DataNodesSpec>,

    /// Extra labels copied onto every generated object.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Reference to a Secret in the cluster namespace.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Name of the Secret.
    pub name: String,
}

/// Settings shared by every server role.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    /// Number of replicas.
    #[serde(default = "default_instance_count")]
    pub instance_count: i32,

    /// Overrides `coreImage` for this role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// CPU and memory requests, e.g. `{"cpu": "1", "memory": "4Gi"}`.
    #[serde(default)]
    pub requests: BTreeMap<String, String>,

    /// Container requests and limits.
    #[serde(default)]
    pub limits: BTreeMap<String, String>,

    /// Restricts pods to nodes carrying these labels.
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
}

impl Default for InstanceSpec {
    fn default() -> Self {
        Self {
            instance_count: default_instance_count(),
            image: None,
            requests: BTreeMap::new(),
            limits: BTreeMap::new(),
            node_selector: BTreeMap::new(),
        }
    }
}

fn default_instance_count() -> i32 {
    1
}

/// Primary masters.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MastersSpec {
    #[serde(flatten)]
    pub instance: InstanceSpec,

    /// Cell tag of the primary master cell.
    #[serde(default)]
    pub cell_tag: i32,

    /// Hosts the masters must be pinned to.
    #[serde(default)]
    pub host_addresses: Vec<String>,

    /// Node label matched against `hostAddresses` (default: kubernetes.io/hostname).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_address_label: Option<String>,
}

/// One group of data nodes.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataNodesSpec {
    /// Group name; empty for the default group.
    #[serde(default)]
    pub name: String,

    #[serde(flatten)]
    pub instance: InstanceSpec,

    /// Chunk store locations of every node in the group.
    #[serde(default)]
    pub locations: Vec<LocationSpec>,
}

/// Chunk store location.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationSpec {
    /// Medium of the location.
    #[serde(default = "default_medium")]
    pub medium: String,

    /// Mount path inside the pod.
    #[serde(default = "default_location_path")]
    pub path: String,
}

impl Default for LocationSpec {
    fn default() -> Self {
        Self {
            medium: default_medium(),
            path: default_location_path(),
        }
    }
}

/// Name of the medium every cluster has out of the box.
pub const DEFAULT_MEDIUM: &str = "default";

fn default_medium() -> String {
    DEFAULT_MEDIUM.to_string()
}

fn default_location_path() -> String {
    "/yt/node-data/chunk-store".to_string()
}

/// Status of a Ytsaurus cluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct YtsaurusStatus {
    /// Cluster-wide lifecycle state.
    #[serde(default)]
    pub state: ClusterState,

    /// Progress of the current update episode.
    #[serde(default)]
    pub update_status: UpdateStatus,

    /// Last computed status of every component.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentStatusEntry>,

    /// Long-lived conditions (Ready, FullUpdateRequired).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// `metadata.generation` handled by the last pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// State of one update episode.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatus {
    /// Current step of the episode.
    #[serde(default)]
    pub state: UpdateState,

    /// Conditions whose lifetime is bounded by the episode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Reported status of one component.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatusEntry {
    pub name: String,
    pub sync_status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Cluster-wide lifecycle state.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ClusterState {
    /// Object accepted, nothing deployed yet.
    #[default]
    Created,
    /// Initial rollout in progress.
    Initializing,
    /// Every component is in sync.
    Running,
    /// An update episode is in progress.
    Updating,
    /// The current episode is being abandoned.
    CancelUpdate,
}

impl ClusterState {
    /// Every state, in lifecycle order.
    pub const ALL: [ClusterState; 5] = [
        ClusterState::Created,
        ClusterState::Initializing,
        ClusterState::Running,
        ClusterState::Updating,
        ClusterState::CancelUpdate,
    ];
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterState::Created => write!(f, "Created"),
            ClusterState::Initializing => write!(f, "Initializing"),
            ClusterState::Running => write!(f, "Running"),
            ClusterState::Updating => write!(f, "Updating"),
            ClusterState::CancelUpdate => write!(f, "CancelUpdate"),
        }
    }
}

/// Step of an update episode. Only moves forward within one episode.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, JsonSchema,
)]
pub enum UpdateState {
    #[default]
    None,
    /// Checking that every component is healthy enough to be updated.
    PossibilityCheck,
    /// The episode cannot proceed; waiting for the approval to be withdrawn.
    ImpossibleToStart,
    /// Components scale their workloads down to zero.
    WaitingForPodsRemoval,
    /// Components recreate their workloads from the new spec.
    WaitingForPodsCreation,
    /// Masters leave read-only mode.
    WaitingForMasterExitReadOnly,
    /// Every step finished; the episode is being closed.
    Done,
}

impl std::fmt::Display for UpdateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateState::None => write!(f, "None"),
            UpdateState::PossibilityCheck => write!(f, "PossibilityCheck"),
            UpdateState::ImpossibleToStart => write!(f, "ImpossibleToStart"),
            UpdateState::WaitingForPodsRemoval => write!(f, "WaitingForPodsRemoval"),
            UpdateState::WaitingForPodsCreation => write!(f, "WaitingForPodsCreation"),
            UpdateState::WaitingForMasterExitReadOnly => write!(f, "WaitingForMasterExitReadOnly"),
            UpdateState::Done => write!(f, "Done"),
        }
    }
}

/// Tri-state value of a condition.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// One named status flag of the cluster, keyed by `type`.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition.
    pub status: ConditionStatus,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
}

impl Condition {
    /// Create a new condition stamped with the current time.
    pub fn new(condition_type: &str, status: ConditionStatus, reason: &str, message: &str) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
        }
    }

    /// `Ready` condition with status True.
    pub fn ready(ready: bool, reason: &str, message: &str) -> Self {
        Self::new("Ready", ready.into(), reason, message)
    }

    /// Create a "FullUpdateRequired" condition.
    pub fn full_update_required(required: bool, reason: &str, message: &str) -> Self {
        Self::new("FullUpdateRequired", required.into(), reason, message)
    }
}

impl Ytsaurus {
    /// Current cluster state, `Created` for objects without status.
    pub fn cluster_state(&self) -> ClusterState {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }

    /// Current update state, `None` for objects without status.
    pub fn update_state(&self) -> UpdateState {
        self.status
            .as_ref()
            .map(|s| s.update_status.state)
            .unwrap_or_default()
    }

    /// Every non-default medium declared by data node locations, sorted.
    pub fn extra_media(&self) -> Vec<String> {
        let mut media: Vec<String> = self
            .spec
            .data_nodes
            .iter()
            .flat_map(|group| group.locations.iter())
            .filter(|location| location.medium != DEFAULT_MEDIUM)
            .map(|location| location.medium.clone())
            .collect();
        media.sort();
        media.dedup();
        media
    }
}
