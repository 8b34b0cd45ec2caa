//! Data node groups.
//!
//! Every entry of `dataNodes` becomes one component depending on the master.
//! The default group (empty name) keeps the bare names; named groups get a
//! `-<name>` suffix on every object and on the component name.

use crate::components::master::MASTER;
use crate::components::{Component, HoldPhase, PodsRemovalPhase, Role, Server};
use crate::crd::{DataNodesSpec, LocationSpec, Ytsaurus};
use crate::resources::common::{Labeller, format_with_default};
use crate::resources::statefulset::ServerSpec;

const RPC_PORT: i32 = 9012;
const MONITORING_PORT: i32 = 10012;

/// Data of one data node group.
#[derive(Clone, Debug, Default)]
pub struct DataNodeRole {
    /// Group name, empty for the default group.
    pub group: String,
}

/// Component name of a group, e.g. `DataNode` or `DataNode-hot`.
pub fn data_node_name(group: &DataNodesSpec) -> String {
    format_with_default("DataNode", &group.name)
}

pub fn data_node_labeller(cluster: &Ytsaurus, group: &DataNodesSpec) -> Labeller {
    Labeller::new(
        cluster,
        &data_node_name(group),
        &format_with_default("yt-data-node", &group.name),
    )
}

/// Workload of one data node group.
pub fn data_node_server_spec(cluster: &Ytsaurus, group: &DataNodesSpec) -> ServerSpec {
    let locations = if group.locations.is_empty() {
        vec![LocationSpec::default()]
    } else {
        group.locations.clone()
    };

    ServerSpec {
        statefulset_name: format_with_default("dnd", &group.name),
        service_name: format_with_default("data-nodes", &group.name),
        binary: "/usr/bin/ytserver-node",
        config_file: "ytserver-data-node.yson",
        rpc_port: RPC_PORT,
        monitoring_port: MONITORING_PORT,
        image: group
            .instance
            .image
            .clone()
            .unwrap_or_else(|| cluster.spec.core_image.clone()),
        image_pull_secrets: cluster.spec.image_pull_secrets.clone(),
        instance: group.instance.clone(),
        locations,
        affinity: None,
    }
}

/// Build the component of one data node group.
pub fn data_node(group: &DataNodesSpec, server: Box<dyn Server>) -> Component {
    let role = DataNodeRole {
        group: group.name.clone(),
    };
    Component::new(&data_node_name(group), Role::DataNode(role), server)
        .with_dependency(MASTER)
        .with_phase(PodsRemovalPhase)
        .with_phase(HoldPhase::default())
}
