//! Dependency ordering and validation of the component graph.

use ytsaurus_operator::components::data_node::{
    DataNodeRole, data_node, data_node_labeller, data_node_server_spec,
};
use ytsaurus_operator::components::master::{EXIT_READ_ONLY_JOB, INIT_JOB, MASTER};
use ytsaurus_operator::components::server::DesiredWorkload;
use ytsaurus_operator::components::{Component, ComponentGraph, Role};

use crate::{World, YtsaurusBuilder, graph, master_component};

/// A bare component named `name` that depends on `dependencies`.
fn component(world: &World, name: &str, dependencies: &[&str]) -> Component {
    let cluster = YtsaurusBuilder::new("graph").data_nodes("", 1).build();
    let group = &cluster.spec.data_nodes[0];
    let desired = DesiredWorkload::new(
        &data_node_labeller(&cluster, group),
        &data_node_server_spec(&cluster, group),
    )
    .unwrap();

    dependencies.iter().fold(
        Component::new(
            name,
            Role::DataNode(DataNodeRole::default()),
            world.server(name, &desired),
        ),
        |component, dep| component.with_dependency(dep),
    )
}

#[test]
fn test_cluster_graph_puts_master_first() {
    let cluster = YtsaurusBuilder::new("minisaurus")
        .masters(3)
        .data_nodes("", 3)
        .data_nodes("hot", 2)
        .build();
    let graph = graph(&World::new(), &cluster);

    assert_eq!(graph.names(), vec![MASTER, "DataNode", "DataNode-hot"]);
    assert_eq!(graph.len(), 3);

    let hot = graph.component("DataNode-hot").unwrap();
    assert_eq!(hot.dependencies(), &["Master".to_string()]);
    assert_eq!(hot.role().kind(), "data-node");

    let master = graph.component(MASTER).unwrap();
    assert!(master.dependencies().is_empty());
    assert!(master.job(INIT_JOB).is_some());
    assert!(master.job(EXIT_READ_ONLY_JOB).is_some());
}

#[test]
fn test_dependencies_move_ahead_of_dependents() {
    let world = World::new();
    let cluster = YtsaurusBuilder::new("minisaurus").data_nodes("hot", 1).build();
    let hot = data_node(
        &cluster.spec.data_nodes[0],
        world.server(
            "DataNode-hot",
            &DesiredWorkload::new(
                &data_node_labeller(&cluster, &cluster.spec.data_nodes[0]),
                &data_node_server_spec(&cluster, &cluster.spec.data_nodes[0]),
            )
            .unwrap(),
        ),
    );

    let graph = ComponentGraph::new(vec![hot, master_component(&world, &cluster)]).unwrap();
    assert_eq!(graph.names(), vec![MASTER, "DataNode-hot"]);
}

#[test]
fn test_independent_components_keep_input_order() {
    let world = World::new();
    let graph = ComponentGraph::new(vec![
        component(&world, "b", &["a"]),
        component(&world, "c", &[]),
        component(&world, "a", &[]),
    ])
    .unwrap();

    assert_eq!(graph.names(), vec!["c", "a", "b"]);
}

#[test]
fn test_empty_graph() {
    let graph = ComponentGraph::new(Vec::new()).unwrap();
    assert!(graph.is_empty());
    assert!(graph.component(MASTER).is_none());
}

#[test]
fn test_duplicate_component_is_rejected() {
    let world = World::new();
    let err = ComponentGraph::new(vec![
        component(&world, "Master", &[]),
        component(&world, "Master", &[]),
    ])
    .unwrap_err();

    assert!(err.is_invariant());
    assert!(err.to_string().contains("duplicate component Master"));
}

#[test]
fn test_unknown_dependency_is_rejected() {
    let world = World::new();
    let err = ComponentGraph::new(vec![component(&world, "DataNode", &["Master"])]).unwrap_err();

    assert!(err.is_invariant());
    assert!(err.to_string().contains("unknown component Master"));
}

#[test]
fn test_cycle_is_rejected() {
    let world = World::new();
    let err = ComponentGraph::new(vec![
        component(&world, "root", &[]),
        component(&world, "x", &["y"]),
        component(&world, "y", &["x"]),
    ])
    .unwrap_err();

    assert!(err.is_invariant());
    assert!(err.to_string().contains("dependency cycle between components x, y"));
}
