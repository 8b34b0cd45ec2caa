//! Multi-pass scenarios: initial rollout, full updates and cancellation.

use ytsaurus_operator::components::master::{EXIT_READ_ONLY_JOB, INIT_JOB, MASTER};
use ytsaurus_operator::components::SyncStatus;
use ytsaurus_operator::controller::cluster_reconciler::PassOutcome;
use ytsaurus_operator::controller::update_coordinator::NO_POSSIBILITY;
use ytsaurus_operator::crd::{ClusterState, ConditionStatus, DataNodesSpec, InstanceSpec, UpdateState};

use crate::{Harness, YtsaurusBuilder};

const NEW_IMAGE: &str = "ytsaurus/ytsaurus:stable-24.1.0";

fn state_changes(outcomes: &[PassOutcome]) -> Vec<(ClusterState, UpdateState)> {
    outcomes
        .iter()
        .filter_map(|o| o.change.as_ref())
        .map(|c| (c.cluster_state, c.update_state))
        .collect()
}

/// Approve a master image change and step until the cluster is back to
/// `Running` with no update in progress.
async fn run_full_update(harness: &mut Harness, image: &str) -> Vec<PassOutcome> {
    harness.edit(|c| {
        c.spec.enable_full_update = true;
        c.spec.primary_masters.instance.image = Some(image.to_string());
    });
    let mut outcomes = vec![harness.step().await];
    outcomes.extend(
        harness
            .step_until(40, |h| {
                h.cluster_state == ClusterState::Running && h.update_state == UpdateState::None
            })
            .await,
    );
    outcomes
}

#[tokio::test]
async fn test_initial_rollout() {
    let cluster = YtsaurusBuilder::new("minisaurus")
        .masters(3)
        .data_nodes("", 3)
        .build();
    let mut harness = Harness::new(cluster);

    let outcomes = harness.step_until(10, Harness::is_running_and_ready).await;

    assert_eq!(
        state_changes(&outcomes),
        vec![
            (ClusterState::Initializing, UpdateState::None),
            (ClusterState::Running, UpdateState::None),
        ]
    );
    assert_eq!(harness.world.scripts(MASTER, INIT_JOB).len(), 1);
    assert_eq!(harness.world.workload(MASTER).unwrap().replicas, 3);
    assert_eq!(harness.world.workload("DataNode").unwrap().replicas, 3);
    assert!(harness.world.unit(MASTER, EXIT_READ_ONLY_JOB).is_none());
}

#[tokio::test]
async fn test_masters_come_up_before_data_nodes() {
    let cluster = YtsaurusBuilder::new("minisaurus")
        .data_nodes("", 3)
        .build();
    let mut harness = Harness::new(cluster);

    harness.step_until(10, Harness::is_running_and_ready).await;
    let mutations = harness.world.take_mutations();

    let position = |m: &str| mutations.iter().position(|x| x == m).unwrap();
    assert!(position("sync Master") < position("create-job Master/default"));
    assert!(position("create-job Master/default") < position("sync DataNode"));
}

#[tokio::test]
async fn test_new_data_node_group_joins_running_cluster() {
    let cluster = YtsaurusBuilder::new("minisaurus")
        .data_nodes("", 3)
        .build();
    let mut harness = Harness::new(cluster);
    harness.converge().await;

    harness.edit(|c| {
        c.spec.data_nodes.push(DataNodesSpec {
            name: "warm".to_string(),
            instance: InstanceSpec {
                instance_count: 2,
                ..Default::default()
            },
            locations: Vec::new(),
        })
    });
    harness.step().await;

    assert_eq!(harness.world.take_mutations(), vec!["sync DataNode-warm"]);
    assert_eq!(harness.cluster_state, ClusterState::Running);

    harness.step().await;
    assert!(harness.is_running_and_ready());
}

#[tokio::test]
async fn test_full_update_episode() {
    let cluster = YtsaurusBuilder::new("minisaurus")
        .masters(3)
        .data_nodes("", 3)
        .build();
    let mut harness = Harness::new(cluster);
    harness.converge().await;

    let outcomes = run_full_update(&mut harness, NEW_IMAGE).await;

    let update_states: Vec<UpdateState> = state_changes(&outcomes)
        .into_iter()
        .map(|(_, update_state)| update_state)
        .collect();
    assert_eq!(
        update_states,
        vec![
            UpdateState::PossibilityCheck,
            UpdateState::WaitingForPodsRemoval,
            UpdateState::WaitingForPodsCreation,
            UpdateState::WaitingForMasterExitReadOnly,
            UpdateState::Done,
            UpdateState::None,
        ]
    );

    let mutations = harness.world.take_mutations();
    let position = |m: &str| mutations.iter().position(|x| x == m).unwrap();
    assert!(position("remove-pods Master") < position("sync Master"));
    assert!(position("remove-pods DataNode") < position("sync DataNode"));
    assert!(position("sync Master") < position("create-job Master/exit-read-only"));
    assert!(!mutations.contains(&"create-job Master/default".to_string()));

    assert!(harness.conditions.is_empty());
    harness.step().await;
    assert!(harness.is_running_and_ready());
    assert_eq!(harness.world.scripts(MASTER, EXIT_READ_ONLY_JOB).len(), 1);
}

#[tokio::test]
async fn test_update_waits_for_approval() {
    let cluster = YtsaurusBuilder::new("minisaurus")
        .data_nodes("", 3)
        .build();
    let mut harness = Harness::new(cluster);
    harness.converge().await;

    harness.edit(|c| c.spec.primary_masters.instance.image = Some(NEW_IMAGE.to_string()));
    for _ in 0..3 {
        let outcome = harness.step().await;
        assert!(outcome.change.is_none());
    }
    assert_eq!(harness.cluster_state, ClusterState::Running);
    assert_eq!(harness.sync_status(MASTER), SyncStatus::NeedFullUpdate);
    assert!(harness.world.take_mutations().is_empty());

    harness.edit(|c| c.spec.enable_full_update = true);
    harness.step().await;
    assert_eq!(harness.cluster_state, ClusterState::Updating);
    assert_eq!(harness.update_state, UpdateState::PossibilityCheck);
}

#[tokio::test]
async fn test_impossible_update_is_cancelled() {
    let cluster = YtsaurusBuilder::new("minisaurus")
        .masters(3)
        .data_nodes("", 3)
        .build();
    let mut harness = Harness::new(cluster);
    harness.converge().await;
    harness.world.break_pods("DataNode");

    harness.edit(|c| {
        c.spec.enable_full_update = true;
        c.spec.primary_masters.instance.image = Some(NEW_IMAGE.to_string());
    });
    harness
        .step_until(5, |h| h.update_state == UpdateState::ImpossibleToStart)
        .await;
    assert_eq!(harness.cluster_state, ClusterState::Updating);
    assert_eq!(harness.condition(NO_POSSIBILITY), ConditionStatus::True);
    let reason = harness
        .conditions
        .iter()
        .find(|c| c.r#type == NO_POSSIBILITY)
        .map(|c| c.message.clone())
        .unwrap();
    assert!(reason.contains("DataNode"), "{reason}");

    // Stays put while the update is still approved.
    for _ in 0..3 {
        let outcome = harness.step().await;
        assert!(outcome.change.is_none());
    }
    assert_eq!(harness.update_state, UpdateState::ImpossibleToStart);
    assert!(harness.world.take_mutations().is_empty());

    harness.edit(|c| c.spec.enable_full_update = false);
    let outcomes = harness
        .step_until(5, |h| h.cluster_state == ClusterState::Running)
        .await;

    assert_eq!(
        state_changes(&outcomes),
        vec![
            (ClusterState::CancelUpdate, UpdateState::ImpossibleToStart),
            (ClusterState::Running, UpdateState::None),
        ]
    );
    assert!(harness.conditions.is_empty());
    assert!(harness.world.take_mutations().is_empty());
}

#[tokio::test]
async fn test_second_episode_reruns_exit_read_only() {
    let cluster = YtsaurusBuilder::new("minisaurus")
        .masters(3)
        .data_nodes("", 3)
        .build();
    let mut harness = Harness::new(cluster);
    harness.converge().await;

    run_full_update(&mut harness, NEW_IMAGE).await;
    harness.world.take_mutations();
    run_full_update(&mut harness, "ytsaurus/ytsaurus:stable-24.2.0").await;

    let mutations = harness.world.take_mutations();
    let position = |m: &str| mutations.iter().position(|x| x == m).unwrap();
    assert!(
        position("delete-job Master/exit-read-only")
            < position("create-job Master/exit-read-only")
    );
    assert_eq!(harness.world.scripts(MASTER, EXIT_READ_ONLY_JOB).len(), 2);
    assert!(harness.conditions.is_empty());
}

#[tokio::test]
async fn test_updating_without_update_state_is_an_invariant_violation() {
    let cluster = YtsaurusBuilder::new("minisaurus").build();
    let mut harness = Harness::new(cluster);
    harness.converge().await;

    harness.cluster_state = ClusterState::Updating;
    harness.update_state = UpdateState::None;
    let err = harness.try_pass().await.unwrap_err();

    assert!(err.is_invariant());
    assert!(harness.world.take_mutations().is_empty());
}
