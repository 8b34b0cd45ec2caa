//! Status/sync contract of single components.

use std::collections::BTreeMap;

use ytsaurus_operator::components::master::{EXIT_READ_ONLY_JOB, INIT_JOB, MASTER};
use ytsaurus_operator::components::scripts::exit_read_only_script;
use ytsaurus_operator::components::{ClusterView, ComponentStatus, SyncStatus, UnitState};
use ytsaurus_operator::controller::status::{ConditionStore, UpdateConditions};
use ytsaurus_operator::crd::{ClusterState, ConditionStatus, UpdateState};

use crate::{Harness, World, YtsaurusBuilder, graph, master_component};

fn no_statuses() -> BTreeMap<String, ComponentStatus> {
    BTreeMap::new()
}

#[tokio::test]
async fn test_status_never_mutates() {
    let cluster = YtsaurusBuilder::new("minisaurus")
        .masters(3)
        .data_nodes("", 3)
        .build();
    let world = World::new();
    let mut graph = graph(&world, &cluster);
    graph.fetch_all().await.unwrap();

    let conditions = UpdateConditions::default();
    for cluster_state in [
        ClusterState::Created,
        ClusterState::Initializing,
        ClusterState::Running,
    ] {
        graph
            .statuses(cluster_state, UpdateState::None, &conditions)
            .await
            .unwrap();
    }

    assert!(world.take_mutations().is_empty());
    assert!(world.workload(MASTER).is_none());
}

#[tokio::test]
async fn test_status_matches_sync_through_rollout() {
    let cluster = YtsaurusBuilder::new("minisaurus")
        .masters(3)
        .data_nodes("", 2)
        .build();
    let world = World::new();

    for _ in 0..6 {
        let mut graph = graph(&world, &cluster);
        graph.fetch_all().await.unwrap();
        let mut conditions = UpdateConditions::default();
        let statuses = graph
            .statuses(ClusterState::Initializing, UpdateState::None, &conditions)
            .await
            .unwrap();
        let synced = graph
            .sync_all(
                ClusterState::Initializing,
                UpdateState::None,
                &mut conditions,
                &statuses,
            )
            .await
            .unwrap();
        assert_eq!(statuses, synced);

        world.settle();
        world.complete_jobs();
    }
}

#[tokio::test]
async fn test_data_node_blocked_by_pending_master() {
    let cluster = YtsaurusBuilder::new("minisaurus")
        .data_nodes("", 3)
        .build();
    let world = World::new();
    let mut graph = graph(&world, &cluster);
    graph.fetch_all().await.unwrap();

    let statuses = graph
        .statuses(
            ClusterState::Initializing,
            UpdateState::None,
            &UpdateConditions::default(),
        )
        .await
        .unwrap();

    assert_eq!(
        statuses["Master"],
        ComponentStatus::waiting(SyncStatus::Pending, "components")
    );
    assert_eq!(
        statuses["DataNode"],
        ComponentStatus::waiting(SyncStatus::Blocked, "Master")
    );
}

#[tokio::test]
async fn test_blocked_dependent_is_not_synced() {
    let cluster = YtsaurusBuilder::new("minisaurus")
        .data_nodes("", 3)
        .data_nodes("hot", 2)
        .build();
    let mut harness = Harness::new(cluster);
    harness.cluster_state = ClusterState::Initializing;

    harness.pass().await;

    assert_eq!(harness.world.take_mutations(), vec!["sync Master"]);
    assert!(harness.world.workload("DataNode").is_none());
    assert!(harness.world.workload("DataNode-hot").is_none());
    assert_eq!(
        harness.status("DataNode-hot"),
        &ComponentStatus::waiting(SyncStatus::Blocked, "Master")
    );
}

#[tokio::test]
async fn test_need_full_update_while_running_performs_no_mutation() {
    let cluster = YtsaurusBuilder::new("minisaurus")
        .data_nodes("", 3)
        .build();
    let mut harness = Harness::new(cluster);
    harness.converge().await;

    harness.edit(|c| {
        c.spec.primary_masters.instance.image = Some("ytsaurus/ytsaurus:stable-24.1.0".to_string())
    });
    harness.pass().await;

    assert_eq!(harness.sync_status("Master"), SyncStatus::NeedFullUpdate);
    assert_eq!(
        harness.status("DataNode"),
        &ComponentStatus::waiting(SyncStatus::Blocked, "Master")
    );
    assert_eq!(harness.cluster_state, ClusterState::Running);
    assert!(harness.world.take_mutations().is_empty());
}

#[tokio::test]
async fn test_converged_cluster_is_left_alone() {
    let cluster = YtsaurusBuilder::new("minisaurus")
        .masters(3)
        .data_nodes("", 3)
        .build();
    let mut harness = Harness::new(cluster);
    harness.converge().await;

    for _ in 0..3 {
        let outcome = harness.step().await;
        assert!(outcome.change.is_none());
        assert!(!outcome.conditions.is_dirty());
    }
    assert!(harness.world.take_mutations().is_empty());
    assert!(harness.is_running_and_ready());
}

#[tokio::test]
async fn test_exit_read_only_prepares_before_creating_job() {
    let cluster = YtsaurusBuilder::new("minisaurus").masters(3).build();
    let mut harness = Harness::new(cluster.clone());
    harness.converge().await;

    let statuses = no_statuses();
    let view = ClusterView::new(
        ClusterState::Updating,
        UpdateState::WaitingForMasterExitReadOnly,
        &statuses,
    );
    let mut conditions = UpdateConditions::default();

    let mut master = master_component(&harness.world, &cluster);
    master.fetch().await.unwrap();
    let status = master.sync(view, &mut conditions).await.unwrap();
    assert_eq!(status.sync_status, SyncStatus::Updating);
    assert!(conditions.is_true("MasterExitReadOnlyPrepared"));
    assert!(master.job(EXIT_READ_ONLY_JOB).unwrap().script().is_none());
    assert!(harness.world.unit(MASTER, EXIT_READ_ONLY_JOB).is_none());
    assert!(harness.world.take_mutations().is_empty());

    let mut master = master_component(&harness.world, &cluster);
    master.fetch().await.unwrap();
    let status = master.sync(view, &mut conditions).await.unwrap();
    assert_eq!(status.sync_status, SyncStatus::Pending);
    assert_eq!(
        harness.world.scripts(MASTER, EXIT_READ_ONLY_JOB),
        vec![exit_read_only_script()]
    );
    assert_eq!(
        conditions.get("MasterExitReadOnlyInitJobRestartPrepared"),
        ConditionStatus::False
    );

    harness.world.complete_jobs();
    let mut master = master_component(&harness.world, &cluster);
    master.fetch().await.unwrap();
    let status = master.sync(view, &mut conditions).await.unwrap();
    assert_eq!(status.sync_status, SyncStatus::Updating);
    assert!(conditions.is_true("MasterExitedReadOnly"));
    assert_eq!(
        conditions.get("MasterExitReadOnlyPrepared"),
        ConditionStatus::False
    );
}

#[tokio::test]
async fn test_exit_read_only_tears_down_job_of_previous_episode() {
    let cluster = YtsaurusBuilder::new("minisaurus").masters(3).build();
    let mut harness = Harness::new(cluster.clone());
    harness.converge().await;

    // A finished job left over from an earlier episode.
    let mut master = master_component(&harness.world, &cluster);
    master.fetch().await.unwrap();
    let mut conditions = UpdateConditions::default();
    let statuses = no_statuses();
    let view = ClusterView::new(
        ClusterState::Updating,
        UpdateState::WaitingForMasterExitReadOnly,
        &statuses,
    );
    master.sync(view, &mut conditions).await.unwrap();
    let mut master = master_component(&harness.world, &cluster);
    master.fetch().await.unwrap();
    master.sync(view, &mut conditions).await.unwrap();
    harness.world.complete_jobs();
    harness.world.take_mutations();

    // Next episode starts with wiped conditions.
    let mut conditions = UpdateConditions::default();
    let mut master = master_component(&harness.world, &cluster);
    master.fetch().await.unwrap();
    let dry = master.status(view, &conditions).await.unwrap();
    let status = master.sync(view, &mut conditions).await.unwrap();

    assert_eq!(dry, status);
    assert_eq!(status.sync_status, SyncStatus::Updating);
    assert_eq!(
        harness.world.take_mutations(),
        vec!["delete-job Master/exit-read-only"]
    );
    assert!(conditions.is_true("MasterExitReadOnlyInitJobRestartPrepared"));
}

#[tokio::test]
async fn test_changed_bootstrap_script_replaces_job() {
    let cluster = YtsaurusBuilder::new("minisaurus")
        .data_nodes("", 3)
        .build();
    let mut harness = Harness::new(cluster);
    harness.converge().await;
    assert_eq!(harness.world.scripts(MASTER, INIT_JOB).len(), 1);

    harness.edit(|c| {
        c.spec.data_nodes[0]
            .locations
            .push(ytsaurus_operator::crd::LocationSpec {
                medium: "ssd_blobs".to_string(),
                path: "/yt/node-data/ssd".to_string(),
            })
    });

    harness.pass().await;
    assert_eq!(
        harness.status("Master"),
        &ComponentStatus::waiting(SyncStatus::Pending, "default init job script changed")
    );
    assert_eq!(
        harness.world.take_mutations(),
        vec!["delete-job Master/default"]
    );

    harness.pass().await;
    let scripts = harness.world.scripts(MASTER, INIT_JOB);
    assert_eq!(scripts.len(), 2);
    assert!(scripts[1].contains("//sys/media/ssd_blobs"));
    assert!(!scripts[0].contains("ssd_blobs"));

    harness.world.complete_jobs();
    harness.pass().await;
    assert!(harness.status("Master").is_ready());
}

#[tokio::test]
async fn test_failed_job_is_recreated() {
    let cluster = YtsaurusBuilder::new("minisaurus").build();
    let mut harness = Harness::new(cluster);
    harness.cluster_state = ClusterState::Initializing;

    harness
        .step_until(5, |h| h.world.unit(MASTER, INIT_JOB).is_some())
        .await;
    harness.world.fail_job(MASTER, INIT_JOB, "BackoffLimitExceeded");
    harness.world.take_mutations();

    harness.pass().await;
    let status = harness.status("Master");
    assert_eq!(status.sync_status, SyncStatus::Pending);
    assert!(status.message.contains("BackoffLimitExceeded"));
    assert_eq!(
        harness.world.take_mutations(),
        vec!["delete-job Master/default"]
    );

    harness.pass().await;
    assert_eq!(
        harness.world.unit(MASTER, INIT_JOB).map(|u| u.state),
        Some(UnitState::Running)
    );
    assert_eq!(harness.world.scripts(MASTER, INIT_JOB).len(), 2);
}

#[tokio::test]
async fn test_failure_reason_stays_on_status_across_retries() {
    let cluster = YtsaurusBuilder::new("minisaurus").build();
    let mut harness = Harness::new(cluster);
    harness.cluster_state = ClusterState::Initializing;

    harness
        .step_until(5, |h| h.world.unit(MASTER, INIT_JOB).is_some())
        .await;

    for _ in 0..6 {
        harness.world.fail_job(MASTER, INIT_JOB, "BackoffLimitExceeded");
        harness.pass().await;
        let status = harness.status("Master");
        assert_eq!(status.sync_status, SyncStatus::Pending);
        assert!(status.message.contains("BackoffLimitExceeded"), "{status}");
    }
    assert_eq!(
        harness.condition("MasterDefaultInitJobFailed"),
        ConditionStatus::True
    );

    harness.pass().await;
    harness.world.complete_jobs();
    harness.pass().await;
    assert!(harness.status("Master").is_ready());
    assert_eq!(
        harness.condition("MasterDefaultInitJobFailed"),
        ConditionStatus::False
    );
}

#[tokio::test]
async fn test_admin_credentials_come_from_secret() {
    let cluster = YtsaurusBuilder::new("minisaurus")
        .admin_credentials("ytadminsec")
        .build();
    let mut harness = Harness::new(cluster);
    harness
        .world
        .add_secret("ytadminsec", &[("login", "alice-admin"), ("password", "s3cret")]);
    harness.converge().await;

    let scripts = harness.world.scripts(MASTER, INIT_JOB);
    assert_eq!(scripts.len(), 1);
    assert!(scripts[0].contains("alice-admin"));
    assert!(!scripts[0].contains("s3cret"), "passwords are stored hashed");
}

#[tokio::test]
async fn test_missing_admin_secret_stops_the_pass() {
    let cluster = YtsaurusBuilder::new("minisaurus")
        .admin_credentials("absent")
        .build();
    let mut harness = Harness::new(cluster);

    let err = harness.try_pass().await.unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(harness.cluster_state, ClusterState::Created);
}
