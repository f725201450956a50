mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use zeropoint_core::{
    BlockedReason, Operation, ReconcileResult, ResourceRow, ResourceTable,
};
use zeropoint_reconcile::{EngineState, ExecutorConfig, RebootPolicy};
use zeropoint_state::{Branch, ResourceLog, StateStore};

use common::*;

#[tokio::test]
async fn fresh_store_serves_default_disks() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), &defaults());

    let disks = store.get_actual(ResourceTable::Disks).await.unwrap();
    assert_eq!(disks, rows(ResourceTable::Disks, defaults()["disks"].clone()));
}

#[tokio::test]
async fn mount_on_existing_disk_is_applied_and_merged() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), &defaults());
    let host = host_from_reality(&store).await;
    let executor = executor(store.clone(), &host, host.registry(), ExecutorConfig::default());

    let intent_id = store
        .write_intent(
            ResourceTable::Mounts,
            rows(ResourceTable::Mounts, json!([mount("m1", "d1")])),
            "add mount",
        )
        .await
        .unwrap();

    let response = executor.reconcile(Some("scenario-b".into())).await;
    assert_eq!(response.result, ReconcileResult::Applied, "{response:?}");

    let status = store.status().await.unwrap();
    assert_eq!(status.reality, intent_id);
    assert_eq!(status.ahead_count, 0);
    assert_eq!(host.calls(), vec!["add mounts:m1".to_string()]);

    let state = executor.state();
    assert_eq!(state.state, EngineState::Idle);
    assert_eq!(state.last_committed_id, Some(intent_id));
    assert_eq!(state.last_trigger.as_deref(), Some("scenario-b"));
}

#[tokio::test]
async fn new_disk_blocks_for_reboot() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), &defaults());
    let host = host_from_reality(&store).await;
    let executor = executor(store.clone(), &host, host.registry(), ExecutorConfig::default());
    let reality_before = store.status().await.unwrap().reality;

    store
        .write_intent(
            ResourceTable::Disks,
            rows(
                ResourceTable::Disks,
                json!([
                    {"id": "d1", "device": "/dev/sdb", "filesystem": "ext4"},
                    {"id": "d2", "device": "/dev/sdc", "partition": "gpt", "filesystem": "xfs"}
                ]),
            ),
            "add disk",
        )
        .await
        .unwrap();
    store
        .write_intent(
            ResourceTable::Mounts,
            rows(ResourceTable::Mounts, json!([mount("m2", "d2")])),
            "mount new disk",
        )
        .await
        .unwrap();
    store
        .write_intent(
            ResourceTable::Modules,
            rows(ResourceTable::Modules, json!([{"id": "jellyfin", "source": "registry/jellyfin"}])),
            "add module",
        )
        .await
        .unwrap();

    let response = executor.reconcile(None).await;
    assert_eq!(response.result, ReconcileResult::Blocked);
    assert_eq!(response.reason, Some(BlockedReason::RebootRequired));
    assert_eq!(response.pending_resources, vec!["disks:d2".to_string()]);

    // Nothing runs behind the gate: no disk add, no mount, no module.
    assert_eq!(store.status().await.unwrap().reality, reality_before);
    assert!(host.calls().is_empty(), "{:?}", host.calls());
    assert!(!host.state().contains(ResourceTable::Modules, "jellyfin"));

    let state = executor.state();
    assert_eq!(state.state, EngineState::Blocked);
    assert!(state.reboot_required);

    // After the reboot the disk is present and the run completes.
    let desired = store.snapshot(Branch::Intent).await.unwrap().snapshot;
    host.reboot(&desired);
    host.clear_calls();

    let response = executor.reconcile(None).await;
    assert_eq!(response.result, ReconcileResult::Applied, "{response:?}");
    assert_eq!(
        host.calls(),
        vec!["add mounts:m2".to_string(), "add modules:jellyfin".to_string()]
    );
    assert!(!executor.state().reboot_required);
}

#[tokio::test]
async fn blocked_storage_leaves_mounts_and_paths_alone() {
    for policy in [RebootPolicy::AnyNewDisk, RebootPolicy::PartitionChangesOnly] {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), &defaults());
        let host = host_from_reality(&store).await;
        let config = ExecutorConfig {
            reboot_policy: policy,
        };
        let executor = executor(store.clone(), &host, host.registry(), config);

        store
            .write_intent(
                ResourceTable::Mounts,
                rows(ResourceTable::Mounts, json!([mount("m1", "d1")])),
                "add mount",
            )
            .await
            .unwrap();
        store
            .write_intent(
                ResourceTable::Paths,
                rows(ResourceTable::Paths, json!([{"id": "p1", "mount_id": "m1", "path": "/mnt/m1/media"}])),
                "add path",
            )
            .await
            .unwrap();
        assert!(executor.reconcile(None).await.is_applied());
        host.clear_calls();

        store.write_intent(ResourceTable::Paths, vec![], "drop path").await.unwrap();
        store
            .write_intent(
                ResourceTable::Disks,
                rows(
                    ResourceTable::Disks,
                    json!([
                        {"id": "d1", "device": "/dev/sdb", "filesystem": "ext4"},
                        {"id": "d2", "device": "/dev/sdc", "partition": "gpt"}
                    ]),
                ),
                "add disk",
            )
            .await
            .unwrap();

        let response = executor.reconcile(None).await;
        assert_eq!(response.result, ReconcileResult::Blocked, "{policy}: {response:?}");
        assert_eq!(response.reason, Some(BlockedReason::RebootRequired));
        assert_eq!(response.pending_resources, vec!["disks:d2".to_string()]);

        let calls = host.calls();
        assert!(
            calls.iter().all(|call| !call.contains("paths:") && !call.contains("mounts:")),
            "{policy}: {calls:?}"
        );
        assert!(host.state().contains(ResourceTable::Paths, "p1"));
    }
}

#[tokio::test]
async fn new_whole_disk_waits_for_reboot_under_default_policy() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), &defaults());
    let host = host_from_reality(&store).await;
    let executor = executor(store.clone(), &host, host.registry(), ExecutorConfig::default());

    store
        .write_intent(
            ResourceTable::Disks,
            rows(
                ResourceTable::Disks,
                json!([
                    {"id": "d1", "device": "/dev/sdb", "filesystem": "ext4"},
                    {"id": "d3", "device": "/dev/sdd"}
                ]),
            ),
            "attach d3",
        )
        .await
        .unwrap();

    // Without a reboot the block holds, run after run.
    for _ in 0..2 {
        let response = executor.reconcile(None).await;
        assert_eq!(response.result, ReconcileResult::Blocked, "{response:?}");
        assert_eq!(response.reason, Some(BlockedReason::RebootRequired));
        assert_eq!(response.pending_resources, vec!["disks:d3".to_string()]);
        assert!(executor.state().reboot_required);
    }
    assert!(host.calls().is_empty());
    assert!(!host.state().contains(ResourceTable::Disks, "d3"));

    let desired = store.snapshot(Branch::Intent).await.unwrap().snapshot;
    host.reboot(&desired);

    let response = executor.reconcile(None).await;
    assert_eq!(response.result, ReconcileResult::Applied, "{response:?}");
    assert!(!executor.state().reboot_required);
}

#[tokio::test]
async fn unresolved_variable_fails_before_modules() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), &defaults());
    let host = host_from_reality(&store).await;
    let executor = executor(store.clone(), &host, host.registry(), ExecutorConfig::default());

    store
        .write_intent(
            ResourceTable::Modules,
            rows(ResourceTable::Modules, json!([{"id": "jellyfin", "source": "registry/jellyfin"}])),
            "add module",
        )
        .await
        .unwrap();
    store
        .write_intent(
            ResourceTable::Vars,
            rows(ResourceTable::Vars, json!([{"id": "media", "value": "${path:unknown-id}/media"}])),
            "add var",
        )
        .await
        .unwrap();

    let response = executor.reconcile(None).await;
    assert_eq!(response.result, ReconcileResult::Failed);
    let error = response.error.unwrap();
    assert_eq!(error.resource, "vars:media");
    assert!(error.message.contains("unknown-id"), "{}", error.message);

    assert!(host.calls().is_empty());
    assert_eq!(store.status().await.unwrap().ahead_count, 2);
    assert_eq!(executor.state().state, EngineState::Idle);
}

#[tokio::test]
async fn second_reconcile_while_running_waits() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), &defaults());
    let host = host_from_reality(&store).await;

    let hold = Hold::new();
    let commands = host
        .builder()
        .register(
            ResourceTable::Modules,
            Operation::Add,
            Arc::new(HeldCommand {
                hold: hold.clone(),
                inner: host.registry().get(ResourceTable::Modules, Operation::Add).unwrap().clone(),
            }),
        )
        .build();
    let executor = executor(store.clone(), &host, commands, ExecutorConfig::default());

    store
        .write_intent(
            ResourceTable::Modules,
            rows(ResourceTable::Modules, json!([{"id": "jellyfin", "source": "registry/jellyfin"}])),
            "add module",
        )
        .await
        .unwrap();

    let first = tokio::spawn({
        let executor = executor.clone();
        async move { executor.reconcile(Some("first".into())).await }
    });
    hold.entered.notified().await;
    assert!(executor.is_running());

    let probes = host.probe_count();
    let second = executor.reconcile(Some("second".into())).await;
    assert_eq!(second.result, ReconcileResult::Waiting);
    assert_eq!(second.reason, Some(BlockedReason::CommandRunning));
    assert_eq!(host.probe_count(), probes);
    assert_eq!(executor.trigger(None).result, ReconcileResult::Waiting);

    hold.release.notify_one();
    let first = first.await.unwrap();
    assert_eq!(first.result, ReconcileResult::Applied, "{first:?}");
    assert_eq!(executor.state().last_trigger.as_deref(), Some("first"));
}

#[tokio::test]
async fn trigger_runs_in_background() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), &defaults());
    let host = host_from_reality(&store).await;
    let executor = executor(store.clone(), &host, host.registry(), ExecutorConfig::default());

    let intent_id = store
        .write_intent(
            ResourceTable::Mounts,
            rows(ResourceTable::Mounts, json!([mount("m1", "d1")])),
            "add mount",
        )
        .await
        .unwrap();

    assert_eq!(executor.trigger(None).result, ReconcileResult::Running);

    let mut finished = None;
    for _ in 0..100 {
        let state = executor.state();
        if !state.state.is_running() && state.last_response.is_some() {
            finished = Some(state);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let state = finished.expect("background reconcile did not finish");
    assert!(state.last_response.unwrap().is_applied());
    assert_eq!(state.last_committed_id, Some(intent_id));
}

#[tokio::test]
async fn repeated_reconcile_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), &defaults());
    let host = host_from_reality(&store).await;
    let executor = executor(store.clone(), &host, host.registry(), ExecutorConfig::default());

    store
        .write_intent(
            ResourceTable::Mounts,
            rows(ResourceTable::Mounts, json!([mount("m1", "d1")])),
            "add mount",
        )
        .await
        .unwrap();

    assert!(executor.reconcile(None).await.is_applied());
    let host_after_first = host.state();
    host.clear_calls();

    assert!(executor.reconcile(None).await.is_applied());
    assert!(host.calls().is_empty());
    assert_eq!(host.state(), host_after_first);
}

#[tokio::test]
async fn removals_run_in_reverse_dependency_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), &defaults());
    let host = host_from_reality(&store).await;
    let executor = executor(store.clone(), &host, host.registry(), ExecutorConfig::default());

    store
        .write_intent(
            ResourceTable::Mounts,
            rows(ResourceTable::Mounts, json!([mount("m1", "d1")])),
            "add mount",
        )
        .await
        .unwrap();
    store
        .write_intent(
            ResourceTable::Paths,
            rows(ResourceTable::Paths, json!([{"id": "p1", "mount_id": "m1", "path": "/mnt/m1/media"}])),
            "add path",
        )
        .await
        .unwrap();
    assert!(executor.reconcile(None).await.is_applied());
    assert_eq!(
        host.calls(),
        vec!["add mounts:m1".to_string(), "add paths:p1".to_string()]
    );

    host.clear_calls();
    store.write_intent(ResourceTable::Paths, vec![], "drop path").await.unwrap();
    store.write_intent(ResourceTable::Mounts, vec![], "drop mount").await.unwrap();
    assert!(executor.reconcile(None).await.is_applied());
    assert_eq!(
        host.calls(),
        vec!["release paths:p1".to_string(), "release mounts:m1".to_string()]
    );
}

#[tokio::test]
async fn missing_dependency_fails() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), &defaults());
    let host = host_from_reality(&store).await;
    let executor = executor(store.clone(), &host, host.registry(), ExecutorConfig::default());

    store
        .write_intent(
            ResourceTable::Mounts,
            rows(ResourceTable::Mounts, json!([mount("m9", "d9")])),
            "mount on unknown disk",
        )
        .await
        .unwrap();

    let response = executor.reconcile(None).await;
    assert_eq!(response.result, ReconcileResult::Failed);
    assert_eq!(response.reason, Some(BlockedReason::MissingDependency));
    assert_eq!(response.error.unwrap().resource, "mounts:m9");
    assert!(host.calls().is_empty());
}

#[tokio::test]
async fn exposure_requires_desired_module() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), &defaults());
    let host = host_from_reality(&store).await;
    let executor = executor(store.clone(), &host, host.registry(), ExecutorConfig::default());

    store
        .write_intent(
            ResourceTable::Exposures,
            rows(ResourceTable::Exposures, json!([{"id": "web", "module": "ghost", "port": 80}])),
            "expose",
        )
        .await
        .unwrap();

    let response = executor.reconcile(None).await;
    assert_eq!(response.reason, Some(BlockedReason::MissingDependency));
    assert_eq!(response.error.unwrap().resource, "exposures:web");
}

#[tokio::test]
async fn command_failure_names_resource_and_keeps_earlier_work() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), &defaults());
    let host = host_from_reality(&store).await;
    host.fail_on("modules:sonarr");
    let executor = executor(store.clone(), &host, host.registry(), ExecutorConfig::default());
    let reality_before = store.status().await.unwrap().reality;

    store
        .write_intent(
            ResourceTable::Mounts,
            rows(ResourceTable::Mounts, json!([mount("m1", "d1")])),
            "add mount",
        )
        .await
        .unwrap();
    store
        .write_intent(
            ResourceTable::Modules,
            rows(ResourceTable::Modules, json!([{"id": "sonarr", "source": "registry/sonarr"}])),
            "add module",
        )
        .await
        .unwrap();

    let response = executor.reconcile(None).await;
    assert_eq!(response.result, ReconcileResult::Failed);
    let error = response.error.unwrap();
    assert_eq!(error.resource, "modules:sonarr");
    assert!(error.message.contains("busy"));

    // Storage work is not rolled back; reality does not move.
    assert!(host.state().contains(ResourceTable::Mounts, "m1"));
    assert_eq!(store.status().await.unwrap().reality, reality_before);
}

#[tokio::test]
async fn convergence_catches_commands_that_lie() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), &defaults());
    let host = host_from_reality(&store).await;
    host.ignore("mounts:m1");
    let executor = executor(store.clone(), &host, host.registry(), ExecutorConfig::default());
    let reality_before = store.status().await.unwrap().reality;

    store
        .write_intent(
            ResourceTable::Mounts,
            rows(ResourceTable::Mounts, json!([mount("m1", "d1")])),
            "add mount",
        )
        .await
        .unwrap();

    let response = executor.reconcile(None).await;
    assert_eq!(response.result, ReconcileResult::Failed);
    assert_eq!(response.error.unwrap().resource, "mounts:m1");
    assert_eq!(store.status().await.unwrap().reality, reality_before);
}

#[tokio::test]
async fn probe_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), &defaults());
    let host = host_from_reality(&store).await;
    host.break_probe();
    let executor = executor(store.clone(), &host, host.registry(), ExecutorConfig::default());

    let response = executor.reconcile(None).await;
    assert_eq!(response.result, ReconcileResult::Failed);
    assert_eq!(response.error.unwrap().resource, "probe");
    assert!(host.calls().is_empty());
}

#[tokio::test]
async fn panicking_command_leaves_engine_idle() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), &defaults());
    let host = host_from_reality(&store).await;
    let commands = host
        .builder()
        .register(ResourceTable::Modules, Operation::Add, Arc::new(PanickingCommand))
        .build();
    let executor = executor(store.clone(), &host, commands, ExecutorConfig::default());

    store
        .write_intent(
            ResourceTable::Modules,
            rows(ResourceTable::Modules, json!([{"id": "jellyfin", "source": "registry/jellyfin"}])),
            "add module",
        )
        .await
        .unwrap();

    let response = executor.reconcile(None).await;
    assert_eq!(response.result, ReconcileResult::Failed);
    let error = response.error.unwrap();
    assert_eq!(error.resource, "modules");
    assert!(error.message.contains("module installer crashed"));
    assert_eq!(executor.state().state, EngineState::Idle);

    // The engine accepts new work afterwards.
    assert_ne!(executor.reconcile(None).await.result, ReconcileResult::Waiting);
}

#[tokio::test]
async fn partition_policy_lets_attached_disks_through() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), &defaults());
    let host = host_from_reality(&store).await;
    let config = ExecutorConfig {
        reboot_policy: RebootPolicy::PartitionChangesOnly,
    };
    let executor = executor(store.clone(), &host, host.registry(), config);

    let disks: Vec<ResourceRow> = rows(
        ResourceTable::Disks,
        json!([
            {"id": "d1", "device": "/dev/sdb", "filesystem": "ext4"},
            {"id": "d3", "device": "/dev/sdd", "filesystem": "ext4"}
        ]),
    );
    store.write_intent(ResourceTable::Disks, disks, "attach d3").await.unwrap();

    let response = executor.reconcile(None).await;
    assert_eq!(response.result, ReconcileResult::Applied, "{response:?}");
    assert!(host.state().contains(ResourceTable::Disks, "d3"));
}

#[tokio::test]
async fn vars_resolve_against_desired_resources() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), &defaults());
    let host = host_from_reality(&store).await;
    let executor = executor(store.clone(), &host, host.registry(), ExecutorConfig::default());

    store
        .write_intent(
            ResourceTable::Mounts,
            rows(ResourceTable::Mounts, json!([mount("m1", "d1")])),
            "add mount",
        )
        .await
        .unwrap();
    store
        .write_intent(
            ResourceTable::Vars,
            rows(
                ResourceTable::Vars,
                json!([
                    {"id": "root", "value": "${mount:m1}"},
                    {"id": "movies", "value": "${root}/movies"}
                ]),
            ),
            "add vars",
        )
        .await
        .unwrap();

    let response = executor.reconcile(None).await;
    assert_eq!(response.result, ReconcileResult::Applied, "{response:?}");
    let vars = store.get_actual(ResourceTable::Vars).await.unwrap();
    assert_eq!(vars.len(), 2);
}

#[tokio::test]
async fn diverged_reality_fails_the_merge() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), &defaults());
    let host = host_from_reality(&store).await;
    let executor = executor(store.clone(), &host, host.registry(), ExecutorConfig::default());

    store
        .write_intent(
            ResourceTable::Mounts,
            rows(ResourceTable::Mounts, json!([mount("m1", "d1")])),
            "add mount",
        )
        .await
        .unwrap();

    // Someone moves reality off the intent history behind the store's back.
    let log = ResourceLog::open(store.root()).unwrap();
    let reality = store.snapshot(Branch::Reality).await.unwrap();
    let stray = log
        .write_commit(Some(&reality.commit), "stray edit", &reality.snapshot)
        .unwrap();
    log.set_head(Branch::Reality, &stray.id).unwrap();

    let response = executor.reconcile(None).await;
    assert_eq!(response.result, ReconcileResult::Failed, "{response:?}");
    let error = response.error.unwrap();
    assert_eq!(error.resource, "merge");
    assert!(error.message.contains("diverged"), "{}", error.message);
    assert!(store.status().await.unwrap_err().is_divergence());
}
