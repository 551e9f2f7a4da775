//! Whole tasks driven against an in-process agent over TCP

mod common;

use common::*;
use serde_json::json;
use shardflow_core::{Datum, Instruction, InstructionSet, Script};
use shardflow_execution::{query_stats, Executor, ExecutorError, FunctionRegistry};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn sort_dirs_left(tmp_root: &Path) -> Vec<String> {
    std::fs::read_dir(tmp_root)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("shardflow-sort-"))
        .collect()
}

#[tokio::test]
async fn test_merge_sort_pipeline_spills_and_cleans_up() {
    init_quiet_logging();
    let dir = tempfile::TempDir::new().unwrap();
    let mut shards = HashMap::new();
    shards.insert("nums-0".to_string(), encode_rows(&int_rows(&[9, 3, 7, 1])).await);
    shards.insert("nums-1".to_string(), encode_rows(&int_rows(&[4, 8, 2, 6, 5])).await);
    let agent = FakeAgent::start(shards).await;
    let executor = Executor::new(executor_options(dir.path()), FunctionRegistry::with_builtins());

    let mut set = InstructionSet::new(vec![
        Instruction::function("Merge", "MergeTo", serde_json::Value::Null)
            .with_ids(1, 0)
            .with_inputs(vec![agent.location("nums-0"), agent.location("nums-1")]),
        // two rows per run forces several spills
        Instruction::function("Sort", "LocalSort", json!({"order_by": [{"index": 0}]}))
            .with_ids(2, 0),
        Instruction::function("Write", "Pass", serde_json::Value::Null)
            .with_ids(3, 0)
            .with_outputs(vec![agent.location("sorted-0")]),
    ]);
    set.flow_hash_code = 11;

    let stats = tokio::time::timeout(
        Duration::from_secs(20),
        executor.execute_instruction_set(&set, CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(
        agent.written_rows("sorted-0").await,
        int_rows(&[1, 2, 3, 4, 5, 6, 7, 8, 9])
    );
    assert_eq!(stats.len(), 3);
    assert!(stats.iter().all(|s| s.input_counter == 9 && s.output_counter == 9));
    assert!(sort_dirs_left(dir.path()).is_empty());
}

#[tokio::test]
async fn test_cancel_mid_sort_waits_for_spill_cleanup() {
    init_quiet_logging();
    let dir = tempfile::TempDir::new().unwrap();
    let values: Vec<i64> = (0..20_000).rev().collect();
    let mut shards = HashMap::new();
    shards.insert("nums-0".to_string(), encode_rows(&int_rows(&values)).await);
    let agent = FakeAgent::start(shards).await;
    let executor = Executor::new(executor_options(dir.path()), FunctionRegistry::with_builtins());

    // the second input never ends, so the sort never reaches its merge
    let set = InstructionSet::new(vec![
        Instruction::function("Merge", "MergeTo", serde_json::Value::Null)
            .with_inputs(vec![agent.location("nums-0"), agent.location("hang-0")]),
        Instruction::function("Sort", "LocalSort", json!({"order_by": [{"index": 0}]}))
            .with_outputs(vec![agent.location("sorted-0")]),
    ]);

    let cancel = CancellationToken::new();
    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { executor.execute_instruction_set(&set, cancel).await })
    };

    let sort_root = dir.path().to_path_buf();
    let spilled = wait_until(Duration::from_secs(10), move || {
        sort_dirs_left(&sort_root).iter().any(|name| {
            std::fs::read_dir(sort_root.join(name)).map_or(false, |mut runs| runs.next().is_some())
        })
    })
    .await;
    assert!(spilled);
    cancel.cancel();

    let err = tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(sort_dirs_left(dir.path()).is_empty());
}

#[tokio::test]
async fn test_script_between_functions_sees_lines() {
    init_quiet_logging();
    let dir = tempfile::TempDir::new().unwrap();
    let mut shards = HashMap::new();
    shards.insert(
        "pairs-0".to_string(),
        encode_rows(&[
            vec![Datum::from("pear"), Datum::Int(3)],
            vec![Datum::from("apple"), Datum::Int(10)],
        ])
        .await,
    );
    let agent = FakeAgent::start(shards).await;
    let executor = Executor::new(executor_options(dir.path()), FunctionRegistry::with_builtins());

    let set = InstructionSet::new(vec![
        Instruction::function("Read", "Pass", serde_json::Value::Null)
            .with_inputs(vec![agent.location("pairs-0")]),
        Instruction::script(
            "Sort lines",
            Script {
                path: "sort".to_string(),
                args: vec![],
                is_pipe: true,
            },
        )
        .with_outputs(vec![agent.location("out-0")]),
    ]);

    executor
        .execute_instruction_set(&set, CancellationToken::new())
        .await
        .unwrap();

    // fields come back as text after passing through the script
    assert_eq!(
        agent.written_rows("out-0").await,
        vec![
            vec![Datum::from("apple"), Datum::from("10")],
            vec![Datum::from("pear"), Datum::from("3")],
        ]
    );
}

#[tokio::test]
async fn test_function_failure_names_instruction() {
    init_quiet_logging();
    let dir = tempfile::TempDir::new().unwrap();
    let mut shards = HashMap::new();
    shards.insert("nums-0".to_string(), encode_rows(&int_rows(&[2, 1])).await);
    let agent = FakeAgent::start(shards).await;
    let executor = Executor::new(executor_options(dir.path()), FunctionRegistry::with_builtins());

    let set = InstructionSet::new(vec![
        Instruction::function("Sort", "LocalSort", json!({"order_by": [{"index": 3}]}))
            .with_inputs(vec![agent.location("nums-0")]),
        Instruction::function("Write", "Pass", serde_json::Value::Null)
            .with_outputs(vec![agent.location("out-0")]),
    ]);

    let err = tokio::time::timeout(
        Duration::from_secs(20),
        executor.execute_instruction_set(&set, CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap_err();

    assert!(matches!(err, ExecutorError::FunctionFailed { .. }), "unexpected error: {err}");
    assert!(err.to_string().starts_with("Failed executing function Sort"));
    assert!(err.to_string().contains("out of range"));
    assert!(sort_dirs_left(dir.path()).is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_stats_queryable_while_task_runs() {
    use std::os::unix::fs::PermissionsExt;

    init_quiet_logging();
    let dir = tempfile::TempDir::new().unwrap();
    let script = dir.path().join("report.sh");
    std::fs::write(
        &script,
        "#!/bin/sh\n\
         while [ $# -gt 0 ]; do\n\
           if [ \"$1\" = \"-gleam.executor\" ]; then echo \"$2\" > executor.addr; fi\n\
           shift\n\
         done\n\
         exec cat\n",
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let agent = FakeAgent::start(HashMap::new()).await;
    let executor = Executor::new(executor_options(dir.path()), FunctionRegistry::with_builtins());
    let mut set = InstructionSet::new(vec![Instruction::script(
        "Report",
        Script {
            path: "report.sh".to_string(),
            args: vec![],
            is_pipe: false,
        },
    )
    .with_ids(4, 2)
    .with_inputs(vec![agent.location("hang-0")])]);
    set.flow_hash_code = 4242;

    let cancel = CancellationToken::new();
    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { executor.execute_instruction_set(&set, cancel).await })
    };

    let addr_file = dir.path().join("executor.addr");
    assert!(wait_until(Duration::from_secs(10), || addr_file.exists()).await);
    let mut address = String::new();
    assert!(
        wait_until(Duration::from_secs(5), || {
            address = std::fs::read_to_string(&addr_file).unwrap_or_default();
            address.ends_with('\n')
        })
        .await
    );

    let (flow_hash_code, stats) = query_stats(address.trim()).await.unwrap();
    assert_eq!(flow_hash_code, 4242);
    assert_eq!(stats.len(), 1);
    assert_eq!((stats[0].step_id, stats[0].task_id), (4, 2));

    cancel.cancel();
    let err = tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(err.is_cancelled());
}
