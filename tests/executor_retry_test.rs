//! Subprocess start retries and cancellation, end to end through the executor

mod common;

use async_trait::async_trait;
use common::*;
use serde_json::Value as JsonValue;
use shardflow_core::{Instruction, InstructionSet, Script};
use shardflow_execution::{
    Executor, ExecutorError, FunctionContext, FunctionRegistry, InstructionFunction,
};
use shardflow_ipc::{read_row, write_row, StageReader, StageWriter};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Copies its input once the downstream script has started `attempts` times
struct AfterAttempts {
    work_dir: PathBuf,
    attempts: u32,
}

#[async_trait]
impl InstructionFunction for AfterAttempts {
    async fn run(
        &self,
        readers: Vec<StageReader>,
        writers: &mut [StageWriter],
        ctx: &FunctionContext,
    ) -> anyhow::Result<()> {
        while attempts(&self.work_dir) < self.attempts {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        for mut reader in readers {
            while let Some(row) = read_row(&mut reader).await? {
                ctx.stat.add_input(1);
                for writer in writers.iter_mut() {
                    write_row(writer, &row).await?;
                }
                ctx.stat.add_output(1);
            }
        }
        Ok(())
    }
}

fn sh(name: &str, script: &str) -> Instruction {
    Instruction::script(
        name,
        Script {
            path: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            is_pipe: true,
        },
    )
}

#[tokio::test]
async fn test_script_retried_until_third_start() {
    init_quiet_logging();
    let dir = tempfile::TempDir::new().unwrap();
    let mut shards = HashMap::new();
    shards.insert("words".to_string(), encode_rows(&text_rows(&["b", "a", "c"])).await);
    let agent = FakeAgent::start(shards).await;

    let registry = FunctionRegistry::with_builtins().with(
        "AfterAttempts",
        AfterAttempts {
            work_dir: dir.path().to_path_buf(),
            attempts: 3,
        },
    );
    let executor = Executor::new(executor_options(dir.path()), registry);

    let set = InstructionSet::new(vec![
        Instruction::function("Gate", "AfterAttempts", JsonValue::Null)
            .with_ids(1, 0)
            .with_inputs(vec![agent.location("words")]),
        sh(
            "Flaky",
            &format!("{COUNT_ATTEMPTS} [ $n -ge 3 ] || exit 1; exec cat"),
        )
        .with_ids(2, 0),
        Instruction::function("Write", "Pass", JsonValue::Null)
            .with_ids(3, 0)
            .with_outputs(vec![agent.location("out")]),
    ]);

    let stats = tokio::time::timeout(
        Duration::from_secs(20),
        executor.execute_instruction_set(&set, CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(attempts(dir.path()), 3);
    assert_eq!(agent.written_rows("out").await, text_rows(&["b", "a", "c"]));
    // the script stage counts bytes, "b\na\nc\n"
    assert_eq!(stats[1].input_counter, 6);
    assert_eq!(stats[2].output_counter, 3);
}

#[tokio::test]
async fn test_script_not_retried_after_reading_input() {
    init_quiet_logging();
    let dir = tempfile::TempDir::new().unwrap();
    let mut shards = HashMap::new();
    shards.insert("words".to_string(), encode_rows(&text_rows(&["x", "y"])).await);
    let agent = FakeAgent::start(shards).await;
    let executor = Executor::new(executor_options(dir.path()), FunctionRegistry::with_builtins());

    let set = InstructionSet::new(vec![
        Instruction::function("Read", "Pass", JsonValue::Null)
            .with_inputs(vec![agent.location("words")]),
        sh(
            "Partial",
            &format!("{COUNT_ATTEMPTS} head -c 1 >/dev/null; exit 1"),
        ),
    ]);

    let err = tokio::time::timeout(
        Duration::from_secs(20),
        executor.execute_instruction_set(&set, CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap_err();

    assert!(
        matches!(err, ExecutorError::CommandFailed { ref instruction, .. } if instruction == "Partial"),
        "unexpected error: {err}"
    );
    assert!(err.to_string().starts_with("Failed executing command Partial"));
    assert_eq!(attempts(dir.path()), 1);
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_task() {
    init_quiet_logging();
    let dir = tempfile::TempDir::new().unwrap();
    let executor = Executor::new(executor_options(dir.path()), FunctionRegistry::with_builtins());
    let set = InstructionSet::new(vec![sh("Broken", &format!("{COUNT_ATTEMPTS} exit 3"))]);

    let err = executor
        .execute_instruction_set(&set, CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.instruction(), Some("Broken"));
    assert_eq!(attempts(dir.path()), 3);
}

#[tokio::test]
async fn test_cancel_terminates_blocked_subprocess() {
    init_quiet_logging();
    let dir = tempfile::TempDir::new().unwrap();
    let agent = FakeAgent::start(HashMap::new()).await;
    let executor = Executor::new(executor_options(dir.path()), FunctionRegistry::with_builtins());

    // stdin comes from a shard that never sends anything
    let set = InstructionSet::new(vec![
        sh("Blocked", "echo $$ > pid; exec cat").with_inputs(vec![agent.location("hang-0")])
    ]);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let pid_file = dir.path().join("pid");
    let watcher = tokio::spawn(async move {
        let started = wait_until(Duration::from_secs(10), || pid_file.exists()).await;
        trigger.cancel();
        started
    });

    let err = tokio::time::timeout(
        Duration::from_secs(10),
        executor.execute_instruction_set(&set, cancel),
    )
    .await
    .unwrap()
    .unwrap_err();
    assert!(watcher.await.unwrap(), "subprocess never started");
    assert!(err.is_cancelled());

    #[cfg(target_os = "linux")]
    {
        let pid = std::fs::read_to_string(dir.path().join("pid")).unwrap();
        let proc_dir = PathBuf::from(format!("/proc/{}", pid.trim()));
        assert!(!proc_dir.exists(), "subprocess {} still running", pid.trim());
    }
}
