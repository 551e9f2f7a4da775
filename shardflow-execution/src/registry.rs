//! Built-in function registry
//!
//! The registry is assembled once at process start and shared read-only
//! with the executor. Tests build their own registries with fakes.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use shardflow_config::SortConfig;
use shardflow_core::StatCounter;
use shardflow_ipc::{StageReader, StageWriter};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::functions::{LocalSort, MergeSortedTo, MergeTo, Pass};

/// Everything a built-in function may need besides its streams
#[derive(Debug, Clone)]
pub struct FunctionContext {
    /// Name of the instruction being run
    pub instruction: String,
    /// Instruction-specific options from the planner
    pub options: JsonValue,
    /// Rows in and out, counted by the function
    pub stat: Arc<StatCounter>,
    pub sort: SortConfig,
    /// Cancelled when the task is being torn down
    pub cancel: CancellationToken,
    /// Helpers spawned here are waited for before the task reports its result
    pub tasks: TaskTracker,
}

/// A stage implemented inside the executor.
///
/// Readers carry framed rows. Writers are buffered by the caller and shut
/// down after `run` returns, whether it succeeded or not.
#[async_trait]
pub trait InstructionFunction: Send + Sync {
    async fn run(
        &self,
        readers: Vec<StageReader>,
        writers: &mut [StageWriter],
        ctx: &FunctionContext,
    ) -> anyhow::Result<()>;
}

/// Immutable mapping from function name to implementation
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn InstructionFunction>>,
}

impl FunctionRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with every built-in function
    pub fn with_builtins() -> Self {
        Self::new()
            .with("LocalSort", LocalSort)
            .with("MergeSortedTo", MergeSortedTo)
            .with("MergeTo", MergeTo)
            .with("Pass", Pass)
    }

    /// Add or replace a function while the registry is being assembled
    pub fn with(mut self, name: impl Into<String>, function: impl InstructionFunction + 'static) -> Self {
        self.functions.insert(name.into(), Arc::new(function));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn InstructionFunction>> {
        self.functions.get(name).cloned()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl InstructionFunction for Noop {
        async fn run(
            &self,
            _readers: Vec<StageReader>,
            _writers: &mut [StageWriter],
            _ctx: &FunctionContext,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_builtins_registered() {
        let registry = FunctionRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["LocalSort", "MergeSortedTo", "MergeTo", "Pass"]);
        assert!(registry.get("Missing").is_none());
    }

    #[test]
    fn test_injected_function_overrides_builtin() {
        let registry = FunctionRegistry::with_builtins().with("Pass", Noop).with("Noop", Noop);
        assert!(registry.get("Noop").is_some());
        assert_eq!(registry.names().len(), 5);
    }
}
