//! Instruction pipeline description
//!
//! An [`InstructionSet`] is produced by the planner and handed to one
//! executor read-only. Its instructions form a strict chain: the first reads
//! from shard locations, the last writes to shard locations, and every
//! internal pair is connected by an in-process pipe.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::CoreError;

/// One partition of a distributed dataset reachable over the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardLocation {
    /// Channel name of the shard
    pub name: String,
    /// `host:port` of the agent serving the shard
    pub address: String,
    /// Whether the agent should keep the shard on disk rather than in memory
    #[serde(default)]
    pub on_disk: bool,
}

impl ShardLocation {
    pub fn new(name: impl Into<String>, address: impl Into<String>, on_disk: bool) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            on_disk,
        }
    }
}

/// An external program run as a pipeline stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub path: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Raw-line stage rather than a structured-row stage
    #[serde(default)]
    pub is_pipe: bool,
}

/// What a stage runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    /// A built-in function looked up by name in the function registry
    Function {
        function: String,
        #[serde(default)]
        options: JsonValue,
    },
    /// An external process
    Script(Script),
}

/// One pipeline stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub name: String,
    pub step_id: i32,
    pub task_id: i32,
    pub operation: Operation,
    #[serde(default)]
    pub input_shard_locations: Vec<ShardLocation>,
    #[serde(default)]
    pub output_shard_locations: Vec<ShardLocation>,
}

impl Instruction {
    pub fn function(
        name: impl Into<String>,
        function: impl Into<String>,
        options: JsonValue,
    ) -> Self {
        Self {
            name: name.into(),
            step_id: 0,
            task_id: 0,
            operation: Operation::Function {
                function: function.into(),
                options,
            },
            input_shard_locations: Vec::new(),
            output_shard_locations: Vec::new(),
        }
    }

    pub fn script(name: impl Into<String>, script: Script) -> Self {
        Self {
            name: name.into(),
            step_id: 0,
            task_id: 0,
            operation: Operation::Script(script),
            input_shard_locations: Vec::new(),
            output_shard_locations: Vec::new(),
        }
    }

    pub fn with_ids(mut self, step_id: i32, task_id: i32) -> Self {
        self.step_id = step_id;
        self.task_id = task_id;
        self
    }

    pub fn with_inputs(mut self, locations: Vec<ShardLocation>) -> Self {
        self.input_shard_locations = locations;
        self
    }

    pub fn with_outputs(mut self, locations: Vec<ShardLocation>) -> Self {
        self.output_shard_locations = locations;
        self
    }

    pub fn as_script(&self) -> Option<&Script> {
        match &self.operation {
            Operation::Script(script) => Some(script),
            Operation::Function { .. } => None,
        }
    }

    /// Whether this stage emits raw lines instead of structured rows
    pub fn emits_lines(&self) -> bool {
        self.as_script().map(|s| s.is_pipe).unwrap_or(false)
    }
}

/// The ordered pipeline of instructions forming one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionSet {
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub flow_hash_code: u32,
    #[serde(default)]
    pub is_profiling: bool,
    /// Expected downstream reader count of the last stage's outputs
    #[serde(default = "default_reader_count")]
    pub reader_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_address: Option<String>,
}

fn default_reader_count() -> u32 {
    1
}

impl InstructionSet {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            instructions,
            flow_hash_code: 0,
            is_profiling: false,
            reader_count: default_reader_count(),
            agent_address: None,
        }
    }

    pub fn instruction_names(&self) -> Vec<&str> {
        self.instructions.iter().map(|i| i.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Check that the instructions form a strict chain
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.instructions.is_empty() {
            return Err(CoreError::InvalidInstructionSet(
                "instruction set has no instructions".to_string(),
            ));
        }
        let last = self.instructions.len() - 1;
        for (index, instruction) in self.instructions.iter().enumerate() {
            if index > 0 && !instruction.input_shard_locations.is_empty() {
                return Err(CoreError::InvalidInstructionSet(format!(
                    "instruction {} at position {} reads shards but is not the first stage",
                    instruction.name, index
                )));
            }
            if index < last && !instruction.output_shard_locations.is_empty() {
                return Err(CoreError::InvalidInstructionSet(format!(
                    "instruction {} at position {} writes shards but is not the last stage",
                    instruction.name, index
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_instruction_set_from_json() {
        let doc = json!({
            "flow_hash_code": 77,
            "instructions": [
                {
                    "name": "read",
                    "step_id": 1,
                    "task_id": 0,
                    "operation": {"kind": "function", "function": "Pass"},
                    "input_shard_locations": [
                        {"name": "words-0", "address": "127.0.0.1:45327"}
                    ]
                },
                {
                    "name": "count",
                    "step_id": 2,
                    "task_id": 0,
                    "operation": {"kind": "script", "path": "wc", "args": ["-l"], "is_pipe": true}
                }
            ]
        });

        let set: InstructionSet = serde_json::from_value(doc).unwrap();
        assert_eq!(set.flow_hash_code, 77);
        assert_eq!(set.reader_count, 1);
        assert_eq!(set.instruction_names(), vec!["read", "count"]);
        assert!(!set.instructions[0].input_shard_locations[0].on_disk);
        assert!(set.instructions[1].emits_lines());
        assert!(set.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_broken_chain() {
        assert!(InstructionSet::new(vec![]).validate().is_err());

        let middle_reader = InstructionSet::new(vec![
            Instruction::function("a", "Pass", JsonValue::Null),
            Instruction::function("b", "Pass", JsonValue::Null)
                .with_inputs(vec![ShardLocation::new("s", "localhost:1", false)]),
        ]);
        assert!(middle_reader.validate().is_err());

        let early_writer = InstructionSet::new(vec![
            Instruction::function("a", "Pass", JsonValue::Null)
                .with_outputs(vec![ShardLocation::new("s", "localhost:1", false)]),
            Instruction::function("b", "Pass", JsonValue::Null),
        ]);
        assert!(early_writer.validate().is_err());
    }
}
