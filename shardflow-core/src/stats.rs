//! Per-instruction input/output counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of one instruction's counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionStat {
    pub step_id: i32,
    pub task_id: i32,
    pub input_counter: u64,
    pub output_counter: u64,
}

/// Live counters shared between a running stage and the stats reporter
#[derive(Debug, Default)]
pub struct StatCounter {
    step_id: i32,
    task_id: i32,
    input: AtomicU64,
    output: AtomicU64,
}

impl StatCounter {
    pub fn new(step_id: i32, task_id: i32) -> Self {
        Self {
            step_id,
            task_id,
            input: AtomicU64::new(0),
            output: AtomicU64::new(0),
        }
    }

    pub fn step_id(&self) -> i32 {
        self.step_id
    }

    pub fn task_id(&self) -> i32 {
        self.task_id
    }

    pub fn add_input(&self, n: u64) {
        self.input.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_output(&self, n: u64) {
        self.output.fetch_add(n, Ordering::Relaxed);
    }

    pub fn input_count(&self) -> u64 {
        self.input.load(Ordering::Relaxed)
    }

    pub fn output_count(&self) -> u64 {
        self.output.load(Ordering::Relaxed)
    }

    /// Whether `stat` describes this counter's instruction
    pub fn matches(&self, stat: &InstructionStat) -> bool {
        self.step_id == stat.step_id && self.task_id == stat.task_id
    }

    /// Replace both counters with values reported from elsewhere
    pub fn overwrite(&self, stat: &InstructionStat) {
        self.input.store(stat.input_counter, Ordering::Relaxed);
        self.output.store(stat.output_counter, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> InstructionStat {
        InstructionStat {
            step_id: self.step_id,
            task_id: self.task_id,
            input_counter: self.input_count(),
            output_counter: self.output_count(),
        }
    }
}
