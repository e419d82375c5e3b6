use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    New,
    Ready,
    Running,
    Terminated,
}

/// A synthetic job as written in a process spec. Signed fields so that bad
/// input survives parsing and is rejected by validation instead.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub pid: u32,
    pub arrival: i64,
    pub burst: i64,
    #[serde(default)]
    pub priority: i32,
}

impl ProcessSpec {
    pub fn new(pid: u32, arrival: i64, burst: i64, priority: i32) -> ProcessSpec {
        ProcessSpec {
            pid,
            arrival,
            burst,
            priority,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.arrival < 0 {
            return Err(ValidationError::NegativeArrival {
                pid: self.pid,
                arrival: self.arrival,
            });
        }
        if self.burst <= 0 {
            return Err(ValidationError::NonPositiveBurst {
                pid: self.pid,
                burst: self.burst,
            });
        }
        Ok(())
    }
}

/// The process control block. Holds the immutable job description and the
/// runtime state the dispatcher mutates during one simulation.
#[derive(Clone, Debug)]
pub struct ProcessControlBlock {
    pub state: ProcessState,

    id: u32,
    arrival: u64,
    burst: u64,
    priority: i32,

    remaining: u64,
    first_dispatch: Option<u64>,
    completion: Option<u64>,
}

impl ProcessControlBlock {
    pub fn new(spec: &ProcessSpec) -> Result<ProcessControlBlock, ValidationError> {
        spec.validate()?;

        Ok(ProcessControlBlock {
            state: ProcessState::New,
            id: spec.pid,
            arrival: spec.arrival as u64,
            burst: spec.burst as u64,
            priority: spec.priority,
            remaining: spec.burst as u64,
            first_dispatch: None,
            completion: None,
        })
    }

    pub fn get_id(&self) -> u32 {
        self.id
    }

    pub fn get_priority(&self) -> i32 {
        self.priority
    }

    pub fn get_arrival(&self) -> u64 {
        self.arrival
    }

    pub fn get_burst(&self) -> u64 {
        self.burst
    }

    pub fn get_remaining(&self) -> u64 {
        self.remaining
    }

    pub fn get_first_dispatch(&self) -> Option<u64> {
        self.first_dispatch
    }

    pub fn get_completion(&self) -> Option<u64> {
        self.completion
    }

    pub fn admit(&mut self) {
        self.state = ProcessState::Ready;
    }

    pub fn dispatch(&mut self, now: u64) {
        self.state = ProcessState::Running;
        self.first_dispatch.get_or_insert(now);
    }

    /// Consumes up to `ticks` of CPU time and returns what is left.
    pub fn run_for(&mut self, ticks: u64) -> u64 {
        self.remaining -= ticks.min(self.remaining);
        self.remaining
    }

    pub fn preempt(&mut self) {
        self.state = ProcessState::Ready;
    }

    /// Marks the process finished. The completion time is only ever written
    /// once; later calls leave it untouched and return false.
    pub fn complete(&mut self, now: u64) -> bool {
        if self.completion.is_some() || self.remaining != 0 {
            return false;
        }

        self.completion = Some(now);
        self.state = ProcessState::Terminated;
        true
    }

    pub fn turnaround_time(&self) -> Option<u64> {
        self.completion.map(|completion| completion - self.arrival)
    }

    pub fn waiting_time(&self) -> Option<u64> {
        self.turnaround_time().map(|turnaround| turnaround - self.burst)
    }

    pub fn response_time(&self) -> Option<u64> {
        self.first_dispatch.map(|dispatch| dispatch - self.arrival)
    }
}
