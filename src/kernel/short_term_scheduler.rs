use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;

use serde::Serialize;

use super::ProcessControlBlock;

use crate::error::ValidationError;

const ADAPTIVE_HISTORY: usize = 10;

/// The ready-queue discipline used by the dispatcher.
///
/// Priorities are static: a process keeps the priority it was created with
/// for the whole run, and no aging is applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum SchedulingAlgorithm {
    Fcfs,
    Sjf,
    Srtf,
    RoundRobin { quantum: u64 },
    Priority { preemptive: bool },
    /// Round-Robin whose quantum follows the recent ready-queue load.
    Adaptive { base_quantum: u64 },
}

impl SchedulingAlgorithm {
    /// Resolves a policy name as typed at the prompt. Names are case
    /// insensitive; `quantum` falls back to `default_quantum` for the
    /// time-sliced policies and is ignored by the others.
    pub fn from_name(
        name: &str,
        quantum: Option<u64>,
        default_quantum: u64,
    ) -> Result<SchedulingAlgorithm, ValidationError> {
        let quantum = quantum.unwrap_or(default_quantum);

        let alg = match name.to_ascii_lowercase().as_str() {
            "fcfs" | "fifo" => SchedulingAlgorithm::Fcfs,
            "sjf" => SchedulingAlgorithm::Sjf,
            "srtf" | "psjf" | "sjf-preemptive" => SchedulingAlgorithm::Srtf,
            "rr" | "roundrobin" | "round-robin" => SchedulingAlgorithm::RoundRobin { quantum },
            "priority" | "prio" => SchedulingAlgorithm::Priority { preemptive: false },
            "ppriority" | "priority-preemptive" | "pprio" => {
                SchedulingAlgorithm::Priority { preemptive: true }
            }
            "adaptive" => SchedulingAlgorithm::Adaptive {
                base_quantum: quantum,
            },
            _ => return Err(ValidationError::UnknownPolicy(name.to_string())),
        };

        alg.validate()?;
        Ok(alg)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            SchedulingAlgorithm::RoundRobin { quantum: 0 }
            | SchedulingAlgorithm::Adaptive { base_quantum: 0 } => {
                Err(ValidationError::InvalidQuantum)
            }
            _ => Ok(()),
        }
    }

    /// Whether an arrival can take the CPU away from the running process.
    pub fn preempts_on_arrival(&self) -> bool {
        matches!(
            self,
            SchedulingAlgorithm::Srtf | SchedulingAlgorithm::Priority { preemptive: true }
        )
    }

    fn uses_fifo(&self) -> bool {
        matches!(
            self,
            SchedulingAlgorithm::Fcfs
                | SchedulingAlgorithm::RoundRobin { .. }
                | SchedulingAlgorithm::Adaptive { .. }
        )
    }
}

impl fmt::Display for SchedulingAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingAlgorithm::Fcfs => write!(f, "FCFS"),
            SchedulingAlgorithm::Sjf => write!(f, "SJF"),
            SchedulingAlgorithm::Srtf => write!(f, "SRTF"),
            SchedulingAlgorithm::RoundRobin { quantum } => write!(f, "RR (q={})", quantum),
            SchedulingAlgorithm::Priority { preemptive: false } => write!(f, "Priority"),
            SchedulingAlgorithm::Priority { preemptive: true } => {
                write!(f, "Priority (preemptive)")
            }
            SchedulingAlgorithm::Adaptive { base_quantum } => {
                write!(f, "Adaptive RR (base q={})", base_quantum)
            }
        }
    }
}

/// Ordering key for the non-FIFO disciplines: smallest rank first, then
/// earliest arrival, then lowest id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ReadyKey {
    rank: i64,
    arrival: u64,
    id: u32,
}

pub(crate) struct ShortTermScheduler {
    fifo_queue: VecDeque<u32>,
    priority_queue: BinaryHeap<Reverse<ReadyKey>>,
    scheduling_alg: SchedulingAlgorithm,
    load_history: VecDeque<usize>,
}

impl ShortTermScheduler {
    pub fn new(scheduling_alg: SchedulingAlgorithm) -> ShortTermScheduler {
        ShortTermScheduler {
            fifo_queue: VecDeque::new(),
            priority_queue: BinaryHeap::new(),
            scheduling_alg,
            load_history: VecDeque::with_capacity(ADAPTIVE_HISTORY),
        }
    }

    pub fn schedule_process(&mut self, pcb: &ProcessControlBlock) {
        if self.scheduling_alg.uses_fifo() {
            self.fifo_queue.push_back(pcb.get_id());
        } else {
            self.priority_queue.push(Reverse(self.key_for(pcb)));
        }
    }

    pub fn schedule_next(&mut self) -> Option<u32> {
        if self.scheduling_alg.uses_fifo() {
            self.fifo_queue.pop_front()
        } else {
            self.priority_queue.pop().map(|Reverse(key)| key.id)
        }
    }

    /// True when the best ready process should replace `running` right now.
    /// Equal ranks never preempt.
    pub fn should_preempt(&self, running: &ProcessControlBlock) -> bool {
        if !self.scheduling_alg.preempts_on_arrival() {
            return false;
        }

        match self.priority_queue.peek() {
            Some(Reverse(best)) => best.rank < self.rank_of(running),
            None => false,
        }
    }

    /// The slice granted to the process about to be dispatched, or `None`
    /// when it may run until it finishes or is preempted by an arrival.
    pub fn time_slice(&mut self) -> Option<u64> {
        match self.scheduling_alg {
            SchedulingAlgorithm::RoundRobin { quantum } => Some(quantum),
            SchedulingAlgorithm::Adaptive { base_quantum } => Some(self.adapt_quantum(base_quantum)),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.fifo_queue.len() + self.priority_queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ready process ids in dispatch order, for event snapshots.
    pub fn snapshot(&self) -> Vec<u32> {
        if self.scheduling_alg.uses_fifo() {
            self.fifo_queue.iter().copied().collect()
        } else {
            let mut keys: Vec<ReadyKey> = self.priority_queue.iter().map(|r| r.0).collect();
            keys.sort_unstable();
            keys.into_iter().map(|key| key.id).collect()
        }
    }

    fn adapt_quantum(&mut self, base_quantum: u64) -> u64 {
        // The process being dispatched counts towards the load.
        let load = self.len() + 1;
        if self.load_history.len() == ADAPTIVE_HISTORY {
            self.load_history.pop_front();
        }
        self.load_history.push_back(load);

        let samples = self.load_history.len();
        let total: usize = self.load_history.iter().sum();

        if total > 5 * samples {
            base_quantum.saturating_sub(2).max(2)
        } else if total < 2 * samples {
            base_quantum + 2
        } else {
            base_quantum
        }
    }

    fn rank_of(&self, pcb: &ProcessControlBlock) -> i64 {
        match self.scheduling_alg {
            SchedulingAlgorithm::Priority { .. } => pcb.get_priority() as i64,
            _ => pcb.get_remaining() as i64,
        }
    }

    fn key_for(&self, pcb: &ProcessControlBlock) -> ReadyKey {
        ReadyKey {
            rank: self.rank_of(pcb),
            arrival: pcb.get_arrival(),
            id: pcb.get_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::kernel::ProcessSpec;

    fn pcb(pid: u32, arrival: i64, burst: i64, priority: i32) -> ProcessControlBlock {
        ProcessControlBlock::new(&ProcessSpec::new(pid, arrival, burst, priority)).unwrap()
    }

    #[test]
    fn test_short_term_scheduler_from_name() {
        assert_eq!(
            SchedulingAlgorithm::from_name("RR", Some(3), 4),
            Ok(SchedulingAlgorithm::RoundRobin { quantum: 3 })
        );
        assert_eq!(
            SchedulingAlgorithm::from_name("rr", None, 4),
            Ok(SchedulingAlgorithm::RoundRobin { quantum: 4 })
        );
        assert_eq!(
            SchedulingAlgorithm::from_name("rr", Some(0), 4),
            Err(ValidationError::InvalidQuantum)
        );
        assert_eq!(
            SchedulingAlgorithm::from_name("lottery", None, 4),
            Err(ValidationError::UnknownPolicy("lottery".into()))
        );
    }

    #[test]
    fn test_short_term_scheduler_sjf_tie_breaks() {
        let mut sts = ShortTermScheduler::new(SchedulingAlgorithm::Sjf);
        sts.schedule_process(&pcb(4, 2, 3, 0));
        sts.schedule_process(&pcb(2, 1, 3, 0));
        sts.schedule_process(&pcb(3, 1, 3, 0));
        sts.schedule_process(&pcb(9, 5, 1, 0));

        assert_eq!(sts.snapshot(), vec![9, 2, 3, 4]);
        assert_eq!(sts.schedule_next(), Some(9));
        assert_eq!(sts.schedule_next(), Some(2));
        assert_eq!(sts.schedule_next(), Some(3));
        assert_eq!(sts.schedule_next(), Some(4));
        assert_eq!(sts.schedule_next(), None);
    }

    #[test]
    fn test_short_term_scheduler_priority_preemption_is_strict() {
        let mut sts = ShortTermScheduler::new(SchedulingAlgorithm::Priority { preemptive: true });
        let running = pcb(1, 0, 5, 2);

        sts.schedule_process(&pcb(2, 1, 3, 2));
        assert!(!sts.should_preempt(&running));

        sts.schedule_process(&pcb(3, 1, 3, 1));
        assert!(sts.should_preempt(&running));
    }

    #[test]
    fn test_short_term_scheduler_non_preemptive_never_preempts() {
        let mut sts = ShortTermScheduler::new(SchedulingAlgorithm::Sjf);
        sts.schedule_process(&pcb(2, 1, 1, 0));

        assert!(!sts.should_preempt(&pcb(1, 0, 10, 0)));
    }

    #[test]
    fn test_short_term_scheduler_adaptive_quantum_follows_load() {
        let mut sts = ShortTermScheduler::new(SchedulingAlgorithm::Adaptive { base_quantum: 4 });
        assert_eq!(sts.time_slice(), Some(6));

        for pid in 0..8 {
            sts.schedule_process(&pcb(pid, 0, 1, 0));
        }
        // Loads so far: 1 then 9, average 5.
        assert_eq!(sts.time_slice(), Some(4));
        assert_eq!(sts.time_slice(), Some(2));
    }
}
