use serde::Serialize;

use super::{ProcessControlBlock, SchedulingAlgorithm};

/// One stretch of CPU time. `pid == None` is the idle pseudo-process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Interval {
    pub pid: Option<u32>,
    pub start: u64,
    pub end: u64,
}

impl Interval {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_idle(&self) -> bool {
        self.pid.is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Arrive,
    Dispatch,
    Preempt,
    Complete,
    Idle,
}

/// A dispatcher decision, with the ready queue as it stood afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SchedulerEvent {
    pub time: u64,
    pub kind: EventKind,
    pub pid: Option<u32>,
    pub ready: Vec<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProcessMetrics {
    pub pid: u32,
    pub arrival: u64,
    pub burst: u64,
    pub priority: i32,
    pub first_dispatch: u64,
    pub completion: u64,
    pub turnaround: u64,
    pub waiting: u64,
    pub response: u64,
}

impl ProcessMetrics {
    /// Metrics of a terminated process; `None` if it never completed.
    pub fn from_pcb(pcb: &ProcessControlBlock) -> Option<ProcessMetrics> {
        Some(ProcessMetrics {
            pid: pcb.get_id(),
            arrival: pcb.get_arrival(),
            burst: pcb.get_burst(),
            priority: pcb.get_priority(),
            first_dispatch: pcb.get_first_dispatch()?,
            completion: pcb.get_completion()?,
            turnaround: pcb.turnaround_time()?,
            waiting: pcb.waiting_time()?,
            response: pcb.response_time()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Summary {
    pub avg_waiting: f64,
    pub avg_turnaround: f64,
    pub avg_response: f64,
    pub total_time: u64,
    pub busy_time: u64,
    pub utilization: f64,
    pub throughput: f64,
    pub preemptions: u64,
}

impl Summary {
    pub fn new(processes: &[ProcessMetrics], total_time: u64, busy_time: u64, preemptions: u64) -> Summary {
        let count = processes.len().max(1) as f64;
        let mean = |f: fn(&ProcessMetrics) -> u64| processes.iter().map(|m| f(m) as f64).sum::<f64>() / count;
        let ratio = |value: f64| {
            if total_time == 0 {
                0.0
            } else {
                value / total_time as f64
            }
        };

        Summary {
            avg_waiting: mean(|m| m.waiting),
            avg_turnaround: mean(|m| m.turnaround),
            avg_response: mean(|m| m.response),
            total_time,
            busy_time,
            utilization: ratio(busy_time as f64),
            throughput: ratio(processes.len() as f64),
            preemptions,
        }
    }
}

/// The result of one simulation run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Schedule {
    pub algorithm: SchedulingAlgorithm,
    pub timeline: Vec<Interval>,
    pub processes: Vec<ProcessMetrics>,
    pub summary: Summary,
    pub events: Vec<SchedulerEvent>,
}

impl Schedule {
    /// Time spent running processes, i.e. everything but idle intervals.
    pub fn busy_time(&self) -> u64 {
        self.timeline
            .iter()
            .filter(|interval| !interval.is_idle())
            .map(Interval::len)
            .sum()
    }

    pub fn metrics_for(&self, pid: u32) -> Option<&ProcessMetrics> {
        self.processes.iter().find(|metrics| metrics.pid == pid)
    }

    /// Process ids in the order they first reached the CPU.
    pub fn dispatch_order(&self) -> Vec<u32> {
        let mut order = Vec::new();
        for pid in self.timeline.iter().filter_map(|interval| interval.pid) {
            if !order.contains(&pid) {
                order.push(pid);
            }
        }
        order
    }
}
