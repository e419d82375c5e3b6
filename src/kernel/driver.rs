use tracing::{debug, trace};

use super::*;

use crate::error::ValidationError;

/// Where the dispatcher is in its decision cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Dispatching,
    Running,
    Preempting,
    Done,
}

/// Simulates one run of a process set under a scheduling algorithm.
///
/// Time only advances between decision points (arrivals, completions and
/// quantum expiries); every arrival due at the current tick is admitted
/// before any decision is taken at that tick, so ties resolve the same way
/// on every run.
pub struct Driver {
    table: ProcessTable,
    lts: LongTermScheduler,
    sts: ShortTermScheduler,
    cpu: Cpu,
    scheduling_alg: SchedulingAlgorithm,
    state: DispatcherState,
    clock: u64,
    preemptions: u64,
    timeline: Vec<Interval>,
    events: Vec<SchedulerEvent>,
}

impl Driver {
    pub fn new(table: ProcessTable, scheduling_alg: SchedulingAlgorithm) -> Driver {
        Driver {
            table,
            lts: LongTermScheduler::new(),
            sts: ShortTermScheduler::new(scheduling_alg),
            cpu: Cpu::new(),
            scheduling_alg,
            state: DispatcherState::Idle,
            clock: 0,
            preemptions: 0,
            timeline: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    pub fn start(mut self) -> Schedule {
        debug!(
            algorithm = %self.scheduling_alg,
            processes = self.table.len(),
            "starting simulation"
        );
        self.lts.enqueue_programs(&self.table);

        while self.state != DispatcherState::Done {
            self.step();
        }

        self.finish()
    }

    /// Performs one transition of the dispatcher state machine.
    pub fn step(&mut self) {
        self.admit_arrivals();

        self.state = match self.state {
            DispatcherState::Idle => self.idle(),
            DispatcherState::Dispatching => self.dispatch(),
            DispatcherState::Running => self.run(),
            DispatcherState::Preempting => self.preempt(),
            DispatcherState::Done => DispatcherState::Done,
        };
    }

    fn admit_arrivals(&mut self) {
        for process_id in self.lts.batch_step(&mut self.table, self.clock) {
            self.sts.schedule_process(self.table.get_pcb_for(process_id));
            self.record(EventKind::Arrive, Some(process_id));
        }
    }

    fn idle(&mut self) -> DispatcherState {
        if !self.sts.is_empty() {
            return DispatcherState::Dispatching;
        }

        match self.lts.next_arrival() {
            Some(next_arrival) => {
                self.record(EventKind::Idle, None);
                self.timeline.push(Interval {
                    pid: None,
                    start: self.clock,
                    end: next_arrival,
                });
                self.clock = next_arrival;
                DispatcherState::Idle
            }
            None => DispatcherState::Done,
        }
    }

    fn dispatch(&mut self) -> DispatcherState {
        let process_id = match self.sts.schedule_next() {
            Some(process_id) => process_id,
            None => return DispatcherState::Idle,
        };

        let slice = self.sts.time_slice();
        self.table.get_pcb_mut(process_id).dispatch(self.clock);
        self.cpu.execute_process(process_id, self.clock, slice);
        self.record(EventKind::Dispatch, Some(process_id));

        DispatcherState::Running
    }

    fn run(&mut self) -> DispatcherState {
        let process_id = match self.cpu.current() {
            Some(process_id) => process_id,
            None => return DispatcherState::Dispatching,
        };
        let pcb = self.table.get_pcb_for(process_id);

        if pcb.get_remaining() == 0 {
            return DispatcherState::Preempting;
        }

        if self.cpu.slice_expired() {
            if self.sts.is_empty() {
                trace!(pid = process_id, "quantum expired with nobody ready, continuing");
                self.cpu.renew_slice(self.sts.time_slice());
            } else {
                return DispatcherState::Preempting;
            }
        }

        if self.sts.should_preempt(pcb) {
            return DispatcherState::Preempting;
        }

        let horizon = self.lts.next_arrival();
        self.clock += self.cpu.cycle(&mut self.table, self.clock, horizon);

        DispatcherState::Running
    }

    fn preempt(&mut self) -> DispatcherState {
        if let Some((process_id, start)) = self.cpu.release() {
            self.timeline.push(Interval {
                pid: Some(process_id),
                start,
                end: self.clock,
            });

            let pcb = self.table.get_pcb_mut(process_id);
            if pcb.complete(self.clock) {
                self.record(EventKind::Complete, Some(process_id));
            } else {
                pcb.preempt();
                self.sts.schedule_process(self.table.get_pcb_for(process_id));
                self.preemptions += 1;
                self.record(EventKind::Preempt, Some(process_id));
            }
        }

        if self.table.all_terminated() {
            DispatcherState::Done
        } else if self.sts.is_empty() {
            DispatcherState::Idle
        } else {
            DispatcherState::Dispatching
        }
    }

    fn record(&mut self, kind: EventKind, pid: Option<u32>) {
        let event = SchedulerEvent {
            time: self.clock,
            kind,
            pid,
            ready: self.sts.snapshot(),
        };
        trace!(time = event.time, kind = ?event.kind, pid = ?event.pid, ready = ?event.ready, "dispatcher event");
        self.events.push(event);
    }

    fn finish(mut self) -> Schedule {
        let processes: Vec<ProcessMetrics> = self
            .table
            .get_pcbs()
            .filter_map(ProcessMetrics::from_pcb)
            .collect();
        let summary = Summary::new(&processes, self.clock, self.cpu.busy_ticks(), self.preemptions);

        debug!(
            total_time = summary.total_time,
            preemptions = summary.preemptions,
            "simulation finished"
        );
        self.table.reset();

        Schedule {
            algorithm: self.scheduling_alg,
            timeline: self.timeline,
            processes,
            summary,
            events: self.events,
        }
    }
}

/// Validates a process set and simulates it under `scheduling_alg`.
pub fn compute_schedule(
    specs: &[ProcessSpec],
    scheduling_alg: SchedulingAlgorithm,
) -> Result<Schedule, ValidationError> {
    scheduling_alg.validate()?;
    let table = ProcessTable::load(specs)?;

    Ok(Driver::new(table, scheduling_alg).start())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(raw: &[(u32, i64, i64, i32)]) -> Vec<ProcessSpec> {
        raw.iter()
            .map(|&(pid, arrival, burst, priority)| ProcessSpec::new(pid, arrival, burst, priority))
            .collect()
    }

    fn timeline(schedule: &Schedule) -> Vec<(Option<u32>, u64, u64)> {
        schedule
            .timeline
            .iter()
            .map(|interval| (interval.pid, interval.start, interval.end))
            .collect()
    }

    fn assert_contiguous(schedule: &Schedule) {
        let mut cursor = 0;
        for interval in &schedule.timeline {
            assert_eq!(interval.start, cursor, "gap or overlap at {:?}", interval);
            assert!(interval.end > interval.start);
            cursor = interval.end;
        }
        assert_eq!(cursor, schedule.summary.total_time);
    }

    #[test]
    fn test_driver_preemptive_priority_scenario() {
        let processes = specs(&[(1, 0, 5, 2), (2, 1, 3, 1), (3, 2, 1, 3)]);
        let schedule =
            compute_schedule(&processes, SchedulingAlgorithm::Priority { preemptive: true }).unwrap();

        assert_eq!(
            timeline(&schedule),
            vec![(Some(1), 0, 1), (Some(2), 1, 4), (Some(1), 4, 8), (Some(3), 8, 9)]
        );
        assert_eq!(schedule.metrics_for(1).unwrap().waiting, 3);
        assert_eq!(schedule.metrics_for(2).unwrap().waiting, 0);
        assert_eq!(schedule.metrics_for(3).unwrap().waiting, 6);
        assert_eq!(schedule.summary.preemptions, 1);
    }

    #[test]
    fn test_driver_non_preemptive_priority_waits_for_completion() {
        let processes = specs(&[(1, 0, 5, 2), (2, 1, 3, 1), (3, 2, 1, 3)]);
        let schedule =
            compute_schedule(&processes, SchedulingAlgorithm::Priority { preemptive: false }).unwrap();

        assert_eq!(
            timeline(&schedule),
            vec![(Some(1), 0, 5), (Some(2), 5, 8), (Some(3), 8, 9)]
        );
        assert_eq!(schedule.summary.preemptions, 0);
    }

    #[test]
    fn test_driver_fcfs_order_ignores_input_permutation() {
        let forward = specs(&[(1, 0, 3, 0), (2, 0, 2, 0), (3, 4, 1, 0), (4, 1, 2, 0)]);
        let mut reversed = forward.clone();
        reversed.reverse();

        let a = compute_schedule(&forward, SchedulingAlgorithm::Fcfs).unwrap();
        let b = compute_schedule(&reversed, SchedulingAlgorithm::Fcfs).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.dispatch_order(), vec![1, 2, 4, 3]);
        assert_eq!(
            timeline(&a),
            vec![(Some(1), 0, 3), (Some(2), 3, 5), (Some(4), 5, 7), (Some(3), 7, 8)]
        );
    }

    #[test]
    fn test_driver_models_idle_gaps() {
        let processes = specs(&[(1, 2, 2, 0), (2, 7, 1, 0)]);
        let schedule = compute_schedule(&processes, SchedulingAlgorithm::Fcfs).unwrap();

        assert_eq!(
            timeline(&schedule),
            vec![(None, 0, 2), (Some(1), 2, 4), (None, 4, 7), (Some(2), 7, 8)]
        );
        assert_eq!(schedule.busy_time(), 3);
        assert_contiguous(&schedule);
    }

    #[test]
    fn test_driver_sjf_picks_shortest_ready() {
        let processes = specs(&[(1, 0, 7, 0), (2, 2, 4, 0), (3, 4, 1, 0), (4, 5, 4, 0)]);
        let schedule = compute_schedule(&processes, SchedulingAlgorithm::Sjf).unwrap();

        assert_eq!(
            timeline(&schedule),
            vec![(Some(1), 0, 7), (Some(3), 7, 8), (Some(2), 8, 12), (Some(4), 12, 16)]
        );
        assert_eq!(schedule.summary.avg_waiting, 4.0);
    }

    #[test]
    fn test_driver_srtf_preempts_on_shorter_arrival() {
        let processes = specs(&[(1, 0, 7, 0), (2, 2, 4, 0), (3, 4, 1, 0), (4, 5, 4, 0)]);
        let schedule = compute_schedule(&processes, SchedulingAlgorithm::Srtf).unwrap();

        assert_eq!(
            timeline(&schedule),
            vec![
                (Some(1), 0, 2),
                (Some(2), 2, 4),
                (Some(3), 4, 5),
                (Some(2), 5, 7),
                (Some(4), 7, 11),
                (Some(1), 11, 16),
            ]
        );
        assert_eq!(schedule.summary.avg_waiting, 3.0);
        assert_eq!(schedule.summary.preemptions, 2);
    }

    #[test]
    fn test_driver_srtf_running_interval_ends_when_shorter_job_arrives() {
        let processes = specs(&[(1, 0, 10, 0), (2, 1, 8, 0), (3, 3, 2, 0), (4, 6, 5, 0)]);
        let schedule = compute_schedule(&processes, SchedulingAlgorithm::Srtf).unwrap();

        for event in schedule.events.iter().filter(|e| e.kind == EventKind::Arrive) {
            let arriving = event.pid.unwrap();
            let burst = schedule.metrics_for(arriving).unwrap().burst;
            let running = schedule
                .timeline
                .iter()
                .find(|i| i.start < event.time && event.time < i.end);

            // An interval spanning the arrival means the arrival did not
            // preempt, so the running job must not have been longer.
            if let Some(interval) = running {
                let pid = interval.pid.unwrap();
                let metrics = schedule.metrics_for(pid).unwrap();
                let ran_before: u64 = schedule
                    .timeline
                    .iter()
                    .filter(|i| i.pid == Some(pid) && i.end <= interval.start)
                    .map(Interval::len)
                    .sum();
                let remaining = metrics.burst - ran_before - (event.time - interval.start);
                assert!(burst >= remaining);
            }
        }
        assert_contiguous(&schedule);
    }

    #[test]
    fn test_driver_round_robin_respects_quantum() {
        let processes = specs(&[(1, 0, 5, 0), (2, 1, 3, 0), (3, 2, 1, 0)]);
        let schedule =
            compute_schedule(&processes, SchedulingAlgorithm::RoundRobin { quantum: 2 }).unwrap();

        assert_eq!(
            timeline(&schedule),
            vec![
                (Some(1), 0, 2),
                (Some(2), 2, 4),
                (Some(3), 4, 5),
                (Some(1), 5, 7),
                (Some(2), 7, 8),
                (Some(1), 8, 9),
            ]
        );
        assert!(schedule.timeline.iter().all(|interval| interval.len() <= 2));
    }

    #[test]
    fn test_driver_round_robin_lone_process_keeps_running() {
        let processes = specs(&[(1, 0, 7, 0), (2, 10, 1, 0)]);
        let schedule =
            compute_schedule(&processes, SchedulingAlgorithm::RoundRobin { quantum: 2 }).unwrap();

        assert_eq!(
            timeline(&schedule),
            vec![(Some(1), 0, 7), (None, 7, 10), (Some(2), 10, 11)]
        );
        assert_eq!(schedule.summary.preemptions, 0);
    }

    #[test]
    fn test_driver_round_robin_arrivals_queue_before_preempted_process() {
        // P2 arrives exactly when P1's quantum expires and queues ahead of P1.
        let processes = specs(&[(1, 0, 4, 0), (3, 1, 2, 0), (2, 2, 2, 0)]);
        let schedule =
            compute_schedule(&processes, SchedulingAlgorithm::RoundRobin { quantum: 2 }).unwrap();

        assert_eq!(schedule.dispatch_order(), vec![1, 3, 2]);
        assert_eq!(
            timeline(&schedule),
            vec![(Some(1), 0, 2), (Some(3), 2, 4), (Some(2), 4, 6), (Some(1), 6, 8)]
        );
    }

    #[test]
    fn test_driver_busy_time_matches_total_burst() {
        let processes = specs(&[(1, 3, 4, 1), (2, 0, 2, 3), (3, 12, 6, 0), (4, 5, 1, 2), (5, 5, 3, 2)]);
        let algorithms = [
            SchedulingAlgorithm::Fcfs,
            SchedulingAlgorithm::Sjf,
            SchedulingAlgorithm::Srtf,
            SchedulingAlgorithm::RoundRobin { quantum: 1 },
            SchedulingAlgorithm::RoundRobin { quantum: 3 },
            SchedulingAlgorithm::Priority { preemptive: false },
            SchedulingAlgorithm::Priority { preemptive: true },
            SchedulingAlgorithm::Adaptive { base_quantum: 2 },
        ];

        for alg in algorithms {
            let schedule = compute_schedule(&processes, alg).unwrap();
            assert_eq!(schedule.busy_time(), 16, "{}", alg);
            assert_eq!(schedule.summary.busy_time, 16, "{}", alg);
            assert_eq!(schedule.processes.len(), 5, "{}", alg);
            assert_contiguous(&schedule);
            for metrics in &schedule.processes {
                assert_eq!(metrics.waiting, metrics.turnaround - metrics.burst);
            }
        }
    }

    #[test]
    fn test_driver_rejects_sets_that_overflow_the_clock() {
        let processes = specs(&[(1, 0, i64::MAX, 0), (2, 0, i64::MAX, 0), (3, 0, i64::MAX, 0)]);

        assert_eq!(
            compute_schedule(&processes, SchedulingAlgorithm::Fcfs).err(),
            Some(ValidationError::ClockOverflow)
        );
    }

    #[test]
    fn test_driver_is_deterministic() {
        let processes = specs(&[(1, 0, 3, 1), (2, 0, 3, 1), (3, 0, 3, 1)]);
        let alg = SchedulingAlgorithm::Priority { preemptive: true };

        let first = compute_schedule(&processes, alg).unwrap();
        let second = compute_schedule(&processes, alg).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.dispatch_order(), vec![1, 2, 3]);
    }

    #[test]
    fn test_driver_rejects_invalid_input() {
        let bad_burst = specs(&[(1, 0, 0, 0)]);

        assert_eq!(
            compute_schedule(&bad_burst, SchedulingAlgorithm::Fcfs),
            Err(ValidationError::NonPositiveBurst { pid: 1, burst: 0 })
        );
        assert_eq!(
            compute_schedule(&specs(&[(1, 0, 1, 0)]), SchedulingAlgorithm::RoundRobin { quantum: 0 }),
            Err(ValidationError::InvalidQuantum)
        );
    }

    #[test]
    fn test_driver_step_walks_state_machine() {
        let table = ProcessTable::load(&specs(&[(1, 1, 2, 0)])).unwrap();
        let mut driver = Driver::new(table, SchedulingAlgorithm::Fcfs);
        driver.lts.enqueue_programs(&driver.table);

        driver.step();
        assert_eq!(driver.state(), DispatcherState::Idle);
        driver.step();
        assert_eq!(driver.state(), DispatcherState::Dispatching);
        driver.step();
        assert_eq!(driver.state(), DispatcherState::Running);
        driver.step();
        assert_eq!(driver.state(), DispatcherState::Running);
        driver.step();
        assert_eq!(driver.state(), DispatcherState::Preempting);
        driver.step();
        assert_eq!(driver.state(), DispatcherState::Done);
    }
}
