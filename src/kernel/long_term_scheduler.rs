use std::collections::VecDeque;

use super::ProcessTable;

/// Holds processes that have not arrived yet and releases them into the
/// ready state once the simulated clock reaches their arrival time.
pub(crate) struct LongTermScheduler {
    program_queue: VecDeque<(u64, u32)>,
}

impl LongTermScheduler {
    pub fn new() -> LongTermScheduler {
        LongTermScheduler {
            program_queue: VecDeque::new(),
        }
    }

    /// Queues every process of the table in (arrival, id) order.
    pub fn enqueue_programs(&mut self, table: &ProcessTable) {
        let mut pending: Vec<(u64, u32)> = table
            .get_pcbs()
            .map(|pcb| (pcb.get_arrival(), pcb.get_id()))
            .collect();
        pending.sort_unstable();

        self.program_queue.extend(pending);
    }

    pub fn step(&mut self, table: &mut ProcessTable, now: u64) -> Result<u32, &'static str> {
        let (arrival, process_id) = *self.program_queue.front().ok_or("No programs in queue")?;

        if arrival > now {
            return Err("Next program has not arrived");
        }

        self.program_queue.pop_front();
        table.get_pcb_mut(process_id).admit();

        Ok(process_id)
    }

    /// Admits everything that has arrived by `now`, in arrival order.
    pub fn batch_step(&mut self, table: &mut ProcessTable, now: u64) -> Vec<u32> {
        let mut process_ids = Vec::new();

        while let Ok(process_id) = self.step(table, now) {
            process_ids.push(process_id);
        }

        process_ids
    }

    pub fn next_arrival(&self) -> Option<u64> {
        self.program_queue.front().map(|&(arrival, _)| arrival)
    }

    pub fn has_programs(&self) -> bool {
        !self.program_queue.is_empty()
    }
}
