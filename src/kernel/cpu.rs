use super::ProcessTable;

/// The single simulated CPU. Knows which process it is running, when the
/// current uninterrupted stretch began and how much of the time slice is
/// left; the process's own progress lives in its control block.
pub(crate) struct Cpu {
    current: Option<u32>,
    stretch_start: u64,
    slice_remaining: Option<u64>,
    busy_ticks: u64,
}

impl Cpu {
    pub fn new() -> Cpu {
        Cpu {
            current: None,
            stretch_start: 0,
            slice_remaining: None,
            busy_ticks: 0,
        }
    }

    /// Loads `process_id` onto the CPU at `now`. A `None` slice lets it run
    /// until completion or an external interrupt.
    pub fn execute_process(&mut self, process_id: u32, now: u64, slice: Option<u64>) {
        self.current = Some(process_id);
        self.stretch_start = now;
        self.slice_remaining = slice;
    }

    pub fn current(&self) -> Option<u32> {
        self.current
    }

    pub fn slice_expired(&self) -> bool {
        self.slice_remaining == Some(0)
    }

    /// Grants a fresh slice without ending the current stretch. Used when a
    /// quantum runs out but nobody else is ready.
    pub fn renew_slice(&mut self, slice: Option<u64>) {
        self.slice_remaining = slice;
    }

    /// Runs the current process until it finishes, its slice runs out, or
    /// the clock reaches `horizon`, whichever comes first. Returns the
    /// number of ticks consumed.
    pub fn cycle(&mut self, table: &mut ProcessTable, now: u64, horizon: Option<u64>) -> u64 {
        let process_id = match self.current {
            Some(process_id) => process_id,
            None => return 0,
        };
        let pcb = table.get_pcb_mut(process_id);

        let mut ticks = pcb.get_remaining();
        if let Some(slice) = self.slice_remaining {
            ticks = ticks.min(slice);
        }
        if let Some(horizon) = horizon.filter(|&horizon| horizon > now) {
            ticks = ticks.min(horizon - now);
        }

        pcb.run_for(ticks);
        if let Some(slice) = self.slice_remaining.as_mut() {
            *slice -= ticks;
        }
        self.busy_ticks += ticks;

        ticks
    }

    /// Takes the current process off the CPU, returning its id and the tick
    /// at which its uninterrupted stretch started.
    pub fn release(&mut self) -> Option<(u32, u64)> {
        self.slice_remaining = None;
        self.current.take().map(|process_id| (process_id, self.stretch_start))
    }

    pub fn busy_ticks(&self) -> u64 {
        self.busy_ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::kernel::ProcessSpec;

    #[test]
    fn test_cpu_cycle_stops_at_slice_end() {
        let mut table = ProcessTable::load(&[ProcessSpec::new(1, 0, 10, 0)]).unwrap();
        let mut cpu = Cpu::new();
        cpu.execute_process(1, 0, Some(3));

        assert_eq!(cpu.cycle(&mut table, 0, None), 3);
        assert!(cpu.slice_expired());
        assert_eq!(table.get_pcb_for(1).get_remaining(), 7);

        cpu.renew_slice(Some(3));
        assert_eq!(cpu.cycle(&mut table, 3, Some(5)), 2);
        assert_eq!(cpu.release(), Some((1, 0)));
        assert_eq!(cpu.busy_ticks(), 5);
    }

    #[test]
    fn test_cpu_cycle_idle_does_nothing() {
        let mut table = ProcessTable::new();
        let mut cpu = Cpu::new();

        assert_eq!(cpu.cycle(&mut table, 0, Some(4)), 0);
        assert_eq!(cpu.release(), None);
    }
}
