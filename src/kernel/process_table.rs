use std::collections::BTreeMap;

use super::{ProcessControlBlock, ProcessSpec, ProcessState};

use crate::error::ValidationError;

/// Owns every process record for the duration of one scheduling run.
pub struct ProcessTable {
    pcb_map: BTreeMap<u32, ProcessControlBlock>,
}

impl ProcessTable {
    pub fn new() -> ProcessTable {
        ProcessTable {
            pcb_map: BTreeMap::new(),
        }
    }

    /// Builds a table from a process set, rejecting the whole set if any
    /// record is invalid.
    pub fn load(specs: &[ProcessSpec]) -> Result<ProcessTable, ValidationError> {
        if specs.is_empty() {
            return Err(ValidationError::Empty);
        }

        let mut table = ProcessTable::new();
        for spec in specs {
            table.create_process(spec)?;
        }

        // The run ends no later than the last arrival plus every burst.
        let last_arrival = table.pcb_map.values().map(ProcessControlBlock::get_arrival).max();
        let horizon = table
            .pcb_map
            .values()
            .try_fold(last_arrival.unwrap_or(0), |end, pcb| end.checked_add(pcb.get_burst()));
        if horizon.is_none() {
            return Err(ValidationError::ClockOverflow);
        }

        Ok(table)
    }

    pub fn create_process(&mut self, spec: &ProcessSpec) -> Result<(), ValidationError> {
        if self.pcb_map.contains_key(&spec.pid) {
            return Err(ValidationError::DuplicateId(spec.pid));
        }

        let pcb = ProcessControlBlock::new(spec)?;
        self.pcb_map.insert(pcb.get_id(), pcb);
        Ok(())
    }

    pub fn get_pcb_for(&self, process_id: u32) -> &ProcessControlBlock {
        match self.pcb_map.get(&process_id) {
            Some(pcb) => pcb,
            None => panic!("No process found for id: {}", process_id),
        }
    }

    pub fn get_pcb_mut(&mut self, process_id: u32) -> &mut ProcessControlBlock {
        match self.pcb_map.get_mut(&process_id) {
            Some(pcb) => pcb,
            None => panic!("No process found for id: {}", process_id),
        }
    }

    /// Every process, ordered by id.
    pub fn get_pcbs(&self) -> impl Iterator<Item = &ProcessControlBlock> {
        self.pcb_map.values()
    }

    pub fn all_terminated(&self) -> bool {
        self.pcb_map
            .values()
            .all(|pcb| pcb.state == ProcessState::Terminated)
    }

    pub fn len(&self) -> usize {
        self.pcb_map.len()
    }

    /// Discards every record so the table can host a new run.
    pub fn reset(&mut self) {
        self.pcb_map.clear();
    }
}
