mod cpu;
mod long_term_scheduler;
mod process_control_block;
mod process_table;
mod schedule;
mod short_term_scheduler;

use cpu::Cpu;
use long_term_scheduler::LongTermScheduler;
use short_term_scheduler::ShortTermScheduler;

pub use process_control_block::{ProcessControlBlock, ProcessSpec, ProcessState};
pub use process_table::ProcessTable;
pub use schedule::{EventKind, Interval, ProcessMetrics, Schedule, SchedulerEvent, Summary};
pub use short_term_scheduler::SchedulingAlgorithm;

pub mod driver;

pub use driver::compute_schedule;
