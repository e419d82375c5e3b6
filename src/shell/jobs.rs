use std::fmt;
use std::mem;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::signal;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long a cancelled built-in gets to notice before it is left behind.
const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// Status reported for an interrupted foreground pipeline.
pub const INTERRUPTED_STATUS: i32 = 130;

/// Exit status of a host process; `128 + n` when killed by signal `n`.
pub fn status_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

/// Tells a built-in stage to stop. Checked by its terminal input.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What runs one stage of a pipeline.
pub enum Unit {
    /// The stage could not start; its status is already known.
    Finished(i32),
    /// A built-in on its own thread.
    Thread {
        handle: JoinHandle<i32>,
        cancel: CancelToken,
    },
    /// A host process plus the threads moving its bytes to and from the
    /// simulated filesystem.
    Process {
        child: Child,
        helpers: Vec<JoinHandle<()>>,
    },
}

struct Stage {
    name: String,
    unit: Unit,
    status: Option<i32>,
}

impl Stage {
    fn poll(&mut self) -> Option<i32> {
        if self.status.is_some() {
            return self.status;
        }

        if matches!(&self.unit, Unit::Thread { handle, .. } if handle.is_finished()) {
            if let Unit::Thread { handle, .. } = mem::replace(&mut self.unit, Unit::Finished(1)) {
                self.unit = Unit::Finished(handle.join().unwrap_or(1));
            }
        }

        let status = match &mut self.unit {
            Unit::Finished(code) => Some(*code),
            Unit::Thread { .. } => None,
            Unit::Process { child, helpers } => match child.try_wait() {
                Ok(Some(exit)) => {
                    for helper in helpers.drain(..) {
                        let _ = helper.join();
                    }
                    Some(status_code(exit))
                }
                Ok(None) => None,
                Err(err) => {
                    warn!(stage = %self.name, error = %err, "failed to poll stage");
                    Some(1)
                }
            },
        };

        if let Some(code) = status {
            debug!(stage = %self.name, status = code, "stage finished");
        }
        self.status = status;
        status
    }

    /// Asks the stage to stop: SIGTERM for a host process, cancellation
    /// for a built-in.
    fn interrupt(&self) {
        if self.status.is_some() {
            return;
        }

        match &self.unit {
            Unit::Process { child, .. } => {
                if let Err(err) = signal::terminate(child) {
                    warn!(stage = %self.name, error = %err, "failed to signal stage");
                }
            }
            Unit::Thread { cancel, .. } => cancel.cancel(),
            Unit::Finished(_) => {}
        }
    }

    /// Collects an interrupted stage. A built-in still running at
    /// `deadline` is left to finish on its own.
    fn reap(&mut self, deadline: Instant) {
        if self.status.is_some() {
            return;
        }

        let code = match mem::replace(&mut self.unit, Unit::Finished(INTERRUPTED_STATUS)) {
            Unit::Process { mut child, helpers } => {
                let code = match child.wait() {
                    Ok(exit) => status_code(exit),
                    Err(_) => INTERRUPTED_STATUS,
                };
                for helper in helpers {
                    let _ = helper.join();
                }
                code
            }
            Unit::Thread { handle, .. } => {
                while !handle.is_finished() && Instant::now() < deadline {
                    thread::sleep(POLL_INTERVAL);
                }
                if handle.is_finished() {
                    let _ = handle.join();
                } else {
                    warn!(stage = %self.name, "built-in still running after cancellation");
                }
                INTERRUPTED_STATUS
            }
            Unit::Finished(code) => code,
        };
        self.status = Some(code);
    }
}

/// The stages of a started pipeline, in pipeline order.
#[derive(Default)]
pub struct RunningPipeline {
    stages: Vec<Stage>,
}

impl RunningPipeline {
    pub fn new() -> RunningPipeline {
        RunningPipeline { stages: Vec::new() }
    }

    pub fn push(&mut self, name: &str, unit: Unit) {
        self.stages.push(Stage {
            name: name.to_string(),
            unit,
            status: None,
        });
    }

    /// The last stage's status once every stage has finished.
    pub fn try_wait(&mut self) -> Option<i32> {
        let mut last = None;
        let mut all_done = true;

        for stage in &mut self.stages {
            last = stage.poll();
            all_done &= last.is_some();
        }

        if all_done {
            Some(last.unwrap_or(0))
        } else {
            None
        }
    }

    /// Blocks until every stage is reaped. If `interrupted` reports a
    /// cancellation first, every stage is stopped and the pipeline reports
    /// 130.
    pub fn wait(&mut self, mut interrupted: impl FnMut() -> bool) -> i32 {
        loop {
            if let Some(status) = self.try_wait() {
                return status;
            }
            if interrupted() {
                self.terminate();
                return INTERRUPTED_STATUS;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Stops every stage. All stages are signalled before any is waited
    /// for, so a built-in blocked on a pipe to a host process is released.
    pub fn terminate(&mut self) {
        for stage in &self.stages {
            stage.interrupt();
        }

        let deadline = Instant::now() + CANCEL_GRACE;
        for stage in &mut self.stages {
            stage.reap(deadline);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Done(i32),
}

/// A background pipeline.
pub struct Job {
    pub id: u32,
    pub command: String,
    pub status: JobStatus,
    pipeline: RunningPipeline,
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            JobStatus::Running => "Running".to_string(),
            JobStatus::Done(0) => "Done".to_string(),
            JobStatus::Done(code) => format!("Exit {}", code),
        };
        write!(f, "[{}]  {:<10} {}", self.id, status, self.command)
    }
}

/// Job table tracking all background jobs
#[derive(Default)]
pub struct JobTable {
    jobs: Vec<Job>,
}

impl JobTable {
    pub fn new() -> JobTable {
        JobTable { jobs: Vec::new() }
    }

    /// Adds a job and returns its id. Ids restart at 1 once the table
    /// empties.
    pub fn add(&mut self, pipeline: RunningPipeline, command: &str) -> u32 {
        let id = self.jobs.iter().map(|job| job.id).max().unwrap_or(0) + 1;
        self.jobs.push(Job {
            id,
            command: command.to_string(),
            status: JobStatus::Running,
            pipeline,
        });
        id
    }

    /// Checks running jobs for completion without blocking.
    pub fn poll(&mut self) {
        for job in self.jobs.iter_mut().filter(|job| job.status == JobStatus::Running) {
            if let Some(code) = job.pipeline.try_wait() {
                job.status = JobStatus::Done(code);
            }
        }
    }

    /// Removes and returns the jobs that have finished.
    pub fn take_finished(&mut self) -> Vec<Job> {
        self.poll();
        let (done, running): (Vec<Job>, Vec<Job>) = mem::take(&mut self.jobs)
            .into_iter()
            .partition(|job| job.status != JobStatus::Running);
        self.jobs = running;
        done
    }

    /// Blocks until every job has finished; returns the status of the last
    /// one waited for.
    pub fn wait_all(&mut self, mut interrupted: impl FnMut() -> bool) -> Option<i32> {
        let mut last = None;
        for job in &mut self.jobs {
            if job.status == JobStatus::Running {
                let code = job.pipeline.wait(&mut interrupted);
                job.status = JobStatus::Done(code);
            }
            if let JobStatus::Done(code) = job.status {
                last = Some(code);
            }
        }
        last
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
