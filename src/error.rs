use std::io;

use thiserror::Error;

use crate::io::Access;

/// A process set or scheduling request that cannot be simulated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("process P{pid}: arrival time {arrival} is negative")]
    NegativeArrival { pid: u32, arrival: i64 },
    #[error("process P{pid}: burst time {burst} must be positive")]
    NonPositiveBurst { pid: u32, burst: i64 },
    #[error("process P{0} is defined more than once")]
    DuplicateId(u32),
    #[error("no processes to schedule")]
    Empty,
    #[error("process set runs past the end of the simulated clock")]
    ClockOverflow,
    #[error("time quantum must be greater than zero")]
    InvalidQuantum,
    #[error("unknown scheduling policy '{0}'")]
    UnknownPolicy(String),
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// A command line that does not describe a pipeline.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command line")]
    EmptyLine,
    #[error("unterminated {0} quote")]
    UnterminatedQuote(char),
    #[error("missing file name after '{0}'")]
    MissingRedirectTarget(&'static str),
    #[error("empty pipeline stage")]
    EmptyStage,
    #[error("'&' is only allowed at the end of a command line")]
    MisplacedBackground,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PermissionError {
    #[error("invalid mode '{0}'")]
    InvalidMode(String),
    #[error("{path}: permission denied ({access} access)")]
    AccessDenied { path: String, access: Access },
    #[error("{0}: operation not permitted")]
    NotOwner(String),
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("{0}: command not found")]
    CommandNotFound(String),
    #[error("{command}: failed to launch: {source}")]
    Launch {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("{command}: {message}")]
    Usage { command: String, message: String },
    #[error("{0}: cannot modify the filesystem from a background job")]
    BackgroundMutation(String),
    #[error("{command}: {source}")]
    Stream {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Failures to open, create or read entries of the simulated filesystem.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResourceError {
    #[error("{0}: no such file or directory")]
    NotFound(String),
    #[error("{0}: is a directory")]
    IsDirectory(String),
    #[error("{0}: not a directory")]
    NotDirectory(String),
    #[error("{0}: file exists")]
    AlreadyExists(String),
}

#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl ShellError {
    /// The exit status a command reports when it fails with this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ShellError::Parse(_) => 2,
            ShellError::Execution(ExecutionError::CommandNotFound(_)) => 127,
            ShellError::Execution(ExecutionError::Launch { .. }) => 126,
            ShellError::Execution(ExecutionError::Usage { .. }) => 2,
            _ if self.is_broken_pipe() => 141,
            _ => 1,
        }
    }

    /// A stage whose reader went away. Reported silently, like SIGPIPE.
    pub fn is_broken_pipe(&self) -> bool {
        matches!(
            self,
            ShellError::Execution(ExecutionError::Stream { source, .. })
                if source.kind() == io::ErrorKind::BrokenPipe
        )
    }

    /// The `schedsh: <cmd>: <message>` line printed for a failed stage.
    pub fn report(&self, command: &str) -> String {
        match self {
            // These already name the command.
            ShellError::Execution(_) => format!("schedsh: {}", self),
            _ => format!("schedsh: {}: {}", command, self),
        }
    }
}

pub type ShellResult<T> = Result<T, ShellError>;
