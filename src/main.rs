mod config;
mod error;
mod io;
mod kernel;
mod shell;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};

use config::{import_host_files, ShellConfig};
use shell::{repl, signal, Executor, Registry, Session};

/// A small shell over a simulated filesystem with a CPU scheduling
/// simulator built in.
#[derive(Parser)]
#[command(name = "schedsh", version)]
struct Args {
    /// Run a single command line and exit.
    #[arg(short, long, value_name = "CMD", conflicts_with = "script")]
    command: Option<String>,

    /// Start the session as this user.
    #[arg(short, long, value_name = "NAME")]
    user: Option<String>,

    /// JSON configuration file.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Copy a host file into the user's home directory before starting.
    #[arg(long = "import", value_name = "HOST_FILE")]
    imports: Vec<PathBuf>,

    /// More log output; repeat for more detail.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Script to run instead of the interactive prompt.
    script: Option<PathBuf>,
}

impl Args {
    fn log_level(&self) -> Level {
        if self.quiet {
            return Level::ERROR;
        }
        match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

fn exit_code(status: i32) -> ExitCode {
    ExitCode::from(u8::try_from(status & 0xff).unwrap_or(1))
}

fn run(args: Args) -> Result<i32> {
    let mut config = match &args.config {
        Some(path) => ShellConfig::load(path)?,
        None => ShellConfig::default(),
    };
    if let Some(name) = &args.user {
        config.user = name.clone();
    }

    let Some(user) = config.identity(&config.user) else {
        bail!("unknown user '{}'", config.user);
    };
    let mut fs = config.build_filesystem()?;
    import_host_files(&mut fs, &user, &args.imports)?;

    if let Err(err) = signal::install_handlers() {
        warn!(error = %err, "failed to install SIGINT handler");
    }

    let executor = Executor::new(Registry::from_config(&config));
    let mut session = Session::new(config, fs, user);
    info!(user = %session.user.name, cwd = %session.cwd, "session started");

    if let Some(line) = &args.command {
        executor.execute_line(&mut session, line);
        session.jobs.wait_all(signal::take_interrupt);
        return Ok(session.exit_requested().unwrap_or(session.last_status));
    }

    match &args.script {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open script {}", path.display()))?;
            repl::run_script(&mut session, &executor, BufReader::new(file))
        }
        None => repl::run_interactive(&mut session, &executor),
    }
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_writer(std::io::stderr)
        .init();

    let status = run(args)?;
    Ok(exit_code(status))
}
