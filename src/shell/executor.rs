use std::io::{self, Cursor, PipeReader, PipeWriter, Read, Write};
use std::path::Path;
use std::process::{Command as HostCommand, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tracing::{debug, info, warn};

use crate::error::{ExecutionError, ParseError, ShellError, ShellResult};
use crate::io::FileSystem;

use super::jobs::{CancelToken, RunningPipeline, Unit};
use super::parser::{parse, Command, OutputMode, Pipeline};
use super::registry::{CommandHandler, Registry, SessionFn, StageIo};
use super::session::{Context, Session};
use super::signal;
use super::terminal::TerminalInput;

/// Streams bytes into a file of the simulated filesystem. The file must
/// already have been opened with `FileSystem::open_write`.
pub struct VfsFileSink {
    fs: Arc<Mutex<FileSystem>>,
    path: String,
}

impl VfsFileSink {
    pub fn new(fs: Arc<Mutex<FileSystem>>, path: String) -> VfsFileSink {
        VfsFileSink { fs, path }
    }
}

impl Write for VfsFileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut fs = self.fs.lock().unwrap_or_else(PoisonError::into_inner);
        fs.append(&self.path, buf).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Where a stage reads from.
enum StageInput {
    Inherit,
    Pipe(PipeReader),
    /// Contents of an input redirection.
    Bytes(Vec<u8>),
    Null,
}

impl StageInput {
    /// A built-in reading the shell's stdin gets a reader `cancel` can cut
    /// off.
    fn into_reader(self, cancel: &CancelToken) -> Box<dyn Read + Send> {
        match self {
            StageInput::Inherit => match TerminalInput::stdin(cancel.clone()) {
                Ok(terminal) => Box::new(terminal),
                Err(err) => {
                    warn!(error = %err, "cannot duplicate stdin, built-in reads it directly");
                    Box::new(io::stdin())
                }
            },
            StageInput::Pipe(reader) => Box::new(reader),
            StageInput::Bytes(data) => Box::new(Cursor::new(data)),
            StageInput::Null => Box::new(io::empty()),
        }
    }
}

/// Where a stage writes to.
enum StageOutput {
    Inherit,
    Pipe(PipeWriter),
    File(VfsFileSink),
}

impl StageOutput {
    fn into_writer(self) -> Box<dyn Write + Send> {
        match self {
            StageOutput::Inherit => Box::new(io::stdout()),
            StageOutput::Pipe(writer) => Box::new(writer),
            StageOutput::File(sink) => Box::new(sink),
        }
    }
}

/// Applies the stage's own redirections on top of its pipeline wiring.
fn redirect(
    ctx: &Context,
    command: &Command,
    input: StageInput,
    output: StageOutput,
) -> ShellResult<(StageInput, StageOutput)> {
    let input = match &command.input {
        Some(path) => StageInput::Bytes(ctx.filesystem().read_file(&ctx.user, &ctx.resolve(path))?),
        None => input,
    };

    let output = match &command.output {
        Some(target) => {
            let path = ctx.resolve(&target.path);
            ctx.filesystem()
                .open_write(&ctx.user, &path, target.mode == OutputMode::Append)?;
            StageOutput::File(VfsFileSink::new(Arc::clone(&ctx.fs), path))
        }
        None => output,
    };

    Ok((input, output))
}

fn stage_io(input: StageInput, output: StageOutput, cancel: &CancelToken) -> StageIo {
    StageIo {
        stdin: input.into_reader(cancel),
        stdout: output.into_writer(),
        stderr: Box::new(io::stderr()),
    }
}

/// Turns a stage result into its exit status, reporting failures on
/// stderr. A closed downstream pipe ends the stage quietly.
fn finish_stage(name: &str, result: ShellResult<i32>) -> i32 {
    match result {
        Ok(code) => code,
        Err(err) if err.is_broken_pipe() => err.exit_code(),
        Err(err) => {
            debug!(stage = name, error = %err, "stage failed");
            eprintln!("{}", err.report(name));
            err.exit_code()
        }
    }
}

fn spawn_external(
    name: &str,
    path: &Path,
    args: &[String],
    input: StageInput,
    output: StageOutput,
) -> ShellResult<Unit> {
    let mut host = HostCommand::new(path);
    host.args(args);

    let mut feed = None;
    match input {
        StageInput::Inherit => host.stdin(Stdio::inherit()),
        StageInput::Null => host.stdin(Stdio::null()),
        StageInput::Pipe(reader) => host.stdin(Stdio::from(reader)),
        StageInput::Bytes(data) => {
            feed = Some(data);
            host.stdin(Stdio::piped())
        }
    };

    let mut sink = None;
    match output {
        StageOutput::Inherit => host.stdout(Stdio::inherit()),
        StageOutput::Pipe(writer) => host.stdout(Stdio::from(writer)),
        StageOutput::File(file) => {
            sink = Some(file);
            host.stdout(Stdio::piped())
        }
    };

    let spawned = host.spawn();
    // Close the parent's copies of the pipe ends.
    drop(host);
    let mut child = spawned.map_err(|source| ExecutionError::Launch {
        command: name.to_string(),
        source,
    })?;
    debug!(stage = name, pid = child.id(), "spawned external");

    let mut helpers = Vec::new();
    if let (Some(data), Some(mut stdin)) = (feed, child.stdin.take()) {
        helpers.push(thread::spawn(move || {
            let _ = stdin.write_all(&data);
        }));
    }
    if let (Some(mut file), Some(mut stdout)) = (sink, child.stdout.take()) {
        let stage = name.to_string();
        helpers.push(thread::spawn(move || {
            if let Err(err) = io::copy(&mut stdout, &mut file) {
                warn!(stage = %stage, error = %err, "lost output of external stage");
            }
        }));
    }

    Ok(Unit::Process { child, helpers })
}

/// Runs parsed pipelines against a session.
pub struct Executor {
    registry: Registry,
}

impl Executor {
    pub fn new(registry: Registry) -> Executor {
        Executor { registry }
    }

    /// Parses and runs one line, recording its status in the session.
    /// Blank and comment-only lines leave the status untouched.
    pub fn execute_line(&self, session: &mut Session, line: &str) -> i32 {
        let status = match parse(line) {
            Ok(pipeline) => self.execute(session, &pipeline),
            Err(ParseError::EmptyLine) => return session.last_status,
            Err(err) => {
                let err = ShellError::from(err);
                eprintln!("schedsh: {}", err);
                err.exit_code()
            }
        };

        session.last_status = status;
        status
    }

    /// Foreground pipelines block until every stage is reaped and report
    /// the last stage's status. Background pipelines become jobs and
    /// report 0 immediately.
    pub fn execute(&self, session: &mut Session, pipeline: &Pipeline) -> i32 {
        info!(
            command = %pipeline.text,
            stages = pipeline.commands.len(),
            background = pipeline.background,
            "starting pipeline"
        );

        if let [command] = pipeline.commands.as_slice() {
            if !pipeline.background {
                if let Some(CommandHandler::Session(run)) = self.registry.resolve(&command.name) {
                    return self.run_in_session(session, command, run);
                }
            }
        }

        let mut running = self.spawn(session, pipeline);

        if pipeline.background {
            let id = session.jobs.add(running, &pipeline.text);
            println!("[{}] {}", id, pipeline.text);
            return 0;
        }

        let status = running.wait(signal::take_interrupt);
        info!(command = %pipeline.text, status, "pipeline finished");
        status
    }

    /// A session built-in alone in the foreground acts on the session
    /// itself.
    fn run_in_session(&self, session: &mut Session, command: &Command, run: SessionFn) -> i32 {
        let ctx = session.context(false);
        let result = redirect(&ctx, command, StageInput::Inherit, StageOutput::Inherit)
            .and_then(|(input, output)| {
                run(session, &command.args, &mut stage_io(input, output, &CancelToken::new()))
            });

        finish_stage(&command.name, result)
    }

    fn spawn(&self, session: &Session, pipeline: &Pipeline) -> RunningPipeline {
        let ctx = session.context(pipeline.background);
        let mut running = RunningPipeline::new();
        let mut upstream: Option<PipeReader> = None;
        let last = pipeline.commands.len().saturating_sub(1);

        for (idx, command) in pipeline.commands.iter().enumerate() {
            let input = match upstream.take() {
                Some(reader) => StageInput::Pipe(reader),
                None if idx == 0 && !pipeline.background => StageInput::Inherit,
                None => StageInput::Null,
            };

            let mut output = StageOutput::Inherit;
            if idx < last {
                match io::pipe() {
                    Ok((reader, writer)) => {
                        upstream = Some(reader);
                        output = StageOutput::Pipe(writer);
                    }
                    Err(err) => warn!(error = %err, "failed to create pipe"),
                }
            }

            let unit = match self.start_stage(session, &ctx, command, input, output) {
                Ok(unit) => unit,
                Err(err) => Unit::Finished(finish_stage(&command.name, Err(err))),
            };
            running.push(&command.name, unit);
        }

        running
    }

    fn start_stage(
        &self,
        session: &Session,
        ctx: &Context,
        command: &Command,
        input: StageInput,
        output: StageOutput,
    ) -> ShellResult<Unit> {
        let handler = self
            .registry
            .resolve(&command.name)
            .ok_or_else(|| ExecutionError::CommandNotFound(command.name.clone()))?;

        if ctx.background && matches!(handler, CommandHandler::Builtin { mutates: true, .. }) {
            return Err(ExecutionError::BackgroundMutation(command.name.clone()).into());
        }

        let (input, output) = redirect(ctx, command, input, output)?;
        let name = command.name.clone();
        let args = command.args.clone();
        let cancel = CancelToken::new();

        let unit = match handler {
            CommandHandler::Builtin { run, .. } => {
                let ctx = ctx.clone();
                let streams = cancel.clone();
                Unit::Thread {
                    handle: thread::spawn(move || {
                        let result = run(&ctx, &args, &mut stage_io(input, output, &streams));
                        finish_stage(&name, result)
                    }),
                    cancel,
                }
            }
            CommandHandler::Session(run) => {
                let mut subshell = session.subshell();
                let streams = cancel.clone();
                Unit::Thread {
                    handle: thread::spawn(move || {
                        let result = run(&mut subshell, &args, &mut stage_io(input, output, &streams));
                        finish_stage(&name, result)
                    }),
                    cancel,
                }
            }
            CommandHandler::External(path) => spawn_external(&name, &path, &args, input, output)?,
        };

        Ok(unit)
    }
}
