use std::io::{self, Read, Write};

use tracing::info;

use crate::error::{ExecutionError, ResourceError, ShellError, ShellResult, ValidationError};
use crate::io::{loader, report, Entry, Protected};
use crate::kernel::{compute_schedule, SchedulingAlgorithm};

use super::registry::{BuiltinFn, CommandHandler, SessionFn, StageIo};
use super::session::{Context, Session};
use super::signal;

const SCHEDULE_USAGE: &str =
    "usage: schedule POLICY PROCESS_SPEC [QUANTUM] [--gantt] [--export PATH.json|PATH.csv]";

const HELP: &[(&str, &str)] = &[
    ("cat [FILE|-]...", "Print files, or standard input"),
    ("cd [DIR]", "Change the working directory"),
    ("chmod MODE PATH...", "Change permission bits (octal or u+w style)"),
    ("echo [-n] [ARG]...", "Print arguments"),
    ("exit [CODE]", "Leave the shell"),
    ("help", "Show this help message"),
    ("jobs", "List background jobs"),
    ("ls [-l] [-a] [PATH]...", "List directory contents"),
    ("mkdir DIR...", "Create directories"),
    ("pwd", "Print the working directory"),
    (
        "schedule POLICY SPEC [Q]",
        "Simulate fcfs, sjf, srtf, rr, priority, ppriority or adaptive",
    ),
    ("su USER", "Switch to another user"),
    ("touch FILE...", "Create empty files"),
    ("wait", "Wait for all background jobs"),
    ("whoami", "Print the current user"),
];

/// Every built-in, by name.
pub fn handlers() -> Vec<(&'static str, CommandHandler)> {
    let builtin = |run: BuiltinFn| CommandHandler::Builtin { run, mutates: false };
    let mutating = |run: BuiltinFn| CommandHandler::Builtin { run, mutates: true };
    let session = |run: SessionFn| CommandHandler::Session(run);

    vec![
        ("cat", builtin(cat)),
        ("cd", session(cd)),
        ("chmod", mutating(chmod)),
        ("echo", builtin(echo)),
        ("exit", session(exit)),
        ("help", builtin(help)),
        ("jobs", session(jobs)),
        ("ls", builtin(ls)),
        ("mkdir", mutating(mkdir)),
        ("pwd", builtin(pwd)),
        ("schedule", builtin(schedule)),
        ("su", session(su)),
        ("touch", mutating(touch)),
        ("wait", session(wait)),
        ("whoami", builtin(whoami)),
    ]
}

fn stream(command: &'static str) -> impl FnOnce(io::Error) -> ShellError {
    move |source| {
        ExecutionError::Stream {
            command: command.to_string(),
            source,
        }
        .into()
    }
}

fn usage(command: &str, message: impl Into<String>) -> ShellError {
    ExecutionError::Usage {
        command: command.to_string(),
        message: message.into(),
    }
    .into()
}

fn emit(streams: &mut StageIo, command: &'static str, text: &str) -> ShellResult<()> {
    streams.stdout.write_all(text.as_bytes()).map_err(stream(command))?;
    streams.stdout.flush().map_err(stream(command))
}

/// `drwxr-xr-x owner group size name`
pub fn long_listing(entry: &Entry) -> String {
    format!(
        "{}{} {:<8} {:<8} {:>6} {}",
        if entry.is_dir() { 'd' } else { '-' },
        entry.mode().symbolic(),
        entry.owner(),
        entry.group(),
        entry.size(),
        entry.name()
    )
}

fn ls(ctx: &Context, args: &[String], streams: &mut StageIo) -> ShellResult<i32> {
    let mut long = false;
    let mut all = false;
    let mut paths = Vec::new();

    for arg in args {
        match arg.strip_prefix('-').filter(|flags| !flags.is_empty()) {
            Some(flags) => {
                for flag in flags.chars() {
                    match flag {
                        'l' => long = true,
                        'a' => all = true,
                        _ => return Err(usage("ls", format!("invalid option -- '{}'", flag))),
                    }
                }
            }
            None => paths.push(arg.as_str()),
        }
    }
    if paths.is_empty() {
        paths.push(".");
    }

    let mut status = 0;
    let mut out = String::new();
    {
        let fs = ctx.filesystem();
        for (idx, path) in paths.iter().enumerate() {
            let entries = match fs.list(&ctx.user, &ctx.resolve(path)) {
                Ok(entries) => entries,
                Err(err) => {
                    let _ = writeln!(streams.stderr, "{}", err.report("ls"));
                    status = 1;
                    continue;
                }
            };

            if paths.len() > 1 {
                if idx > 0 {
                    out.push('\n');
                }
                out.push_str(&format!("{}:\n", path));
            }
            for entry in entries.into_iter().filter(|e| all || !e.name().starts_with('.')) {
                out.push_str(&if long { long_listing(entry) } else { entry.name().to_string() });
                out.push('\n');
            }
        }
    }

    emit(streams, "ls", &out)?;
    Ok(status)
}

fn chmod(ctx: &Context, args: &[String], _streams: &mut StageIo) -> ShellResult<i32> {
    if args.len() < 2 {
        return Err(usage("chmod", "usage: chmod MODE PATH..."));
    }

    let paths: Vec<String> = args[1..].iter().map(|path| ctx.resolve(path)).collect();
    let changed = ctx.filesystem().chmod(&ctx.user, &paths, &args[0])?;
    for entry in &changed {
        info!(path = entry.path(), mode = %format!("{:04o}", entry.mode()), "chmod");
    }
    Ok(0)
}

fn touch(ctx: &Context, args: &[String], _streams: &mut StageIo) -> ShellResult<i32> {
    if args.is_empty() {
        return Err(usage("touch", "missing file operand"));
    }

    let paths: Vec<String> = args.iter().map(|path| ctx.resolve(path)).collect();
    ctx.filesystem().touch(&ctx.user, &paths)?;
    Ok(0)
}

fn mkdir(ctx: &Context, args: &[String], _streams: &mut StageIo) -> ShellResult<i32> {
    if args.is_empty() {
        return Err(usage("mkdir", "missing operand"));
    }

    let paths: Vec<String> = args.iter().map(|path| ctx.resolve(path)).collect();
    ctx.filesystem().mkdir(&ctx.user, &paths)?;
    Ok(0)
}

fn whoami(ctx: &Context, _args: &[String], streams: &mut StageIo) -> ShellResult<i32> {
    emit(streams, "whoami", &format!("{}\n", ctx.user.name))?;
    Ok(0)
}

fn pwd(ctx: &Context, _args: &[String], streams: &mut StageIo) -> ShellResult<i32> {
    emit(streams, "pwd", &format!("{}\n", ctx.cwd))?;
    Ok(0)
}

fn echo(_ctx: &Context, args: &[String], streams: &mut StageIo) -> ShellResult<i32> {
    let (newline, words) = match args.first().map(String::as_str) {
        Some("-n") => (false, &args[1..]),
        _ => (true, args),
    };

    let mut text = words.join(" ");
    if newline {
        text.push('\n');
    }
    emit(streams, "echo", &text)?;
    Ok(0)
}

fn cat(ctx: &Context, args: &[String], streams: &mut StageIo) -> ShellResult<i32> {
    let stdin_only = ["-".to_string()];
    let args = if args.is_empty() { &stdin_only[..] } else { args };
    let mut status = 0;

    for arg in args {
        if arg == "-" {
            io::copy(&mut streams.stdin, &mut streams.stdout).map_err(stream("cat"))?;
            continue;
        }

        let path = ctx.resolve(arg);
        let contents = ctx.filesystem().read_file(&ctx.user, &path);
        match contents {
            Ok(data) => streams.stdout.write_all(&data).map_err(stream("cat"))?,
            Err(err) => {
                let _ = writeln!(streams.stderr, "{}", err.report("cat"));
                status = 1;
            }
        }
    }

    streams.stdout.flush().map_err(stream("cat"))?;
    Ok(status)
}

fn help(_ctx: &Context, _args: &[String], streams: &mut StageIo) -> ShellResult<i32> {
    let mut text = String::from("Built-in commands:\n");
    for (synopsis, description) in HELP {
        text.push_str(&format!("  {:<26} {}\n", synopsis, description));
    }
    text.push_str("Anything else is run from the search path.\n");

    emit(streams, "help", &text)?;
    Ok(0)
}

fn parse_quantum(text: &str) -> ShellResult<u64> {
    match text.parse::<i64>() {
        Ok(quantum) if quantum > 0 => Ok(quantum as u64),
        Ok(_) => Err(ValidationError::InvalidQuantum.into()),
        Err(_) => Err(usage("schedule", format!("invalid quantum '{}'", text))),
    }
}

/// `-` reads standard input; otherwise a file, falling back to an inline
/// `P1:0:5:2,...` list when no such file exists.
fn read_process_source(ctx: &Context, source: &str, streams: &mut StageIo) -> ShellResult<String> {
    if source == "-" {
        let mut text = String::new();
        streams.stdin.read_to_string(&mut text).map_err(stream("schedule"))?;
        return Ok(text);
    }

    let contents = ctx.filesystem().read_file(&ctx.user, &ctx.resolve(source));
    match contents {
        Ok(data) => Ok(String::from_utf8_lossy(&data).into_owned()),
        Err(ShellError::Resource(ResourceError::NotFound(_))) if loader::is_inline(source) => {
            Ok(source.to_string())
        }
        Err(err) => Err(err),
    }
}

fn schedule(ctx: &Context, args: &[String], streams: &mut StageIo) -> ShellResult<i32> {
    let mut gantt = false;
    let mut export = None;
    let mut positional = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--gantt" => gantt = true,
            "--export" => {
                export = Some(iter.next().ok_or_else(|| usage("schedule", "--export needs a path"))?)
            }
            _ => positional.push(arg.as_str()),
        }
    }

    let (policy, source, quantum) = match positional.as_slice() {
        [policy, source] => (*policy, *source, None),
        [policy, source, quantum] => (*policy, *source, Some(parse_quantum(quantum)?)),
        _ => return Err(usage("schedule", SCHEDULE_USAGE)),
    };

    let algorithm = SchedulingAlgorithm::from_name(policy, quantum, ctx.config.default_quantum)?;
    let text = read_process_source(ctx, source, streams)?;
    let specs = loader::load_process_specs(&text)?;
    let schedule = compute_schedule(&specs, algorithm)?;
    info!(policy = %algorithm, processes = specs.len(), total_time = schedule.summary.total_time, "simulation complete");

    let mut out = report::render_schedule(&schedule, gantt);

    if let Some(target) = export {
        let path = ctx.resolve(target);
        let document = if path.ends_with(".csv") {
            report::export_csv(&schedule)
        } else {
            report::export_json(&schedule).map_err(|err| stream("schedule")(err.into()))?
        };
        {
            let mut fs = ctx.filesystem();
            fs.open_write(&ctx.user, &path, false)?;
            fs.append(&path, document.as_bytes())?;
        }
        out.push_str(&format!("schedule exported to {}\n", path));
    }

    emit(streams, "schedule", &out)?;
    Ok(0)
}

fn cd(session: &mut Session, args: &[String], _streams: &mut StageIo) -> ShellResult<i32> {
    let target = match args {
        [] => session.home(),
        [path] => session.resolve(path),
        _ => return Err(usage("cd", "too many arguments")),
    };

    session.filesystem().change_dir(&session.user, &target)?;
    session.cwd = target;
    Ok(0)
}

fn su(session: &mut Session, args: &[String], _streams: &mut StageIo) -> ShellResult<i32> {
    let name = match args {
        [name] => name,
        _ => return Err(usage("su", "usage: su USER")),
    };
    let identity = session
        .config
        .identity(name)
        .ok_or_else(|| usage("su", format!("user '{}' does not exist", name)))?;

    info!(from = %session.user.name, to = %identity.name, "switching user");
    session.user = identity;
    Ok(0)
}

fn jobs(session: &mut Session, _args: &[String], streams: &mut StageIo) -> ShellResult<i32> {
    session.jobs.poll();
    let listing: String = session.jobs.iter().map(|job| format!("{}\n", job)).collect();
    emit(streams, "jobs", &listing)?;
    Ok(0)
}

fn wait(session: &mut Session, _args: &[String], streams: &mut StageIo) -> ShellResult<i32> {
    let status = session.jobs.wait_all(signal::take_interrupt).unwrap_or(0);
    let listing: String = session
        .jobs
        .take_finished()
        .iter()
        .map(|job| format!("{}\n", job))
        .collect();
    emit(streams, "wait", &listing)?;
    Ok(status)
}

fn exit(session: &mut Session, args: &[String], _streams: &mut StageIo) -> ShellResult<i32> {
    let code = match args {
        [] => session.last_status,
        [code] => code
            .parse()
            .map_err(|_| usage("exit", format!("numeric argument required: {}", code)))?,
        _ => return Err(usage("exit", "too many arguments")),
    };

    session.request_exit(code);
    Ok(code)
}
