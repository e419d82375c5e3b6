use std::io::{self, BufRead, Write};

use anyhow::{Context as _, Result};
use tracing::info;

use super::executor::Executor;
use super::session::Session;
use super::signal;

/// Prints and forgets background jobs that finished since the last prompt.
fn report_done_jobs(session: &mut Session, out: &mut impl Write) -> io::Result<()> {
    for job in session.jobs.take_finished() {
        writeln!(out, "{}", job)?;
    }
    Ok(())
}

/// Runs one pipeline per line until `exit` or end of input. Returns the
/// status the shell should exit with.
pub fn run_script(session: &mut Session, executor: &Executor, input: impl BufRead) -> Result<i32> {
    for line in input.lines() {
        let line = line.context("failed to read script")?;
        report_done_jobs(session, &mut io::stdout())?;
        signal::clear_interrupt();
        executor.execute_line(session, &line);
        if let Some(code) = session.exit_requested() {
            return Ok(code);
        }
    }

    session.jobs.wait_all(signal::take_interrupt);
    report_done_jobs(session, &mut io::stdout())?;
    Ok(session.last_status)
}

pub fn run_interactive(session: &mut Session, executor: &Executor) -> Result<i32> {
    info!(user = %session.user.name, "starting interactive shell");
    let motd = session
        .filesystem()
        .get("/etc/motd")
        .and_then(|entry| entry.contents())
        .map(|text| String::from_utf8_lossy(text).into_owned());
    if let Some(motd) = motd {
        print!("{}", motd);
    }

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        let mut stdout = io::stdout();
        report_done_jobs(session, &mut stdout)?;
        write!(stdout, "{}", session.prompt())?;
        stdout.flush()?;

        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                println!();
                break;
            }
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                println!();
                continue;
            }
            Err(err) => return Err(err).context("failed to read command"),
        }

        signal::clear_interrupt();
        executor.execute_line(session, &line);
        if let Some(code) = session.exit_requested() {
            return Ok(code);
        }
    }

    Ok(session.last_status)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::ShellConfig;
    use crate::shell::registry::Registry;

    fn setup() -> (Executor, Session) {
        let config = ShellConfig::default();
        let fs = config.build_filesystem().unwrap();
        let user = config.identity("student").unwrap();
        let executor = Executor::new(Registry::from_config(&config));
        (executor, Session::new(config, fs, user))
    }

    #[test]
    fn test_repl_script_runs_lines_in_order() {
        let (executor, mut session) = setup();
        let script = "\
# build a report
mkdir out
cd out
schedule ppriority ../jobs.txt > report.txt
echo done >> report.txt
";

        let status = run_script(&mut session, &executor, script.as_bytes()).unwrap();

        assert_eq!(status, 0);
        assert_eq!(session.cwd, "/home/student/out");
        let fs = session.filesystem();
        let report = fs.get("/home/student/out/report.txt").unwrap().contents().unwrap();
        let report = String::from_utf8_lossy(report);
        assert!(report.starts_with("[P1 0-1] [P2 1-4] [P1 4-8] [P3 8-9]"));
        assert!(report.ends_with("done\n"));
    }

    #[test]
    fn test_repl_script_stops_at_exit() {
        let (executor, mut session) = setup();
        let script = "echo first > a.txt\nexit 3\necho second > b.txt\n";

        assert_eq!(run_script(&mut session, &executor, script.as_bytes()).unwrap(), 3);
        assert!(session.filesystem().get("/home/student/a.txt").is_some());
        assert!(session.filesystem().get("/home/student/b.txt").is_none());
    }

    #[test]
    fn test_repl_script_reports_last_status_and_waits_for_jobs() {
        let (executor, mut session) = setup();
        let script = "echo later > bg.txt &\nno-such-command-here\n";

        assert_eq!(run_script(&mut session, &executor, script.as_bytes()).unwrap(), 127);
        assert!(session.jobs.is_empty());
        assert!(session.filesystem().get("/home/student/bg.txt").is_some());
    }

    #[test]
    fn test_repl_reports_done_jobs_once() {
        let (executor, mut session) = setup();
        executor.execute_line(&mut session, "echo x > x.txt &");
        session.jobs.wait_all(|| false);

        let mut out = Vec::new();
        report_done_jobs(&mut session, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "[1]  Done       echo x > x.txt &\n");

        let mut again = Vec::new();
        report_done_jobs(&mut session, &mut again).unwrap();
        assert!(again.is_empty());
    }
}
