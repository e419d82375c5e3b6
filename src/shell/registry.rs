use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::config::ShellConfig;
use crate::error::ShellResult;

use super::builtins;
use super::session::{Context, Session};

/// The standard streams of one stage.
pub struct StageIo {
    pub stdin: Box<dyn Read + Send>,
    pub stdout: Box<dyn Write + Send>,
    pub stderr: Box<dyn Write + Send>,
}

pub type BuiltinFn = fn(&Context, &[String], &mut StageIo) -> ShellResult<i32>;
pub type SessionFn = fn(&mut Session, &[String], &mut StageIo) -> ShellResult<i32>;

/// How a command name is carried out.
#[derive(Clone)]
pub enum CommandHandler {
    /// Runs on its own thread. `mutates` marks filesystem metadata changes,
    /// which are refused in background jobs.
    Builtin { run: BuiltinFn, mutates: bool },
    /// Changes the session itself (cwd, user, exit, jobs).
    Session(SessionFn),
    /// A host executable.
    External(PathBuf),
}

pub struct Registry {
    builtins: BTreeMap<&'static str, CommandHandler>,
    search_path: Vec<PathBuf>,
}

impl Registry {
    pub fn new(search_path: Vec<PathBuf>) -> Registry {
        Registry {
            builtins: builtins::handlers().into_iter().collect(),
            search_path,
        }
    }

    /// Uses the configured search path, or `$PATH` when none is set.
    pub fn from_config(config: &ShellConfig) -> Registry {
        let search_path = config.search_path.clone().unwrap_or_else(|| {
            env::var_os("PATH")
                .map(|path| env::split_paths(&path).collect())
                .unwrap_or_default()
        });
        Registry::new(search_path)
    }

    /// Built-ins first, then executables along the search path.
    pub fn resolve(&self, name: &str) -> Option<CommandHandler> {
        if let Some(handler) = self.builtins.get(name) {
            return Some(handler.clone());
        }
        find_executable(name, &self.search_path).map(CommandHandler::External)
    }
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Names containing `/` are taken as host paths; others are searched for
/// in `dirs` in order.
pub fn find_executable(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    if name.contains('/') {
        let path = PathBuf::from(name);
        return is_executable(&path).then_some(path);
    }

    dirs.iter().map(|dir| dir.join(name)).find(|path| is_executable(path))
}
