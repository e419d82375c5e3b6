use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::{home_dir, ShellConfig};
use crate::io::filesystem::normalize;
use crate::io::{FileSystem, Identity};

use super::jobs::JobTable;

fn lock(fs: &Mutex<FileSystem>) -> MutexGuard<'_, FileSystem> {
    fs.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything a command runs against: who, where, and the shared
/// filesystem. Owned by the REPL and passed down explicitly.
pub struct Session {
    pub user: Identity,
    pub cwd: String,
    pub fs: Arc<Mutex<FileSystem>>,
    pub config: Arc<ShellConfig>,
    pub jobs: JobTable,
    pub last_status: i32,
    exit_code: Option<i32>,
}

impl Session {
    /// Starts in the user's home if it exists, else at `/`.
    pub fn new(config: ShellConfig, fs: FileSystem, user: Identity) -> Session {
        let home = home_dir(&user.name);
        let cwd = if fs.get(&home).is_some_and(|entry| entry.is_dir()) {
            home
        } else {
            "/".to_string()
        };

        Session {
            user,
            cwd,
            fs: Arc::new(Mutex::new(fs)),
            config: Arc::new(config),
            jobs: JobTable::new(),
            last_status: 0,
            exit_code: None,
        }
    }

    /// A throw-away copy for session built-ins running inside a larger
    /// pipeline. Shares the filesystem but has no jobs of its own.
    pub fn subshell(&self) -> Session {
        Session {
            user: self.user.clone(),
            cwd: self.cwd.clone(),
            fs: Arc::clone(&self.fs),
            config: Arc::clone(&self.config),
            jobs: JobTable::new(),
            last_status: self.last_status,
            exit_code: None,
        }
    }

    pub fn context(&self, background: bool) -> Context {
        Context {
            user: self.user.clone(),
            cwd: self.cwd.clone(),
            fs: Arc::clone(&self.fs),
            config: Arc::clone(&self.config),
            background,
        }
    }

    pub fn home(&self) -> String {
        home_dir(&self.user.name)
    }

    pub fn resolve(&self, path: &str) -> String {
        normalize(&self.cwd, path, &self.home())
    }

    pub fn filesystem(&self) -> MutexGuard<'_, FileSystem> {
        lock(&self.fs)
    }

    /// `user:cwd$ `
    pub fn prompt(&self) -> String {
        format!("{}:{}$ ", self.user.name, self.cwd)
    }

    pub fn request_exit(&mut self, code: i32) {
        self.exit_code = Some(code);
    }

    pub fn exit_requested(&self) -> Option<i32> {
        self.exit_code
    }
}

/// The read-only view of a session handed to a built-in stage.
#[derive(Clone)]
pub struct Context {
    pub user: Identity,
    pub cwd: String,
    pub fs: Arc<Mutex<FileSystem>>,
    pub config: Arc<ShellConfig>,
    pub background: bool,
}

impl Context {
    pub fn resolve(&self, path: &str) -> String {
        normalize(&self.cwd, path, &home_dir(&self.user.name))
    }

    pub fn filesystem(&self) -> MutexGuard<'_, FileSystem> {
        lock(&self.fs)
    }
}
