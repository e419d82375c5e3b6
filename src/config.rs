use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::io::filesystem::{DEFAULT_DIR_MODE, DEFAULT_FILE_MODE};
use crate::io::{Entry, EntryKind, FileSystem, Identity, Mode};

const SAMPLE_JOBS: &str = "\
# id arrival burst priority
P1 0 5 2
P2 1 3 1
P3 2 1 3
";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    pub name: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// A file or directory placed in the simulated filesystem at start-up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedEntry {
    pub path: String,
    pub owner: String,
    #[serde(default)]
    pub group: Option<String>,
    /// Octal, e.g. `"644"` or `"1777"`.
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub directory: bool,
    #[serde(default)]
    pub contents: String,
}

/// Shell settings, read from a JSON file. Missing fields take defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub user: String,
    pub users: Vec<UserConfig>,
    pub default_quantum: u64,
    /// Directories searched for external commands. `None` uses `$PATH`.
    pub search_path: Option<Vec<PathBuf>>,
    pub seed: Vec<SeedEntry>,
}

impl Default for ShellConfig {
    fn default() -> ShellConfig {
        let user = |name: &str, groups: &[&str]| UserConfig {
            name: name.to_string(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        };

        ShellConfig {
            user: "student".to_string(),
            users: vec![
                user("root", &["root"]),
                user("student", &["student", "users"]),
                user("guest", &["guest", "users"]),
            ],
            default_quantum: 4,
            search_path: None,
            seed: vec![SeedEntry {
                path: "/home/student/jobs.txt".to_string(),
                owner: "student".to_string(),
                group: None,
                mode: None,
                directory: false,
                contents: SAMPLE_JOBS.to_string(),
            }],
        }
    }
}

pub fn home_dir(user: &str) -> String {
    if user == "root" {
        "/root".to_string()
    } else {
        format!("/home/{}", user)
    }
}

impl ShellConfig {
    pub fn load(path: &Path) -> Result<ShellConfig> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: ShellConfig = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        if config.default_quantum == 0 {
            bail!("default_quantum must be greater than zero");
        }
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// The configured user called `name`. `root` always exists.
    pub fn identity(&self, name: &str) -> Option<Identity> {
        if let Some(user) = self.users.iter().find(|u| u.name == name) {
            let groups = if user.groups.is_empty() {
                vec![user.name.clone()]
            } else {
                user.groups.clone()
            };
            return Some(Identity {
                name: user.name.clone(),
                groups,
            });
        }

        (name == "root").then(|| Identity::new("root", &["root"]))
    }

    /// Builds the start-up tree: the standard directories, a home for
    /// every configured user, then the seed entries.
    pub fn build_filesystem(&self) -> Result<FileSystem> {
        let mut fs = FileSystem::new();
        let dir = |path: &str, owner: &str, mode: u16| {
            Entry::new(path, owner, owner, Mode::from_bits(mode), EntryKind::Directory)
        };

        fs.insert(dir("/home", "root", 0o755));
        fs.insert(dir("/etc", "root", 0o755));
        fs.insert(dir("/tmp", "root", 0o1777));
        fs.insert(dir("/root", "root", 0o700));
        fs.insert(Entry::new(
            "/etc/motd",
            "root",
            "root",
            DEFAULT_FILE_MODE,
            EntryKind::File(b"Welcome to schedsh. Type 'help' for a list of commands.\n".to_vec()),
        ));

        for user in &self.users {
            if user.name == "root" {
                continue;
            }
            let group = user.groups.first().unwrap_or(&user.name);
            fs.insert(Entry::new(
                &home_dir(&user.name),
                &user.name,
                group,
                DEFAULT_DIR_MODE,
                EntryKind::Directory,
            ));
        }

        for seed in &self.seed {
            if !seed.path.starts_with('/') {
                bail!("seed path '{}' is not absolute", seed.path);
            }
            let mode = match &seed.mode {
                Some(text) => Mode::parse_octal(text).with_context(|| format!("Bad mode for seed entry {}", seed.path))?,
                None if seed.directory => DEFAULT_DIR_MODE,
                None => DEFAULT_FILE_MODE,
            };
            let group = match &seed.group {
                Some(group) => group.clone(),
                None => self
                    .identity(&seed.owner)
                    .map(|id| id.primary_group().to_string())
                    .unwrap_or_else(|| seed.owner.clone()),
            };
            let kind = if seed.directory {
                EntryKind::Directory
            } else {
                EntryKind::File(seed.contents.clone().into_bytes())
            };

            debug!(path = %seed.path, "seeding entry");
            fs.insert(Entry::new(&seed.path, &seed.owner, &group, mode, kind));
        }

        Ok(fs)
    }
}

/// Copies host files into `user`'s home, keeping their file names.
pub fn import_host_files(fs: &mut FileSystem, user: &Identity, files: &[PathBuf]) -> Result<()> {
    let home = home_dir(&user.name);

    for file in files {
        let data = fs::read(file).with_context(|| format!("Failed to import {}", file.display()))?;
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Cannot import {}: no usable file name", file.display()))?;

        let path = format!("{}/{}", home, name);
        info!(host = %file.display(), path = %path, bytes = data.len(), "imported host file");
        fs.insert(Entry::new(
            &path,
            &user.name,
            user.primary_group(),
            DEFAULT_FILE_MODE,
            EntryKind::File(data),
        ));
    }

    Ok(())
}
