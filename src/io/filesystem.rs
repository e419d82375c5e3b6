use std::collections::BTreeMap;

use super::permission::{self, Access, Identity, Mode, Protected};

use crate::error::{PermissionError, ResourceError, ShellError, ShellResult};

pub const DEFAULT_FILE_MODE: Mode = Mode::from_bits(0o644);
pub const DEFAULT_DIR_MODE: Mode = Mode::from_bits(0o755);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File(Vec<u8>),
    Directory,
}

/// One node of the simulated filesystem. Its `mode` is the only copy of
/// its permission bits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    path: String,
    owner: String,
    group: String,
    mode: Mode,
    kind: EntryKind,
}

impl Entry {
    pub fn new(path: &str, owner: &str, group: &str, mode: Mode, kind: EntryKind) -> Entry {
        Entry {
            path: path.to_string(),
            owner: owner.to_string(),
            group: group.to_string(),
            mode,
            kind,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        match self.path.rsplit('/').next() {
            Some("") | None => "/",
            Some(name) => name,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn size(&self) -> usize {
        match &self.kind {
            EntryKind::File(data) => data.len(),
            EntryKind::Directory => 4096,
        }
    }

    pub fn contents(&self) -> Option<&[u8]> {
        match &self.kind {
            EntryKind::File(data) => Some(data),
            EntryKind::Directory => None,
        }
    }
}

impl Protected for Entry {
    fn owner(&self) -> &str {
        &self.owner
    }

    fn group(&self) -> &str {
        &self.group
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }
}

/// Turns `path` into a normalized absolute path. Relative paths resolve
/// against `cwd`, a leading `~` against `home`.
pub fn normalize(cwd: &str, path: &str, home: &str) -> String {
    let joined = if path == "~" {
        home.to_string()
    } else if let Some(rest) = path.strip_prefix("~/") {
        format!("{}/{}", home, rest)
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", cwd, path)
    };

    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }

    format!("/{}", parts.join("/"))
}

fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// The Filesystem Entry table: every entry keyed by its absolute path.
/// All lookups take normalized absolute paths and the acting user.
#[derive(Clone, Debug)]
pub struct FileSystem {
    entries: BTreeMap<String, Entry>,
}

impl FileSystem {
    /// An empty tree holding only `/`, owned by root.
    pub fn new() -> FileSystem {
        let mut entries = BTreeMap::new();
        entries.insert(
            "/".to_string(),
            Entry::new("/", "root", "root", DEFAULT_DIR_MODE, EntryKind::Directory),
        );

        FileSystem { entries }
    }

    /// Places an entry without any permission check. Used for seeding.
    pub fn insert(&mut self, entry: Entry) {
        self.entries.insert(entry.path.clone(), entry);
    }

    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.entries.get(path)
    }

    fn permits(user: &Identity, entry: &Entry, access: Access) -> bool {
        if user.is_root() {
            return match access {
                Access::Read | Access::Write => true,
                Access::Execute => entry.is_dir() || entry.mode.bits() & 0o111 != 0,
            };
        }

        permission::check_access(entry, user, access)
    }

    fn require(user: &Identity, entry: &Entry, access: Access) -> Result<(), PermissionError> {
        if Self::permits(user, entry, access) {
            Ok(())
        } else {
            Err(PermissionError::AccessDenied {
                path: entry.path.clone(),
                access,
            })
        }
    }

    /// Checks that every directory above `path` exists and can be searched.
    fn traverse(&self, user: &Identity, path: &str) -> ShellResult<()> {
        let mut current = String::new();
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();

        for (idx, component) in components.iter().enumerate() {
            let dir = if current.is_empty() { "/" } else { current.as_str() };
            let entry = self.entries.get(dir).ok_or_else(|| ResourceError::NotFound(dir.to_string()))?;
            if !entry.is_dir() {
                return Err(ResourceError::NotDirectory(dir.to_string()).into());
            }
            Self::require(user, entry, Access::Execute)?;

            if idx + 1 < components.len() {
                current.push('/');
                current.push_str(component);
            }
        }

        Ok(())
    }

    pub fn lookup(&self, user: &Identity, path: &str) -> ShellResult<&Entry> {
        self.traverse(user, path)?;
        self.entries
            .get(path)
            .ok_or_else(|| ResourceError::NotFound(path.to_string()).into())
    }

    pub fn read_file(&self, user: &Identity, path: &str) -> ShellResult<Vec<u8>> {
        let entry = self.lookup(user, path)?;
        let data = entry
            .contents()
            .ok_or_else(|| ResourceError::IsDirectory(path.to_string()))?;
        Self::require(user, entry, Access::Read)?;

        Ok(data.to_vec())
    }

    /// The entries `ls` shows for `path`: the children of a directory in
    /// name order, or the entry itself for a file.
    pub fn list(&self, user: &Identity, path: &str) -> ShellResult<Vec<&Entry>> {
        let entry = self.lookup(user, path)?;
        if !entry.is_dir() {
            return Ok(vec![entry]);
        }
        Self::require(user, entry, Access::Read)?;

        Ok(self
            .entries
            .values()
            .filter(|child| parent_of(&child.path) == Some(path))
            .collect())
    }

    pub fn change_dir(&self, user: &Identity, path: &str) -> ShellResult<()> {
        let entry = self.lookup(user, path)?;
        if !entry.is_dir() {
            return Err(ResourceError::NotDirectory(path.to_string()).into());
        }
        Self::require(user, entry, Access::Execute)?;
        Ok(())
    }

    fn create(&mut self, user: &Identity, path: &str, kind: EntryKind, mode: Mode) -> ShellResult<()> {
        if self.entries.contains_key(path) {
            return Err(ResourceError::AlreadyExists(path.to_string()).into());
        }
        let parent_path = parent_of(path).ok_or_else(|| ResourceError::AlreadyExists(path.to_string()))?;
        let parent = self.lookup(user, parent_path)?;
        if !parent.is_dir() {
            return Err(ResourceError::NotDirectory(parent_path.to_string()).into());
        }
        Self::require(user, parent, Access::Write)?;
        Self::require(user, parent, Access::Execute)?;

        self.insert(Entry::new(path, &user.name, user.primary_group(), mode, kind));
        Ok(())
    }

    /// Prepares `path` as a redirection target: creates it when missing,
    /// otherwise checks write access and truncates unless appending.
    pub fn open_write(&mut self, user: &Identity, path: &str, append: bool) -> ShellResult<()> {
        match self.lookup(user, path) {
            Err(ShellError::Resource(ResourceError::NotFound(missing))) if missing == path => {
                return self.create(user, path, EntryKind::File(Vec::new()), DEFAULT_FILE_MODE);
            }
            Err(err) => return Err(err),
            Ok(entry) if entry.is_dir() => {
                return Err(ResourceError::IsDirectory(path.to_string()).into());
            }
            Ok(entry) => Self::require(user, entry, Access::Write)?,
        }

        if !append {
            if let Some(entry) = self.entries.get_mut(path) {
                entry.kind = EntryKind::File(Vec::new());
            }
        }
        Ok(())
    }

    /// Appends to a file previously prepared with [`FileSystem::open_write`].
    pub fn append(&mut self, path: &str, bytes: &[u8]) -> Result<(), ResourceError> {
        match self.entries.get_mut(path).map(|entry| &mut entry.kind) {
            Some(EntryKind::File(data)) => {
                data.extend_from_slice(bytes);
                Ok(())
            }
            Some(EntryKind::Directory) => Err(ResourceError::IsDirectory(path.to_string())),
            None => Err(ResourceError::NotFound(path.to_string())),
        }
    }

    /// Runs `f` against a scratch copy and keeps the result only if every
    /// step succeeded.
    fn transaction<T>(&mut self, f: impl FnOnce(&mut FileSystem) -> ShellResult<T>) -> ShellResult<T> {
        let mut staged = self.clone();
        let value = f(&mut staged)?;
        *self = staged;
        Ok(value)
    }

    /// Applies `mode_spec` to every path, or to none of them.
    pub fn chmod(&mut self, user: &Identity, paths: &[String], mode_spec: &str) -> ShellResult<Vec<Entry>> {
        self.transaction(|fs| {
            let mut updated = Vec::with_capacity(paths.len());
            for path in paths {
                let entry = fs.lookup(user, path)?;
                if entry.owner != user.name && !user.is_root() {
                    return Err(PermissionError::NotOwner(path.clone()).into());
                }

                let changed = permission::chmod(entry, mode_spec)?;
                fs.insert(changed.clone());
                updated.push(changed);
            }
            Ok(updated)
        })
    }

    /// Creates missing files; existing ones must be writable.
    pub fn touch(&mut self, user: &Identity, paths: &[String]) -> ShellResult<()> {
        self.transaction(|fs| {
            for path in paths {
                match fs.entries.get(path) {
                    Some(entry) => {
                        fs.traverse(user, path)?;
                        Self::require(user, entry, Access::Write)?;
                    }
                    None => fs.create(user, path, EntryKind::File(Vec::new()), DEFAULT_FILE_MODE)?,
                }
            }
            Ok(())
        })
    }

    pub fn mkdir(&mut self, user: &Identity, paths: &[String]) -> ShellResult<()> {
        self.transaction(|fs| {
            for path in paths {
                fs.create(user, path, EntryKind::Directory, DEFAULT_DIR_MODE)?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity::new("alice", &["staff"])
    }

    fn bob() -> Identity {
        Identity::new("bob", &["users"])
    }

    fn fs() -> FileSystem {
        let mut fs = FileSystem::new();
        fs.insert(Entry::new("/home", "root", "root", DEFAULT_DIR_MODE, EntryKind::Directory));
        fs.insert(Entry::new("/home/alice", "alice", "staff", DEFAULT_DIR_MODE, EntryKind::Directory));
        fs.insert(Entry::new(
            "/home/alice/notes.txt",
            "alice",
            "staff",
            Mode::from_bits(0o600),
            EntryKind::File(b"secret".to_vec()),
        ));
        fs
    }

    #[test]
    fn test_filesystem_normalize() {
        assert_eq!(normalize("/home/alice", "notes.txt", "/home/alice"), "/home/alice/notes.txt");
        assert_eq!(normalize("/home/alice", "../bob/./x", "/home/alice"), "/home/bob/x");
        assert_eq!(normalize("/tmp", "~/a", "/home/alice"), "/home/alice/a");
        assert_eq!(normalize("/", "../..", "/"), "/");
        assert_eq!(normalize("/x", "/etc//motd", "/"), "/etc/motd");
    }

    #[test]
    fn test_filesystem_read_respects_owner_bits() {
        let fs = fs();

        assert_eq!(fs.read_file(&alice(), "/home/alice/notes.txt").unwrap(), b"secret");
        assert!(matches!(
            fs.read_file(&bob(), "/home/alice/notes.txt"),
            Err(ShellError::Permission(PermissionError::AccessDenied { access: Access::Read, .. }))
        ));
        assert!(fs.read_file(&Identity::new("root", &["root"]), "/home/alice/notes.txt").is_ok());
    }

    #[test]
    fn test_filesystem_traversal_needs_execute() {
        let mut fs = fs();
        fs.chmod(&alice(), &["/home/alice".to_string()], "700").unwrap();
        fs.chmod(&alice(), &["/home/alice/notes.txt".to_string()], "644").unwrap();

        assert!(matches!(
            fs.read_file(&bob(), "/home/alice/notes.txt"),
            Err(ShellError::Permission(PermissionError::AccessDenied { ref path, access: Access::Execute })) if path == "/home/alice"
        ));
    }

    #[test]
    fn test_filesystem_create_needs_write_and_execute_on_parent() {
        let mut fs = fs();
        fs.chmod(&alice(), &["/home/alice".to_string()], "600").unwrap();

        for result in [
            fs.touch(&alice(), &["/home/alice/x".to_string()]),
            fs.mkdir(&alice(), &["/home/alice/d".to_string()]),
            fs.open_write(&alice(), "/home/alice/y", false),
        ] {
            assert!(matches!(
                result,
                Err(ShellError::Permission(PermissionError::AccessDenied { ref path, access: Access::Execute })) if path == "/home/alice"
            ));
        }
        assert!(fs.get("/home/alice/x").is_none());
        assert!(fs.get("/home/alice/d").is_none());
        assert!(fs.get("/home/alice/y").is_none());

        fs.chmod(&alice(), &["/home/alice".to_string()], "700").unwrap();
        assert!(fs.touch(&alice(), &["/home/alice/x".to_string()]).is_ok());
    }

    #[test]
    fn test_filesystem_chmod_is_all_or_nothing() {
        let mut fs = fs();
        fs.insert(Entry::new("/home/alice/b", "bob", "users", DEFAULT_FILE_MODE, EntryKind::File(Vec::new())));
        let paths = vec!["/home/alice/notes.txt".to_string(), "/home/alice/b".to_string()];

        let err = fs.chmod(&alice(), &paths, "777").unwrap_err();

        assert!(matches!(err, ShellError::Permission(PermissionError::NotOwner(_))));
        assert_eq!(fs.get("/home/alice/notes.txt").unwrap().mode().symbolic(), "rw-------");
    }

    #[test]
    fn test_filesystem_chmod_bad_mode_changes_nothing() {
        let mut fs = fs();
        let err = fs
            .chmod(&alice(), &["/home/alice/notes.txt".to_string()], "u+k")
            .unwrap_err();

        assert!(matches!(err, ShellError::Permission(PermissionError::InvalidMode(_))));
        assert_eq!(fs.get("/home/alice/notes.txt").unwrap().mode().bits(), 0o600);
    }

    #[test]
    fn test_filesystem_open_write_truncates_or_appends() {
        let mut fs = fs();
        let path = "/home/alice/notes.txt";

        fs.open_write(&alice(), path, true).unwrap();
        fs.append(path, b"!").unwrap();
        assert_eq!(fs.get(path).unwrap().contents().unwrap(), b"secret!");

        fs.open_write(&alice(), path, false).unwrap();
        assert_eq!(fs.get(path).unwrap().contents().unwrap(), b"");
    }

    #[test]
    fn test_filesystem_open_write_creates_owned_file() {
        let mut fs = fs();

        fs.open_write(&alice(), "/home/alice/out.txt", false).unwrap();
        let entry = fs.get("/home/alice/out.txt").unwrap();
        assert_eq!(entry.owner(), "alice");
        assert_eq!(entry.mode().symbolic(), "rw-r--r--");

        assert!(matches!(
            fs.open_write(&bob(), "/home/alice/other.txt", false),
            Err(ShellError::Permission(PermissionError::AccessDenied { access: Access::Write, .. }))
        ));
        assert!(matches!(
            fs.open_write(&alice(), "/home/alice", false),
            Err(ShellError::Resource(ResourceError::IsDirectory(_)))
        ));
    }

    #[test]
    fn test_filesystem_list_and_mkdir() {
        let mut fs = fs();
        fs.mkdir(&alice(), &["/home/alice/a".to_string(), "/home/alice/a/b".to_string()])
            .unwrap();

        let names: Vec<&str> = fs
            .list(&alice(), "/home/alice")
            .unwrap()
            .into_iter()
            .map(Entry::name)
            .collect();
        assert_eq!(names, vec!["a", "notes.txt"]);

        let err = fs
            .mkdir(&alice(), &["/home/alice/c".to_string(), "/home/alice/a".to_string()])
            .unwrap_err();
        assert!(matches!(err, ShellError::Resource(ResourceError::AlreadyExists(_))));
        assert!(fs.get("/home/alice/c").is_none());
    }
}
