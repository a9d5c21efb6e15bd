//! An in-memory [Transport] that simulates a Debian-like host.
//!
//! [FakeTransport] understands the handful of commands pickup's resources issue (package queries,
//! `apt-get`, `touch`, `rm`, `getent`, `id`, `service`) plus `true`, `false` and `exit N`. Any
//! other command exits with status 127 unless a response has been scripted with
//! [FakeTransport::respond]. Every call is recorded as an [Operation] so tests can assert on
//! exactly what reached the "remote" host.
//!
//! To enable integration testing, this module is public but stripped from documentation.

use super::{CommandOutput, FileSession, FileStat, Transport};
use anyhow::{anyhow, bail};
use indexmap::IndexMap;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// The mode `touch` gives new files on the fake host.
pub const DEFAULT_FILE_MODE: u32 = 0o100644;

/// A single call that reached the fake host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Run {
        command: String,
        env: IndexMap<String, String>,
    },
    OpenFileSession,
    Stat(PathBuf),
    Chmod(PathBuf, u32),
    Chown(PathBuf, u32, u32),
    ListDirectory(PathBuf),
    Read(PathBuf),
    Write(PathBuf),
    Disconnect,
}

/// A regular file on the fake host.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FakeFile {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub content: Vec<u8>,
}

/// The simulated state of the fake host.
#[derive(Debug, Default)]
pub struct FakeRemote {
    /// Regular files, keyed by absolute path.
    pub files: BTreeMap<PathBuf, FakeFile>,

    /// Directories that exist. Parents of [Self::files] are added automatically by
    /// [FakeTransport::add_file].
    pub directories: BTreeSet<PathBuf>,

    /// Installed packages.
    pub packages: BTreeSet<String>,

    /// User names and their IDs.
    pub users: BTreeMap<String, u32>,

    /// Group names and their IDs.
    pub groups: BTreeMap<String, u32>,

    /// Scripted responses, keyed by exact command text. These take precedence over the built-in
    /// command simulation.
    pub responses: HashMap<String, CommandOutput>,

    /// Every call made against this host, in order.
    pub log: Vec<Operation>,

    /// The number of file sessions that have been opened but not yet dropped.
    pub open_file_sessions: usize,
}

/// A [Transport] backed by a [FakeRemote].
#[derive(Clone, Debug, Default)]
pub struct FakeTransport {
    remote: Rc<RefCell<FakeRemote>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remote(&self) -> Ref<'_, FakeRemote> {
        self.remote.borrow()
    }

    pub fn remote_mut(&self) -> RefMut<'_, FakeRemote> {
        self.remote.borrow_mut()
    }

    /// Scripts the result of running exactly `command`.
    pub fn respond(&self, command: impl Into<String>, status: i32, output: impl Into<String>) {
        self.remote_mut().responses.insert(
            command.into(),
            CommandOutput {
                status,
                output: output.into(),
            },
        );
    }

    /// Creates a file (and its parent directory) on the fake host.
    pub fn add_file(&self, path: impl Into<PathBuf>, file: FakeFile) {
        let path = path.into();
        let mut remote = self.remote_mut();
        if let Some(parent) = path.parent() {
            remote.directories.insert(parent.to_path_buf());
        }
        remote.files.insert(path, file);
    }

    pub fn add_directory(&self, path: impl Into<PathBuf>) {
        self.remote_mut().directories.insert(path.into());
    }

    pub fn add_user(&self, name: impl Into<String>, uid: u32) {
        self.remote_mut().users.insert(name.into(), uid);
    }

    pub fn add_group(&self, name: impl Into<String>, gid: u32) {
        self.remote_mut().groups.insert(name.into(), gid);
    }

    pub fn install_package(&self, name: impl Into<String>) {
        self.remote_mut().packages.insert(name.into());
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<FakeFile> {
        self.remote().files.get(path.as_ref()).cloned()
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.remote().log.clone()
    }

    /// The text of every command run, in order.
    pub fn commands(&self) -> Vec<String> {
        self.remote()
            .log
            .iter()
            .filter_map(|op| match op {
                Operation::Run { command, .. } => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forgets all recorded operations but keeps the simulated state.
    pub fn clear_log(&self) {
        self.remote_mut().log.clear();
    }

    /// Every recorded operation that mutated a file's metadata or content.
    pub fn file_mutations(&self) -> Vec<Operation> {
        self.remote()
            .log
            .iter()
            .filter(|op| {
                matches!(
                    op,
                    Operation::Chmod(..) | Operation::Chown(..) | Operation::Write(_)
                )
            })
            .cloned()
            .collect()
    }
}

impl Transport for FakeTransport {
    type Files = FakeFiles;

    fn run(
        &mut self,
        command: &str,
        env: &IndexMap<String, String>,
    ) -> anyhow::Result<CommandOutput> {
        let mut remote = self.remote_mut();
        remote.log.push(Operation::Run {
            command: command.to_string(),
            env: env.clone(),
        });

        if let Some(response) = remote.responses.get(command) {
            return Ok(response.clone());
        }

        let words = shlex::split(command)
            .ok_or_else(|| anyhow!("fake host could not parse command: {command}"))?;
        Ok(remote.simulate(&words))
    }

    fn open_file_session(&mut self) -> anyhow::Result<Self::Files> {
        let mut remote = self.remote_mut();
        remote.log.push(Operation::OpenFileSession);
        remote.open_file_sessions += 1;
        Ok(FakeFiles {
            remote: self.remote.clone(),
        })
    }

    fn disconnect(&mut self) -> anyhow::Result<()> {
        self.remote_mut().log.push(Operation::Disconnect);
        Ok(())
    }
}

impl FakeRemote {
    /// Simulates the built-in command vocabulary.
    fn simulate(&mut self, words: &[String]) -> CommandOutput {
        let words: Vec<&str> = words.iter().map(String::as_str).collect();
        let (status, output) = match words.as_slice() {
            ["true"] => (0, String::new()),
            ["false"] => (1, String::new()),
            ["exit", code] => (code.parse().unwrap_or(2), String::new()),
            ["dpkg-query", "-W", _, package, "|", "grep", ..] => {
                match self.packages.contains(*package) {
                    true => (0, "install ok installed\n".to_string()),
                    false => (1, String::new()),
                }
            }
            ["apt-get", "install", "-y", package] => {
                self.packages.insert(package.to_string());
                (0, format!("Setting up {package} ...\n"))
            }
            ["apt-get", "--purge", "autoremove", "-y", package] => {
                self.packages.remove(*package);
                (0, format!("Removing {package} ...\n"))
            }
            ["touch", path] => self.touch(Path::new(path)),
            ["rm", path] => match self.files.remove(Path::new(path)) {
                Some(_) => (0, String::new()),
                None => (
                    1,
                    format!("rm: cannot remove '{path}': No such file or directory\n"),
                ),
            },
            // The exit status of a pipeline is that of its last command, so an unknown group
            // still "succeeds" with empty output, just as on a real host.
            ["getent", "group", group, "|", "awk", ..] => match self.groups.get(*group) {
                Some(gid) => (0, gid.to_string()),
                None => (0, String::new()),
            },
            ["id", "-u", user] => match self.users.get(*user) {
                Some(uid) => (0, format!("{uid}\n")),
                None => (1, format!("id: '{user}': no such user\n")),
            },
            ["service", _, "restart"] => (0, String::new()),
            _ => (127, format!("{}: command not found\n", words.join(" "))),
        };
        CommandOutput { status, output }
    }

    fn touch(&mut self, path: &Path) -> (i32, String) {
        let parent_exists = path
            .parent()
            .map(|p| p.as_os_str().is_empty() || self.directories.contains(p))
            .unwrap_or(true);
        if !parent_exists {
            return (
                1,
                format!(
                    "touch: cannot touch '{}': No such file or directory\n",
                    path.display(),
                ),
            );
        }
        self.files.entry(path.to_path_buf()).or_insert(FakeFile {
            mode: DEFAULT_FILE_MODE,
            ..Default::default()
        });
        (0, String::new())
    }

    fn file_mut(&mut self, path: &Path) -> anyhow::Result<&mut FakeFile> {
        self.files
            .get_mut(path)
            .ok_or_else(|| anyhow!("no such file: {}", path.display()))
    }
}

/// The [FileSession] opened by [FakeTransport].
#[derive(Debug)]
pub struct FakeFiles {
    remote: Rc<RefCell<FakeRemote>>,
}

impl FakeFiles {
    fn remote_mut(&self) -> RefMut<'_, FakeRemote> {
        self.remote.borrow_mut()
    }
}

impl Drop for FakeFiles {
    fn drop(&mut self) {
        let mut remote = self.remote_mut();
        remote.open_file_sessions = remote.open_file_sessions.saturating_sub(1);
    }
}

impl FileSession for FakeFiles {
    fn stat(&mut self, path: &Path) -> anyhow::Result<FileStat> {
        let mut remote = self.remote_mut();
        remote.log.push(Operation::Stat(path.to_path_buf()));
        let file = remote.file_mut(path)?;
        Ok(FileStat {
            mode: file.mode,
            uid: file.uid,
            gid: file.gid,
            size: file.content.len() as u64,
        })
    }

    fn chmod(&mut self, path: &Path, mode: u32) -> anyhow::Result<()> {
        let mut remote = self.remote_mut();
        remote.log.push(Operation::Chmod(path.to_path_buf(), mode));
        let file = remote.file_mut(path)?;
        file.mode = (file.mode & !0o7777) | (mode & 0o7777);
        Ok(())
    }

    fn chown(&mut self, path: &Path, uid: u32, gid: u32) -> anyhow::Result<()> {
        let mut remote = self.remote_mut();
        remote.log.push(Operation::Chown(path.to_path_buf(), uid, gid));
        let file = remote.file_mut(path)?;
        file.uid = uid;
        file.gid = gid;
        Ok(())
    }

    fn list_directory(&mut self, path: &Path) -> anyhow::Result<Vec<String>> {
        let mut remote = self.remote_mut();
        remote.log.push(Operation::ListDirectory(path.to_path_buf()));
        if !remote.directories.contains(path) {
            bail!("no such directory: {}", path.display());
        }
        let names = remote
            .files
            .keys()
            .filter(|file| file.parent() == Some(path))
            .filter_map(|file| file.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        Ok(names)
    }

    fn open_read(&mut self, path: &Path) -> anyhow::Result<Box<dyn Read + '_>> {
        let mut remote = self.remote_mut();
        remote.log.push(Operation::Read(path.to_path_buf()));
        let content = remote.file_mut(path)?.content.clone();
        Ok(Box::new(Cursor::new(content)))
    }

    fn open_write(&mut self, path: &Path) -> anyhow::Result<Box<dyn Write + '_>> {
        let mut remote = self.remote_mut();
        remote.log.push(Operation::Write(path.to_path_buf()));
        remote.file_mut(path)?.content.clear();
        Ok(Box::new(FakeWriter {
            remote: self.remote.clone(),
            path: path.to_path_buf(),
        }))
    }
}

/// Appends to a [FakeFile]'s content as it is written.
struct FakeWriter {
    remote: Rc<RefCell<FakeRemote>>,
    path: PathBuf,
}

impl Write for FakeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut remote = self.remote.borrow_mut();
        let file = remote
            .file_mut(&self.path)
            .map_err(|e| io::Error::new(io::ErrorKind::NotFound, e.to_string()))?;
        file.content.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
