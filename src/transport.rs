//! The interface pickup uses to reach the managed host. Does not contain a network
//! implementation unless the `ssh2` feature is enabled.
//!
//! A transport has two jobs: running shell commands on the remote host and, through a
//! [FileSession], inspecting and rewriting remote files. The convergence engine only ever talks
//! to these traits, so tests swap in [fake::FakeTransport] instead of a real SSH connection.

use indexmap::IndexMap;
use shlex::Quoter;
use std::borrow::Cow;
use std::io::{Read, Write};
use std::path::Path;

#[doc(hidden)]
pub mod fake;

#[cfg(feature = "ssh2")]
pub mod ssh;

/// A connection to the managed host.
///
/// Dropping a [Transport] must close the underlying connection. [Self::disconnect] exists so that
/// the caller can close the connection politely and observe any error in doing so.
pub trait Transport {
    /// The file-transfer sub-session type opened by [Self::open_file_session].
    type Files: FileSession;

    /// Runs `command` through the remote user's shell with `env` exported first.
    ///
    /// Returns the command's exit status and its combined standard output and standard error.
    /// A non-zero exit status is not an error; an [Err] means the command could not be run or its
    /// result could not be collected.
    fn run(&mut self, command: &str, env: &IndexMap<String, String>)
        -> anyhow::Result<CommandOutput>;

    /// Opens a file-transfer sub-session. The sub-session closes when dropped.
    fn open_file_session(&mut self) -> anyhow::Result<Self::Files>;

    /// Closes the connection.
    fn disconnect(&mut self) -> anyhow::Result<()>;
}

/// File operations on the managed host, e.g. over SFTP.
///
/// All paths are remote paths. Implementers must release any remote handles when the value is
/// dropped.
pub trait FileSession {
    /// Retrieves the attributes of a remote file, following symbolic links.
    fn stat(&mut self, path: &Path) -> anyhow::Result<FileStat>;

    /// Sets the permission bits of a remote file.
    fn chmod(&mut self, path: &Path, mode: u32) -> anyhow::Result<()>;

    /// Sets the owning user and group of a remote file.
    fn chown(&mut self, path: &Path, uid: u32, gid: u32) -> anyhow::Result<()>;

    /// Lists the names of the entries in a remote directory, excluding `.` and `..`.
    fn list_directory(&mut self, path: &Path) -> anyhow::Result<Vec<String>>;

    /// Opens an existing remote file for reading.
    fn open_read(&mut self, path: &Path) -> anyhow::Result<Box<dyn Read + '_>>;

    /// Opens an existing remote file for writing, truncating it to zero length.
    fn open_write(&mut self, path: &Path) -> anyhow::Result<Box<dyn Write + '_>>;
}

/// The result of a command that ran to completion on the remote host.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// The command's exit status. Zero means success.
    pub status: i32,

    /// Standard output, with standard error merged in.
    pub output: String,
}

impl CommandOutput {
    /// Whether the command exited with status zero.
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// The subset of remote file attributes that pickup converges.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileStat {
    /// The full mode, including file type bits.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
}

impl FileStat {
    /// The permission bits of [Self::mode], i.e. `mode & 0o7777`.
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

/// Quotes `word` for safe interpolation into a POSIX shell command line.
///
/// Fails only if `word` contains a nul byte, which no shell can represent.
pub fn quote(word: &str) -> anyhow::Result<Cow<'_, str>> {
    Ok(Quoter::new().quote(word)?)
}

/// Renders the script a transport sends to the remote shell: one `export` line per variable in
/// `env`, in order, followed by `command` itself.
///
/// Variable names are emitted verbatim; they are validated when resources are built. Values are
/// quoted.
///
/// ```
/// # use indexmap::IndexMap;
/// # use pickup::transport::env_script;
/// let env = IndexMap::from([("DEBIAN_FRONTEND".to_string(), "non interactive".to_string())]);
/// assert_eq!(
///     "export DEBIAN_FRONTEND='non interactive'\napt-get update",
///     env_script("apt-get update", &env).unwrap(),
/// );
/// ```
pub fn env_script(command: &str, env: &IndexMap<String, String>) -> anyhow::Result<String> {
    let mut script = String::new();
    for (name, value) in env {
        script.push_str(&format!("export {name}={}\n", quote(value)?));
    }
    script.push_str(command);
    Ok(script)
}
