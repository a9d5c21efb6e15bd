//! Regular files: their existence, permissions, ownership and content.
//!
//! Creating a file converges each of those facets independently, in that order, and touches only
//! the facets that differ from the desired state. Content is copied from a local source file and
//! compared by size first, then byte by byte, so an unchanged file is never rewritten.

use super::{BuildError, Converge};
use crate::converge::report::Report;
use crate::converge::{Context, Outcome};
use crate::core::step::Scalar;
use crate::transport::{quote, FileSession, Transport};
use anyhow::{bail, Context as _};
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// How much of each file to hold in memory at once when comparing content.
const CHUNK_SIZE: usize = 32 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Create,
    Delete,
}

impl FileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileAction::Create => "create",
            FileAction::Delete => "delete",
        }
    }
}

/// A file on the managed host, and what should become of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum File {
    /// `destination` should exist with the content of the local file `source`, owned by `owner`
    /// and `group`, with permission bits `mode`.
    ///
    /// `owner` and `group` are names, or numeric IDs written as decimal strings.
    Create {
        source: PathBuf,
        destination: PathBuf,
        owner: String,
        group: String,
        mode: u32,
    },

    /// `file` should not exist.
    Delete { file: PathBuf },
}

/// The raw, optional fields of a `File` step.
pub(crate) struct Fields<'a> {
    pub source: &'a Option<String>,
    pub destination: &'a Option<String>,
    pub file: &'a Option<String>,
    pub owner: &'a Option<Scalar>,
    pub group: &'a Option<Scalar>,
    pub mode: &'a Option<Scalar>,
}

impl File {
    /// Checks that the fields `action` needs are present and well-formed.
    ///
    /// `resource` is the display name used in errors.
    pub(crate) fn new(
        resource: &str,
        action: FileAction,
        fields: Fields<'_>,
    ) -> Result<Self, BuildError> {
        let required = |value: Option<String>, field| {
            value.ok_or_else(|| BuildError::MissingField {
                resource: resource.to_string(),
                field,
            })
        };

        match action {
            FileAction::Create => {
                let source = required(fields.source.clone(), "source")?;
                let destination = required(fields.destination.clone(), "destination")?;
                let owner = required(fields.owner.as_ref().map(Scalar::to_string), "owner")?;
                let group = required(fields.group.as_ref().map(Scalar::to_string), "group")?;
                let Some(mode) = fields.mode else {
                    return Err(BuildError::MissingField {
                        resource: resource.to_string(),
                        field: "mode",
                    });
                };
                // Integers are refused: by now `0o644` and `420` look the same.
                let mode_bits = match mode {
                    Scalar::Text(text) => parse_mode(text),
                    Scalar::Integer(_) => None,
                };
                let Some(mode_bits) = mode_bits else {
                    return Err(BuildError::InvalidMode {
                        resource: resource.to_string(),
                        mode: mode.to_string(),
                    });
                };
                Ok(File::Create {
                    source: source.into(),
                    destination: destination.into(),
                    owner,
                    group,
                    mode: mode_bits,
                })
            }
            FileAction::Delete => Ok(File::Delete {
                file: required(fields.file.clone(), "file")?.into(),
            }),
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            File::Create { .. } => FileAction::Create.as_str(),
            File::Delete { .. } => FileAction::Delete.as_str(),
        }
    }
}

/// Parses three or four octal digits, e.g. `644` or `0644`.
fn parse_mode(mode: &str) -> Option<u32> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^[0-7]{3,4}$").expect("BUG: invalid file mode pattern"));
    match pattern.is_match(mode) {
        true => u32::from_str_radix(mode, 8).ok(),
        false => None,
    }
}

impl Converge for File {
    fn converge<T: Transport, R: Report>(
        &self,
        ctx: &mut Context<'_, T, R>,
    ) -> anyhow::Result<Outcome> {
        // The session closes when it goes out of scope, on every path out of this function.
        let mut files = ctx.transport().open_file_session()?;
        match self {
            File::Create {
                source,
                destination,
                owner,
                group,
                mode,
            } => {
                let desired = Desired {
                    source,
                    destination,
                    owner,
                    group,
                    mode: *mode,
                };
                create(ctx, &mut files, &desired)
            }
            File::Delete { file } => delete(ctx, &mut files, file),
        }
    }
}

struct Desired<'a> {
    source: &'a Path,
    destination: &'a Path,
    owner: &'a str,
    group: &'a str,
    mode: u32,
}

fn create<T: Transport, R: Report>(
    ctx: &mut Context<'_, T, R>,
    files: &mut T::Files,
    desired: &Desired<'_>,
) -> anyhow::Result<Outcome> {
    let destination = desired.destination;
    let mut changed = false;

    if exists(files, destination)? {
        ctx.note(format_args!("File already exists: {}", destination.display()))?;
    } else {
        ctx.note(format_args!("Creating new file: {}", destination.display()))?;
        let output = ctx.probe(&format!("touch {}", quote_path(destination)?))?;
        if !output.success() {
            ctx.note(output.output.trim_end())?;
            return Ok(Outcome::Failed(output.status));
        }
        changed = true;
    }

    let uid = resolve_uid(ctx, desired.owner)?;
    let gid = resolve_gid(ctx, desired.group)?;
    let stat = files.stat(destination)?;

    if stat.permissions() == desired.mode {
        ctx.note(format_args!("File already has correct mode: {:04o}", desired.mode))?;
    } else {
        ctx.note(format_args!(
            "Updating file mode: {:04o} => {:04o}",
            stat.permissions(),
            desired.mode,
        ))?;
        files.chmod(destination, desired.mode)?;
        changed = true;
    }

    if (stat.uid, stat.gid) == (uid, gid) {
        ctx.note(format_args!("File already has correct owner and group: {uid}:{gid}"))?;
    } else {
        ctx.note(format_args!(
            "Updating file owner and group: {}:{} => {uid}:{gid}",
            stat.uid, stat.gid,
        ))?;
        files.chown(destination, uid, gid)?;
        changed = true;
    }

    if content_differs(files, desired.source, destination, stat.size)? {
        ctx.note("Updating file content")?;
        write_content(files, desired.source, destination)?;
        changed = true;
    } else {
        ctx.note("File already has correct content")?;
    }

    match changed {
        true => Ok(Outcome::Applied),
        false => ctx.skip(format!(
            "file already converged to the desired state: {}",
            destination.display(),
        )),
    }
}

fn delete<T: Transport, R: Report>(
    ctx: &mut Context<'_, T, R>,
    files: &mut T::Files,
    file: &Path,
) -> anyhow::Result<Outcome> {
    if !exists(files, file)? {
        return ctx.skip(format!("file already deleted: {}", file.display()));
    }
    ctx.note(format_args!("Deleting file: {}", file.display()))?;
    let output = ctx.probe(&format!("rm {}", quote_path(file)?))?;
    if !output.success() {
        ctx.note(output.output.trim_end())?;
    }
    Ok(Outcome::from_status(output.status))
}

/// Whether `path` appears in its parent directory's listing.
fn exists(files: &mut impl FileSession, path: &Path) -> anyhow::Result<bool> {
    let Some(name) = path.file_name() else {
        bail!("not a file path: {}", path.display());
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = name.to_string_lossy();
    Ok(files.list_directory(parent)?.iter().any(|entry| *entry == name))
}

fn quote_path(path: &Path) -> anyhow::Result<String> {
    Ok(quote(&path.to_string_lossy())?.into_owned())
}

fn is_numeric_id(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

/// Resolves a user name to a UID on the managed host. Numeric names are taken as UIDs.
fn resolve_uid<T: Transport, R: Report>(
    ctx: &mut Context<'_, T, R>,
    owner: &str,
) -> anyhow::Result<u32> {
    if is_numeric_id(owner) {
        return owner.parse().with_context(|| format!("invalid UID: {owner}"));
    }
    let output = ctx.probe(&format!("id -u {}", quote(owner)?))?;
    if !output.success() {
        bail!("failed to look up user {owner}: {}", output.output.trim());
    }
    output
        .output
        .trim()
        .parse()
        .with_context(|| format!("unexpected UID for user {owner}: {:?}", output.output))
}

/// Resolves a group name to a GID on the managed host. Numeric names are taken as GIDs.
fn resolve_gid<T: Transport, R: Report>(
    ctx: &mut Context<'_, T, R>,
    group: &str,
) -> anyhow::Result<u32> {
    if is_numeric_id(group) {
        return group.parse().with_context(|| format!("invalid GID: {group}"));
    }
    let output = ctx.probe(&format!(
        r#"getent group {} | awk -F: '{{printf "%d",$3}}'"#,
        quote(group)?,
    ))?;
    // getent prints nothing for an unknown group, and the pipeline still exits 0.
    let gid = output.output.trim();
    if !output.success() || gid.is_empty() {
        bail!("failed to look up group {group}");
    }
    gid.parse()
        .with_context(|| format!("unexpected GID for group {group}: {gid:?}"))
}

/// Whether the remote file's content differs from the local source's.
fn content_differs(
    files: &mut impl FileSession,
    source: &Path,
    destination: &Path,
    remote_size: u64,
) -> anyhow::Result<bool> {
    let local = open_source(source)?;
    let local_size = local
        .metadata()
        .with_context(|| format!("failed to read metadata of {}", source.display()))?
        .len();
    if local_size != remote_size {
        return Ok(true);
    }

    let remote = files.open_read(destination)?;
    let same = same_content(local, remote).with_context(|| {
        format!(
            "failed to compare {} with {}",
            source.display(),
            destination.display(),
        )
    })?;
    Ok(!same)
}

/// Streams both readers to the end, comparing them chunk by chunk.
fn same_content(mut a: impl Read, mut b: impl Read) -> io::Result<bool> {
    let mut a_buf = vec![0; CHUNK_SIZE];
    let mut b_buf = vec![0; CHUNK_SIZE];
    loop {
        let a_len = read_chunk(&mut a, &mut a_buf)?;
        let b_len = read_chunk(&mut b, &mut b_buf)?;
        if a_buf[..a_len] != b_buf[..b_len] {
            return Ok(false);
        }
        if a_len == 0 {
            return Ok(true);
        }
    }
}

/// Fills `buf` as far as possible, stopping early only at end of input.
fn read_chunk(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Replaces the remote file's content with the local source's.
fn write_content(
    files: &mut impl FileSession,
    source: &Path,
    destination: &Path,
) -> anyhow::Result<()> {
    let failed = || {
        format!(
            "failed to upload {} to {}",
            source.display(),
            destination.display(),
        )
    };
    let mut local = open_source(source)?;
    let mut remote = files.open_write(destination)?;
    io::copy(&mut local, &mut remote).with_context(failed)?;
    remote.flush().with_context(failed)
}

fn open_source(source: &Path) -> anyhow::Result<fs::File> {
    fs::File::open(source)
        .with_context(|| format!("failed to open source file {}", source.display()))
}

#[cfg(test)]
mod test;
