//! Contains a [Transport] implementation based on the [ssh2] crate.

use super::{env_script, CommandOutput, FileSession, FileStat, Transport};
use crate::config::Settings;
use anyhow::{anyhow, Context};
use indexmap::IndexMap;
use ssh2::{CheckResult, ExtendedData, KnownHostFileKind, OpenFlags, OpenType, Session, Sftp};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Reasons [SshTransport::connect] can fail.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(
        "failed to connect to host {host} over port {port}. Check if the provided connection \
        settings are correct and if the host is reachable over SSH"
    )]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("SSH handshake with host {host} failed")]
    Handshake {
        host: String,
        #[source]
        source: ssh2::Error,
    },

    #[error("the host key presented by {host} does not match the one in known_hosts")]
    HostKeyMismatch { host: String },

    #[error(
        "failed to authenticate with host as user {user:?}. Check if the provided connection \
        settings are correct"
    )]
    Authentication {
        user: String,
        #[source]
        source: Option<ssh2::Error>,
    },
}

/// A password-authenticated SSH connection to the managed host.
pub struct SshTransport {
    session: Session,
    host: String,
}

impl SshTransport {
    /// Connects and authenticates to the host described by `settings`.
    ///
    /// Unknown host keys are added to the user's `known_hosts` file; a host key that contradicts
    /// an existing entry is an error.
    pub fn connect(settings: &Settings) -> Result<Self, TransportError> {
        let host = settings.host.clone();
        info!(%host, port = settings.port, user = %settings.username, "connecting");

        let tcp = TcpStream::connect((settings.host.as_str(), settings.port)).map_err(|source| {
            TransportError::Connect {
                host: host.clone(),
                port: settings.port,
                source,
            }
        })?;

        let handshake = |source| TransportError::Handshake {
            host: host.clone(),
            source,
        };
        let mut session = Session::new().map_err(handshake)?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(handshake)?;

        check_host_key(&session, settings)?;

        session
            .userauth_password(&settings.username, &settings.password)
            .map_err(|source| TransportError::Authentication {
                user: settings.username.clone(),
                source: Some(source),
            })?;
        if !session.authenticated() {
            return Err(TransportError::Authentication {
                user: settings.username.clone(),
                source: None,
            });
        }

        info!(%host, "connected");
        Ok(SshTransport { session, host })
    }
}

/// Verifies the server's host key against `known_hosts`, adding it if the host is new.
///
/// Problems reading or writing `known_hosts` are logged rather than treated as errors, mirroring
/// the add-unknown-hosts policy; only a mismatched key refuses the connection.
fn check_host_key(session: &Session, settings: &Settings) -> Result<(), TransportError> {
    let Some(path) = settings.known_hosts.as_deref() else {
        warn!("no home directory found; skipping host key verification");
        return Ok(());
    };
    let Some((key, key_type)) = session.host_key() else {
        warn!(host = %settings.host, "server presented no host key");
        return Ok(());
    };

    let mut known_hosts = match session.known_hosts() {
        Ok(known_hosts) => known_hosts,
        Err(error) => {
            warn!(%error, "could not initialize known hosts");
            return Ok(());
        }
    };
    if path.exists() {
        if let Err(error) = known_hosts.read_file(path, KnownHostFileKind::OpenSSH) {
            warn!(%error, path = %path.display(), "could not read known hosts");
        }
    }

    match known_hosts.check_port(&settings.host, settings.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::Mismatch => Err(TransportError::HostKeyMismatch {
            host: settings.host.clone(),
        }),
        CheckResult::NotFound => {
            // OpenSSH records non-default ports as `[host]:port`.
            let entry = match settings.port {
                22 => settings.host.clone(),
                port => format!("[{}]:{port}", settings.host),
            };
            warn!(host = %entry, path = %path.display(), "adding host key to known hosts");
            let added = known_hosts
                .add(&entry, key, "added by pickup", key_type.into())
                .and_then(|()| known_hosts.write_file(path, KnownHostFileKind::OpenSSH));
            if let Err(error) = added {
                warn!(%error, "could not save host key");
            }
            Ok(())
        }
        CheckResult::Failure => {
            warn!(host = %settings.host, "host key check failed");
            Ok(())
        }
    }
}

impl Transport for SshTransport {
    type Files = SftpSession;

    fn run(
        &mut self,
        command: &str,
        env: &IndexMap<String, String>,
    ) -> anyhow::Result<CommandOutput> {
        debug!(host = %self.host, %command, "running remote command");
        let script = env_script(command, env)?;

        let mut channel = self
            .session
            .channel_session()
            .context("failed to open SSH channel")?;
        // Combine stderr with stdout, as a terminal would.
        channel.handle_extended_data(ExtendedData::Merge)?;
        channel
            .exec(&script)
            .with_context(|| format!("failed to start remote command: {command}"))?;

        let mut output = Vec::new();
        channel
            .read_to_end(&mut output)
            .with_context(|| format!("failed to read output of remote command: {command}"))?;
        channel.wait_close()?;
        let status = channel.exit_status()?;
        debug!(%command, status, "remote command finished");

        Ok(CommandOutput {
            status,
            output: String::from_utf8_lossy(&output).into_owned(),
        })
    }

    fn open_file_session(&mut self) -> anyhow::Result<Self::Files> {
        let sftp = self.session.sftp().context("failed to open SFTP session")?;
        Ok(SftpSession { sftp })
    }

    fn disconnect(&mut self) -> anyhow::Result<()> {
        info!(host = %self.host, "disconnecting");
        self.session
            .disconnect(None, "pickup run complete", None)
            .map_err(|e| anyhow!(e))
    }
}

/// An SFTP sub-session. The remote SFTP channel closes when this value is dropped.
pub struct SftpSession {
    sftp: Sftp,
}

/// A [ssh2::FileStat] that changes nothing, for building partial `setstat` requests.
fn unchanged() -> ssh2::FileStat {
    ssh2::FileStat {
        size: None,
        uid: None,
        gid: None,
        perm: None,
        atime: None,
        mtime: None,
    }
}

impl FileSession for SftpSession {
    fn stat(&mut self, path: &Path) -> anyhow::Result<FileStat> {
        let stat = self
            .sftp
            .stat(path)
            .with_context(|| format!("failed to stat {}", path.display()))?;
        let missing = |attribute: &str| {
            anyhow!("server did not report the {attribute} of {}", path.display())
        };
        Ok(FileStat {
            mode: stat.perm.ok_or_else(|| missing("mode"))?,
            uid: stat.uid.ok_or_else(|| missing("owner"))?,
            gid: stat.gid.ok_or_else(|| missing("group"))?,
            size: stat.size.ok_or_else(|| missing("size"))?,
        })
    }

    fn chmod(&mut self, path: &Path, mode: u32) -> anyhow::Result<()> {
        let stat = ssh2::FileStat {
            perm: Some(mode),
            ..unchanged()
        };
        self.sftp
            .setstat(path, stat)
            .with_context(|| format!("failed to chmod {}", path.display()))
    }

    fn chown(&mut self, path: &Path, uid: u32, gid: u32) -> anyhow::Result<()> {
        let stat = ssh2::FileStat {
            uid: Some(uid),
            gid: Some(gid),
            ..unchanged()
        };
        self.sftp
            .setstat(path, stat)
            .with_context(|| format!("failed to chown {}", path.display()))
    }

    fn list_directory(&mut self, path: &Path) -> anyhow::Result<Vec<String>> {
        let entries = self
            .sftp
            .readdir(path)
            .with_context(|| format!("failed to list directory {}", path.display()))?;
        Ok(entries
            .into_iter()
            .filter_map(|(entry, _)| entry.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect())
    }

    fn open_read(&mut self, path: &Path) -> anyhow::Result<Box<dyn Read + '_>> {
        let file = self
            .sftp
            .open(path)
            .with_context(|| format!("failed to open {} for reading", path.display()))?;
        Ok(Box::new(file))
    }

    fn open_write(&mut self, path: &Path) -> anyhow::Result<Box<dyn Write + '_>> {
        let file = self
            .sftp
            .open_mode(
                path,
                OpenFlags::WRITE | OpenFlags::TRUNCATE,
                0o644,
                OpenType::File,
            )
            .with_context(|| format!("failed to open {} for writing", path.display()))?;
        Ok(Box::new(file))
    }
}
