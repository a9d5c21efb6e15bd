//! Run-time settings that come from outside the configuration file: the command line and the
//! `PICKUP_*` environment variables.

use anyhow::{bail, Context};
use std::env;
use std::fmt;
use std::path::PathBuf;

/// Environment variable naming the managed host.
pub const HOST_VAR: &str = "PICKUP_HOST";

/// Environment variable naming the SSH port.
pub const PORT_VAR: &str = "PICKUP_PORT";

/// Environment variable naming the login user.
pub const USERNAME_VAR: &str = "PICKUP_USERNAME";

/// Environment variable holding the login password.
pub const PASSWORD_VAR: &str = "PICKUP_PASSWORD";

/// Connection parameters for the managed host.
#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    /// Defaults to `localhost`.
    pub host: String,

    /// Defaults to 22.
    pub port: u16,

    /// Defaults to empty.
    pub username: String,

    /// Defaults to empty.
    pub password: String,

    /// Where to verify and record SSH host keys. [None] if the user has no home directory.
    pub known_hosts: Option<PathBuf>,
}

impl Settings {
    /// Reads settings from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads settings through `lookup`, which maps a variable name to its value, if set.
    ///
    /// # Errors
    ///
    /// Returns an error if the port is set but is not a valid port number.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let port = match lookup(PORT_VAR) {
            Some(port) => port
                .trim()
                .parse()
                .with_context(|| format!("{PORT_VAR} is not a valid port number: {port:?}"))?,
            None => 22,
        };

        Ok(Settings {
            host: lookup(HOST_VAR).unwrap_or_else(|| "localhost".to_string()),
            port,
            username: lookup(USERNAME_VAR).unwrap_or_default(),
            password: lookup(PASSWORD_VAR).unwrap_or_default(),
            known_hosts: home::home_dir().map(|home| home.join(".ssh").join("known_hosts")),
        })
    }
}

// Keep the password out of logs and panic messages.
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("known_hosts", &self.known_hosts)
            .finish()
    }
}

/// Validates the command-line arguments (excluding the program name) and returns the path to the
/// configuration file.
///
/// # Errors
///
/// Returns an error unless there is exactly one argument and it names an existing file.
pub fn config_path(args: &[String]) -> anyhow::Result<PathBuf> {
    let [path] = args else {
        bail!("expected 1 argument but received {}", args.len());
    };
    let path = PathBuf::from(path);
    if !path.is_file() {
        bail!("configuration file does not exist: {}", path.display());
    }
    Ok(path)
}
