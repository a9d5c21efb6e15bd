use pickup::config::{self, Settings};
use pickup::converge::report::Reporter;
use pickup::core::Document;
use pickup::transport::ssh::SshTransport;
use pickup::transport::Transport;
use std::env;
use std::io;
use tracing::warn;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Diagnostics go to stderr so they never interleave with the progress report on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let path = config::config_path(&args)?;
    let resources = Document::from_file(&path)?.build()?;
    let settings = Settings::from_env()?;

    println!(
        "Connecting to remote host {} over port {} as user {}.",
        settings.host, settings.port, settings.username,
    );
    let mut transport = SshTransport::connect(&settings)?;
    println!("Successfully connected to remote host.");

    let result = pickup::converge_all(&resources, &mut transport, &mut Reporter);
    if let Err(error) = transport.disconnect() {
        warn!("failed to disconnect cleanly: {error:#}");
    }
    result?;

    println!("\nSuccess: all resources have converged to the desired state.");
    Ok(())
}
