use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use redgreen::cli::Cli;
use redgreen::config::Config;
use redgreen::sequence::{print_summary, Session};
use redgreen::{provider, watch};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if which::which("git").is_err() {
        bail!("git command not found. Please install git first.");
    }

    let dir = cli.dir.clone();
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }

    let mut config = Config::load(&dir)?;
    cli.apply(&mut config);

    let test_path = config.test_path(&dir);
    if !test_path.exists() {
        bail!("Test file {} not found", test_path.display());
    }

    let provider = provider::from_config(&config.provider)
        .context("Failed to set up completion provider")?;
    let provider_name = provider.name();

    let debounce = Duration::from_millis(config.watch.debounce_ms);
    let session = Arc::new(Session::new(&dir, config, provider));
    debug!(config = %session.config().to_toml_string()?, "effective configuration");

    println!("{}", "Starting redgreen".bold().green());
    println!("{}", "─".repeat(40));
    println!("  {} {}", "Directory:".dimmed(), session.dir().display());
    println!("  {} {}", "Provider:".dimmed(), provider_name.cyan());
    println!("  {} {}", "Tests:".dimmed(), session.config().commands.test.cyan());
    println!();

    session.prepare().await?;

    if let Some(state) = session.run_if_idle().await? {
        print_summary(&state);
    }

    if cli.once {
        return Ok(());
    }

    let changes = watch::watch_file(&test_path, debounce)?;
    println!(
        "\n{} {}",
        "Watching".bold(),
        test_path.display().to_string().cyan()
    );

    tokio::select! {
        result = watch::drive(session, changes) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\n{}", "Received interrupt, stopping".yellow());
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "redgreen=debug" } else { "redgreen=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
