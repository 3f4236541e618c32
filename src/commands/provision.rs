//! `cst-runner provision`: fetch the tool into the cache and print its path

use anyhow::{Context, Result};
use colored::Colorize;

use crate::cancel::CancellationToken;
use crate::config::RunnerConfig;
use crate::provision::current_os_type;

pub fn execute(config: &RunnerConfig, os: Option<String>) -> Result<()> {
    let os = os.unwrap_or_else(|| current_os_type().to_string());
    let provisioner = config.build_provisioner()?;

    let handle = provisioner
        .provision(&os, &CancellationToken::new())
        .with_context(|| format!("Failed to provision {} for {os}", provisioner.tool_name()))?;

    eprintln!(
        "{} {} {} ready",
        "✓".green().bold(),
        handle.name,
        handle.version.dimmed()
    );
    println!("{}", handle.path.display());
    Ok(())
}
