//! Tool cache maintenance
//! Usage: cst-runner cache [list|clear]

use anyhow::{Context, Result};
use colored::Colorize;

use crate::config::RunnerConfig;
use crate::provision::TOOL_NAME;

/// List cached tools
pub fn list(config: &RunnerConfig) -> Result<()> {
    let cache = config.cache();
    let tools = cache
        .list()
        .with_context(|| format!("Failed to read tool cache at {}", cache.root().display()))?;

    println!("Tool cache: {}", cache.root().display());
    println!("─────────────────────────────────────────────────────────");
    if tools.is_empty() {
        println!("(empty)");
        return Ok(());
    }

    for tool in tools {
        println!(
            "  {} {}  {}  {}",
            tool.name.bold(),
            tool.version,
            tool.meta.cached_at.format("%Y-%m-%d %H:%M:%S UTC").to_string().dimmed(),
            tool.path.display()
        );
        println!("    sha256 {}", tool.meta.sha256.dimmed());
    }
    Ok(())
}

/// Remove the cached tool, either one version or all of them
pub fn clear(config: &RunnerConfig, version: Option<String>) -> Result<()> {
    let cache = config.cache();
    let versions = match version {
        Some(version) => vec![version],
        None => cache
            .list()?
            .into_iter()
            .filter(|tool| tool.name == TOOL_NAME)
            .map(|tool| tool.version)
            .collect(),
    };

    if versions.is_empty() {
        println!("Nothing to clear");
        return Ok(());
    }

    for version in versions {
        if cache.remove(TOOL_NAME, &version)? {
            println!("{} Removed {TOOL_NAME} {version}", "✓".green().bold());
        } else {
            println!("{TOOL_NAME} {version} is not cached");
        }
    }
    Ok(())
}
