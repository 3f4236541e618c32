use anyhow::Result;
use clap::{Parser, Subcommand};
use cst_runner::commands::test::TestArgs;
use cst_runner::commands::{cache, provision, test, OutputFormat};
use cst_runner::config::RunnerConfig;
use cst_runner::logging;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "cst-runner")]
#[command(about = "Run container-structure-test against a container image", long_about = None)]
#[command(version)]
struct Cli {
    /// Runner configuration file (TOML). Defaults to $CST_RUNNER_CONFIG.
    #[arg(long, global = true)]
    config_file: Option<PathBuf>,

    /// Tool cache directory, overriding config and environment
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Enable debug logging (CST_RUNNER_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run structure tests against an image
    Test {
        /// Image to test
        #[arg(long, env = "CST_IMAGE")]
        image: String,

        /// Test specification file passed to the tool
        #[arg(long = "config", env = "CST_CONFIG")]
        test_file: PathBuf,

        /// Kill the tool after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// OS type to fetch the tool for (defaults to the host OS)
        #[arg(long)]
        os: Option<String>,

        /// Summary format on stdout
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },

    /// Download the tool into the cache (if needed) and print its path
    Provision {
        /// OS type to fetch the tool for (defaults to the host OS)
        #[arg(long)]
        os: Option<String>,
    },

    /// Inspect or clear the tool cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// List cached tools
    List,
    /// Remove cached tools
    Clear {
        /// Only remove this version
        #[arg(long)]
        version: Option<String>,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut config = RunnerConfig::load(cli.config_file.as_deref())?;
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = Some(dir);
    }

    match cli.command {
        Commands::Test {
            image,
            test_file,
            timeout,
            os,
            output,
        } => {
            let summary = test::execute(
                &config,
                TestArgs {
                    image,
                    test_file,
                    os,
                    timeout_secs: timeout,
                    output,
                },
            )?;
            // Distinguish "tests ran and some failed" from "could not run".
            if summary.passed() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(2))
            }
        }
        Commands::Provision { os } => {
            provision::execute(&config, os)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Cache { command } => {
            match command {
                CacheCommands::List => cache::list(&config)?,
                CacheCommands::Clear { version } => cache::clear(&config, version)?,
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
