pub mod cache;
pub mod provision;

use clap::ValueEnum;

/// How `test` reports the summary on stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
