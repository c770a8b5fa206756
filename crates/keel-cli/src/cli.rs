use clap::{Parser, Subcommand};

/// CLI surface definition for operating an encrypted store.
#[derive(Parser, Debug)]
#[command(
    name = "keel",
    about = "Encrypted preference and blob storage",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Namespace to operate on; overrides the config file.
    #[arg(long, global = true)]
    pub namespace: Option<String>,

    /// Optional subcommand; defaults to `info` when absent.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print store facts (algorithm, key protection, name encryption) as JSON.
    Info,
    /// Print version and exit.
    Version,
    /// Round-trip a probe value and blob through the store.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
