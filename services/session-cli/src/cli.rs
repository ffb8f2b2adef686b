//! Command-line parsing
//!
//! `session-cli [--config PATH] [--metrics] <command>`
//!
//! `login` takes its token response as JSON on stdin so tokens never appear
//! in the process argument list.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Drive a persisted OAuth bearer session.
#[derive(Debug, Parser)]
#[command(name = "session-cli", version, about)]
pub struct Cli {
    /// TOML configuration file
    #[arg(
        long,
        global = true,
        env = "CONFIG_PATH",
        default_value = "session-cli.toml"
    )]
    pub config: PathBuf,

    /// Print a Prometheus snapshot after the command report
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Store a token response read as JSON from stdin
    Login,
    /// Resume the persisted session
    Restore,
    /// Fetch the user profile, refreshing the access token if needed
    #[command(name = "userinfo")]
    UserInfo,
    /// Show expiry details of the stored tokens
    TokenInfo,
    /// Force a token refresh
    Refresh,
    /// Revoke and clear the stored credential
    Logout,
}
