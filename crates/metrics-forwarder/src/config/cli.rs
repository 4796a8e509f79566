use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::config::daemon::DaemonArgs;
use crate::config::daemon::DryRunArgs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the metrics plugin daemon
    Daemon(Box<DaemonArgs>),
    /// Poll the metrics source once and print the encoded lines
    #[command(name = "dry-run")]
    DryRun(Box<DryRunArgs>),
}
