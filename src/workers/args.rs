//! Command-line argument parsing.

use clap::Parser;
use std::path::PathBuf;

/// Codedrop - ephemeral file sharing over short codes.
#[derive(Parser, Clone, Debug)]
#[command(author, version, about)]
#[command(propagate_version = true)]
pub struct Args {
    /// Files to share through the loopback demo.
    #[clap(required = true)]
    pub files: Vec<PathBuf>,

    /// Directory where received files are written.
    #[clap(short, long, default_value = "received")]
    pub out_dir: PathBuf,

    /// Share under a fixed code instead of a generated one.
    #[clap(long)]
    pub code: Option<String>,

    /// Fetch once on demand instead of polling for the session.
    #[clap(long)]
    pub manual: bool,

    /// Verbosity level (-v, -vv, -vvv).
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn load() -> Self {
        Args::parse()
    }
}
