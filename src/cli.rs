use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments for the update engine daemon
#[derive(Parser, Debug)]
#[clap(name = "fleetsync-updater")]
#[clap(about = "Keeps this machine's release trees in sync with the deploy server", long_about = None)]
pub struct UpdaterArgs {
    /// Path to the JSON config file
    #[clap(short, long, value_name = "FILE")]
    pub config: PathBuf,

    /// Perform a single download+apply pass and exit
    #[clap(long)]
    pub once: bool,

    /// Skip service stop/start fencing around apply (for development)
    #[clap(long)]
    pub no_service_fence: bool,
}

/// CLI arguments for the publisher-side preparation tool
#[derive(Parser, Debug)]
#[clap(name = "fleetsync-publish")]
#[clap(about = "Prepares a release tree for HTTP publication", long_about = None)]
pub struct PublishArgs {
    #[clap(subcommand)]
    pub command: PublishCommand,
}

#[derive(Subcommand, Debug)]
pub enum PublishCommand {
    /// Scan a release tree, digest every file, and write both manifest
    /// sidecars into it
    BuildManifest {
        /// Root of the release tree
        dir: PathBuf,
    },
    /// Rewrite manifest.hash from the existing manifest.content
    UpdateHash {
        /// Root of the release tree
        dir: PathBuf,
    },
}
