//! fleetsync-publish - publisher-side release preparation.
//!
//! Writes the manifest sidecars a release tree needs before a dumb HTTP
//! server can hand it to the fleet.

use clap::Parser;
use fleetsync::cli::{PublishArgs, PublishCommand};
use fleetsync::manifest::{Manifest, MANIFEST_HASH};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = PublishArgs::parse();
    match args.command {
        PublishCommand::BuildManifest { dir } => {
            let manifest = Manifest::build_from_tree(&dir)?;
            manifest.write(&dir)?;
            println!(
                "Wrote manifest for {}: {} files, {} dirs",
                dir.display(),
                manifest.files.len(),
                manifest.dirs.len()
            );
        }
        PublishCommand::UpdateHash { dir } => {
            let manifest = Manifest::read_from_dir(&dir)?;
            manifest.write_hash(&dir)?;
            println!("Updated {}", dir.join(MANIFEST_HASH).display());
        }
    }

    Ok(())
}
