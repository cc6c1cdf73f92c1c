//! fleetsync-updater - long-lived update engine for one machine.
//!
//! Polls the deploy server for new release trees, stages them, and mirrors
//! them live under a service-stop fence. Runs in the foreground; put it
//! under whatever supervisor the host OS provides.

use clap::Parser;
use fleetsync::apply::{NoopHooks, SyncHooks};
use fleetsync::cli::UpdaterArgs;
use fleetsync::config::Config;
use fleetsync::engine::Updater;
use fleetsync::monitor::{ServiceMonitorHooks, SystemdController};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = UpdaterArgs::parse();

    // Config before logging: the log sink location comes from the config
    let config = Config::load(&args.config)?;
    init_tracing(config.log_file.as_deref())?;
    info!("Updater started");

    let hooks: Box<dyn SyncHooks> = if args.no_service_fence {
        Box::new(NoopHooks)
    } else {
        Box::new(ServiceMonitorHooks::new(
            config.sync_dirs().into_iter().cloned().collect(),
            config.service_stop_wait(),
            Box::new(SystemdController),
        ))
    };

    let updater = Updater::new(config, hooks)?;
    if args.once {
        updater.tick().await;
    } else {
        updater.run().await;
    }

    Ok(())
}

fn init_tracing(log_file: Option<&Path>) -> std::io::Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    Ok(())
}
