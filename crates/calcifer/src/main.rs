mod cli;
mod error;

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use calcifer_bus::MemoryBus;
use calcifer_core::Kernel;

use crate::cli::{Cli, Command};
use crate::error::DaemonError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        // Tracing may not be installed yet if config loading failed.
        eprintln!("calcifer: {err}");
        std::process::exit(err.exit_code());
    }
}

/// Filter precedence: `RUST_LOG` > `-v` flags > config `log.filter`.
fn init_tracing(verbosity: u8, config_filter: &str) {
    let filter = match verbosity {
        0 => config_filter,
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), DaemonError> {
    let config = calcifer_config::load_config(cli.config.as_deref())?;
    init_tracing(cli.verbose, &config.log.filter);

    match cli.command {
        Command::CheckConfig => {
            info!(
                debounce_ms = config.reconcile.debounce_ms,
                sweep_secs = config.override_section.expiration_interval_secs,
                "configuration is valid"
            );
            Ok(())
        }

        Command::Run => serve(&config).await,
    }
}

/// Build the kernel, run until ctrl-c, shut down cleanly.
///
/// The daemon wires the in-process bus until a broker adapter is
/// attached; published commands are mirrored into the log so a dev
/// deployment is observable end to end.
async fn serve(config: &calcifer_config::Config) -> Result<(), DaemonError> {
    let bus = Arc::new(MemoryBus::new());
    let kernel = Kernel::builder(config.to_kernel_config())
        .publisher(Arc::clone(&bus) as Arc<dyn calcifer_bus::publisher::CommandPublisher>)
        .build();

    kernel.start().await?;

    // Mirror outbound commands into the log.
    let mut commands = bus.subscribe();
    let mirror = tokio::spawn(async move {
        while let Ok(command) = commands.recv().await {
            info!(topic = %command.topic, payload = %command.payload, "command out");
        }
    });

    info!("calcifer running, press ctrl-c to stop");
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "signal listener failed, shutting down");
    }

    kernel.shutdown().await;
    mirror.abort();
    Ok(())
}
