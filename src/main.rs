use std::{process::ExitCode, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};

use camlinkd::{
    application::Application, cli::Cli, config::ConfigManager, coordinator::RunOutcome, logging,
};

/// Pause before a supervised run starts again after a fatal error.
const SUPERVISE_DELAY: Duration = Duration::from_secs(3);

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.syslog, &cli.log_level) {
        eprintln!("camlinkd: logging setup failed: {e:#}");
        return ExitCode::FAILURE;
    }

    if cli.daemonize {
        if let Err(e) = logging::into_daemon() {
            error!("Failed to daemonize: {e:#}");
            return ExitCode::FAILURE;
        }
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(async {
        #[cfg(feature = "tokio-console")]
        console_subscriber::init();

        run(&cli).await
    });

    let code = match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    };
    log::logger().flush();
    code
}

/// Runs until a shutdown signal. Settings changes start a fresh run; fatal
/// errors end the process unless `--supervise` is set.
async fn run(cli: &Cli) -> Result<()> {
    info!("Starting camlinkd v{}", env!("CARGO_PKG_VERSION"));

    loop {
        let config_manager = ConfigManager::load(cli.settings.clone())
            .await
            .context("Failed to load settings")?;

        let outcome = Application::builder()
            .with_config_manager(config_manager)
            .build()
            .await?
            .run()
            .await;

        match outcome {
            Ok(RunOutcome::Shutdown) => {
                info!("camlinkd stopped");
                return Ok(());
            }
            Ok(RunOutcome::Restart) => {
                info!("Reloading settings");
            }
            Err(e) if cli.supervise => {
                error!("{e:#}");
                warn!("Restarting in {} s", SUPERVISE_DELAY.as_secs());
                tokio::select! {
                    _ = tokio::time::sleep(SUPERVISE_DELAY) => {}
                    _ = tokio::signal::ctrl_c() => return Ok(()),
                }
            }
            Err(e) => return Err(e),
        }
    }
}
