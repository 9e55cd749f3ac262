mod application;
mod cli;
mod domain;
mod infrastructure;

use clap::Parser;
use cli::Cli;
use domain::settings::SettingsService;
use infrastructure::logging::init_logger;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings_service = SettingsService::new(cli.settings)?;
    if !settings_service.path().exists() {
        if let Err(e) = settings_service.save() {
            eprintln!(
                "Could not write default settings to {}: {}",
                settings_service.path().display(),
                e
            );
        }
    }
    if let Some(api_url) = cli.api_url {
        settings_service.get_mut().recognition.api_url = api_url;
    }
    let settings = settings_service.get();

    // Keep the guard alive until the end of main so buffered logs are flushed.
    let _log_guard = init_logger(&settings.log_settings)?;
    info!("Starting Capstone companion");
    info!("Settings file: {}", settings_service.path().display());

    let result = cli::dispatch(cli.command, settings).await;
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
