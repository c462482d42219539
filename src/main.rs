use gps_beacon_tracker::domain::settings::SettingsService;
use gps_beacon_tracker::infrastructure::logging::init_logger;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = SettingsService::new()?;
    let _logging = init_logger(&settings.get().log_settings)?;
    info!("Starting GPS Beacon Tracker");

    run(settings).await
}

#[cfg(windows)]
async fn run(settings: SettingsService) -> anyhow::Result<()> {
    use gps_beacon_tracker::infrastructure::bluetooth::winrt::WinRtTransport;
    use std::sync::Arc;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    gps_beacon_tracker::app::run(
        Arc::new(WinRtTransport::new()),
        settings,
        std::io::stdout().lock(),
        shutdown,
    )
    .await
}

#[cfg(not(windows))]
async fn run(_settings: SettingsService) -> anyhow::Result<()> {
    anyhow::bail!("No Bluetooth LE transport is available on this platform")
}
