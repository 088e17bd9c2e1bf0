use color_eyre::{eyre::eyre, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use xr_broadcaster::config::Config;
use xr_broadcaster::sink::mqtt::MqttHandle;
use xr_broadcaster::sink::panel::PanelHandle;
use xr_broadcaster::sink::WatchSink;
use xr_broadcaster::xr::openxr_runtime::OpenXrRuntime;
use xr_broadcaster::xr::{DriverStats, XrDriver, XrError};

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = Config::path()?;
    let config = Config::ensure_default(&config_path).await?;
    info!("Using configuration from {}", config_path.display());

    let cancel = CancellationToken::new();
    let (watch_sink, receiver) = WatchSink::channel();

    let panel = config
        .panel
        .enabled
        .then(|| PanelHandle::spawn(config.panel.clone(), receiver.clone(), cancel.clone()));
    let mqtt = config
        .mqtt
        .enabled
        .then(|| MqttHandle::spawn(config.mqtt.clone(), receiver.clone(), cancel.clone()));

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, finishing current frame");
                signal_cancel.cancel();
            }
            Err(e) => error!("Cannot listen for Ctrl-C: {}", e),
        }
    });

    // The runtime and every handle derived from it stay on this one thread
    let runtime_settings = config.runtime_settings();
    let driver_settings = config.driver.clone();
    let binding = config.binding_settings();
    let driver_cancel = cancel.clone();
    let driver = tokio::task::spawn_blocking(move || -> Result<DriverStats, XrError> {
        let runtime = OpenXrRuntime::create(&runtime_settings)?;
        let mut driver = XrDriver::assemble(Box::new(runtime), driver_settings, binding);
        driver.add_sink(Box::new(watch_sink));
        driver.start()?.run(&driver_cancel)
    });

    let result = driver
        .await
        .map_err(|e| eyre!("Driver thread failed: {}", e))?;

    cancel.cancel();
    if let Some(panel) = panel {
        panel.join().await;
    }
    if let Some(mqtt) = mqtt {
        let status = mqtt.join().await;
        if let Some(last_error) = status.last_error {
            warn!(
                "MQTT saw {} connection errors, last: {}",
                status.error_count, last_error
            );
        }
    }

    let stats = result?;
    info!(
        "Finished after {} frames, {} of them focused",
        stats.frames, stats.focused_frames
    );
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
