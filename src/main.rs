use std::path::PathBuf;

use anyhow::Result;
use log::info;
use tokio::signal;

use playcap::{
    AppConfig, BuildInfo, CounterStore, PipelineEvent, PlaytestController, QuitDecision,
    RuntimeMode,
};

const DEFAULT_CONFIG_PATH: &str = "playcap.json";
const COUNTER_FILE_NAME: &str = "playtests.sqlite3";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = AppConfig::load(&config_path)?;
    let build = BuildInfo::load(&config.build_info_path)?;

    std::fs::create_dir_all(&config.data_root)?;
    let counter = CounterStore::open(config.data_root.join(COUNTER_FILE_NAME))?;

    let mode = config.mode;
    let controller = PlaytestController::new(config, build, counter);

    match mode {
        RuntimeMode::Playtest => controller.begin_session().await?,
        RuntimeMode::Development => {
            info!("Development mode: playtest capture and upload are disabled")
        }
    }

    // Textual stand-in for an uploading overlay.
    let mut events = controller.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                PipelineEvent::UploadStarted => info!("Uploading playtest data..."),
                PipelineEvent::UploadProgress { fraction } => {
                    info!("Upload progress: {:.0}%", fraction * 100.0)
                }
                PipelineEvent::UploadCompleted => info!("Upload finished"),
            }
        }
    });

    let quit = controller.quit_requested();
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                match controller.intercept_quit().await {
                    QuitDecision::Proceed => break,
                    QuitDecision::Cancel => {
                        info!("Exit deferred until the playtest upload completes")
                    }
                }
            }
            _ = quit.cancelled() => break,
        }
    }

    Ok(())
}
