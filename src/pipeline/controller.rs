use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{error, info};
use tokio::sync::{broadcast, watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::archive::build_archive;
use crate::capture::CaptureController;
use crate::config::{AppConfig, BuildInfo};
use crate::counter::CounterStore;
use crate::session::SessionTracker;
use crate::upload::UploadClient;

use super::state::{PipelinePhase, PipelineState};
use super::PipelineEvent;

const FOOTAGE_NAME: &str = "Footage";
const EVENT_CHANNEL_CAPACITY: usize = 64;

fn archive_stem(build: &BuildInfo, device_name: &str, session_id: i64) -> String {
    format!(
        "PlayTest_{}_{}_{}_{}_{}",
        build.application_name, build.build_number, device_name, build.addressee, session_id
    )
}

/// The host's answer to a termination attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitDecision {
    /// Keep running; the pipeline has not delivered the session yet.
    Cancel,
    /// Nothing left to ship, the process may exit.
    Proceed,
}

/// Drives one playtest session from start through capture, metadata
/// finalization, archiving and upload, and intercepts host termination until
/// the upload pipeline reaches its terminal state.
#[derive(Clone)]
pub struct PlaytestController {
    state: Arc<Mutex<PipelineState>>,
    tracker: SessionTracker,
    capture: Arc<Mutex<CaptureController>>,
    uploader: UploadClient,
    build: Arc<BuildInfo>,
    config: Arc<AppConfig>,
    events: broadcast::Sender<PipelineEvent>,
    quit: CancellationToken,
}

impl PlaytestController {
    pub fn new(config: AppConfig, build: BuildInfo, counter: CounterStore) -> Self {
        let tracker = SessionTracker::new(counter, config.data_root.clone());
        let capture = CaptureController::new(config.recorder_binary.clone());
        let uploader = UploadClient::new(config.upload_base_url.clone());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            state: Arc::new(Mutex::new(PipelineState::new())),
            tracker,
            capture: Arc::new(Mutex::new(capture)),
            uploader,
            build: Arc::new(build),
            config: Arc::new(config),
            events,
            quit: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Cancelled once the pipeline reaches `Done`; awaiting it is how the
    /// host learns the real termination may proceed.
    pub fn quit_requested(&self) -> CancellationToken {
        self.quit.clone()
    }

    pub async fn phase(&self) -> PipelinePhase {
        self.state.lock().await.phase
    }

    pub async fn is_recording(&self) -> bool {
        self.capture.lock().await.is_recording()
    }

    /// Creates the session (id, device/user snapshot, data directory) and,
    /// when configured to, starts recording immediately.
    pub async fn begin_session(&self) -> Result<()> {
        {
            let state = self.state.lock().await;
            if state.session.is_some() {
                bail!("a playtest session is already active");
            }
            if state.pipeline_started {
                bail!("this process has already shipped its playtest session");
            }
        }

        let session = self.tracker.start_session().await?;
        let id = session.id;
        {
            let mut state = self.state.lock().await;
            state.session = Some(session);
            state.phase = PipelinePhase::Idle;
        }
        info!("Playtest session {id} active");

        if self.config.start_recording_immediately {
            self.start_recording(self.config.include_secondary_stream)
                .await?;
        }

        Ok(())
    }

    /// Explicit external request to start capturing footage.
    pub async fn start_recording(&self, include_secondary: bool) -> Result<()> {
        let base = {
            let state = self.state.lock().await;
            let session = state
                .session
                .as_ref()
                .context("no active session to record")?;
            session.data_path.join(FOOTAGE_NAME)
        };

        self.capture
            .lock()
            .await
            .start_recording(&base, include_secondary)?;
        self.state.lock().await.phase = PipelinePhase::Recording;

        Ok(())
    }

    /// Explicit stop request. Latched: repeated calls are no-ops.
    pub async fn request_stop(&self) {
        self.trigger_pipeline().await;
    }

    /// Termination-intercept protocol: every attempt before `Done` is
    /// cancelled, and the first one also triggers the latched pipeline. Once
    /// `Done` (or when no session was ever begun) the attempt passes through.
    pub async fn intercept_quit(&self) -> QuitDecision {
        {
            let state = self.state.lock().await;
            if state.is_done() {
                return QuitDecision::Proceed;
            }
            if state.session.is_none() && !state.pipeline_started {
                return QuitDecision::Proceed;
            }
        }

        self.trigger_pipeline().await;
        QuitDecision::Cancel
    }

    async fn trigger_pipeline(&self) {
        let begun = self.state.lock().await.try_begin_pipeline();
        if !begun {
            return;
        }

        let controller = self.clone();
        tokio::spawn(async move {
            controller.run_pipeline().await;
        });
    }

    async fn run_pipeline(self) {
        self.set_phase(PipelinePhase::Stopping).await;

        let footage_path = self.capture.lock().await.stop_recording();

        let mut session = match self.state.lock().await.session.take() {
            Some(session) => session,
            None => {
                error!("Stop requested without an active session");
                return self.finish().await;
            }
        };

        let data_file = match self.tracker.stop_session(&mut session) {
            Ok(path) => path,
            Err(err) => {
                error!("Failed to finalize session metadata: {err:#}");
                self.state.lock().await.session = Some(session);
                return self.finish().await;
            }
        };

        self.set_phase(PipelinePhase::Archiving).await;

        let stem = session
            .data_path
            .join(archive_stem(&self.build, &session.device.name, session.id));
        let archive_result = {
            let mut files: Vec<&Path> = Vec::with_capacity(2);
            if let Some(footage) = footage_path.as_deref() {
                files.push(footage);
            }
            files.push(&data_file);
            build_archive(&stem, &files)
        };
        // The finalized session is retired but stays owned here.
        self.state.lock().await.session = Some(session);

        let archive_path = match archive_result {
            Ok(path) => path,
            Err(err) => {
                error!("Failed to build playtest archive: {err:#}");
                return self.finish().await;
            }
        };

        let _ = self.events.send(PipelineEvent::UploadStarted);
        self.set_phase(PipelinePhase::Uploading).await;

        let (progress_tx, mut progress_rx) = watch::channel(0.0_f32);
        let events = self.events.clone();
        let forwarder = tokio::spawn(async move {
            while progress_rx.changed().await.is_ok() {
                let fraction = *progress_rx.borrow_and_update();
                let _ = events.send(PipelineEvent::UploadProgress { fraction });
            }
        });

        self.uploader.send(&archive_path, progress_tx).await;
        // The progress sender is dropped inside send(), so the forwarder
        // drains and exits before the completion event goes out.
        let _ = forwarder.await;

        let _ = self.events.send(PipelineEvent::UploadCompleted);
        self.finish().await;
    }

    async fn finish(&self) {
        self.set_phase(PipelinePhase::Done).await;
        info!("Playtest pipeline finished; releasing termination block");
        self.quit.cancel();
    }

    async fn set_phase(&self, phase: PipelinePhase) {
        self.state.lock().await.phase = phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_stem_is_deterministic_over_its_five_fields() {
        let mut build = BuildInfo::default();
        build.application_name = "MyApp".into();
        build.build_number = 42;
        build.addressee = "QA".into();

        assert_eq!(
            archive_stem(&build, "DeviceX", 5),
            "PlayTest_MyApp_42_DeviceX_QA_5"
        );
    }
}
