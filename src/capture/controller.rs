use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use log::{info, warn};
use tokio::process::{Child, Command};

const VIDEO_EXTENSION: &str = "flv";

/// Supervises the out-of-process recorder. The recorder starts capturing as
/// soon as it is launched and writes to the path it is given; it is never
/// asked to finalize its output, only killed, so output integrity is its own
/// responsibility.
pub struct CaptureController {
    binary: PathBuf,
    child: Option<Child>,
    output_base: Option<PathBuf>,
}

impl CaptureController {
    pub fn new(binary: PathBuf) -> Self {
        Self {
            binary,
            child: None,
            output_base: None,
        }
    }

    /// True iff the last-started recorder process has not exited.
    pub fn is_recording(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Launches the recorder, writing to `base` (directory portion must
    /// already exist; the media extension is appended by the recorder).
    ///
    /// Launch failure does not propagate: the controller records "not
    /// recording" and keeps `base` as the nominal output base, so downstream
    /// steps still know where footage would have landed. Starting while a
    /// recording is live is a logic error.
    pub fn start_recording(&mut self, base: &Path, include_secondary: bool) -> Result<()> {
        if self.is_recording() {
            bail!("a recording is already in progress");
        }

        let mut command = Command::new(&self.binary);
        if let Some(dir) = self.binary.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            command.current_dir(dir);
        }
        command.arg("--startrecording").arg(base).arg("--runinbackground");
        if include_secondary {
            command.arg("--facecam");
        }

        match command.spawn() {
            Ok(child) => {
                info!("Capture process started, writing to {}", base.display());
                self.child = Some(child);
            }
            Err(err) => {
                warn!(
                    "Failed to launch capture process {}: {err}",
                    self.binary.display()
                );
                self.child = None;
            }
        }
        self.output_base = Some(base.to_path_buf());

        Ok(())
    }

    /// Kills the recorder if it is still running and returns the nominal
    /// output path, whether or not a process ever produced it. `None` only
    /// when no recording was ever started.
    pub fn stop_recording(&mut self) -> Option<PathBuf> {
        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    info!("Capture process had already exited ({status})");
                }
                _ => {
                    if let Err(err) = child.start_kill() {
                        warn!("Failed to kill capture process: {err}");
                    }
                }
            }
        }

        self.output_base.as_ref().map(|base| {
            let mut path = base.as_os_str().to_os_string();
            path.push(".");
            path.push(VIDEO_EXTENSION);
            PathBuf::from(path)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_failure_is_swallowed_and_keeps_the_nominal_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = CaptureController::new(dir.path().join("missing-recorder"));

        let base = dir.path().join("Footage");
        controller.start_recording(&base, false).unwrap();
        assert!(!controller.is_recording());

        let output = controller.stop_recording().unwrap();
        assert_eq!(output, dir.path().join("Footage.flv"));
    }

    #[tokio::test]
    async fn stop_without_start_returns_no_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = CaptureController::new(dir.path().join("missing-recorder"));
        assert!(controller.stop_recording().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn live_recordings_reject_a_second_start_and_die_on_stop() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let recorder = dir.path().join("fake-recorder.sh");
        std::fs::write(&recorder, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&recorder, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut controller = CaptureController::new(recorder);
        let base = dir.path().join("Footage");
        controller.start_recording(&base, false).unwrap();
        assert!(controller.is_recording());
        assert!(controller.start_recording(&base, false).is_err());

        let output = controller.stop_recording().unwrap();
        assert_eq!(output, dir.path().join("Footage.flv"));
        assert!(!controller.is_recording());
    }
}
