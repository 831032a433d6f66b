use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::info;

use crate::counter::CounterStore;

use super::data::{
    DeviceData, GraphicsCapabilities, GraphicsInfo, Session, SessionRecord, UserData,
};

const PLAYTESTS_DIR: &str = "playtests";
const DATA_FILE_NAME: &str = "data.txt";

/// Starts and finalizes playtest sessions: allocates ids, snapshots device
/// and user facts, and writes the metadata record on stop.
#[derive(Clone)]
pub struct SessionTracker {
    counter: CounterStore,
    data_root: PathBuf,
    graphics: Option<GraphicsInfo>,
    capabilities: Option<GraphicsCapabilities>,
}

impl SessionTracker {
    pub fn new(counter: CounterStore, data_root: PathBuf) -> Self {
        Self {
            counter,
            data_root,
            graphics: None,
            capabilities: None,
        }
    }

    /// Renderer facts supplied by a host that knows its graphics device.
    pub fn with_graphics(mut self, graphics: GraphicsInfo) -> Self {
        self.graphics = Some(graphics);
        self
    }

    pub fn with_capabilities(mut self, capabilities: GraphicsCapabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Allocates a fresh id, snapshots device/user facts and creates the
    /// session data directory. A directory that cannot be created aborts
    /// session creation.
    pub async fn start_session(&self) -> Result<Session> {
        let id = self
            .counter
            .next_session_id()
            .await
            .context("failed to allocate session id")?;
        let start_time = Utc::now();

        let mut device = DeviceData::collect();
        if let Some(graphics) = &self.graphics {
            device.apply_graphics(graphics);
        }
        if let Some(capabilities) = self.capabilities {
            device.apply_capabilities(capabilities);
        }

        let data_path = self.data_root.join(PLAYTESTS_DIR).join(id.to_string());
        fs::create_dir_all(&data_path).with_context(|| {
            format!("failed to create session directory {}", data_path.display())
        })?;

        info!("Started playtest session {id}");

        Ok(Session {
            id,
            start_time,
            end_time: None,
            duration: None,
            device,
            user: UserData::collect(),
            data_path,
        })
    }

    /// Finalizes the session and writes its metadata record, returning the
    /// file path. Stopping a session twice is a caller error.
    pub fn stop_session(&self, session: &mut Session) -> Result<PathBuf> {
        if session.is_finalized() {
            bail!("session {} has already been stopped", session.id);
        }

        let end_time = Utc::now();
        session.end_time = Some(end_time);
        session.duration = Some(end_time - session.start_time);

        let record = SessionRecord::from_session(session)?;
        let file_path = session.data_path.join(DATA_FILE_NAME);
        let json = serde_json::to_string_pretty(&record)
            .context("failed to serialize session metadata")?;
        fs::write(&file_path, json).with_context(|| {
            format!("failed to write session metadata to {}", file_path.display())
        })?;

        info!(
            "Finalized playtest session {} after {}",
            session.id, record.duration
        );

        Ok(file_path)
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::data::parse_hms;

    fn tracker(root: &Path) -> SessionTracker {
        let counter = CounterStore::open(root.join("playtests.sqlite3")).unwrap();
        SessionTracker::new(counter, root.to_path_buf())
    }

    #[tokio::test]
    async fn sessions_get_increasing_ids_and_fresh_directories() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path());

        let first = tracker.start_session().await.unwrap();
        let second = tracker.start_session().await.unwrap();

        assert!(second.id > first.id);
        assert_ne!(first.data_path, second.data_path);
        assert!(first.data_path.is_dir());
        assert!(second.data_path.is_dir());
    }

    #[tokio::test]
    async fn stop_writes_a_parseable_metadata_record() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path());

        let mut session = tracker.start_session().await.unwrap();
        let file_path = tracker.stop_session(&mut session).unwrap();

        assert_eq!(file_path.file_name().unwrap(), DATA_FILE_NAME);
        let record: SessionRecord =
            serde_json::from_str(&fs::read_to_string(&file_path).unwrap()).unwrap();
        assert_eq!(record.id, session.id);
        assert_eq!(record.format_version, crate::session::METADATA_FORMAT_VERSION);
        assert!(!record.user.name.is_empty());

        let duration = parse_hms(&record.duration).unwrap();
        assert!(duration >= chrono::Duration::zero());
        let start: chrono::DateTime<Utc> = record.start_time.parse().unwrap();
        let end: chrono::DateTime<Utc> = record.end_time.parse().unwrap();
        assert!(end >= start);
    }

    #[tokio::test]
    async fn stopping_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path());

        let mut session = tracker.start_session().await.unwrap();
        tracker.stop_session(&mut session).unwrap();
        assert!(tracker.stop_session(&mut session).is_err());
    }
}
