pub mod archive;
pub mod capture;
pub mod config;
pub mod counter;
pub mod pipeline;
pub mod session;
pub mod upload;

pub use capture::CaptureController;
pub use config::{AppConfig, BuildInfo, RuntimeMode};
pub use counter::CounterStore;
pub use pipeline::{PipelineEvent, PipelinePhase, PlaytestController, QuitDecision};
pub use session::{
    DeviceData, GraphicsCapabilities, GraphicsInfo, Session, SessionTracker, UserData,
};
pub use upload::UploadClient;
