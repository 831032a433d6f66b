pub mod data;
pub mod tracker;

pub use data::{
    format_hms, parse_hms, DeviceData, GraphicsCapabilities, GraphicsInfo, Session,
    SessionRecord, UserData, METADATA_FORMAT_VERSION,
};
pub use tracker::SessionTracker;
