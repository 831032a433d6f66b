use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use sysinfo::System;

pub const METADATA_FORMAT_VERSION: u32 = 1;

/// Hardware and OS facts snapshotted when a session starts.
///
/// The sysinfo-derived fields are filled by [`DeviceData::collect`]. The gpu
/// and capability fields cannot be queried from a headless process; they keep
/// their unknown defaults unless the host supplies them through
/// [`DeviceData::apply_graphics`] / [`DeviceData::apply_capabilities`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceData {
    pub name: String,
    pub model: String,
    pub operating_system: String,
    /// Total system memory in megabytes.
    pub system_memory_size: u64,

    pub gpu_id: i32,
    pub gpu_name: String,
    pub gpu_type: String,
    pub gpu_vendor: String,
    pub gpu_version: String,
    pub gpu_memory_size: u64,
    pub gpu_multi_threaded: bool,
    pub gpu_shader_level: i32,

    pub processor_count: usize,
    /// Base frequency of the first core in MHz, zero when unavailable.
    pub processor_frequency: u64,
    pub processor_type: String,

    pub supports_image_effects: bool,
    pub supports_instancing: bool,
    pub supports_motion_vectors: bool,
    pub supports_raw_shadow_depth_sampling: bool,
    pub supports_shadows: bool,
}

/// Renderer facts only the host engine knows.
#[derive(Debug, Clone, Default)]
pub struct GraphicsInfo {
    pub id: i32,
    pub name: String,
    pub device_type: String,
    pub vendor: String,
    pub version: String,
    pub memory_size: u64,
    pub multi_threaded: bool,
    pub shader_level: i32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GraphicsCapabilities {
    pub image_effects: bool,
    pub instancing: bool,
    pub motion_vectors: bool,
    pub raw_shadow_depth_sampling: bool,
    pub shadows: bool,
}

impl DeviceData {
    pub fn collect() -> Self {
        let sys = System::new_all();
        let processor = sys.cpus().first();

        Self {
            name: System::host_name().unwrap_or_else(|| "unknown".into()),
            model: System::cpu_arch().unwrap_or_else(|| "unknown".into()),
            operating_system: System::long_os_version().unwrap_or_else(|| "unknown".into()),
            system_memory_size: sys.total_memory() / (1024 * 1024),
            processor_count: sys.cpus().len(),
            processor_frequency: processor.map(|cpu| cpu.frequency()).unwrap_or(0),
            processor_type: processor
                .map(|cpu| cpu.brand().to_string())
                .unwrap_or_else(|| "unknown".into()),
            ..Self::default()
        }
    }

    pub fn apply_graphics(&mut self, gpu: &GraphicsInfo) {
        self.gpu_id = gpu.id;
        self.gpu_name = gpu.name.clone();
        self.gpu_type = gpu.device_type.clone();
        self.gpu_vendor = gpu.vendor.clone();
        self.gpu_version = gpu.version.clone();
        self.gpu_memory_size = gpu.memory_size;
        self.gpu_multi_threaded = gpu.multi_threaded;
        self.gpu_shader_level = gpu.shader_level;
    }

    pub fn apply_capabilities(&mut self, caps: GraphicsCapabilities) {
        self.supports_image_effects = caps.image_effects;
        self.supports_instancing = caps.instancing;
        self.supports_motion_vectors = caps.motion_vectors;
        self.supports_raw_shadow_depth_sampling = caps.raw_shadow_depth_sampling;
        self.supports_shadows = caps.shadows;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct UserData {
    pub name: String,
}

impl UserData {
    pub fn collect() -> Self {
        let name = env::var("USER")
            .or_else(|_| env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".into());
        Self { name }
    }
}

/// One playtest session, owned by the orchestrator from id allocation until
/// the archive upload completes.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub device: DeviceData,
    pub user: UserData,
    /// Per-session directory; created at start, never reused.
    pub data_path: PathBuf,
}

impl Session {
    pub fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }
}

/// The serialized form of a finalized session. Every time field is stored as
/// round-trippable text: RFC 3339 for the timestamps, `HH:MM:SS[.mmm]` for
/// the duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub format_version: u32,
    pub id: i64,
    pub start_time: String,
    pub end_time: String,
    pub duration: String,
    pub device: DeviceData,
    pub user: UserData,
}

impl SessionRecord {
    pub fn from_session(session: &Session) -> Result<Self> {
        let (end_time, duration) = match (session.end_time, session.duration) {
            (Some(end_time), Some(duration)) => (end_time, duration),
            _ => bail!("session {} has not been finalized", session.id),
        };

        Ok(Self {
            format_version: METADATA_FORMAT_VERSION,
            id: session.id,
            start_time: session.start_time.to_rfc3339(),
            end_time: end_time.to_rfc3339(),
            duration: format_hms(duration),
            device: session.device.clone(),
            user: session.user.clone(),
        })
    }
}

/// Renders a duration as `HH:MM:SS`, appending `.mmm` only when the duration
/// has a sub-second component. Negative durations clamp to zero.
pub fn format_hms(duration: Duration) -> String {
    let total_ms = duration.num_milliseconds().max(0);
    let millis = total_ms % 1_000;
    let total_secs = total_ms / 1_000;
    let hours = total_secs / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;

    if millis == 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
    }
}

/// Parses the text produced by [`format_hms`] back into the same duration.
pub fn parse_hms(text: &str) -> Result<Duration> {
    let (clock, fraction) = match text.split_once('.') {
        Some((clock, fraction)) => (clock, Some(fraction)),
        None => (text, None),
    };

    let mut parts = clock.split(':');
    let (hours, minutes, seconds) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(m), Some(s), None) => (h, m, s),
        _ => bail!("invalid duration '{text}': expected HH:MM:SS"),
    };

    let hours: i64 = hours
        .parse()
        .with_context(|| format!("invalid hours in duration '{text}'"))?;
    let minutes: i64 = minutes
        .parse()
        .with_context(|| format!("invalid minutes in duration '{text}'"))?;
    let seconds: i64 = seconds
        .parse()
        .with_context(|| format!("invalid seconds in duration '{text}'"))?;
    if minutes >= 60 || seconds >= 60 {
        bail!("invalid duration '{text}': minutes and seconds must be below 60");
    }

    let millis: i64 = match fraction {
        Some(fraction) if !fraction.is_empty() && fraction.len() <= 3 => {
            let scale = 10_i64.pow(3 - fraction.len() as u32);
            fraction
                .parse::<i64>()
                .with_context(|| format!("invalid fraction in duration '{text}'"))?
                * scale
        }
        Some(_) => bail!("invalid duration '{text}': fraction must be 1-3 digits"),
        None => 0,
    };

    Ok(Duration::milliseconds(
        ((hours * 60 + minutes) * 60 + seconds) * 1_000 + millis,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn five_and_a_half_minutes_formats_as_expected() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 10, 5, 30).unwrap();
        assert_eq!(format_hms(end - start), "00:05:30");
    }

    #[test]
    fn duration_text_round_trips() {
        for duration in [
            Duration::seconds(0),
            Duration::seconds(330),
            Duration::milliseconds(330_123),
            Duration::seconds(26 * 3_600 + 61),
        ] {
            let text = format_hms(duration);
            assert_eq!(parse_hms(&text).unwrap(), duration, "via '{text}'");
        }
    }

    #[test]
    fn negative_durations_clamp_to_zero() {
        assert_eq!(format_hms(Duration::seconds(-5)), "00:00:00");
    }

    #[test]
    fn malformed_duration_text_is_rejected() {
        assert!(parse_hms("330").is_err());
        assert!(parse_hms("00:61:00").is_err());
        assert!(parse_hms("00:05:30.12345").is_err());
        assert!(parse_hms("aa:bb:cc").is_err());
    }

    #[test]
    fn record_requires_a_finalized_session() {
        let session = Session {
            id: 5,
            start_time: Utc::now(),
            end_time: None,
            duration: None,
            device: DeviceData::default(),
            user: UserData::default(),
            data_path: PathBuf::from("playtests/5"),
        };
        assert!(SessionRecord::from_session(&session).is_err());
    }

    #[test]
    fn record_serializes_with_camel_case_keys() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 10, 5, 30).unwrap();
        let session = Session {
            id: 5,
            start_time: start,
            end_time: Some(end),
            duration: Some(end - start),
            device: DeviceData::collect(),
            user: UserData::collect(),
            data_path: PathBuf::from("playtests/5"),
        };

        let record = SessionRecord::from_session(&session).unwrap();
        let json = serde_json::to_string_pretty(&record).unwrap();
        for key in [
            "\"formatVersion\"",
            "\"startTime\"",
            "\"endTime\"",
            "\"duration\"",
            "\"operatingSystem\"",
            "\"systemMemorySize\"",
            "\"processorCount\"",
            "\"supportsShadows\"",
        ] {
            assert!(json.contains(key), "missing {key} in {json}");
        }

        let parsed: SessionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, 5);
        assert_eq!(parsed.duration, "00:05:30");
        let restored: DateTime<Utc> = parsed.start_time.parse().unwrap();
        assert_eq!(restored, start);
    }
}
