use chrono::{DateTime, Local};
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Fixed snapshot vocabulary. Suffixes end up in file names.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotOffset {
    Detected,
    After5s,
    After10s,
}

impl SnapshotOffset {
    #[inline]
    pub fn suffix(&self) -> &'static str {
        match self {
            SnapshotOffset::Detected => "detected",
            SnapshotOffset::After5s => "after_5s",
            SnapshotOffset::After10s => "after_10s",
        }
    }

    /// Seconds after the trigger frame.
    #[inline]
    pub fn seconds(&self) -> u64 {
        match self {
            SnapshotOffset::Detected => 0,
            SnapshotOffset::After5s => 5,
            SnapshotOffset::After10s => 10,
        }
    }
}

impl fmt::Display for SnapshotOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub offset: SnapshotOffset,
    pub frame_index: u64,
    pub path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Recording,
    /// A storage failure hit this incident; some artifacts may be missing.
    Degraded,
    Closed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Incident {
    pub id: u64,
    pub started_at: DateTime<Local>,
    /// `%Y%m%d_%H%M%S` of `started_at`, possibly suffixed to stay unique.
    pub stamp: String,
    pub date: String,
    pub time: String,
    pub trigger_frame: u64,
    pub last_frame: u64,
    /// Rate the clip was recorded at. MJPEG clips carry no rate of their
    /// own, so players need it from here.
    pub fps: f64,
    /// `None` when the clip could not be created.
    pub clip_path: Option<PathBuf>,
    pub frames_written: u64,
    pub snapshots: Vec<Snapshot>,
    pub map_path: Option<PathBuf>,
    pub status: IncidentStatus,
    /// Set once the post-roll window (or the stream) ends.
    pub closed: bool,
}

impl Incident {
    pub fn new(
        id: u64,
        started_at: DateTime<Local>,
        stamp: String,
        trigger_frame: u64,
        fps: f64,
    ) -> Self {
        Self {
            id,
            date: started_at.format("%Y-%m-%d").to_string(),
            time: started_at.format("%H:%M:%S").to_string(),
            started_at,
            stamp,
            trigger_frame,
            last_frame: trigger_frame,
            fps,
            clip_path: None,
            frames_written: 0,
            snapshots: Vec::new(),
            map_path: None,
            status: IncidentStatus::Recording,
            closed: false,
        }
    }

    #[inline]
    pub fn is_degraded(&self) -> bool {
        self.status == IncidentStatus::Degraded
    }

    pub fn degrade(&mut self) {
        self.status = IncidentStatus::Degraded;
    }

    pub fn close(&mut self) {
        self.closed = true;
        if self.status == IncidentStatus::Recording {
            self.status = IncidentStatus::Closed;
        }
    }

    pub fn snapshot(&self, offset: SnapshotOffset) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.offset == offset)
    }
}
