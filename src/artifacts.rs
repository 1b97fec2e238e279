//! On-disk layout of everything an incident leaves behind.
//!
//! ```text
//! <dir>/clip_<stamp>.<ext>
//! <dir>/frame_<stamp>_{detected,after_5s,after_10s}.jpg
//! <dir>/map_<stamp>.html
//! <dir>/detection_log.txt
//! <dir>/dashboard.json
//! ```

use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::{LocationConfig, OutputConfig};
use crate::error::Error;
use crate::event_log::EventLog;
use crate::incident::{Incident, SnapshotOffset};

pub const JOURNAL_DELIMITER_WIDTH: usize = 40;

/// `%Y%m%d_%H%M%S`, second resolution.
pub fn stamp(at: &DateTime<Local>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

#[derive(Debug, Clone)]
pub struct OutputLayout {
    dir: PathBuf,
    journal_file: String,
    dashboard_file: String,
}

impl OutputLayout {
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            journal_file: config.journal_file.clone(),
            dashboard_file: config.dashboard_file.clone(),
        }
    }

    pub fn in_dir<P: Into<PathBuf>>(dir: P) -> Self {
        Self::new(&OutputConfig {
            dir: dir.into(),
            ..Default::default()
        })
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure(&self) -> Result<(), Error> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::storage(&self.dir, e))
    }

    pub fn clip_path(&self, stamp: &str, extension: &str) -> PathBuf {
        self.dir.join(format!("clip_{}.{}", stamp, extension))
    }

    pub fn snapshot_path(&self, stamp: &str, offset: SnapshotOffset) -> PathBuf {
        self.dir.join(format!("frame_{}_{}.jpg", stamp, offset.suffix()))
    }

    pub fn map_path(&self, stamp: &str) -> PathBuf {
        self.dir.join(format!("map_{}.html", stamp))
    }

    pub fn journal_path(&self) -> PathBuf {
        self.dir.join(&self.journal_file)
    }

    pub fn dashboard_path(&self) -> PathBuf {
        self.dir.join(&self.dashboard_file)
    }

    /// Appends one human-readable record for `incident` to the journal.
    pub fn append_journal(&self, incident: &Incident) -> Result<(), Error> {
        let path = self.journal_path();
        let clip = incident
            .clip_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(unavailable)".to_string());

        let record = format!(
            "Date       : {}\nTime       : {}\nVideo File : {}\n{}\n",
            incident.date,
            incident.time,
            clip,
            "-".repeat(JOURNAL_DELIMITER_WIDTH)
        );

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::storage(&path, e))?;

        file.write_all(record.as_bytes())
            .map_err(|e| Error::storage(&path, e))
    }

    /// Writes the per-incident map page and returns its path.
    pub fn write_map(&self, stamp: &str, location: &LocationConfig) -> Result<PathBuf, Error> {
        let path = self.map_path(stamp);
        fs::write(&path, render_map(location)).map_err(|e| Error::storage(&path, e))?;

        Ok(path)
    }

    /// Wipes the output directory. Only called at an explicit session boundary.
    pub fn reset(&self) -> Result<(), Error> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir).map_err(|e| Error::storage(&self.dir, e))?;
        }

        self.ensure()
    }

    /// New session: empty output directory and empty event log.
    pub fn reset_session(&self, log: &EventLog) -> Result<(), Error> {
        self.reset()?;
        log.reset();
        info!(dir = %self.dir.display(), "session reset");

        Ok(())
    }
}

pub fn google_maps_link(location: &LocationConfig) -> String {
    format!(
        "https://www.google.com/maps?q={},{}",
        location.latitude, location.longitude
    )
}

fn render_map(location: &LocationConfig) -> String {
    let (lat, lon, zoom) = (location.latitude, location.longitude, location.zoom);
    let link = google_maps_link(location);

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css"/>
<script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
<style>html, body, #map {{ height: 100%; margin: 0; }}</style>
</head>
<body>
<div id="map"></div>
<script>
var map = L.map('map').setView([{lat}, {lon}], {zoom});
L.tileLayer('https://{{s}}.tile.openstreetmap.org/{{z}}/{{x}}/{{y}}.png', {{
    attribution: '&copy; OpenStreetMap contributors'
}}).addTo(map);
L.marker([{lat}, {lon}])
    .bindTooltip('Click for Google Maps')
    .bindPopup('<a href="{link}" target="_blank">Open in Google Maps</a>')
    .addTo(map);
</script>
</body>
</html>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn deterministic_names() {
        let layout = OutputLayout::in_dir("out");
        let at = Local.with_ymd_and_hms(2023, 11, 2, 14, 3, 9).unwrap();
        let s = stamp(&at);

        assert_eq!(s, "20231102_140309");
        assert_eq!(
            layout.clip_path(&s, "avi"),
            PathBuf::from("out/clip_20231102_140309.avi")
        );
        assert_eq!(
            layout.snapshot_path(&s, SnapshotOffset::After10s),
            PathBuf::from("out/frame_20231102_140309_after_10s.jpg")
        );
        assert_eq!(
            layout.snapshot_path(&s, SnapshotOffset::Detected),
            PathBuf::from("out/frame_20231102_140309_detected.jpg")
        );
    }

    #[test]
    fn journal_records_are_delimited() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::in_dir(dir.path());
        let at = Local.with_ymd_and_hms(2023, 11, 2, 14, 3, 9).unwrap();

        let mut inc = Incident::new(1, at, stamp(&at), 0, 25.0);
        inc.clip_path = Some(PathBuf::from("fire_clips/clip_20231102_140309.avi"));
        layout.append_journal(&inc).unwrap();
        layout.append_journal(&inc).unwrap();

        let text = fs::read_to_string(layout.journal_path()).unwrap();
        let expected = format!(
            "Date       : 2023-11-02\nTime       : 14:03:09\nVideo File : fire_clips/clip_20231102_140309.avi\n{}\n",
            "-".repeat(40)
        );
        assert_eq!(text, expected.repeat(2));
    }

    #[test]
    fn map_links_to_coordinates() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::in_dir(dir.path());
        let location = LocationConfig::default();

        let path = layout.write_map("s", &location).unwrap();
        let html = fs::read_to_string(path).unwrap();
        assert!(html.contains("https://www.google.com/maps?q=22.7909362,87.4380579"));
        assert!(html.contains("setView([22.7909362, 87.4380579], 15)"));
    }

    #[test]
    fn reset_session_wipes_dir_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::in_dir(dir.path().join("clips"));
        layout.ensure().unwrap();
        fs::write(layout.dir().join("stale.jpg"), b"x").unwrap();

        let log = EventLog::new();
        let at = Local.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        log.append(Incident::new(1, at, stamp(&at), 0, 25.0));

        layout.reset_session(&log).unwrap();
        assert!(layout.dir().exists());
        assert_eq!(fs::read_dir(layout.dir()).unwrap().count(), 0);
        assert!(log.is_empty());
    }
}
