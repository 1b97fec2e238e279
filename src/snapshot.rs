use std::path::Path;

use crate::annotate::encode_jpeg;
use crate::error::Error;
use crate::frame::Frame;
use crate::incident::SnapshotOffset;

pub const SNAPSHOT_QUALITY: u8 = 95;

pub fn save_snapshot(frame: &Frame, path: &Path) -> Result<(), Error> {
    let jpeg = encode_jpeg(&frame.pixels, SNAPSHOT_QUALITY)?;
    std::fs::write(path, jpeg).map_err(|e| Error::storage(path, e))
}

/// One-shot timer for the follow-up snapshots of an incident.
///
/// Armed on the trigger frame, it fires `After5s` and `After10s` once each,
/// counted in frames, and then disarms itself. Re-triggers do not re-arm it.
#[derive(Debug, Clone)]
pub struct SnapshotSchedule {
    frames_per_second: u64,
    elapsed: Option<u64>,
}

impl SnapshotSchedule {
    pub fn new(fps: f64) -> Self {
        Self {
            frames_per_second: (fps.round() as u64).max(1),
            elapsed: None,
        }
    }

    #[inline]
    pub fn is_armed(&self) -> bool {
        self.elapsed.is_some()
    }

    /// Frames since the trigger frame, if armed.
    #[inline]
    pub fn elapsed(&self) -> Option<u64> {
        self.elapsed
    }

    pub fn arm(&mut self) {
        self.elapsed = Some(0);
    }

    pub fn disarm(&mut self) {
        self.elapsed = None;
    }

    /// Counts one more frame and reports the snapshot due on it, if any.
    pub fn advance(&mut self) -> Option<SnapshotOffset> {
        let elapsed = self.elapsed.as_mut()?;
        *elapsed += 1;

        let at = *elapsed;
        if at == SnapshotOffset::After5s.seconds() * self.frames_per_second {
            Some(SnapshotOffset::After5s)
        } else if at == SnapshotOffset::After10s.seconds() * self.frames_per_second {
            self.elapsed = None;
            Some(SnapshotOffset::After10s)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    #[test]
    fn fires_once_at_each_offset() {
        let mut schedule = SnapshotSchedule::new(4.0);
        schedule.arm();

        let fired: Vec<(u64, SnapshotOffset)> = (1..=100)
            .filter_map(|i| schedule.advance().map(|o| (i, o)))
            .collect();

        assert_eq!(
            fired,
            vec![(20, SnapshotOffset::After5s), (40, SnapshotOffset::After10s)]
        );
        assert!(!schedule.is_armed());
    }

    #[test]
    fn idle_schedule_never_fires() {
        let mut schedule = SnapshotSchedule::new(25.0);
        assert!((0..1000).all(|_| schedule.advance().is_none()));
    }

    #[test]
    fn fractional_rate_rounds() {
        let mut schedule = SnapshotSchedule::new(29.97);
        schedule.arm();
        let first = (1..=400).find(|_| schedule.advance().is_some());
        assert_eq!(first, Some(150));
    }

    #[test]
    fn saves_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame_x_detected.jpg");
        save_snapshot(&Frame::blank(0, Local::now(), 8, 8), &path).unwrap();

        let img = image::open(&path).unwrap();
        assert_eq!((img.width(), img.height()), (8, 8));
    }

    #[test]
    fn missing_dir_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("a.jpg");
        let err = save_snapshot(&Frame::blank(0, Local::now(), 8, 8), &path).unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));
    }
}
