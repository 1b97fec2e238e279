//! Incident state machine.
//!
//! Consumes `(frame, detections)` pairs strictly in arrival order and
//! decides when a clip starts, how long it runs and which frames become
//! evidentiary snapshots.
//!
//! ```text
//!            triggered
//!   Idle ─────────────────▶ Recording ──┐ triggered: post-roll refilled
//!    ▲                         │  ▲     │ quiet:     post-roll - 1
//!    └──── post-roll == 0 ─────┘  └─────┘
//! ```
//!
//! Two timers run while recording. The post-roll countdown is refilled by
//! every trigger, so overlapping triggers merge into one clip. The snapshot
//! schedule is armed once per incident and never refilled.

use tracing::{debug, info, warn};

use crate::artifacts::{self, OutputLayout};
use crate::clip::ClipWriter;
use crate::config::{Config, LocationConfig};
use crate::detection::DetectionSet;
use crate::error::Error;
use crate::event_log::EventLog;
use crate::frame::Frame;
use crate::incident::{Incident, Snapshot, SnapshotOffset};
use crate::ring_buffer::RingBuffer;
use crate::snapshot::{save_snapshot, SnapshotSchedule};

#[derive(Debug, Clone)]
pub struct StateSettings {
    pub confidence_threshold: f32,
    pub pre_roll_frames: usize,
    pub post_roll_frames: u64,
    pub fps: f64,
    pub location: LocationConfig,
}

impl StateSettings {
    pub fn from_config(config: &Config, fps: f64) -> Self {
        Self {
            confidence_threshold: config.detection.confidence_threshold,
            pre_roll_frames: config.recording.pre_roll_frames,
            post_roll_frames: config.recording.post_roll_frames.max(1),
            fps,
            location: config.location,
        }
    }
}

/// What a single [`IncidentState::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Idle,
    Started(u64),
    /// Recording, and a trigger refilled the post-roll window.
    Extended(u64),
    /// Recording through the post-roll window.
    Continued(u64),
    Closed(u64),
}

#[derive(Debug)]
struct Active {
    id: u64,
    stamp: String,
    post_roll_remaining: u64,
    clip_ok: bool,
    frames_written: u64,
    last_frame: u64,
}

pub struct IncidentState<W: ClipWriter> {
    settings: StateSettings,
    layout: OutputLayout,
    log: EventLog,
    writer: W,
    pre_roll: RingBuffer<Frame>,
    snapshots: SnapshotSchedule,
    active: Option<Active>,
    next_id: u64,
    last_stamp: Option<String>,
    finished: bool,
}

impl<W: ClipWriter> IncidentState<W> {
    pub fn new(settings: StateSettings, layout: OutputLayout, writer: W, log: EventLog) -> Self {
        Self {
            pre_roll: RingBuffer::with_capacity(settings.pre_roll_frames),
            snapshots: SnapshotSchedule::new(settings.fps),
            settings,
            layout,
            log,
            writer,
            active: None,
            next_id: 1,
            last_stamp: None,
            finished: false,
        }
    }

    #[inline]
    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn active_incident(&self) -> Option<u64> {
        self.active.as_ref().map(|a| a.id)
    }

    pub fn post_roll_remaining(&self) -> Option<u64> {
        self.active.as_ref().map(|a| a.post_roll_remaining)
    }

    #[inline]
    pub fn pre_roll(&self) -> &RingBuffer<Frame> {
        &self.pre_roll
    }

    #[inline]
    pub fn writer(&self) -> &W {
        &self.writer
    }

    #[inline]
    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    #[inline]
    pub fn settings(&self) -> &StateSettings {
        &self.settings
    }

    /// Advances the machine by one frame. Only invariant violations are
    /// returned as errors; storage trouble degrades the current incident.
    pub fn step(&mut self, frame: &Frame, detections: &DetectionSet) -> Result<Transition, Error> {
        if self.finished {
            return Err(Error::InvariantViolation("frame processed after stream end"));
        }

        let triggered = detections.triggered(self.settings.confidence_threshold);
        let transition = match self.active.as_ref().map(|a| a.id) {
            None if triggered => Transition::Started(self.begin(frame)?),
            None => Transition::Idle,
            Some(id) => self.advance(id, frame, triggered)?,
        };

        self.pre_roll.push(frame.clone());

        Ok(transition)
    }

    /// Stream end: force-closes an open clip regardless of the post-roll
    /// window. Returns the incident that was cut short, if any.
    pub fn finish(&mut self) -> Option<u64> {
        let cut = self.active.as_ref().map(|a| a.id);
        if let Some(id) = cut {
            info!(incident = id, "stream ended while recording, closing clip");
            self.end();
        }

        self.finished = true;
        cut
    }

    fn begin(&mut self, frame: &Frame) -> Result<u64, Error> {
        let id = self.next_id;
        self.next_id += 1;

        let base = artifacts::stamp(&frame.captured_at);
        let stamp = if self.last_stamp.as_deref() == Some(base.as_str()) {
            format!("{}_{}", base, id)
        } else {
            base.clone()
        };
        self.last_stamp = Some(base);

        let mut incident = Incident::new(
            id,
            frame.captured_at,
            stamp.clone(),
            frame.index,
            self.settings.fps,
        );
        let mut active = Active {
            id,
            stamp: stamp.clone(),
            post_roll_remaining: self.settings.post_roll_frames,
            clip_ok: false,
            frames_written: 0,
            last_frame: frame.index,
        };

        let clip_path = self.layout.clip_path(&stamp, self.writer.extension());
        let (width, height) = frame.dims();
        match self.writer.open(&clip_path, self.settings.fps, width, height) {
            Ok(()) => {
                active.clip_ok = true;
                incident.clip_path = Some(clip_path);
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(incident = id, error = %err, "clip unavailable, incident degraded");
                incident.degrade();
            }
        }

        info!(
            incident = id,
            frame = frame.index,
            pre_roll = self.pre_roll.len(),
            "fire/smoke detected, recording started"
        );

        for buffered in self.pre_roll.iter() {
            if !Self::write_clip(&mut self.writer, &mut active, &mut incident, buffered)? {
                break;
            }
        }
        Self::write_clip(&mut self.writer, &mut active, &mut incident, frame)?;

        let path = self.layout.snapshot_path(&stamp, SnapshotOffset::Detected);
        match save_snapshot(frame, &path) {
            Ok(()) => incident.snapshots.push(Snapshot {
                offset: SnapshotOffset::Detected,
                frame_index: frame.index,
                path,
            }),
            Err(err) => {
                warn!(incident = id, error = %err, "detection snapshot not saved");
                incident.degrade();
            }
        }
        self.snapshots.arm();

        match self.layout.write_map(&stamp, &self.settings.location) {
            Ok(path) => incident.map_path = Some(path),
            Err(err) => warn!(incident = id, error = %err, "map artifact not written"),
        }

        if let Err(err) = self.layout.append_journal(&incident) {
            warn!(incident = id, error = %err, "journal record not written");
        }

        incident.frames_written = active.frames_written;
        self.log.append(incident);
        self.active = Some(active);
        self.export_dashboard();

        Ok(id)
    }

    fn advance(&mut self, id: u64, frame: &Frame, triggered: bool) -> Result<Transition, Error> {
        let post_roll = self.settings.post_roll_frames;
        let active = match self.active.as_mut() {
            Some(active) => active,
            None => return Err(Error::InvariantViolation("advance without an active incident")),
        };

        active.last_frame = frame.index;
        if active.clip_ok {
            if let Err(err) = self.writer.write(frame) {
                if err.is_fatal() {
                    return Err(err);
                }

                warn!(incident = id, error = %err, "clip write failed, incident degraded");
                active.clip_ok = false;
                let _ = self.writer.close();
                self.log.update(id, |i| i.degrade());
            } else {
                active.frames_written += 1;
            }
        }

        let transition = if triggered {
            active.post_roll_remaining = post_roll;
            debug!(incident = id, frame = frame.index, "trigger renewed post-roll");
            Transition::Extended(id)
        } else {
            active.post_roll_remaining = active.post_roll_remaining.saturating_sub(1);
            Transition::Continued(id)
        };

        let expired = active.post_roll_remaining == 0;
        let stamp = active.stamp.clone();

        if let Some(offset) = self.snapshots.advance() {
            self.capture(id, &stamp, frame, offset);
        }

        if expired {
            self.end();
            return Ok(Transition::Closed(id));
        }

        Ok(transition)
    }

    /// Writes one frame of the clip being opened; `Ok(false)` once the
    /// clip is unusable.
    fn write_clip(
        writer: &mut W,
        active: &mut Active,
        incident: &mut Incident,
        frame: &Frame,
    ) -> Result<bool, Error> {
        if !active.clip_ok {
            return Ok(false);
        }

        match writer.write(frame) {
            Ok(()) => {
                active.frames_written += 1;
                Ok(true)
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!(incident = active.id, error = %err, "clip write failed, incident degraded");
                active.clip_ok = false;
                incident.degrade();
                let _ = writer.close();
                Ok(false)
            }
        }
    }

    fn capture(&mut self, id: u64, stamp: &str, frame: &Frame, offset: SnapshotOffset) {
        let path = self.layout.snapshot_path(stamp, offset);
        match save_snapshot(frame, &path) {
            Ok(()) => {
                info!(incident = id, frame = frame.index, snapshot = %offset, "snapshot saved");
                self.log.attach_snapshot(
                    id,
                    Snapshot {
                        offset,
                        frame_index: frame.index,
                        path,
                    },
                );
            }
            Err(err) => {
                warn!(incident = id, snapshot = %offset, error = %err, "snapshot not saved");
                self.log.update(id, |i| i.degrade());
            }
        }

        self.export_dashboard();
    }

    fn end(&mut self) {
        let active = match self.active.take() {
            Some(active) => active,
            None => return,
        };

        let mut degraded = false;
        if let Err(err) = self.writer.close() {
            warn!(incident = active.id, error = %err, "clip did not finalize cleanly");
            degraded = true;
        }

        self.snapshots.disarm();
        self.log.update(active.id, |i| {
            i.frames_written = active.frames_written;
            i.last_frame = active.last_frame;
            if degraded {
                i.degrade();
            }
            i.close();
        });

        info!(
            incident = active.id,
            frames = active.frames_written,
            last_frame = active.last_frame,
            "recording stopped"
        );

        self.export_dashboard();
    }

    fn export_dashboard(&self) {
        let path = self.layout.dashboard_path();
        if let Err(err) = self.log.write_json(&path) {
            debug!(error = %err, "dashboard export skipped");
        }
    }
}
