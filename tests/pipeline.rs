use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

use firewatch::annotate::BoxAnnotator;
use firewatch::artifacts::OutputLayout;
use firewatch::bbox::{BBox, Ltrb};
use firewatch::config::{LocationConfig, PipelineConfig};
use firewatch::source::MemorySource;
use firewatch::{
    ClipWriter, Detection, DetectionSet, Detector, Error, EventLog, Frame, FrameSource,
    IncidentState, IncidentStatus, Label, MjpegClipWriter, Pipeline, PipelineStatus,
    SnapshotOffset, StateSettings,
};

const FPS: f64 = 5.0;
const PRE: usize = 3;
const POST: u64 = 5;

fn fire() -> DetectionSet {
    vec![Detection::new(Label::Fire, 0.9, BBox::<Ltrb>::ltrb(2.0, 2.0, 10.0, 10.0))].into()
}

fn frames(count: u64) -> MemorySource {
    let now = Local::now();
    MemorySource::new((0..count).map(|i| Frame::blank(i, now, 16, 16)), FPS)
}

fn pipeline(dir: &std::path::Path, detector: Arc<dyn Detector>) -> Pipeline<MjpegClipWriter> {
    let config = PipelineConfig {
        detect_depth: 4,
        preview_capacity: 64,
        preview_quality: 70,
    };

    pipeline_with(dir, detector, &config)
}

fn pipeline_with(
    dir: &std::path::Path,
    detector: Arc<dyn Detector>,
    config: &PipelineConfig,
) -> Pipeline<MjpegClipWriter> {
    let settings = StateSettings {
        confidence_threshold: 0.3,
        pre_roll_frames: PRE,
        post_roll_frames: POST,
        fps: FPS,
        location: LocationConfig::default(),
    };

    let layout = OutputLayout::in_dir(dir);
    layout.ensure().unwrap();

    let state = IncidentState::new(settings, layout, MjpegClipWriter::default(), EventLog::new());

    Pipeline::new(state, detector, Arc::new(BoxAnnotator::new(0.3)), config)
}

/// Fires on `triggers`, sleeping longer on early frames so that results
/// complete out of submission order.
fn scripted(triggers: &'static [u64]) -> Arc<dyn Detector> {
    Arc::new(move |frame: &Frame| -> Result<DetectionSet, Error> {
        std::thread::sleep(Duration::from_millis((7 - frame.index % 8) * 2));
        if triggers.contains(&frame.index) {
            Ok(fire())
        } else {
            Ok(DetectionSet::empty())
        }
    })
}

fn jpeg_count(path: &std::path::Path) -> usize {
    let bytes = std::fs::read(path).unwrap();
    bytes.windows(3).filter(|w| *w == [0xFF, 0xD8, 0xFF]).count()
}

#[tokio::test]
async fn records_isolated_incident() {
    let dir = tempfile::tempdir().unwrap();
    let mut p = pipeline(dir.path(), scripted(&[10]));
    let status = p.status();
    assert!(!status.is_ready());

    let summary = p.run(frames(30)).await.unwrap();
    assert_eq!(summary.frames, 30);
    assert_eq!(summary.incidents, 1);
    assert_eq!(summary.cut_short, None);

    let report = status.report();
    assert!(report.ready && report.done);
    assert_eq!(report.frames, 30);

    let incident = p.event_log().get(1).unwrap();
    assert!(incident.closed);
    assert_eq!(incident.status, IncidentStatus::Closed);
    assert_eq!(incident.trigger_frame, 10);
    assert_eq!(incident.last_frame, 10 + POST);
    assert_eq!(incident.frames_written, PRE as u64 + 1 + POST);

    let clip = incident.clip_path.as_ref().unwrap();
    assert_eq!(jpeg_count(clip), PRE + 1 + POST as usize);

    let detected = incident.snapshot(SnapshotOffset::Detected).unwrap();
    assert_eq!(detected.frame_index, 10);
    assert!(detected.path.exists());
    assert!(incident.snapshot(SnapshotOffset::After5s).is_none());
}

#[tokio::test]
async fn state_sees_frames_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut p = pipeline(dir.path(), scripted(&[4, 20]));
    let mut preview = p.subscribe_preview();

    let summary = p.run(frames(40)).await.unwrap();
    assert_eq!(summary.incidents, 2);

    let mut seen = Vec::new();
    loop {
        match preview.try_recv() {
            Ok(frame) => {
                assert!(!frame.jpeg.is_empty());
                seen.push(frame.index);
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            Err(err) => panic!("preview lagged: {:?}", err),
        }
    }
    assert_eq!(seen, (0..40).collect::<Vec<_>>());

    let triggers: Vec<u64> = p.event_log().list().iter().map(|i| i.trigger_frame).collect();
    assert_eq!(triggers, vec![4, 20]);
}

#[tokio::test]
async fn classifier_errors_are_quiet_frames() {
    let dir = tempfile::tempdir().unwrap();
    let detector: Arc<dyn Detector> = Arc::new(|frame: &Frame| -> Result<DetectionSet, Error> {
        match frame.index {
            3 | 4 => Err(Error::Classifier("model crashed".into())),
            _ => Ok(DetectionSet::empty()),
        }
    });

    let mut p = pipeline(dir.path(), detector);
    let summary = p.run(frames(10)).await.unwrap();

    assert_eq!(summary.frames, 10);
    assert_eq!(summary.classifier_errors, 2);
    assert_eq!(summary.incidents, 0);
    assert!(p.event_log().is_empty());
}

#[tokio::test]
async fn stream_end_closes_open_clip() {
    let dir = tempfile::tempdir().unwrap();
    let mut p = pipeline(dir.path(), scripted(&[8]));

    let summary = p.run(frames(10)).await.unwrap();
    assert_eq!(summary.cut_short, Some(1));

    let incident = p.event_log().get(1).unwrap();
    assert!(incident.closed);
    assert_eq!(incident.last_frame, 9);
    assert_eq!(incident.frames_written, PRE as u64 + 2);
    assert_eq!(jpeg_count(incident.clip_path.as_ref().unwrap()), PRE + 2);
    assert!(p.state().is_finished());
}

struct FailingSource {
    inner: MemorySource,
    fail_at: u64,
    served: u64,
}

impl FrameSource for FailingSource {
    fn fps(&self) -> f64 {
        self.inner.fps()
    }

    fn dims(&self) -> (u32, u32) {
        self.inner.dims()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        if self.served == self.fail_at {
            return Err(Error::Source("decoder gave up".into()));
        }
        self.served += 1;
        self.inner.next_frame()
    }
}

#[tokio::test]
async fn source_error_still_closes_clip() {
    let dir = tempfile::tempdir().unwrap();
    let mut p = pipeline(dir.path(), scripted(&[2]));
    let status = p.status();

    let source = FailingSource {
        inner: frames(20),
        fail_at: 5,
        served: 0,
    };

    let res = p.run(source).await;
    assert!(matches!(res, Err(Error::Source(_))));
    assert!(status.is_done());
    assert_eq!(status.frames_processed(), 5);

    let incident = p.event_log().get(1).unwrap();
    assert!(incident.closed);
    assert_eq!(incident.last_frame, 4);
    assert!(!p.state().writer().is_open());
}

#[tokio::test]
async fn journal_lists_every_incident() {
    let dir = tempfile::tempdir().unwrap();
    let mut p = pipeline(dir.path(), scripted(&[3, 25]));
    p.run(frames(40)).await.unwrap();

    let journal = std::fs::read_to_string(dir.path().join("detection_log.txt")).unwrap();
    assert_eq!(journal.matches("Video File : ").count(), 2);

    let dashboard = std::fs::read_to_string(dir.path().join("dashboard.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&dashboard).unwrap();
    assert_eq!(parsed.as_array().map(|a| a.len()), Some(2));
}

#[tokio::test]
async fn panicking_detector_skips_one_frame() {
    let dir = tempfile::tempdir().unwrap();
    let detector: Arc<dyn Detector> = Arc::new(|frame: &Frame| -> Result<DetectionSet, Error> {
        match frame.index {
            3 => panic!("model blew up"),
            10 => Ok(fire()),
            _ => Ok(DetectionSet::empty()),
        }
    });

    let mut p = pipeline(dir.path(), detector);
    let mut preview = p.subscribe_preview();
    let summary = p.run(frames(20)).await.unwrap();

    assert_eq!(summary.frames, 20);
    assert_eq!(summary.classifier_errors, 1);
    assert_eq!(summary.incidents, 1);
    assert_eq!(p.status().frames_processed(), 20);

    let mut seen = Vec::new();
    while let Ok(frame) = preview.try_recv() {
        seen.push(frame.index);
    }
    assert_eq!(seen.len(), 19);
    assert!(!seen.contains(&3));
}

#[tokio::test]
async fn unread_preview_never_stalls() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        detect_depth: 4,
        preview_capacity: 2,
        preview_quality: 70,
    };
    let mut p = pipeline_with(dir.path(), scripted(&[5]), &config);
    let mut idle = p.subscribe_preview();

    let summary = p.run(frames(40)).await.unwrap();
    assert_eq!(summary.frames, 40);
    assert_eq!(summary.incidents, 1);
    assert!(p.status().is_done());

    assert!(matches!(idle.try_recv(), Err(TryRecvError::Lagged(38))));
    let tail: Vec<u64> = std::iter::from_fn(|| idle.try_recv().ok())
        .map(|f| f.index)
        .collect();
    assert_eq!(tail, vec![38, 39]);
}

/// Records what the status flags said when the second frame was pulled.
struct WatchedSource {
    inner: MemorySource,
    status: Arc<PipelineStatus>,
    pulled: u64,
    seen: Arc<std::sync::Mutex<Option<(bool, u64)>>>,
}

impl FrameSource for WatchedSource {
    fn fps(&self) -> f64 {
        self.inner.fps()
    }

    fn dims(&self) -> (u32, u32) {
        self.inner.dims()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        if self.pulled == 1 {
            let report = (self.status.is_ready(), self.status.frames_processed());
            *self.seen.lock().unwrap() = Some(report);
        }
        self.pulled += 1;
        self.inner.next_frame()
    }
}

#[tokio::test]
async fn ready_once_source_yields() {
    let dir = tempfile::tempdir().unwrap();
    let mut p = pipeline(dir.path(), scripted(&[]));
    let seen = Arc::new(std::sync::Mutex::new(None));

    let source = WatchedSource {
        inner: frames(10),
        status: p.status(),
        pulled: 0,
        seen: seen.clone(),
    };
    p.run(source).await.unwrap();

    // second pull happens while the first frame is still in the worker pool
    assert_eq!(*seen.lock().unwrap(), Some((true, 0)));
}
