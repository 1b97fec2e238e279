//! Frame processing loop.
//!
//! Frames are pulled from the source one at a time. Detection, annotation
//! and preview encoding run on the blocking pool, up to `detect_depth`
//! frames ahead; `buffered` hands the results back in submission order, so
//! the state machine always observes frames by increasing index.

use futures::stream::{self, StreamExt};
use serde_derive::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::annotate::{encode_jpeg, Annotator};
use crate::clip::ClipWriter;
use crate::config::PipelineConfig;
use crate::detection::DetectionSet;
use crate::detector::Detector;
use crate::error::Error;
use crate::event_log::EventLog;
use crate::frame::Frame;
use crate::source::FrameSource;
use crate::state::{IncidentState, Transition};

pub const MULTIPART_BOUNDARY: &str = "frame";

/// Status flags polled by presentation layers.
#[derive(Debug, Default)]
pub struct PipelineStatus {
    ready: AtomicBool,
    done: AtomicBool,
    frames: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub ready: bool,
    pub done: bool,
    pub frames: u64,
}

impl PipelineStatus {
    /// The source has produced at least one frame.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Processing has completed, cleanly or not.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    #[inline]
    pub fn frames_processed(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn report(&self) -> StatusReport {
        StatusReport {
            ready: self.is_ready(),
            done: self.is_done(),
            frames: self.frames_processed(),
        }
    }

    fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    fn record_frame(&self) {
        self.frames.fetch_add(1, Ordering::AcqRel);
    }

    fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
    }
}

/// One annotated, JPEG-compressed frame for live display.
#[derive(Debug, Clone)]
pub struct PreviewFrame {
    pub index: u64,
    pub jpeg: Arc<[u8]>,
}

impl PreviewFrame {
    /// Part of a `multipart/x-mixed-replace; boundary=frame` stream.
    pub fn multipart_chunk(&self) -> Vec<u8> {
        let mut chunk = Vec::with_capacity(self.jpeg.len() + 48);
        chunk.extend_from_slice(b"--");
        chunk.extend_from_slice(MULTIPART_BOUNDARY.as_bytes());
        chunk.extend_from_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
        chunk.extend_from_slice(&self.jpeg);
        chunk.extend_from_slice(b"\r\n");
        chunk
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub incidents: u64,
    pub classifier_errors: u64,
    /// Incident still recording when the stream ended.
    pub cut_short: Option<u64>,
}

struct Processed {
    frame: Frame,
    detections: DetectionSet,
    classifier_failed: bool,
    preview: Option<PreviewFrame>,
}

fn process_frame(
    frame: Frame,
    detector: &dyn Detector,
    annotator: &dyn Annotator,
    preview_quality: Option<u8>,
) -> Processed {
    let (detections, classifier_failed) = match detector.detect(&frame) {
        Ok(detections) => (detections, false),
        Err(err) => {
            warn!(frame = frame.index, error = %err, "classifier failed, frame treated as quiet");
            (DetectionSet::empty(), true)
        }
    };

    let frame = annotator.annotate(&frame, &detections);

    let preview = preview_quality.and_then(|quality| match encode_jpeg(&frame.pixels, quality) {
        Ok(jpeg) => Some(PreviewFrame {
            index: frame.index,
            jpeg: jpeg.into(),
        }),
        Err(err) => {
            debug!(frame = frame.index, error = %err, "preview frame dropped");
            None
        }
    });

    Processed {
        frame,
        detections,
        classifier_failed,
        preview,
    }
}

pub struct Pipeline<W: ClipWriter> {
    state: IncidentState<W>,
    detector: Arc<dyn Detector>,
    annotator: Arc<dyn Annotator>,
    preview: broadcast::Sender<PreviewFrame>,
    status: Arc<PipelineStatus>,
    depth: usize,
    preview_quality: u8,
}

impl<W: ClipWriter> Pipeline<W> {
    pub fn new(
        state: IncidentState<W>,
        detector: Arc<dyn Detector>,
        annotator: Arc<dyn Annotator>,
        config: &PipelineConfig,
    ) -> Self {
        let (preview, _) = broadcast::channel(config.preview_capacity.max(1));

        Self {
            state,
            detector,
            annotator,
            preview,
            status: Arc::new(PipelineStatus::default()),
            depth: config.detect_depth.max(1),
            preview_quality: config.preview_quality,
        }
    }

    pub fn status(&self) -> Arc<PipelineStatus> {
        self.status.clone()
    }

    pub fn event_log(&self) -> EventLog {
        self.state.event_log().clone()
    }

    /// Live preview feed. Slow receivers lose frames instead of stalling
    /// the pipeline.
    pub fn subscribe_preview(&self) -> broadcast::Receiver<PreviewFrame> {
        self.preview.subscribe()
    }

    pub fn state(&self) -> &IncidentState<W> {
        &self.state
    }

    /// Consumes `source` to its end. Any clip still open when the stream
    /// stops is closed, whatever the reason for stopping.
    pub async fn run<S: FrameSource + 'static>(&mut self, source: S) -> Result<RunSummary, Error> {
        let status = self.status.clone();
        let frames = stream::unfold(Some(source), move |source| {
            let status = status.clone();
            async move {
                let mut source = source?;
                match source.next_frame() {
                    Ok(Some(frame)) => {
                        status.mark_ready();
                        Some((Ok(frame), Some(source)))
                    }
                    Ok(None) => None,
                    Err(err) => Some((Err(err), None)),
                }
            }
        });

        let detector = self.detector.clone();
        let annotator = self.annotator.clone();
        let preview = self.preview.clone();
        let quality = self.preview_quality;

        let processed = frames
            .map(move |item: Result<Frame, Error>| {
                let detector = detector.clone();
                let annotator = annotator.clone();
                let preview_quality = (preview.receiver_count() > 0).then_some(quality);

                async move {
                    let frame = item?;
                    let fallback = frame.clone();
                    let task = tokio::task::spawn_blocking(move || {
                        process_frame(frame, &*detector, &*annotator, preview_quality)
                    });

                    match task.await {
                        Ok(processed) => Ok::<_, Error>(processed),
                        Err(err) => {
                            warn!(
                                frame = fallback.index,
                                error = %err,
                                "frame worker failed, frame treated as quiet"
                            );
                            Ok(Processed {
                                frame: fallback,
                                detections: DetectionSet::empty(),
                                classifier_failed: true,
                                preview: None,
                            })
                        }
                    }
                }
            })
            .buffered(self.depth);

        futures::pin_mut!(processed);

        let mut summary = RunSummary::default();
        let outcome = loop {
            let item = match processed.next().await {
                Some(Ok(item)) => item,
                Some(Err(err)) => break Err(err),
                None => break Ok(()),
            };

            self.status.record_frame();
            summary.frames += 1;
            if item.classifier_failed {
                summary.classifier_errors += 1;
            }

            match self.state.step(&item.frame, &item.detections) {
                Ok(Transition::Started(_)) => summary.incidents += 1,
                Ok(_) => (),
                Err(err) => break Err(err),
            }

            if let Some(frame) = item.preview {
                let _ = self.preview.send(frame);
            }
        };

        summary.cut_short = self.state.finish();
        self.status.mark_done();

        match &outcome {
            Ok(()) => info!(
                frames = summary.frames,
                incidents = summary.incidents,
                "video processing completed"
            ),
            Err(err) => error!(frames = summary.frames, error = %err, "video processing aborted"),
        }

        outcome.map(|_| summary)
    }
}
