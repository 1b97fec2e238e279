pub mod annotate;
pub mod artifacts;
pub mod bbox;
pub mod clip;
pub mod config;
pub mod detection;
pub mod detector;
pub mod error;
pub mod event_log;
pub mod frame;
pub mod incident;
pub mod pipeline;
pub mod ring_buffer;
pub mod snapshot;
pub mod source;
pub mod state;

#[cfg(feature = "opencv")]
pub mod video;

pub use clip::{ClipWriter, MjpegClipWriter};
pub use config::Config;
pub use detection::{Detection, DetectionSet, Label};
pub use detector::Detector;
pub use error::Error;
pub use event_log::EventLog;
pub use frame::Frame;
pub use incident::{Incident, IncidentStatus, SnapshotOffset};
pub use pipeline::{Pipeline, PipelineStatus};
pub use source::FrameSource;
pub use state::{IncidentState, StateSettings, Transition};
