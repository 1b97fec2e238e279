use serde_derive::Deserialize;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use crate::bbox::{BBox, Ltrb};
use crate::detection::{Detection, DetectionSet, Label};
use crate::error::Error;
use crate::frame::Frame;

/// Boundary to the external classifier. Implementations must not carry
/// mutable state between calls: the pipeline runs several calls at once.
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<DetectionSet, Error>;
}

impl<F> Detector for F
where
    F: Fn(&Frame) -> Result<DetectionSet, Error> + Send + Sync,
{
    fn detect(&self, frame: &Frame) -> Result<DetectionSet, Error> {
        self(frame)
    }
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Names for integer class ids, index = class id.
    pub class_names: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            class_names: vec!["fire".into(), "smoke".into()],
        }
    }
}

impl DetectorConfig {
    fn label(&self, class: &ClassRef) -> Label {
        match class {
            ClassRef::Name(name) => Label::from_name(name),
            ClassRef::Index(idx) => self
                .class_names
                .get(*idx)
                .map(|name| Label::from_name(name))
                .unwrap_or(Label::Other),
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum ClassRef {
    Index(usize),
    Name(String),
}

#[derive(Deserialize, Debug)]
struct RawDetection {
    #[serde(alias = "label", rename = "c")]
    class: ClassRef,
    #[serde(rename = "p")]
    confidence: f32,
    bbox: [f32; 4],
}

/// Replays classifier output recorded ahead of time, one line per frame:
///
/// ```text
/// 0: []
/// 1: [{"label": "fire", "p": 0.82, "bbox": [10, 20, 110, 140]}]
/// 2: [{"c": 1, "p": 0.4, "bbox": [12, 22, 108, 139]}]
/// ```
///
/// Frames without a line have no detections. A line that cannot be parsed
/// fails detection for that frame only.
pub struct ReplayDetector {
    frames: HashMap<u64, Result<DetectionSet, String>>,
}

impl ReplayDetector {
    pub fn open<P: AsRef<Path>>(path: P, config: &DetectorConfig) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| Error::storage(path, e))?;
        Self::from_reader(std::io::BufReader::new(file), config)
    }

    pub fn from_reader<R: BufRead>(reader: R, config: &DetectorConfig) -> Result<Self, Error> {
        let mut frames = HashMap::new();

        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| Error::Source(e.to_string()))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let idx = match line.find(':') {
                Some(idx) => idx,
                None => {
                    return Err(Error::Classifier(format!(
                        "line {}: expected `<frame>: [...]`",
                        lineno + 1
                    )))
                }
            };

            let (index, payload) = line.split_at(idx);
            let index: u64 = index.trim().parse().map_err(|_| {
                Error::Classifier(format!("line {}: bad frame index {:?}", lineno + 1, index))
            })?;

            let parsed = serde_json::from_str::<Vec<RawDetection>>(&payload[1..])
                .map(|raw| normalize(raw, config))
                .map_err(|e| format!("frame {}: {}", index, e));

            frames.insert(index, parsed);
        }

        Ok(Self { frames })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

fn normalize(raw: Vec<RawDetection>, config: &DetectorConfig) -> DetectionSet {
    raw.into_iter()
        .filter(|r| r.confidence.is_finite() && r.bbox.iter().all(|v| v.is_finite()))
        .map(|r| {
            let [x1, y1, x2, y2] = r.bbox;
            Detection::new(
                config.label(&r.class),
                r.confidence,
                BBox::<Ltrb>::ltrb(x1, y1, x2, y2),
            )
        })
        .collect::<Vec<_>>()
        .into()
}

impl Detector for ReplayDetector {
    fn detect(&self, frame: &Frame) -> Result<DetectionSet, Error> {
        match self.frames.get(&frame.index) {
            Some(Ok(set)) => Ok(set.clone()),
            Some(Err(msg)) => Err(Error::Classifier(msg.clone())),
            None => Ok(DetectionSet::empty()),
        }
    }
}
