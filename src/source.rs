use chrono::Local;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

use crate::error::Error;
use crate::frame::Frame;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Ordered producer of frames. `Ok(None)` marks the end of the stream and
/// is distinct from a read error.
pub trait FrameSource: Send {
    /// Nominal rate; `0.0` when unknown.
    fn fps(&self) -> f64;

    fn dims(&self) -> (u32, u32);

    fn next_frame(&mut self) -> Result<Option<Frame>, Error>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn fps(&self) -> f64 {
        (**self).fps()
    }

    fn dims(&self) -> (u32, u32) {
        (**self).dims()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        (**self).next_frame()
    }
}

/// Directory of still images played back in file-name order.
pub struct ImageSequenceSource {
    paths: VecDeque<PathBuf>,
    fps: f64,
    dims: (u32, u32),
    next_index: u64,
}

impl ImageSequenceSource {
    pub fn open<P: AsRef<Path>>(dir: P, fps: f64) -> Result<Self, Error> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(Error::Source(format!("{} is not a directory", dir.display())));
        }

        let mut paths: Vec<PathBuf> = WalkDir::new(dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort_by_cached_key(|p| sequence_key(p));

        let dims = match paths.first() {
            Some(first) => image::image_dimensions(first)?,
            None => (0, 0),
        };

        info!(
            dir = %dir.display(),
            frames = paths.len(),
            width = dims.0,
            height = dims.1,
            fps,
            "image sequence opened"
        );

        Ok(Self {
            paths: paths.into(),
            fps,
            dims,
            next_index: 0,
        })
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.paths.len()
    }
}

impl FrameSource for ImageSequenceSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn dims(&self) -> (u32, u32) {
        self.dims
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        let path = match self.paths.pop_front() {
            Some(path) => path,
            None => return Ok(None),
        };

        let img = image::open(&path)
            .map_err(|e| Error::Source(format!("{}: {}", path.display(), e)))?
            .to_rgb8();

        let frame = Frame::new(self.next_index, Local::now(), img);
        self.next_index += 1;

        Ok(Some(frame))
    }
}

/// Orders `frame_2.png` before `frame_10.png`: the last run of digits in the
/// file stem compares numerically, the text before it lexically.
fn sequence_key(path: &Path) -> (String, Option<u64>, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let end = stem
        .rfind(|c: char| c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    let start = stem[..end]
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)
        .unwrap_or(end);

    let number = stem[start..end].parse().ok();
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    (stem[..start].to_string(), number, name)
}

/// Frames handed over by an embedding application.
pub struct MemorySource {
    frames: VecDeque<Frame>,
    fps: f64,
}

impl MemorySource {
    pub fn new<I: IntoIterator<Item = Frame>>(frames: I, fps: f64) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            fps,
        }
    }
}

impl FrameSource for MemorySource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn dims(&self) -> (u32, u32) {
        self.frames.front().map(|f| f.dims()).unwrap_or((0, 0))
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        Ok(self.frames.pop_front())
    }
}
