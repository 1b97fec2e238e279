use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::annotate::encode_jpeg;
use crate::error::Error;
use crate::frame::Frame;

/// Owner of the single output clip being recorded.
///
/// Opening a writer that is already open is a programming error and is
/// reported as [`Error::InvariantViolation`]. Closing is idempotent.
pub trait ClipWriter: Send {
    /// File extension used when naming clips for this container.
    fn extension(&self) -> &'static str;

    fn open(&mut self, path: &Path, fps: f64, width: u32, height: u32) -> Result<(), Error>;

    fn write(&mut self, frame: &Frame) -> Result<(), Error>;

    fn close(&mut self) -> Result<(), Error>;

    fn is_open(&self) -> bool;
}

impl<W: ClipWriter + ?Sized> ClipWriter for Box<W> {
    fn extension(&self) -> &'static str {
        (**self).extension()
    }

    fn open(&mut self, path: &Path, fps: f64, width: u32, height: u32) -> Result<(), Error> {
        (**self).open(path, fps, width, height)
    }

    fn write(&mut self, frame: &Frame) -> Result<(), Error> {
        (**self).write(frame)
    }

    fn close(&mut self) -> Result<(), Error> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

struct OpenClip {
    out: BufWriter<File>,
    path: PathBuf,
}

/// Motion-JPEG clip: every frame is an independent JPEG appended to the
/// file. Playable by ffmpeg/ffplay/VLC as `-f mjpeg`. The container has no
/// header and players assume 25 fps; the recording rate is kept on the
/// incident record (`Incident::fps`), e.g. `ffplay -f mjpeg -framerate <fps>`.
pub struct MjpegClipWriter {
    quality: u8,
    clip: Option<OpenClip>,
}

impl MjpegClipWriter {
    pub fn new(quality: u8) -> Self {
        Self {
            quality,
            clip: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.clip.as_ref().map(|c| c.path.as_path())
    }
}

impl Default for MjpegClipWriter {
    fn default() -> Self {
        Self::new(90)
    }
}

impl ClipWriter for MjpegClipWriter {
    fn extension(&self) -> &'static str {
        "mjpeg"
    }

    fn open(&mut self, path: &Path, fps: f64, width: u32, height: u32) -> Result<(), Error> {
        if self.clip.is_some() {
            return Err(Error::InvariantViolation("clip writer opened twice"));
        }

        let file = File::create(path).map_err(|e| Error::storage(path, e))?;
        tracing::debug!(path = %path.display(), fps, width, height, "mjpeg clip opened");

        self.clip = Some(OpenClip {
            out: BufWriter::new(file),
            path: path.to_path_buf(),
        });

        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> Result<(), Error> {
        let clip = self
            .clip
            .as_mut()
            .ok_or(Error::InvariantViolation("write to a closed clip writer"))?;

        let jpeg = encode_jpeg(&frame.pixels, self.quality)?;
        clip.out.write_all(&jpeg).map_err(|e| Error::storage(&clip.path, e))
    }

    fn close(&mut self) -> Result<(), Error> {
        match self.clip.take() {
            Some(mut clip) => clip.out.flush().map_err(|e| Error::storage(&clip.path, e)),
            None => Ok(()),
        }
    }

    fn is_open(&self) -> bool {
        self.clip.is_some()
    }
}

impl Drop for MjpegClipWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    const SOI: [u8; 2] = [0xFF, 0xD8];

    #[test]
    fn writes_one_jpeg_per_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mjpeg");

        let mut writer = MjpegClipWriter::default();
        writer.open(&path, 25.0, 8, 8).unwrap();
        assert!(writer.is_open());
        for i in 0..3 {
            writer.write(&Frame::blank(i, Local::now(), 8, 8)).unwrap();
        }
        writer.close().unwrap();
        assert!(!writer.is_open());

        let bytes = std::fs::read(&path).unwrap();
        let starts = bytes.windows(3).filter(|w| *w == [0xFF, 0xD8, 0xFF]).count();
        assert_eq!(starts, 3);
        assert_eq!(&bytes[..2], &SOI);
    }

    #[test]
    fn close_is_idempotent() {
        let mut writer = MjpegClipWriter::default();
        writer.close().unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn double_open_is_invariant_violation() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = MjpegClipWriter::default();
        writer.open(&dir.path().join("a.mjpeg"), 25.0, 4, 4).unwrap();

        let err = writer
            .open(&dir.path().join("b.mjpeg"), 25.0, 4, 4)
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn unwritable_destination_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("clip.mjpeg");

        let mut writer = MjpegClipWriter::default();
        let err = writer.open(&path, 25.0, 4, 4).unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));
        assert!(!writer.is_open());
    }
}
