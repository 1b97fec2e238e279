//! OpenCV-backed frame source, clip container and annotator.

use chrono::Local;
use image::RgbImage;
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
    videoio,
};
use std::path::Path;
use tracing::info;

use crate::annotate::Annotator;
use crate::clip::ClipWriter;
use crate::detection::DetectionSet;
use crate::error::Error;
use crate::frame::Frame;
use crate::source::FrameSource;

pub fn mat_to_rgb(mat: &Mat) -> Result<RgbImage, Error> {
    let mut rgb = Mat::default();
    imgproc::cvt_color(mat, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

    let (w, h) = (rgb.cols() as u32, rgb.rows() as u32);
    let data = rgb.data_bytes()?.to_vec();

    RgbImage::from_raw(w, h, data)
        .ok_or_else(|| Error::Source(format!("unexpected frame layout {}x{}", w, h)))
}

pub fn rgb_to_mat(img: &RgbImage) -> Result<Mat, Error> {
    let flat = Mat::from_slice(img.as_raw())?;
    let shaped = flat.reshape(3, img.height() as i32)?;

    let mut bgr = Mat::default();
    imgproc::cvt_color(&*shaped, &mut bgr, imgproc::COLOR_RGB2BGR, 0)?;

    Ok(bgr)
}

pub struct VideoFileSource {
    cam: videoio::VideoCapture,
    fps: f64,
    dims: (u32, u32),
    next_index: u64,
}

impl VideoFileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let name = path.to_string_lossy();
        let cam = videoio::VideoCapture::from_file(&name, videoio::CAP_ANY)?;
        if !videoio::VideoCapture::is_opened(&cam)? {
            return Err(Error::Source(format!("unable to open {}", name)));
        }

        let fps = cam.get(videoio::CAP_PROP_FPS)?;
        let width = cam.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
        let height = cam.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;
        let total = cam.get(videoio::CAP_PROP_FRAME_COUNT)? as i64;

        info!(video = %name, width, height, fps, total, "video opened");

        Ok(Self {
            cam,
            fps,
            dims: (width, height),
            next_index: 0,
        })
    }
}

impl FrameSource for VideoFileSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn dims(&self) -> (u32, u32) {
        self.dims
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        let mut mat = Mat::default();
        if !self.cam.read(&mut mat)? || mat.rows() == 0 || mat.cols() == 0 {
            return Ok(None);
        }

        let frame = Frame::new(self.next_index, Local::now(), mat_to_rgb(&mat)?);
        self.next_index += 1;

        Ok(Some(frame))
    }
}

/// XVID in an AVI container.
#[derive(Default)]
pub struct OpenCvClipWriter {
    writer: Option<videoio::VideoWriter>,
}

impl ClipWriter for OpenCvClipWriter {
    fn extension(&self) -> &'static str {
        "avi"
    }

    fn open(&mut self, path: &Path, fps: f64, width: u32, height: u32) -> Result<(), Error> {
        if self.writer.is_some() {
            return Err(Error::InvariantViolation("clip writer opened twice"));
        }

        let writer = videoio::VideoWriter::new(
            &path.to_string_lossy(),
            videoio::VideoWriter::fourcc('X', 'V', 'I', 'D')?,
            fps,
            core::Size::new(width as i32, height as i32),
            true,
        )?;

        if !writer.is_opened()? {
            return Err(Error::storage(
                path,
                std::io::Error::new(std::io::ErrorKind::Other, "video writer did not open"),
            ));
        }

        self.writer = Some(writer);
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> Result<(), Error> {
        let writer = self
            .writer
            .as_mut()
            .ok_or(Error::InvariantViolation("write to a closed clip writer"))?;

        writer.write(&rgb_to_mat(&frame.pixels)?)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        if let Some(mut w) = self.writer.take() {
            w.release()?;
        }

        Ok(())
    }

    fn is_open(&self) -> bool {
        self.writer.is_some()
    }
}

impl Drop for OpenCvClipWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Red box plus `label confidence` text above it.
pub struct TextAnnotator {
    threshold: f32,
}

impl TextAnnotator {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    fn draw(&self, frame: &Frame, detections: &DetectionSet) -> Result<RgbImage, Error> {
        let mut mat = rgb_to_mat(&frame.pixels)?;
        let red = core::Scalar::new(0.0, 0.0, 255.0, 0.0);

        for det in detections.confident(self.threshold) {
            let b = det.bbox.as_ltwh();
            let rect = core::Rect::new(
                b.left() as i32,
                b.top() as i32,
                b.width() as i32,
                b.height() as i32,
            );

            imgproc::rectangle(&mut mat, rect, red, 2, imgproc::LINE_8, 0)?;
            imgproc::put_text(
                &mut mat,
                &format!("{} {:.2}", det.label.as_str(), det.confidence),
                core::Point::new(b.left() as i32, b.top() as i32 - 10),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.6,
                red,
                2,
                imgproc::LINE_8,
                false,
            )?;
        }

        mat_to_rgb(&mat)
    }
}

impl Annotator for TextAnnotator {
    fn annotate(&self, frame: &Frame, detections: &DetectionSet) -> Frame {
        if detections.confident(self.threshold).next().is_none() {
            return frame.clone();
        }

        match self.draw(frame, detections) {
            Ok(img) => frame.with_pixels(img),
            Err(err) => {
                tracing::debug!(frame = frame.index, error = %err, "annotation skipped");
                frame.clone()
            }
        }
    }
}
