use super::{ensure_uniform_frames, frame_to_raw, rgb_frame_from_raw, FrameCodec};
use crate::common::*;
use opencv::{
    core::{Mat, Size, CV_8UC3},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};

/// Codec backed by OpenCV's video I/O.
///
/// Decoded BGR frames are converted to RGB. Encoding writes XVID streams.
#[derive(Debug, Clone, Default)]
pub struct OpenCvCodec;

impl FrameCodec for OpenCvCodec {
    fn decode(&self, path: &Path) -> Result<Vec<Tensor>> {
        let path_str = path
            .to_str()
            .ok_or_else(|| format_err!("non-unicode path '{}'", path.display()))?;
        let mut capture = VideoCapture::from_file(path_str, videoio::CAP_ANY)?;
        ensure!(
            capture.is_opened()?,
            "unable to open video '{}'",
            path.display()
        );

        let mut frames = vec![];
        let mut bgr = Mat::default();
        while capture.read(&mut bgr)? {
            let mut rgb = Mat::default();
            imgproc::cvt_color(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
            let Size { width, height } = rgb.size()?;
            let channels = rgb.channels()? as usize;
            let frame =
                rgb_frame_from_raw(rgb.data_bytes()?, height as usize, width as usize, channels)?;
            frames.push(frame);
        }
        capture.release()?;

        ensure_uniform_frames(path, &frames)?;
        Ok(frames)
    }

    fn encode(&self, path: &Path, frames: &[Tensor], fps: f64) -> Result<()> {
        ensure_uniform_frames(path, frames)?;
        let (height, width, _) = frames[0].size3()?;
        let path_str = path
            .to_str()
            .ok_or_else(|| format_err!("non-unicode path '{}'", path.display()))?;

        let fourcc = VideoWriter::fourcc('X', 'V', 'I', 'D')?;
        let mut writer = VideoWriter::new(
            path_str,
            fourcc,
            fps,
            Size::new(width as i32, height as i32),
            true,
        )?;
        ensure!(
            writer.is_opened()?,
            "unable to create video '{}'",
            path.display()
        );

        for frame in frames {
            let (height, width, raw) = frame_to_raw(frame)?;
            let rgb = Mat::from_slice(&raw)?.reshape(3, height as i32)?;
            let mut bgr = Mat::default();
            imgproc::cvt_color(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR, 0)?;
            debug_assert_eq!(bgr.typ()?, CV_8UC3);
            debug_assert_eq!(bgr.cols() as usize, width);
            writer.write(&bgr)?;
        }
        writer.release()?;

        Ok(())
    }

    fn extensions(&self) -> &[&'static str] {
        &["avi", "mp4", "mkv"]
    }
}
