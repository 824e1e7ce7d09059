use super::{ensure_uniform_frames, frame_to_raw, rgb_frame_from_raw, FrameCodec};
use crate::common::*;
use image::{
    codecs::gif::{GifDecoder, GifEncoder},
    AnimationDecoder, Delay, Frame, RgbaImage,
};
use std::{
    fs::File,
    io::{BufReader, BufWriter},
};

/// Animated GIF codec.
///
/// Frames are composited to the full canvas by the decoder. The alpha channel
/// is dropped, and encoding writes fully opaque pixels.
#[derive(Debug, Clone, Default)]
pub struct GifCodec;

impl FrameCodec for GifCodec {
    fn decode(&self, path: &Path) -> Result<Vec<Tensor>> {
        let file = File::open(path)
            .with_context(|| format!("unable to open video '{}'", path.display()))?;
        let decoder = GifDecoder::new(BufReader::new(file))
            .with_context(|| format!("unable to read GIF header of '{}'", path.display()))?;
        let frames = decoder
            .into_frames()
            .collect_frames()
            .with_context(|| format!("unable to decode frames of '{}'", path.display()))?;

        let frames: Vec<_> = frames
            .into_iter()
            .map(|frame| {
                let buffer = frame.into_buffer();
                let (width, height) = buffer.dimensions();
                rgb_frame_from_raw(buffer.as_raw(), height as usize, width as usize, 4)
            })
            .try_collect()?;
        ensure_uniform_frames(path, &frames)?;

        Ok(frames)
    }

    fn encode(&self, path: &Path, frames: &[Tensor], fps: f64) -> Result<()> {
        ensure!(!frames.is_empty(), "refuse to write an empty video");
        ensure!(fps > 0.0, "fps must be positive, but get {}", fps);
        ensure_uniform_frames(path, frames)?;

        let delay = Delay::from_numer_denom_ms((1000.0 / fps).round().max(1.0) as u32, 1);
        let frames: Vec<_> = frames
            .iter()
            .map(|frame| -> Result<_> {
                let (height, width, rgb) = frame_to_raw(frame)?;
                let rgba: Vec<u8> = rgb
                    .chunks_exact(3)
                    .flat_map(|pixel| [pixel[0], pixel[1], pixel[2], u8::MAX])
                    .collect();
                let buffer = RgbaImage::from_raw(width as u32, height as u32, rgba)
                    .ok_or_else(|| format_err!("pixel buffer does not fit {}x{}", height, width))?;
                Ok(Frame::from_parts(buffer, 0, 0, delay))
            })
            .try_collect()?;

        let file = File::create(path)
            .with_context(|| format!("unable to create video '{}'", path.display()))?;
        let mut encoder = GifEncoder::new(BufWriter::new(file));
        encoder
            .encode_frames(frames)
            .with_context(|| format!("unable to encode frames into '{}'", path.display()))?;

        Ok(())
    }

    fn extensions(&self) -> &[&'static str] {
        &["gif"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gif_keeps_frame_count_and_size() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("clip.gif");
        let frames: Vec<_> = (0..4i64)
            .map(|index| Tensor::full(&[6, 8, 3], index * 60, (Kind::Uint8, Device::Cpu)))
            .collect();

        let codec = GifCodec::default();
        codec.encode(&path, &frames, 25.0)?;
        let decoded = codec.decode(&path)?;

        assert_eq!(decoded.len(), 4);
        decoded
            .iter()
            .for_each(|frame| assert_eq!(frame.size(), vec![6, 8, 3]));
        Ok(())
    }

    #[test]
    fn unreadable_file_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.gif");
        fs::write(&path, b"not a gif")?;

        let codec = GifCodec::default();
        assert!(codec.decode(&path).is_err());
        assert!(codec.decode(&dir.path().join("missing.gif")).is_err());
        Ok(())
    }
}
