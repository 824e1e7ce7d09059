//! Video container decoding and encoding.

mod gif;
#[cfg(feature = "opencv")]
mod opencv;

pub use self::gif::*;
#[cfg(feature = "opencv")]
pub use self::opencv::*;

use crate::common::*;

/// Number of color channels of every decoded frame.
pub const FRAME_CHANNELS: i64 = 3;

/// Turns a video file into an ordered list of RGB frames and back.
pub trait FrameCodec
where
    Self: Debug + Send + Sync,
{
    /// Decode every frame of the file in display order.
    ///
    /// Each frame is a `[height, width, 3]` uint8 tensor in RGB order. An
    /// unreadable file, or a file without frames, is an error.
    fn decode(&self, path: &Path) -> Result<Vec<Tensor>>;

    /// Write `[height, width, 3]` uint8 RGB frames into a new file.
    fn encode(&self, path: &Path, frames: &[Tensor], fps: f64) -> Result<()>;

    /// Lowercase file extensions handled by this codec, without the dot.
    fn extensions(&self) -> &[&'static str];
}

/// The codec backends selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodecKind {
    /// Animated GIF, decoded in pure Rust.
    Gif,
    /// Any container OpenCV can open. Needs the `opencv` feature.
    OpenCv,
}

impl Default for CodecKind {
    fn default() -> Self {
        Self::Gif
    }
}

impl CodecKind {
    pub fn build(self) -> Result<Arc<dyn FrameCodec>> {
        let codec: Arc<dyn FrameCodec> = match self {
            Self::Gif => Arc::new(GifCodec::default()),
            #[cfg(feature = "opencv")]
            Self::OpenCv => Arc::new(OpenCvCodec::default()),
            #[cfg(not(feature = "opencv"))]
            Self::OpenCv => bail!("the 'opencv' feature must be enabled to decode with OpenCV"),
        };
        Ok(codec)
    }
}

/// Build an RGB frame from packed pixel bytes.
///
/// `raw` holds `height × width × channels` bytes in row-major order. Only the
/// first three channels are kept.
pub fn rgb_frame_from_raw(raw: &[u8], height: usize, width: usize, channels: usize) -> Result<Tensor> {
    ensure!(
        channels >= FRAME_CHANNELS as usize,
        "expect at least {} channels, but get {}",
        FRAME_CHANNELS,
        channels
    );
    ensure!(
        raw.len() == height * width * channels,
        "expect {} bytes for a {}x{}x{} frame, but get {}",
        height * width * channels,
        height,
        width,
        channels,
        raw.len()
    );

    let frame = Tensor::of_slice(raw)
        .view([height as i64, width as i64, channels as i64])
        .narrow(2, 0, FRAME_CHANNELS)
        .contiguous();
    Ok(frame)
}

/// Flatten an RGB frame into packed uint8 bytes.
pub fn frame_to_raw(frame: &Tensor) -> Result<(usize, usize, Vec<u8>)> {
    let (height, width, channels) = frame.size3()?;
    ensure!(
        channels == FRAME_CHANNELS,
        "expect a [height, width, {}] frame, but get {:?}",
        FRAME_CHANNELS,
        frame.size()
    );
    let raw = Vec::<u8>::from(
        &frame
            .to_device(Device::Cpu)
            .to_kind(Kind::Uint8)
            .contiguous()
            .view([-1]),
    );
    Ok((height as usize, width as usize, raw))
}

/// Check that all frames of a video share one size.
pub fn ensure_uniform_frames(path: &Path, frames: &[Tensor]) -> Result<()> {
    let first = match frames.first() {
        Some(first) => first.size(),
        None => bail!("video '{}' contains no frames", path.display()),
    };

    frames.iter().enumerate().try_for_each(|(index, frame)| {
        let size = frame.size();
        ensure!(
            size == first,
            "frame {} of '{}' has shape {:?}, but the first frame has {:?}",
            index,
            path.display(),
            size,
            first
        );
        Ok(())
    })
}

/// Whether the file name carries one of the extensions, ignoring case.
pub fn has_extension<S>(path: &Path, extensions: &[S]) -> bool
where
    S: AsRef<str>,
{
    let ext = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => ext.to_lowercase(),
        None => return false,
    };
    extensions
        .iter()
        .any(|allowed| allowed.as_ref().trim_start_matches('.').eq_ignore_ascii_case(&ext))
}
