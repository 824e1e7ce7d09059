//! Frame filters for offline augmentation of the raw footage.
//!
//! Filters run while the dataset is prepared, never inside the training loop.
//! Every filter takes and returns a `[height, width, 3]` uint8 RGB frame of
//! the same size.

use crate::{
    codec::{has_extension, FrameCodec},
    common::*,
    utils::find_files,
};
use rand_distr::{Distribution, Normal};

/// Prefix of the file names written by [augment_videos].
pub const AUGMENTED_PREFIX: &str = "aug_";

/// A dimension-preserving frame filter.
pub trait AugmentFilter
where
    Self: Debug + Send + Sync,
{
    /// Filter one frame. Random filters draw from `rng` only.
    fn apply(&self, frame: &Tensor, rng: &mut StdRng) -> Result<Tensor>;
}

/// Adds rounded zero-mean Gaussian noise and saturates to `[0, 255]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianNoise {
    pub std: R64,
}

impl AugmentFilter for GaussianNoise {
    fn apply(&self, frame: &Tensor, rng: &mut StdRng) -> Result<Tensor> {
        let size = frame.size();
        let numel = size.iter().product::<i64>() as usize;
        let std = self.std.raw();
        ensure!(std >= 0.0, "noise std must be non-negative");
        let normal = Normal::new(0.0, std)
            .map_err(|err| format_err!("invalid noise std {}: {}", std, err))?;

        let noise: Vec<f32> = normal
            .sample_iter(rng)
            .take(numel)
            .map(|value: f64| value.round() as f32)
            .collect();
        let noise = Tensor::of_slice(&noise).view(size.as_slice());
        let output = (frame.to_kind(Kind::Float) + noise)
            .clamp(0.0, 255.0)
            .to_kind(Kind::Uint8);
        Ok(output)
    }
}

/// Swaps the red and blue channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRedBlue;

impl AugmentFilter for SwapRedBlue {
    fn apply(&self, frame: &Tensor, _rng: &mut StdRng) -> Result<Tensor> {
        ensure_rgb(frame)?;
        Ok(frame.flip(&[2]).contiguous())
    }
}

/// Mirrors the frame left to right.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HorizontalFlip;

impl AugmentFilter for HorizontalFlip {
    fn apply(&self, frame: &Tensor, _rng: &mut StdRng) -> Result<Tensor> {
        ensure_rgb(frame)?;
        Ok(frame.flip(&[1]).contiguous())
    }
}

/// Crops away dark borders and stretches the content back to the frame size.
///
/// A pixel is content when its gray level exceeds `threshold`. Frames without
/// any content pixel pass through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorderCrop {
    pub threshold: u8,
}

impl Default for BorderCrop {
    fn default() -> Self {
        Self { threshold: 1 }
    }
}

impl AugmentFilter for BorderCrop {
    fn apply(&self, frame: &Tensor, _rng: &mut StdRng) -> Result<Tensor> {
        let (height, width, _) = ensure_rgb(frame)?;

        let mask = frame
            .to_kind(Kind::Float)
            .mean_dim(&[2], false, Kind::Float)
            .gt(self.threshold as f64)
            .to_kind(Kind::Uint8);
        let mask = Vec::<u8>::from(&mask.view([-1]));

        let (mut top, mut left, mut bottom, mut right) = (height, width, -1, -1);
        izip!(0.., mask.chunks_exact(width as usize)).for_each(|(row, pixels)| {
            pixels
                .iter()
                .enumerate()
                .filter(|(_, &value)| value != 0)
                .for_each(|(col, _)| {
                    let col = col as i64;
                    top = top.min(row);
                    bottom = bottom.max(row);
                    left = left.min(col);
                    right = right.max(col);
                });
        });

        if bottom < 0 {
            return Ok(frame.shallow_clone());
        }

        let cropped = frame
            .narrow(0, top, bottom - top + 1)
            .narrow(1, left, right - left + 1)
            .permute(&[2, 0, 1])
            .contiguous();
        let resized = vision::image::resize(&cropped, width, height)?;
        Ok(resized.permute(&[1, 2, 0]).contiguous())
    }
}

/// Applies filters one after another.
#[derive(Debug, Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn AugmentFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F>(mut self, filter: F) -> Self
    where
        F: 'static + AugmentFilter,
    {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl AugmentFilter for FilterChain {
    fn apply(&self, frame: &Tensor, rng: &mut StdRng) -> Result<Tensor> {
        self.filters
            .iter()
            .try_fold(frame.shallow_clone(), |frame, filter| filter.apply(&frame, rng))
    }
}

/// Write an augmented copy `aug_{name}` next to every video under `dir`.
///
/// Files already carrying the prefix are not augmented again. Returns the
/// paths of the written files.
pub fn augment_videos(
    dir: impl AsRef<Path>,
    codec: &dyn FrameCodec,
    filter: &dyn AugmentFilter,
    fps: f64,
    rng: &mut StdRng,
) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let sources: Vec<_> = find_files(dir, true)?
        .into_iter()
        .filter(|path| has_extension(path, codec.extensions()))
        .filter(|path| {
            !path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with(AUGMENTED_PREFIX))
                .unwrap_or(false)
        })
        .collect();

    sources
        .into_iter()
        .map(|source| -> Result<_> {
            let file_name = source
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| format_err!("non-unicode file name '{}'", source.display()))?;
            let target = source.with_file_name(format!("{}{}", AUGMENTED_PREFIX, file_name));

            let frames: Vec<_> = codec
                .decode(&source)?
                .iter()
                .map(|frame| -> Result<_> {
                    let output = filter.apply(frame, rng)?;
                    ensure!(
                        output.size() == frame.size(),
                        "filter changed frame shape from {:?} to {:?}",
                        frame.size(),
                        output.size()
                    );
                    Ok(output)
                })
                .try_collect()?;
            codec.encode(&target, &frames, fps)?;
            info!("augmented '{}' into '{}'", source.display(), target.display());

            Ok(target)
        })
        .try_collect()
}

fn ensure_rgb(frame: &Tensor) -> Result<(i64, i64, i64)> {
    let shape = frame.size3()?;
    ensure!(
        shape.2 == 3,
        "expect a [height, width, 3] frame, but get {:?}",
        frame.size()
    );
    Ok(shape)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_frame() -> Tensor {
        Tensor::arange(60i64, (Kind::Int64, Device::Cpu))
            .view([4, 5, 3])
            .to_kind(Kind::Uint8)
    }

    #[test]
    fn swap_and_flip_preserve_shape() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(0);
        let frame = gradient_frame();

        let swapped = SwapRedBlue.apply(&frame, &mut rng)?;
        assert_eq!(swapped.size(), frame.size());
        assert_eq!(i64::from(swapped.i((0i64, 0i64, 0i64))), i64::from(frame.i((0i64, 0i64, 2i64))));

        let flipped = HorizontalFlip.apply(&frame, &mut rng)?;
        assert_eq!(flipped.size(), frame.size());
        assert_eq!(i64::from(flipped.i((0i64, 0i64, 0i64))), i64::from(frame.i((0i64, 4i64, 0i64))));
        Ok(())
    }

    #[test]
    fn noise_is_reproducible_with_seed() -> Result<()> {
        let frame = Tensor::full(&[4, 5, 3], 128i64, (Kind::Uint8, Device::Cpu));
        let filter = GaussianNoise { std: r64(15.0) };

        let lhs = filter.apply(&frame, &mut StdRng::seed_from_u64(7))?;
        let rhs = filter.apply(&frame, &mut StdRng::seed_from_u64(7))?;
        assert_eq!(lhs.size(), frame.size());
        assert_eq!(lhs.kind(), Kind::Uint8);
        assert!(lhs.equal(&rhs));
        Ok(())
    }

    #[test]
    fn zero_noise_keeps_frame_and_negative_std_fails() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(1);
        let frame = gradient_frame();
        let output = GaussianNoise { std: r64(0.0) }.apply(&frame, &mut rng)?;
        assert!(output.equal(&frame));
        assert!(GaussianNoise { std: r64(-1.0) }.apply(&frame, &mut rng).is_err());
        Ok(())
    }

    #[test]
    fn border_crop_stretches_content() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(0);
        let frame = Tensor::zeros(&[8, 8, 3], (Kind::Uint8, Device::Cpu));
        let _ = frame.narrow(0, 2, 4).narrow(1, 2, 4).fill_(200i64);

        let cropped = BorderCrop::default().apply(&frame, &mut rng)?;
        assert_eq!(cropped.size(), vec![8, 8, 3]);
        assert!(i64::from(cropped.i((0i64, 0i64, 0i64))) > 100);

        let black = Tensor::zeros(&[8, 8, 3], (Kind::Uint8, Device::Cpu));
        assert!(BorderCrop::default().apply(&black, &mut rng)?.equal(&black));
        Ok(())
    }

    #[test]
    fn chain_applies_in_order() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(0);
        let frame = gradient_frame();
        let chain = FilterChain::new().push(HorizontalFlip).push(HorizontalFlip);
        assert!(chain.apply(&frame, &mut rng)?.equal(&frame));
        Ok(())
    }
}
