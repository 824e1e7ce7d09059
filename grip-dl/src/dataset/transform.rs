use crate::{codec::FRAME_CHANNELS, common::*};

/// Converts a decoded frame into the tensor layout fed to the model.
pub trait FrameTransform
where
    Self: Debug + Send + Sync,
{
    /// Map a `[height, width, 3]` uint8 frame to a `[3, height, width]` tensor.
    fn forward(&self, frame: &Tensor) -> Result<Tensor>;
}

/// Scales uint8 pixels to floats in `[0, 1]` and moves channels first.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToFloatTensor;

impl FrameTransform for ToFloatTensor {
    fn forward(&self, frame: &Tensor) -> Result<Tensor> {
        let (_, _, channels) = frame.size3()?;
        ensure!(
            channels == FRAME_CHANNELS,
            "expect a [height, width, {}] frame, but get {:?}",
            FRAME_CHANNELS,
            frame.size()
        );
        let output = frame.permute(&[2, 0, 1]).to_kind(Kind::Float) / 255.0;
        Ok(output.contiguous())
    }
}

/// Normalizes channels with per-channel mean and standard deviation after
/// [ToFloatTensor].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalize {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl FrameTransform for Normalize {
    fn forward(&self, frame: &Tensor) -> Result<Tensor> {
        ensure!(
            self.std.iter().all(|&std| std > 0.0),
            "std must be positive, but get {:?}",
            self.std
        );
        let frame = ToFloatTensor.forward(frame)?;
        let mean = Tensor::of_slice(&self.mean).view([3, 1, 1]);
        let std = Tensor::of_slice(&self.std).view([3, 1, 1]);
        Ok((frame - mean) / std)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn to_float_tensor_moves_channels_first() -> Result<()> {
        let frame = Tensor::full(&[4, 6, 3], 255i64, (Kind::Uint8, Device::Cpu));
        let output = ToFloatTensor.forward(&frame)?;
        assert_eq!(output.size(), vec![3, 4, 6]);
        assert_eq!(output.kind(), Kind::Float);
        assert_abs_diff_eq!(f64::from(output.max()), 1.0);
        Ok(())
    }

    #[test]
    fn normalize_centers_values() -> Result<()> {
        let frame = Tensor::full(&[2, 2, 3], 255i64, (Kind::Uint8, Device::Cpu));
        let transform = Normalize {
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.5, 0.5],
        };
        let output = transform.forward(&frame)?;
        assert_abs_diff_eq!(f64::from(output.mean(Kind::Float)), 1.0, epsilon = 1e-6);
        Ok(())
    }
}
