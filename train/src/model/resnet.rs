use crate::{common::*, config::ResnetConfig};

/// A residual network of 3-D convolutions.
///
/// Every stage after the first halves the temporal and spatial resolution
/// and doubles the channels.
#[derive(Debug)]
pub struct Resnet {
    stem: ConvBn,
    blocks: Vec<BasicBlock>,
    head: nn::Linear,
    dropout: f64,
}

impl Resnet {
    pub fn new<'a>(
        path: impl Borrow<nn::Path<'a>>,
        config: &ResnetConfig,
        num_classes: usize,
    ) -> Result<Self> {
        let path = path.borrow();
        let ResnetConfig {
            base_channels,
            ref blocks,
            dropout,
        } = *config;
        ensure!(!blocks.is_empty(), "at least one stage is required");
        ensure!((0.0..1.0).contains(&dropout.raw()), "dropout must be in [0, 1)");

        let base_channels = base_channels.get() as i64;
        let stem = ConvBn::new(path / "stem", 3, base_channels, 2);

        let mut in_channels = base_channels;
        let mut layers = vec![];
        for (stage, num_blocks) in blocks.iter().enumerate() {
            let out_channels = base_channels << stage;
            for index in 0..num_blocks.get() {
                let stride = if stage > 0 && index == 0 { 2 } else { 1 };
                layers.push(BasicBlock::new(
                    path / format!("stage_{}_block_{}", stage, index),
                    in_channels,
                    out_channels,
                    stride,
                ));
                in_channels = out_channels;
            }
        }

        Ok(Self {
            stem,
            blocks: layers,
            head: nn::linear(path / "head", in_channels, num_classes as i64, Default::default()),
            dropout: dropout.raw(),
        })
    }

    pub fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor> {
        let (_, channels, _, _, _) = input.size5()?;
        ensure!(channels == 3, "expect 3 input channels, but get {}", channels);

        let xs = self
            .stem
            .forward_t(input, train)
            .relu()
            .max_pool3d(&[1, 3, 3], &[1, 2, 2], &[0, 1, 1], &[1, 1, 1], false);
        let xs = self
            .blocks
            .iter()
            .fold(xs, |xs, block| block.forward_t(&xs, train));
        let logits = xs
            .adaptive_avg_pool3d(&[1, 1, 1])
            .flatten(1, -1)
            .dropout(self.dropout, train)
            .apply(&self.head);
        Ok(logits)
    }
}

#[derive(Debug)]
struct ConvBn {
    conv: nn::Conv3D,
    bn: nn::BatchNorm,
}

impl ConvBn {
    fn new<'a>(path: impl Borrow<nn::Path<'a>>, in_channels: i64, out_channels: i64, stride: i64) -> Self {
        let path = path.borrow();
        let conv = nn::conv3d(
            path / "conv",
            in_channels,
            out_channels,
            3,
            nn::ConvConfig {
                stride,
                padding: 1,
                bias: false,
                ..Default::default()
            },
        );
        let bn = nn::batch_norm3d(path / "bn", out_channels, Default::default());
        Self { conv, bn }
    }

    fn forward_t(&self, input: &Tensor, train: bool) -> Tensor {
        input.apply(&self.conv).apply_t(&self.bn, train)
    }
}

#[derive(Debug)]
struct BasicBlock {
    conv1: ConvBn,
    conv2: ConvBn,
    shortcut: Option<ConvBn>,
}

impl BasicBlock {
    fn new<'a>(path: impl Borrow<nn::Path<'a>>, in_channels: i64, out_channels: i64, stride: i64) -> Self {
        let path = path.borrow();
        let shortcut = (stride != 1 || in_channels != out_channels)
            .then(|| ConvBn::new(path / "shortcut", in_channels, out_channels, stride));

        Self {
            conv1: ConvBn::new(path / "conv1", in_channels, out_channels, stride),
            conv2: ConvBn::new(path / "conv2", out_channels, out_channels, 1),
            shortcut,
        }
    }

    fn forward_t(&self, input: &Tensor, train: bool) -> Tensor {
        let residual = match &self.shortcut {
            Some(shortcut) => shortcut.forward_t(input, train),
            None => input.shallow_clone(),
        };
        let xs = self.conv1.forward_t(input, train).relu();
        (self.conv2.forward_t(&xs, train) + residual).relu()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logits_have_class_shape() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = ResnetConfig {
            base_channels: NonZeroUsize::new(4).unwrap(),
            blocks: vec![NonZeroUsize::new(1).unwrap(), NonZeroUsize::new(2).unwrap()],
            dropout: r64(0.0),
        };
        let model = Resnet::new(&vs.root(), &config, 2)?;

        let input = Tensor::rand(&[2, 3, 3, 16, 20], (Kind::Float, Device::Cpu));
        assert_eq!(model.forward_t(&input, true)?.size(), vec![2, 2]);
        assert_eq!(model.forward_t(&input, false)?.size(), vec![2, 2]);
        assert!(model.forward_t(&input.narrow(1, 0, 2), false).is_err());
        Ok(())
    }
}
