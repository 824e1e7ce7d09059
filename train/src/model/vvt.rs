use crate::{common::*, config::VvtConfig};

/// A factorized video transformer.
///
/// Each clip is cut into tubelets of `frame_patch_size` frames by one spatial
/// patch. A spatial encoder attends over the patches of each temporal index,
/// then a temporal encoder attends over the pooled temporal tokens.
#[derive(Debug)]
pub struct Vvt {
    image_size: [i64; 2],
    patch_size: [i64; 2],
    num_frames: i64,
    frame_patch_size: i64,
    patch_norm: nn::LayerNorm,
    patch_embedding: nn::Linear,
    embedding_norm: nn::LayerNorm,
    pos_embedding: Tensor,
    spatial: Transformer,
    temporal: Transformer,
    head: nn::Linear,
    dropout: f64,
}

impl Vvt {
    pub fn new<'a>(
        path: impl Borrow<nn::Path<'a>>,
        config: &VvtConfig,
        num_classes: usize,
    ) -> Result<Self> {
        let path = path.borrow();
        let VvtConfig {
            image_size,
            patch_size,
            num_frames,
            frame_patch_size,
            dim,
            spatial_depth,
            temporal_depth,
            heads,
            dim_head,
            mlp_dim,
            dropout,
        } = *config;

        let image_size = [image_size[0].get() as i64, image_size[1].get() as i64];
        let patch_size = [patch_size[0].get() as i64, patch_size[1].get() as i64];
        let num_frames = num_frames.get() as i64;
        let frame_patch_size = frame_patch_size.map(|size| size.get() as i64).unwrap_or(num_frames);
        let dim = dim.get() as i64;
        ensure!(
            image_size[0] % patch_size[0] == 0 && image_size[1] % patch_size[1] == 0,
            "image size {:?} must be divisible by patch size {:?}",
            image_size,
            patch_size
        );
        ensure!(
            num_frames % frame_patch_size == 0,
            "{} frames must be divisible by frame patch size {}",
            num_frames,
            frame_patch_size
        );
        ensure!((0.0..1.0).contains(&dropout.raw()), "dropout must be in [0, 1)");

        let num_patches = (image_size[0] / patch_size[0]) * (image_size[1] / patch_size[1]);
        let num_temporal = num_frames / frame_patch_size;
        let patch_dim = 3 * frame_patch_size * patch_size[0] * patch_size[1];
        let attention = AttentionConfig {
            dim,
            heads: heads.get() as i64,
            dim_head: dim_head.get() as i64,
            mlp_dim: mlp_dim.get() as i64,
            dropout: dropout.raw(),
        };

        Ok(Self {
            image_size,
            patch_size,
            num_frames,
            frame_patch_size,
            patch_norm: nn::layer_norm(path / "patch_norm", vec![patch_dim], Default::default()),
            patch_embedding: nn::linear(
                path / "patch_embedding",
                patch_dim,
                dim,
                Default::default(),
            ),
            embedding_norm: nn::layer_norm(path / "embedding_norm", vec![dim], Default::default()),
            pos_embedding: path.randn(
                "pos_embedding",
                &[1, num_temporal, num_patches, dim],
                0.0,
                1.0,
            ),
            spatial: Transformer::new(path / "spatial", &attention, spatial_depth),
            temporal: Transformer::new(path / "temporal", &attention, temporal_depth),
            head: nn::linear(path / "head", dim, num_classes as i64, Default::default()),
            dropout: dropout.raw(),
        })
    }

    pub fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor> {
        let (batch_size, channels, frames, height, width) = input.size5()?;
        ensure!(
            channels == 3
                && frames == self.num_frames
                && [height, width] == self.image_size,
            "expect [_, 3, {}, {}, {}] clips, but get {:?}",
            self.num_frames,
            self.image_size[0],
            self.image_size[1],
            input.size()
        );

        let [patch_h, patch_w] = self.patch_size;
        let frame_patch = self.frame_patch_size;
        let (grid_h, grid_w) = (height / patch_h, width / patch_w);
        let num_temporal = frames / frame_patch;
        let num_patches = grid_h * grid_w;

        // [b, c, t * pf, gh * ph, gw * pw] -> [b, t, gh * gw, pf * ph * pw * c]
        let patches = input
            .reshape(&[
                batch_size,
                channels,
                num_temporal,
                frame_patch,
                grid_h,
                patch_h,
                grid_w,
                patch_w,
            ])
            .permute(&[0, 2, 4, 6, 3, 5, 7, 1])
            .reshape(&[batch_size, num_temporal, num_patches, -1]);

        let tokens = patches
            .apply(&self.patch_norm)
            .apply(&self.patch_embedding)
            .apply(&self.embedding_norm)
            + &self.pos_embedding;
        let tokens = tokens.dropout(self.dropout, train);
        let dim = tokens.size()[3];

        let spatial = self
            .spatial
            .forward_t(&tokens.reshape(&[batch_size * num_temporal, num_patches, dim]), train)?
            .mean_dim(&[1], false, Kind::Float)
            .reshape(&[batch_size, num_temporal, dim]);
        let temporal = self
            .temporal
            .forward_t(&spatial, train)?
            .mean_dim(&[1], false, Kind::Float);

        Ok(temporal.apply(&self.head))
    }
}

#[derive(Debug, Clone, Copy)]
struct AttentionConfig {
    dim: i64,
    heads: i64,
    dim_head: i64,
    mlp_dim: i64,
    dropout: f64,
}

/// Pre-norm multi-head self attention.
#[derive(Debug)]
struct Attention {
    norm: nn::LayerNorm,
    qkv: nn::Linear,
    output: nn::Linear,
    heads: i64,
    dim_head: i64,
    dropout: f64,
}

impl Attention {
    fn new<'a>(path: impl Borrow<nn::Path<'a>>, config: &AttentionConfig) -> Self {
        let path = path.borrow();
        let AttentionConfig {
            dim,
            heads,
            dim_head,
            dropout,
            ..
        } = *config;
        let inner_dim = heads * dim_head;

        Self {
            norm: nn::layer_norm(path / "norm", vec![dim], Default::default()),
            qkv: nn::linear(
                path / "qkv",
                dim,
                inner_dim * 3,
                nn::LinearConfig {
                    bias: false,
                    ..Default::default()
                },
            ),
            output: nn::linear(path / "output", inner_dim, dim, Default::default()),
            heads,
            dim_head,
            dropout,
        }
    }

    fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor> {
        let (batch_size, num_tokens, _) = input.size3()?;
        let qkv = input.apply(&self.norm).apply(&self.qkv).chunk(3, -1);
        let split_heads = |xs: &Tensor| {
            xs.reshape(&[batch_size, num_tokens, self.heads, self.dim_head])
                .permute(&[0, 2, 1, 3])
        };
        let (query, key, value) = (split_heads(&qkv[0]), split_heads(&qkv[1]), split_heads(&qkv[2]));

        let scale = (self.dim_head as f64).powf(-0.5);
        let weights = (query.matmul(&key.transpose(-2, -1)) * scale)
            .softmax(-1, Kind::Float)
            .dropout(self.dropout, train);
        let output = weights
            .matmul(&value)
            .permute(&[0, 2, 1, 3])
            .reshape(&[batch_size, num_tokens, self.heads * self.dim_head])
            .apply(&self.output)
            .dropout(self.dropout, train);
        Ok(output)
    }
}

/// Pre-norm two layer perceptron.
#[derive(Debug)]
struct FeedForward {
    norm: nn::LayerNorm,
    hidden: nn::Linear,
    output: nn::Linear,
    dropout: f64,
}

impl FeedForward {
    fn new<'a>(path: impl Borrow<nn::Path<'a>>, config: &AttentionConfig) -> Self {
        let path = path.borrow();
        let AttentionConfig {
            dim,
            mlp_dim,
            dropout,
            ..
        } = *config;

        Self {
            norm: nn::layer_norm(path / "norm", vec![dim], Default::default()),
            hidden: nn::linear(path / "hidden", dim, mlp_dim, Default::default()),
            output: nn::linear(path / "output", mlp_dim, dim, Default::default()),
            dropout,
        }
    }

    fn forward_t(&self, input: &Tensor, train: bool) -> Tensor {
        input
            .apply(&self.norm)
            .apply(&self.hidden)
            .relu()
            .dropout(self.dropout, train)
            .apply(&self.output)
            .dropout(self.dropout, train)
    }
}

/// A stack of residual attention and feed-forward blocks.
#[derive(Debug)]
struct Transformer {
    layers: Vec<(Attention, FeedForward)>,
    norm: nn::LayerNorm,
}

impl Transformer {
    fn new<'a>(path: impl Borrow<nn::Path<'a>>, config: &AttentionConfig, depth: usize) -> Self {
        let path = path.borrow();
        let layers = (0..depth)
            .map(|index| {
                let layer = path / format!("layer_{}", index);
                (
                    Attention::new(&layer / "attention", config),
                    FeedForward::new(&layer / "feed_forward", config),
                )
            })
            .collect();

        Self {
            layers,
            norm: nn::layer_norm(path / "norm", vec![config.dim], Default::default()),
        }
    }

    fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor> {
        let output = self.layers.iter().try_fold(
            input.shallow_clone(),
            |xs, (attention, feed_forward)| -> Result<_> {
                let xs = attention.forward_t(&xs, train)? + &xs;
                let xs = feed_forward.forward_t(&xs, train) + &xs;
                Ok(xs)
            },
        )?;
        Ok(output.apply(&self.norm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> VvtConfig {
        let nz = |value| NonZeroUsize::new(value).unwrap();
        VvtConfig {
            image_size: [nz(8), nz(12)],
            patch_size: [nz(4), nz(4)],
            num_frames: nz(2),
            frame_patch_size: None,
            dim: nz(8),
            spatial_depth: 1,
            temporal_depth: 1,
            heads: nz(2),
            dim_head: nz(4),
            mlp_dim: nz(8),
            dropout: r64(0.1),
        }
    }

    #[test]
    fn logits_have_class_shape() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let model = Vvt::new(&vs.root(), &config(), 2)?;

        let input = Tensor::rand(&[3, 3, 2, 8, 12], (Kind::Float, Device::Cpu));
        assert_eq!(model.forward_t(&input, true)?.size(), vec![3, 2]);
        assert_eq!(model.forward_t(&input, false)?.size(), vec![3, 2]);

        let wrong = Tensor::rand(&[3, 3, 4, 8, 12], (Kind::Float, Device::Cpu));
        assert!(model.forward_t(&wrong, false).is_err());
        Ok(())
    }

    #[test]
    fn indivisible_patches_are_rejected() {
        let vs = nn::VarStore::new(Device::Cpu);
        let mut config = config();
        config.patch_size = [NonZeroUsize::new(5).unwrap(), NonZeroUsize::new(4).unwrap()];
        assert!(Vvt::new(&vs.root(), &config, 2).is_err());
    }
}
