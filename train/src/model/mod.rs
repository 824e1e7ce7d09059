//! The model adaptor.

mod resnet;
mod vvt;

pub use resnet::*;
pub use vvt::*;

use crate::{
    common::*,
    config::{ModelConfig, ModelFamily},
};

/// The generic model adaptor.
#[derive(Debug)]
pub enum Model {
    Vvt(Vvt),
    Resnet(Resnet),
}

impl Model {
    /// Builds a model for `num_classes` classes under `path`.
    pub fn new<'a>(
        path: impl Borrow<nn::Path<'a>>,
        config: &ModelConfig,
        num_classes: usize,
    ) -> Result<Self> {
        ensure!(num_classes > 0, "the number of classes must be positive");
        let model = match config {
            ModelConfig::Vvt(config) => Self::Vvt(Vvt::new(path, config, num_classes)?),
            ModelConfig::Resnet(config) => Self::Resnet(Resnet::new(path, config, num_classes)?),
        };
        Ok(model)
    }

    pub fn family(&self) -> ModelFamily {
        match self {
            Self::Vvt(_) => ModelFamily::Vvt,
            Self::Resnet(_) => ModelFamily::Resnet,
        }
    }

    /// Map `[batch, 3, frames, height, width]` clips to `[batch, classes]`
    /// logits.
    pub fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor> {
        match self {
            Self::Vvt(model) => model.forward_t(input, train),
            Self::Resnet(model) => model.forward_t(input, train),
        }
    }
}
