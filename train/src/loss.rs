//! Classification loss and regularization.

use crate::common::*;

/// Cross entropy of logits against class indices.
#[derive(Debug)]
pub struct CrossEntropyLoss {
    reduction: Reduction,
}

impl CrossEntropyLoss {
    pub fn new(reduction: Reduction) -> Self {
        Self { reduction }
    }

    /// Compute the loss of `[batch, classes]` logits for `[batch]` int64
    /// targets.
    pub fn forward(&self, input: &Tensor, target: &Tensor) -> Result<Tensor> {
        let (batch_size, num_classes) = input.size2()?;
        ensure!(
            target.kind() == Kind::Int64 && target.size1()? == batch_size,
            "expect target a [{}] int64 tensor",
            batch_size
        );
        debug_assert!(
            batch_size == 0
                || (i64::from(target.min()) >= 0 && i64::from(target.max()) < num_classes),
            "target values must be in range of [0, {})",
            num_classes
        );

        // return zero tensor if (1) input is empty and (2) using mean reduction
        if batch_size == 0 && self.reduction == Reduction::Mean {
            return Ok(Tensor::zeros(&[], (Kind::Float, input.device())).set_requires_grad(false));
        }

        let loss = -input
            .log_softmax(-1, Kind::Float)
            .gather(1, &target.unsqueeze(1), false)
            .squeeze_dim(1);

        let loss = match self.reduction {
            Reduction::None => loss,
            Reduction::Sum => loss.sum(Kind::Float),
            Reduction::Mean => loss.mean(Kind::Float),
            Reduction::Other(_) => bail!("unsupported reduction"),
        };
        Ok(loss)
    }
}

/// The L2 penalty `0.5 × weight_decay × Σ‖p‖²` over parameters.
pub fn l2_penalty(params: &[Tensor], weight_decay: f64, device: Device) -> Tensor {
    let sum_of_squares = params.iter().fold(
        Tensor::zeros(&[], (Kind::Float, device)),
        |sum, param| sum + (param * param).sum(Kind::Float),
    );
    sum_of_squares * (0.5 * weight_decay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tch::nn::OptimizerConfig as _;

    #[test]
    fn cross_entropy_loss() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(0);
        let device = Device::Cpu;

        let n_batch = 32;
        let n_class = rng.gen_range(2..10);

        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let loss_fn = CrossEntropyLoss::new(Reduction::Mean);

        let input = root.randn("input", &[n_batch, n_class], 0.0, 100.0);
        let target =
            Tensor::randint(n_class, &[n_batch], (Kind::Int64, device)).set_requires_grad(false);

        let mut optimizer = nn::Adam::default().build(&vs, 1.0)?;

        for _ in 0..1000 {
            let loss = loss_fn.forward(&input, &target)?;
            optimizer.backward_step(&loss);
        }

        assert!(bool::from(input.argmax(1, false).eq_tensor(&target).all()));
        Ok(())
    }

    #[test]
    fn matches_builtin_cross_entropy() -> Result<()> {
        let input = Tensor::of_slice(&[2.0f32, -1.0, 0.5, 0.5, -3.0, 1.0]).view([3, 2]);
        let target = Tensor::of_slice(&[0i64, 1, 1]);

        let loss = CrossEntropyLoss::new(Reduction::Mean).forward(&input, &target)?;
        let expect = input.cross_entropy_for_logits(&target);
        assert_abs_diff_eq!(f64::from(&loss), f64::from(&expect), epsilon = 1e-6);

        let per_sample = CrossEntropyLoss::new(Reduction::None).forward(&input, &target)?;
        assert_eq!(per_sample.size(), vec![3]);
        Ok(())
    }

    #[test]
    fn l2_penalty_is_half_weighted_square_norm() {
        let params = vec![
            Tensor::of_slice(&[1.0f32, 2.0]),
            Tensor::of_slice(&[2.0f32]),
        ];
        let penalty = l2_penalty(&params, 0.1, Device::Cpu);
        assert_abs_diff_eq!(f64::from(&penalty), 0.45, epsilon = 1e-6);
    }
}
