use crate::{common::*, config::OptimizerConfig};

/// Adam over the trainable variables of a var store.
///
/// The moment buffers and the step counter are exposed as named tensors, so
/// the complete optimizer state fits in a checkpoint.
#[derive(Debug)]
pub struct Adam {
    names: Vec<String>,
    params: Vec<Tensor>,
    exp_avg: Vec<Tensor>,
    exp_avg_sq: Vec<Tensor>,
    step: i64,
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    weight_decay: f64,
}

impl Adam {
    pub fn new(vs: &nn::VarStore, config: &OptimizerConfig, lr: f64) -> Result<Self> {
        let OptimizerConfig {
            beta1,
            beta2,
            eps,
            weight_decay,
        } = *config;
        ensure!(
            (0.0..1.0).contains(&beta1.raw()) && (0.0..1.0).contains(&beta2.raw()),
            "betas must be in range of [0, 1)"
        );
        ensure!(eps > 0.0, "eps must be positive");
        ensure!(weight_decay >= 0.0, "weight_decay must be non-negative");

        let (names, params): (Vec<_>, Vec<_>) = vs
            .variables()
            .into_iter()
            .filter(|(_, var)| var.requires_grad())
            .sorted_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs))
            .unzip();
        let exp_avg: Vec<_> = params.iter().map(|param| param.zeros_like()).collect();
        let exp_avg_sq: Vec<_> = params.iter().map(|param| param.zeros_like()).collect();

        Ok(Self {
            names,
            params,
            exp_avg,
            exp_avg_sq,
            step: 0,
            lr,
            beta1: beta1.raw(),
            beta2: beta2.raw(),
            eps: eps.raw(),
            weight_decay: weight_decay.raw(),
        })
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    pub fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }

    /// Number of optimizer steps taken.
    pub fn num_steps(&self) -> i64 {
        self.step
    }

    /// The parameters updated by this optimizer.
    pub fn params(&self) -> &[Tensor] {
        &self.params
    }

    pub fn zero_grad(&mut self) {
        self.params.iter_mut().for_each(|param| param.zero_grad());
    }

    pub fn backward_step(&mut self, loss: &Tensor) {
        self.zero_grad();
        loss.backward();
        self.step();
    }

    pub fn step(&mut self) {
        self.step += 1;
        let Self {
            params,
            exp_avg,
            exp_avg_sq,
            step,
            lr,
            beta1,
            beta2,
            eps,
            weight_decay,
            ..
        } = self;
        let bias_correction1 = 1.0 - beta1.powi(*step as i32);
        let bias_correction2 = 1.0 - beta2.powi(*step as i32);
        let step_size = *lr / bias_correction1;

        tch::no_grad(|| {
            izip!(params.iter_mut(), exp_avg.iter_mut(), exp_avg_sq.iter_mut()).for_each(
                |(param, exp_avg, exp_avg_sq)| {
                    let grad = param.grad();
                    if !grad.defined() {
                        return;
                    }
                    let grad = if *weight_decay > 0.0 {
                        grad + &*param * *weight_decay
                    } else {
                        grad
                    };

                    let new_avg = &*exp_avg * *beta1 + &grad * (1.0 - *beta1);
                    let new_avg_sq = &*exp_avg_sq * *beta2 + &grad * &grad * (1.0 - *beta2);
                    exp_avg.copy_(&new_avg);
                    exp_avg_sq.copy_(&new_avg_sq);

                    let denom = new_avg_sq.sqrt() / bias_correction2.sqrt() + *eps;
                    let update = new_avg / denom * step_size;
                    let new_param = &*param - update;
                    param.copy_(&new_param);
                },
            );
        });
    }

    /// The optimizer state as named tensors.
    pub fn state(&self) -> Vec<(String, Tensor)> {
        let moments = izip!(&self.names, &self.exp_avg, &self.exp_avg_sq).flat_map(
            |(name, exp_avg, exp_avg_sq)| {
                [
                    (format!("exp_avg.{}", name), exp_avg.shallow_clone()),
                    (format!("exp_avg_sq.{}", name), exp_avg_sq.shallow_clone()),
                ]
            },
        );
        iter::once(("step".to_string(), Tensor::from(self.step)))
            .chain(iter::once(("lr".to_string(), Tensor::from(self.lr))))
            .chain(moments)
            .collect()
    }

    /// Restore the state produced by [Adam::state].
    pub fn load_state(&mut self, state: &HashMap<String, Tensor>) -> Result<()> {
        let lookup = |name: &str| {
            state
                .get(name)
                .ok_or_else(|| format_err!("optimizer state '{}' is missing", name))
        };

        let step = i64::from(lookup("step")?);
        let lr = f64::from(lookup("lr")?);
        ensure!(step >= 0, "invalid optimizer step {}", step);

        tch::no_grad(|| -> Result<()> {
            izip!(&self.names, &mut self.exp_avg, &mut self.exp_avg_sq).try_for_each(
                |(name, exp_avg, exp_avg_sq)| {
                    let saved_avg = lookup(&format!("exp_avg.{}", name))?;
                    let saved_avg_sq = lookup(&format!("exp_avg_sq.{}", name))?;
                    ensure!(
                        saved_avg.size() == exp_avg.size() && saved_avg_sq.size() == exp_avg_sq.size(),
                        "optimizer state of '{}' has a mismatched shape",
                        name
                    );
                    exp_avg.copy_(saved_avg);
                    exp_avg_sq.copy_(saved_avg_sq);
                    Ok(())
                },
            )
        })?;

        self.step = step;
        self.lr = lr;
        Ok(())
    }
}
