use crate::{common::*, config::LearningRateSchedule};

/// Per-epoch learning rate.
#[derive(Debug, Clone)]
pub enum LrScheduler {
    Constant {
        lr: R64,
    },
    StepDecay {
        lr_cache: f64,
        epoch: usize,
        base_lr: R64,
        step_size: usize,
        gamma: R64,
    },
}

impl LrScheduler {
    pub fn new(
        config: &LearningRateSchedule,
        init_epoch: impl Into<Option<usize>>,
    ) -> Result<Self> {
        let init_epoch = init_epoch.into();

        let mut scheduler = match *config {
            LearningRateSchedule::Constant { lr } => {
                ensure!(lr > 0.0, "lr must be positive");
                Self::Constant { lr }
            }
            LearningRateSchedule::StepDecay {
                lr,
                step_size,
                gamma,
            } => {
                ensure!(lr > 0.0, "lr must be positive");
                ensure!(
                    gamma > 0.0 && gamma <= 1.0,
                    "gamma must be in range of (0, 1]"
                );
                Self::StepDecay {
                    lr_cache: lr.raw(),
                    epoch: 0,
                    base_lr: lr,
                    step_size: step_size.get(),
                    gamma,
                }
            }
        };

        if let Some(init_epoch) = init_epoch {
            scheduler.set_epoch(init_epoch);
        }

        Ok(scheduler)
    }

    /// Jump to the learning rate of the given epoch.
    pub fn set_epoch(&mut self, new_epoch: usize) {
        if let Self::StepDecay {
            lr_cache,
            epoch,
            base_lr,
            step_size,
            gamma,
        } = self
        {
            *epoch = new_epoch;
            let num_decays = (new_epoch / *step_size) as i32;
            *lr_cache = base_lr.raw() * gamma.raw().powi(num_decays);
        }
    }

    pub fn lr(&self) -> f64 {
        match self {
            Self::Constant { lr } => lr.raw(),
            Self::StepDecay { lr_cache, .. } => *lr_cache,
        }
    }

    /// Advance by one epoch and return the new learning rate.
    pub fn step(&mut self) -> f64 {
        if let Self::StepDecay { epoch, .. } = *self {
            self.set_epoch(epoch + 1);
        }
        self.lr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn step_decay() -> LearningRateSchedule {
        LearningRateSchedule::StepDecay {
            lr: r64(1e-3),
            step_size: NonZeroUsize::new(30).unwrap(),
            gamma: r64(0.1),
        }
    }

    #[test]
    fn step_decay_every_interval() -> Result<()> {
        let mut scheduler = LrScheduler::new(&step_decay(), None)?;
        let lrs: Vec<_> = iter::once(scheduler.lr())
            .chain((0..65).map(|_| scheduler.step()))
            .collect();

        assert_abs_diff_eq!(lrs[0], 1e-3);
        assert_abs_diff_eq!(lrs[29], 1e-3);
        assert_abs_diff_eq!(lrs[30], 1e-4, epsilon = 1e-12);
        assert_abs_diff_eq!(lrs[59], 1e-4, epsilon = 1e-12);
        assert_abs_diff_eq!(lrs[60], 1e-5, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn resumed_scheduler_matches_fresh_one() -> Result<()> {
        let mut fresh = LrScheduler::new(&step_decay(), None)?;
        (0..42).for_each(|_| {
            fresh.step();
        });
        let resumed = LrScheduler::new(&step_decay(), 42)?;
        assert_abs_diff_eq!(fresh.lr(), resumed.lr());
        Ok(())
    }

    #[test]
    fn constant_stays() -> Result<()> {
        let mut scheduler = LrScheduler::new(&LearningRateSchedule::Constant { lr: r64(0.5) }, 7)?;
        assert_abs_diff_eq!(scheduler.step(), 0.5);
        assert!(LrScheduler::new(&LearningRateSchedule::Constant { lr: r64(0.0) }, None).is_err());
        Ok(())
    }
}
