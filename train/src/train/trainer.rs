use crate::{
    common::*,
    config::{LearningRateSchedule, LoadCheckpoint, TrainingConfig},
    loss::l2_penalty,
    metrics::{EvalMetrics, MetricAccumulator, TrainMetrics},
    report::{MetricsHistory, RunReport},
    session::Session,
    utils::{self, LrScheduler, RateCounter, ShutdownFlag},
};

/// Epoch loop options of one experiment.
#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub epochs: usize,
    pub checkpoint_interval: NonZeroUsize,
    pub checkpoint_dir: PathBuf,
    /// The factor of the L2 penalty added to the training loss.
    pub weight_decay: f64,
    pub lr_schedule: LearningRateSchedule,
    pub load_checkpoint: LoadCheckpoint,
}

impl TrainOptions {
    pub fn new(config: &TrainingConfig, session: &Session, checkpoint_dir: PathBuf) -> Self {
        Self {
            epochs: config.epochs.get(),
            checkpoint_interval: config
                .checkpoint_interval
                .unwrap_or_else(|| session.family().default_checkpoint_interval()),
            checkpoint_dir,
            weight_decay: config.weight_decay.raw(),
            lr_schedule: config.lr_schedule.clone(),
            load_checkpoint: config.load_checkpoint.clone(),
        }
    }
}

/// How a training run ended.
#[derive(Debug, Clone)]
pub enum TrainingOutcome {
    /// All epochs finished.
    Completed(RunReport),
    /// Stopped on request after the zero-based `epoch`.
    Interrupted { epoch: usize, checkpoint: PathBuf },
}

/// Run the epoch loop of a session.
///
/// Each epoch trains on every training batch once, evaluates the test and
/// validation splits, steps the learning rate schedule and saves a
/// checkpoint when due. The run resumes after the epoch stored in the
/// checkpoint selected by `load_checkpoint`.
pub fn train(
    session: &mut Session,
    options: &TrainOptions,
    rng: &mut StdRng,
    shutdown: &ShutdownFlag,
) -> Result<TrainingOutcome> {
    let start_time = Instant::now();
    let TrainOptions {
        epochs,
        checkpoint_interval,
        ref checkpoint_dir,
        ref lr_schedule,
        ref load_checkpoint,
        ..
    } = *options;
    let family = session.family();

    // load checkpoint
    let (init_epoch, mut history) =
        match utils::find_checkpoint(checkpoint_dir, family, load_checkpoint)? {
            Some(path) => {
                let checkpoint =
                    utils::load_checkpoint(&path, &mut session.vs, &mut session.optimizer)?;
                ensure!(
                    checkpoint.history.num_epochs() == checkpoint.epoch + 1,
                    "'{}' holds {} epochs of metrics for epoch {}",
                    path.display(),
                    checkpoint.history.num_epochs(),
                    checkpoint.epoch + 1
                );
                (checkpoint.epoch + 1, checkpoint.history)
            }
            None => (0, MetricsHistory::default()),
        };

    let mut lr_scheduler = LrScheduler::new(lr_schedule, init_epoch)?;
    session.optimizer.set_lr(lr_scheduler.lr());

    info!(
        "start training '{}' from epoch {} to {}",
        session.name,
        init_epoch + 1,
        epochs
    );

    for epoch in init_epoch..epochs {
        let train_metrics = train_epoch(session, options, epoch, rng)?;
        let test_metrics = evaluate(session, Split::Test, rng)?;
        let validation_metrics = evaluate(session, Split::Validation, rng)?;
        log_epoch(epoch, epochs, &train_metrics, &test_metrics, &validation_metrics);
        history.push(&train_metrics, &test_metrics, &validation_metrics);

        let lr = lr_scheduler.step();
        session.optimizer.set_lr(lr);

        let is_last = epoch + 1 == epochs;
        let checkpoint = if (epoch + 1) % checkpoint_interval.get() == 0 || is_last {
            Some(utils::save_checkpoint(
                checkpoint_dir,
                family,
                epoch,
                &session.vs,
                &session.optimizer,
                &history,
            )?)
        } else {
            None
        };

        if shutdown.is_requested() && !is_last {
            let checkpoint = match checkpoint {
                Some(path) => path,
                None => utils::save_checkpoint(
                    checkpoint_dir,
                    family,
                    epoch,
                    &session.vs,
                    &session.optimizer,
                    &history,
                )?,
            };
            warn!(
                "training '{}' interrupted after epoch {}",
                session.name,
                epoch + 1
            );
            return Ok(TrainingOutcome::Interrupted { epoch, checkpoint });
        }
    }

    let training_time = start_time.elapsed().as_secs_f64();
    info!(
        "finished training '{}' in {:.1} seconds",
        session.name, training_time
    );

    Ok(TrainingOutcome::Completed(RunReport {
        history,
        training_time,
    }))
}

/// The evaluated splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Test,
    Validation,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Test => write!(f, "Test"),
            Self::Validation => write!(f, "Validation"),
        }
    }
}

fn train_epoch(
    session: &mut Session,
    options: &TrainOptions,
    epoch: usize,
    rng: &mut StdRng,
) -> Result<TrainMetrics> {
    let Session {
        device,
        ref model,
        ref mut optimizer,
        ref loss_fn,
        ref loaders,
        ..
    } = *session;
    let params: Vec<_> = optimizer.params().iter().map(Tensor::shallow_clone).collect();
    let num_batches = loaders.train.num_batches();
    let batch_size = loaders.train.config().batch_size.get();

    let mut accumulator = MetricAccumulator::new();
    let mut rate_counter = RateCounter::with_second_interval();

    for (step, batch) in loaders.train.epoch(rng).enumerate() {
        let Batch { clips, labels, .. } = batch?.to_device(device);

        let logits = model.forward_t(&clips, true)?;
        let loss = loss_fn.forward(&logits, &labels)?
            + l2_penalty(&params, options.weight_decay, device);
        optimizer.backward_step(&loss);

        let (predicted, labels) = to_label_vecs(&logits, &labels);
        accumulator.update(f64::from(&loss), &predicted, &labels)?;

        rate_counter.add(1.0);
        if let Some(batch_rate) = rate_counter.rate() {
            info!(
                "epoch: {}\tstep: {}/{}\tlr: {:.5}\t{:.2} batches/s\t{:.2} records/s",
                epoch + 1,
                step + 1,
                num_batches,
                optimizer.lr(),
                batch_rate,
                batch_rate * batch_size as f64
            );
        }
    }

    Ok(accumulator.train_metrics())
}

/// Compute loss and classification metrics on an evaluation split without
/// gradients.
pub fn evaluate(session: &Session, split: Split, rng: &mut StdRng) -> Result<EvalMetrics> {
    let loader = match split {
        Split::Test => &session.loaders.test,
        Split::Validation => &session.loaders.validation,
    };
    if loader.num_records() == 0 {
        warn!("the {} split is empty, its metrics are zero", split);
        return Ok(EvalMetrics::default());
    }

    tch::no_grad(|| -> Result<_> {
        let mut accumulator = MetricAccumulator::new();
        for batch in loader.epoch(rng) {
            let Batch { clips, labels, .. } = batch?.to_device(session.device);
            let logits = session.model.forward_t(&clips, false)?;
            let loss = session.loss_fn.forward(&logits, &labels)?;
            let (predicted, labels) = to_label_vecs(&logits, &labels);
            accumulator.update(f64::from(&loss), &predicted, &labels)?;
        }
        Ok(accumulator.eval_metrics())
    })
}

fn to_label_vecs(logits: &Tensor, labels: &Tensor) -> (Vec<i64>, Vec<i64>) {
    let predicted = Vec::<i64>::from(&logits.argmax(1, false).to_device(Device::Cpu));
    let labels = Vec::<i64>::from(&labels.to_device(Device::Cpu));
    (predicted, labels)
}

fn log_epoch(
    epoch: usize,
    epochs: usize,
    train: &TrainMetrics,
    test: &EvalMetrics,
    validation: &EvalMetrics,
) {
    info!("epoch [{}/{}]", epoch + 1, epochs);
    info!(
        "{:<12}{:>10}{:>12}{:>11}{:>9}{:>10}",
        "", "Loss", "Accuracy", "Precision", "Recall", "F1-Score"
    );
    info!(
        "{:<12}{:>10.4}{:>11.3}%",
        "Train", train.loss, train.accuracy
    );
    [("Test", test), ("Validation", validation)]
        .into_iter()
        .for_each(|(name, metrics)| {
            info!(
                "{:<12}{:>10.4}{:>11.3}%{:>11.3}{:>9.3}{:>10.3}",
                name,
                metrics.loss,
                metrics.accuracy,
                metrics.precision,
                metrics.recall,
                metrics.f1
            );
        });
}
