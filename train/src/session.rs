//! Resources owned by one training run.

use crate::{
    common::*,
    config::{Config, DatasetConfig, ExperimentConfig, ModelFamily},
    loss::CrossEntropyLoss,
    model::Model,
    utils::{Adam, LrScheduler},
};
use grip_dl::dataset::VideoDatasetInit;

/// The batch loaders of the three splits.
#[derive(Debug)]
pub struct SplitLoaders {
    pub train: BatchLoader<VideoDataset>,
    pub test: BatchLoader<VideoDataset>,
    pub validation: BatchLoader<VideoDataset>,
}

impl SplitLoaders {
    /// Open the split trees under `dataset_dir`.
    ///
    /// All splits must share the class list of the training split, so that
    /// labels agree.
    pub fn open(
        dataset_dir: &Path,
        config: &DatasetConfig,
        batch_size: NonZeroUsize,
        handle: &Handle,
    ) -> Result<Self> {
        let DatasetConfig {
            codec,
            ref extensions,
            clip_shape,
            num_workers,
            ref train_split,
            ref test_split,
            ref validation_split,
            shuffle_train,
            shuffle_eval,
            ..
        } = *config;
        let init = VideoDatasetInit {
            extensions: extensions.clone(),
            clip_shape,
            ..VideoDatasetInit::new(codec.build()?)
        };

        let open = |split: &str, shuffle: bool| -> Result<_> {
            let dataset = init
                .clone()
                .open(dataset_dir.join(split))
                .with_context(|| format!("unable to open split '{}'", split))?;
            let loader_config = LoaderConfig {
                batch_size,
                num_workers,
                shuffle,
            };
            Ok(BatchLoader::new(
                Arc::new(dataset),
                loader_config,
                handle.clone(),
            ))
        };

        let train = open(train_split, shuffle_train)?;
        let test = open(test_split, shuffle_eval)?;
        let validation = open(validation_split, shuffle_eval)?;

        ensure!(
            train.num_records() > 0,
            "the training split of '{}' has no video",
            dataset_dir.display()
        );
        let classes = train.dataset().classes();
        [(test_split, &test), (validation_split, &validation)]
            .into_iter()
            .try_for_each(|(split, loader)| {
                ensure!(
                    loader.dataset().classes() == classes,
                    "split '{}' has classes {:?}, but the training split has {:?}",
                    split,
                    loader.dataset().classes(),
                    classes
                );
                Ok(())
            })?;

        Ok(Self {
            train,
            test,
            validation,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.train.dataset().classes().len()
    }
}

/// The model, optimizer, loss and loaders of one experiment.
///
/// Dropping the session releases all of them.
#[derive(Debug)]
pub struct Session {
    pub name: String,
    pub device: Device,
    pub vs: nn::VarStore,
    pub model: Model,
    pub optimizer: Adam,
    pub loss_fn: CrossEntropyLoss,
    pub loaders: SplitLoaders,
}

impl Session {
    pub fn new(config: &Config, experiment: &ExperimentConfig, handle: &Handle) -> Result<Self> {
        let training = &config.training;
        let dataset_dir = experiment.dataset_dir(&config.dataset.root);
        let loaders =
            SplitLoaders::open(&dataset_dir, &config.dataset, training.batch_size, handle)?;
        info!(
            "loaded {} train, {} test and {} validation videos from '{}'",
            loaders.train.num_records(),
            loaders.test.num_records(),
            loaders.validation.num_records(),
            dataset_dir.display()
        );

        let vs = nn::VarStore::new(training.device);
        let model = Model::new(&vs.root(), &experiment.model, loaders.num_classes())?;
        let init_lr = LrScheduler::new(&training.lr_schedule, None)?.lr();
        let optimizer = Adam::new(&vs, &training.optimizer, init_lr)?;

        Ok(Self {
            name: experiment.run_key(),
            device: training.device,
            vs,
            model,
            optimizer,
            loss_fn: CrossEntropyLoss::new(Reduction::Mean),
            loaders,
        })
    }

    pub fn family(&self) -> ModelFamily {
        self.model.family()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        info!("released training session '{}'", self.name);
    }
}
