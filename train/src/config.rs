//! Training program configuration format.

use crate::common::*;

pub use dataset::*;
pub use model::*;
pub use training::*;

/// The main training configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Seed of the random stream shared by partitioning and shuffling.
    pub seed: u64,
    /// If set, partitions the raw videos before training.
    #[serde(default)]
    pub partition: Option<PartitionConfig>,
    pub dataset: DatasetConfig,
    pub training: TrainingConfig,
    pub logging: LoggingConfig,
    pub experiments: Vec<ExperimentConfig>,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let text = fs::read_to_string(path)?;
        let config: Self = json5::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.experiments.is_empty(), "no experiment is configured");
        ensure!(
            self.experiments
                .iter()
                .map(|experiment| experiment.run_key())
                .unique()
                .count()
                == self.experiments.len(),
            "experiments must have distinct names per model family"
        );
        if let Some(partition) = &self.partition {
            partition.plan.validate()?;
        }
        Ok(())
    }
}

/// Data logging options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// The directory of checkpoints, saved configs and the report.
    pub dir: PathBuf,
    /// The metrics report file, relative to `dir` unless absolute.
    #[serde(default = "default_report_file")]
    pub report_file: PathBuf,
}

impl LoggingConfig {
    pub fn report_path(&self) -> PathBuf {
        self.dir.join(&self.report_file)
    }
}

fn default_report_file() -> PathBuf {
    PathBuf::from("losses.json")
}

mod dataset {
    use super::*;

    /// Raw video partitioning options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct PartitionConfig {
        /// The root receiving the `{split}/{class}/` trees.
        pub dest_dir: PathBuf,
        #[serde(flatten)]
        pub plan: PartitionPlan,
    }

    /// Dataset options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct DatasetConfig {
        /// The directory holding one partitioned tree per experiment.
        pub root: PathBuf,
        #[serde(default)]
        pub codec: CodecKind,
        /// Accepted video extensions. Defaults to the codec's.
        #[serde(default)]
        pub extensions: Vec<String>,
        /// If set, every clip must have this shape.
        pub clip_shape: Option<ClipShape>,
        /// Number of clips decoded concurrently per loader.
        pub num_workers: NonZeroUsize,
        #[serde(default = "default_train_split")]
        pub train_split: String,
        #[serde(default = "default_test_split")]
        pub test_split: String,
        #[serde(default = "default_validation_split")]
        pub validation_split: String,
        #[serde(default = "default_true")]
        pub shuffle_train: bool,
        #[serde(default)]
        pub shuffle_eval: bool,
    }

    fn default_train_split() -> String {
        "train".into()
    }

    fn default_test_split() -> String {
        "test".into()
    }

    fn default_validation_split() -> String {
        "validation".into()
    }

    fn default_true() -> bool {
        true
    }
}

mod model {
    use super::*;

    /// One model trained on one partitioned dataset.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ExperimentConfig {
        pub name: String,
        /// The partitioned tree. Defaults to `{dataset.root}/{name}`.
        #[serde(default)]
        pub dataset_dir: Option<PathBuf>,
        pub model: ModelConfig,
    }

    impl ExperimentConfig {
        /// The key of this run in the metrics report.
        pub fn run_key(&self) -> String {
            format!("{}_{}", self.name, self.model.family().report_name())
        }

        pub fn dataset_dir(&self, root: &Path) -> PathBuf {
            self.dataset_dir
                .clone()
                .unwrap_or_else(|| root.join(&self.name))
        }
    }

    /// The model families.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum ModelFamily {
        Vvt,
        Resnet,
    }

    impl ModelFamily {
        /// The name used in report keys.
        pub fn report_name(&self) -> &'static str {
            match self {
                Self::Vvt => "VVT",
                Self::Resnet => "Resnet",
            }
        }

        /// The name used in checkpoint file names.
        pub fn file_prefix(&self) -> &'static str {
            match self {
                Self::Vvt => "vvt",
                Self::Resnet => "resnet",
            }
        }

        pub fn default_checkpoint_interval(&self) -> NonZeroUsize {
            let epochs = match self {
                Self::Vvt => 25,
                Self::Resnet => 5,
            };
            NonZeroUsize::new(epochs).unwrap()
        }
    }

    /// The model configuration.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "kind")]
    pub enum ModelConfig {
        Vvt(VvtConfig),
        Resnet(ResnetConfig),
    }

    impl ModelConfig {
        pub fn family(&self) -> ModelFamily {
            match self {
                Self::Vvt(_) => ModelFamily::Vvt,
                Self::Resnet(_) => ModelFamily::Resnet,
            }
        }
    }

    /// The factorized video transformer options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct VvtConfig {
        /// `[height, width]` of input frames.
        pub image_size: [NonZeroUsize; 2],
        /// `[height, width]` of a spatial patch.
        pub patch_size: [NonZeroUsize; 2],
        /// Number of frames of input clips.
        pub num_frames: NonZeroUsize,
        /// Number of frames per temporal patch. Defaults to `num_frames`.
        #[serde(default)]
        pub frame_patch_size: Option<NonZeroUsize>,
        pub dim: NonZeroUsize,
        pub spatial_depth: usize,
        pub temporal_depth: usize,
        pub heads: NonZeroUsize,
        #[serde(default = "default_dim_head")]
        pub dim_head: NonZeroUsize,
        pub mlp_dim: NonZeroUsize,
        #[serde(default = "default_dropout")]
        pub dropout: R64,
    }

    /// The 3-D convolutional residual network options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ResnetConfig {
        /// Channels of the first stage, doubled at every later stage.
        pub base_channels: NonZeroUsize,
        /// Residual blocks per stage.
        pub blocks: Vec<NonZeroUsize>,
        #[serde(default = "default_dropout")]
        pub dropout: R64,
    }

    fn default_dim_head() -> NonZeroUsize {
        NonZeroUsize::new(64).unwrap()
    }

    fn default_dropout() -> R64 {
        r64(0.0)
    }
}

mod training {
    use super::*;

    /// The training options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TrainingConfig {
        pub epochs: NonZeroUsize,
        pub batch_size: NonZeroUsize,
        pub optimizer: OptimizerConfig,
        /// Learning rate scheduling strategy.
        pub lr_schedule: LearningRateSchedule,
        /// The factor of the L2 penalty added to the training loss.
        pub weight_decay: R64,
        /// If set, overrides the per-family checkpoint interval in epochs.
        pub checkpoint_interval: Option<NonZeroUsize>,
        /// Checkpoint file loading method.
        pub load_checkpoint: LoadCheckpoint,
        #[serde(with = "tch_serde::serde_device")]
        pub device: Device,
    }

    /// Adam hyper-parameters.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct OptimizerConfig {
        #[serde(default = "default_beta1")]
        pub beta1: R64,
        #[serde(default = "default_beta2")]
        pub beta2: R64,
        #[serde(default = "default_eps")]
        pub eps: R64,
        /// Weight decay added to gradients by the optimizer.
        #[serde(default)]
        pub weight_decay: R64,
    }

    impl Default for OptimizerConfig {
        fn default() -> Self {
            Self {
                beta1: default_beta1(),
                beta2: default_beta2(),
                eps: default_eps(),
                weight_decay: r64(0.0),
            }
        }
    }

    fn default_beta1() -> R64 {
        r64(0.9)
    }

    fn default_beta2() -> R64 {
        r64(0.999)
    }

    fn default_eps() -> R64 {
        r64(1e-8)
    }

    /// The learning rate scheduling strategy.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum LearningRateSchedule {
        /// Use constant learning rate.
        Constant { lr: R64 },
        /// Multiply the learning rate by `gamma` every `step_size` epochs.
        StepDecay {
            lr: R64,
            #[serde(default = "default_step_size")]
            step_size: NonZeroUsize,
            #[serde(default = "default_gamma")]
            gamma: R64,
        },
    }

    fn default_step_size() -> NonZeroUsize {
        NonZeroUsize::new(30).unwrap()
    }

    fn default_gamma() -> R64 {
        r64(0.1)
    }

    /// Checkpoint file loading method.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum LoadCheckpoint {
        /// Disable checkpoint file loading.
        Disabled,
        /// Load the checkpoint of the latest epoch in the experiment directory.
        FromRecent,
        /// Load the checkpoint file at specified path.
        FromFile { file: PathBuf },
    }
}
