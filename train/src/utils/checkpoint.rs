use crate::{
    common::*,
    config::{LoadCheckpoint, ModelFamily},
    report::MetricsHistory,
    utils::Adam,
};
use regex::Regex;

const MODEL_PREFIX: &str = "model.";
const OPTIMIZER_PREFIX: &str = "optimizer.";
const EPOCH_KEY: &str = "epoch";
const HISTORY_KEY: &str = "history";

/// The training progress restored from a checkpoint file.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    /// Zero-based index of the last finished epoch.
    pub epoch: usize,
    pub history: MetricsHistory,
}

/// The file name of the checkpoint written after the zero-based `epoch`.
pub fn checkpoint_file_name(family: ModelFamily, epoch: usize) -> String {
    format!("{}_checkpoint_epoch{}.ckpt", family.file_prefix(), epoch + 1)
}

/// Save parameters, optimizer state and metric history to a checkpoint file.
///
/// The file is written under a temporary name and renamed into place, so an
/// existing checkpoint is never left half written.
pub fn save_checkpoint(
    checkpoint_dir: &Path,
    family: ModelFamily,
    epoch: usize,
    vs: &nn::VarStore,
    optimizer: &Adam,
    history: &MetricsHistory,
) -> Result<PathBuf> {
    fs::create_dir_all(checkpoint_dir)?;
    let path = checkpoint_dir.join(checkpoint_file_name(family, epoch));
    let tmp_path = path.with_extension("ckpt.tmp");

    let history = serde_json::to_vec(history)?;
    let named_tensors: Vec<(String, Tensor)> = iter::once((
        EPOCH_KEY.to_string(),
        Tensor::from(epoch as i64),
    ))
    .chain(iter::once((
        HISTORY_KEY.to_string(),
        Tensor::of_slice(&history),
    )))
    .chain(
        vs.variables()
            .into_iter()
            .map(|(name, var)| (format!("{}{}", MODEL_PREFIX, name), var)),
    )
    .chain(
        optimizer
            .state()
            .into_iter()
            .map(|(name, tensor)| (format!("{}{}", OPTIMIZER_PREFIX, name), tensor)),
    )
    .collect();

    Tensor::save_multi(&named_tensors, &tmp_path)
        .with_context(|| format!("unable to write checkpoint '{}'", tmp_path.display()))?;
    fs::rename(&tmp_path, &path)?;
    info!("checkpoint saved at epoch {} to '{}'", epoch + 1, path.display());

    Ok(path)
}

/// Restore parameters and optimizer state from a checkpoint file.
pub fn load_checkpoint(
    path: &Path,
    vs: &mut nn::VarStore,
    optimizer: &mut Adam,
) -> Result<Checkpoint> {
    let named_tensors = Tensor::load_multi(path)
        .with_context(|| format!("unable to read checkpoint '{}'", path.display()))?;

    let mut epoch = None;
    let mut history = None;
    let mut params = HashMap::new();
    let mut optimizer_state = HashMap::new();

    for (name, tensor) in named_tensors {
        if name == EPOCH_KEY {
            epoch = Some(i64::from(&tensor));
        } else if name == HISTORY_KEY {
            let bytes = Vec::<u8>::from(&tensor);
            history = Some(serde_json::from_slice::<MetricsHistory>(&bytes)?);
        } else if let Some(name) = name.strip_prefix(MODEL_PREFIX) {
            params.insert(name.to_string(), tensor);
        } else if let Some(name) = name.strip_prefix(OPTIMIZER_PREFIX) {
            optimizer_state.insert(name.to_string(), tensor);
        } else {
            warn!("ignore unknown entry '{}' in '{}'", name, path.display());
        }
    }

    let epoch = epoch.ok_or_else(|| format_err!("'{}' has no epoch", path.display()))?;
    ensure!(epoch >= 0, "'{}' has a negative epoch", path.display());
    let history =
        history.ok_or_else(|| format_err!("'{}' has no metric history", path.display()))?;

    tch::no_grad(|| -> Result<()> {
        vs.variables().into_iter().try_for_each(|(name, mut var)| {
            let saved = params
                .get(&name)
                .ok_or_else(|| format_err!("parameter '{}' is missing in checkpoint", name))?;
            ensure!(
                saved.size() == var.size(),
                "parameter '{}' has shape {:?} in checkpoint, but {:?} in model",
                name,
                saved.size(),
                var.size()
            );
            var.copy_(saved);
            Ok(())
        })
    })?;
    optimizer.load_state(&optimizer_state)?;

    info!("loaded checkpoint '{}' at epoch {}", path.display(), epoch + 1);
    Ok(Checkpoint {
        epoch: epoch as usize,
        history,
    })
}

/// Locate the checkpoint file to resume from.
pub fn find_checkpoint(
    checkpoint_dir: &Path,
    family: ModelFamily,
    load_checkpoint: &LoadCheckpoint,
) -> Result<Option<PathBuf>> {
    let path = match load_checkpoint {
        LoadCheckpoint::Disabled => {
            info!("checkpoint loading is disabled");
            None
        }
        LoadCheckpoint::FromRecent => {
            let file_name_regex = Regex::new(&format!(
                r"^{}_checkpoint_epoch(\d+)\.ckpt$",
                regex::escape(family.file_prefix())
            ))?;
            let pattern = checkpoint_dir.join("*.ckpt");
            let pattern = pattern.to_str().ok_or_else(|| {
                format_err!("non-unicode path '{}'", checkpoint_dir.display())
            })?;
            let paths: Vec<_> = glob::glob(pattern)?.try_collect()?;

            let checkpoint_file = paths
                .into_iter()
                .filter_map(|path| {
                    let file_name = path.file_name()?.to_str()?;
                    let captures = file_name_regex.captures(file_name)?;
                    let epoch: usize = captures.get(1)?.as_str().parse().ok()?;
                    Some((path, epoch))
                })
                .max_by_key(|(_path, epoch)| *epoch)
                .map(|(path, _epoch)| path);

            if checkpoint_file.is_none() {
                warn!(
                    "no checkpoint file found in '{}'",
                    checkpoint_dir.display()
                );
            }
            checkpoint_file
        }
        LoadCheckpoint::FromFile { file } => {
            ensure!(file.is_file(), "'{}' is not a file", file.display());
            Some(file.to_owned())
        }
    };

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::OptimizerConfig,
        metrics::{EvalMetrics, TrainMetrics},
    };

    fn build(vs: &nn::VarStore) -> nn::Linear {
        nn::linear(&vs.root() / "head", 4, 2, Default::default())
    }

    #[test]
    fn reload_restores_parameters_bit_identically() -> Result<()> {
        let dir = tempfile::tempdir()?;
        tch::manual_seed(1);

        let vs = nn::VarStore::new(Device::Cpu);
        let linear = build(&vs);
        let mut optimizer = Adam::new(&vs, &OptimizerConfig::default(), 1e-2)?;
        let input = Tensor::randn(&[8, 4], (Kind::Float, Device::Cpu));
        (0..3).for_each(|_| {
            let output = input.apply(&linear);
            let loss = (&output * &output).mean(Kind::Float);
            optimizer.backward_step(&loss);
        });

        let mut history = MetricsHistory::default();
        history.push(
            &TrainMetrics {
                loss: 0.25,
                accuracy: 75.0,
            },
            &EvalMetrics::default(),
            &EvalMetrics::default(),
        );
        let path = save_checkpoint(dir.path(), ModelFamily::Resnet, 4, &vs, &optimizer, &history)?;
        assert_eq!(path.file_name().unwrap(), "resnet_checkpoint_epoch5.ckpt");

        let mut restored_vs = nn::VarStore::new(Device::Cpu);
        let _ = build(&restored_vs);
        let mut restored_opt = Adam::new(&restored_vs, &OptimizerConfig::default(), 1.0)?;
        let checkpoint = load_checkpoint(&path, &mut restored_vs, &mut restored_opt)?;

        assert_eq!(checkpoint.epoch, 4);
        assert_eq!(checkpoint.history, history);
        assert_eq!(restored_opt.num_steps(), 3);
        let restored = restored_vs.variables();
        vs.variables().iter().for_each(|(name, var)| {
            assert!(restored[name].equal(var));
        });
        Ok(())
    }

    #[test]
    fn most_recent_epoch_is_found() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for name in [
            "vvt_checkpoint_epoch25.ckpt",
            "vvt_checkpoint_epoch100.ckpt",
            "vvt_checkpoint_epoch75.ckpt",
            "resnet_checkpoint_epoch200.ckpt",
        ] {
            fs::write(dir.path().join(name), b"")?;
        }

        let found = find_checkpoint(dir.path(), ModelFamily::Vvt, &LoadCheckpoint::FromRecent)?;
        assert_eq!(found, Some(dir.path().join("vvt_checkpoint_epoch100.ckpt")));
        assert_eq!(
            find_checkpoint(dir.path(), ModelFamily::Vvt, &LoadCheckpoint::Disabled)?,
            None
        );
        assert!(find_checkpoint(
            dir.path(),
            ModelFamily::Vvt,
            &LoadCheckpoint::FromFile {
                file: dir.path().join("missing.ckpt")
            }
        )
        .is_err());
        Ok(())
    }
}
