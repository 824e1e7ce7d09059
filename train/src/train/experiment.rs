use super::{train, TrainOptions, TrainingOutcome};
use crate::{
    common::*,
    config::{Config, ExperimentConfig},
    session::Session,
    utils::ShutdownFlag,
};

/// Train the model of one experiment from a fresh session.
///
/// The torch generator is reseeded from `seed` before the model is built,
/// so that experiments with the same seed start from the same weights.
/// The session and its loaders are released before returning.
pub fn run_experiment(
    config: &Config,
    experiment: &ExperimentConfig,
    handle: &Handle,
    seed: u64,
    shutdown: &ShutdownFlag,
) -> Result<TrainingOutcome> {
    let run_key = experiment.run_key();
    info!("start experiment '{}'", run_key);

    tch::manual_seed(seed as i64);
    let mut rng = StdRng::seed_from_u64(seed);

    let outcome = {
        let mut session = Session::new(config, experiment, handle)
            .with_context(|| format!("unable to prepare experiment '{}'", run_key))?;
        let checkpoint_dir = config.logging.dir.join(&experiment.name);
        let options = TrainOptions::new(&config.training, &session, checkpoint_dir);
        train(&mut session, &options, &mut rng, shutdown)
            .with_context(|| format!("experiment '{}' failed", run_key))?
    };

    Ok(outcome)
}
