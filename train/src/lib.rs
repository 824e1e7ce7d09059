//! The training program of the gripper slip detection project.

pub mod common;
pub mod config;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod report;
pub mod session;
pub mod train;
pub mod utils;

use crate::{
    common::*,
    config::Config,
    report::{ReportStore, TrainingReport},
    train::TrainingOutcome,
    utils::ShutdownFlag,
};

/// The entry of training program.
///
/// Experiments run one after another in configuration order. Each finished
/// run is merged into the report file right away. An interrupt stops the
/// program after the checkpoint of the current epoch is written.
pub fn start(config: &Config, handle: &Handle, shutdown: &ShutdownFlag) -> Result<TrainingReport> {
    let logging_dir = &config.logging.dir;

    // create dirs and save config
    {
        fs::create_dir_all(logging_dir)?;
        let path = logging_dir.join("config.json");
        let text = serde_json::to_string_pretty(config)?;
        fs::write(&path, text)?;
    }

    // partition raw videos
    if let Some(partition) = &config.partition {
        info!("partitioning raw videos into '{}'", partition.dest_dir.display());
        let mut rng = StdRng::seed_from_u64(config.seed);
        let summary = grip_dl::dataset::partition(&partition.plan, &partition.dest_dir, &mut rng)?;
        summary.assignments.iter().for_each(|(split, classes)| {
            classes.iter().for_each(|(class, files)| {
                info!("split '{}' class '{}': {} videos", split, class, files.len());
            });
        });
        if summary.num_skipped() > 0 {
            warn!("{} class directories are missing from the source", summary.num_skipped());
        }
    }

    let store = ReportStore::new(config.logging.report_path());
    let mut report = store.load()?;

    for experiment in &config.experiments {
        let outcome =
            train::run_experiment(config, experiment, handle, config.seed, shutdown)?;

        match outcome {
            TrainingOutcome::Completed(entry) => {
                report = store.merge(&experiment.run_key(), entry)?;
            }
            TrainingOutcome::Interrupted { epoch, checkpoint } => {
                warn!(
                    "stopped '{}' after epoch {}, resume from '{}'",
                    experiment.run_key(),
                    epoch + 1,
                    checkpoint.display()
                );
                break;
            }
        }
    }

    Ok(report)
}
