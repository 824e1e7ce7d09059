use anyhow::Result;
use approx::assert_abs_diff_eq;
use grip_dl::codec::{FrameCodec, GifCodec};
use serde_json::json;
use std::{fs, path::Path};
use tch::{Device, Kind, Tensor};
use tokio::runtime::Runtime;
use train::{
    config::{Config, LoadCheckpoint},
    utils::ShutdownFlag,
};

const SPLITS: [(&str, usize); 3] = [("train", 6), ("test", 2), ("validation", 2)];

fn write_clips(dir: &Path, count: usize, base: i64) -> Result<()> {
    fs::create_dir_all(dir)?;
    (0..count).try_for_each(|index| {
        let frames: Vec<_> = (0..3i64)
            .map(|step| {
                Tensor::full(
                    &[12, 16, 3],
                    (base + index as i64 * 7 + step * 3) % 256,
                    (Kind::Uint8, Device::Cpu),
                )
            })
            .collect();
        GifCodec.encode(&dir.join(format!("clip_{:02}.gif", index)), &frames, 15.0)
    })
}

fn write_dataset(root: &Path) -> Result<()> {
    SPLITS.iter().try_for_each(|&(split, count)| {
        write_clips(&root.join("tiny").join(split).join("slip"), count, 200)?;
        write_clips(&root.join("tiny").join(split).join("wriggle"), count, 20)
    })
}

fn tiny_config(datasets: &Path, logging_dir: &Path, epochs: usize) -> Result<Config> {
    let config: Config = serde_json::from_value(json!({
        "seed": 42,
        "dataset": {
            "root": datasets,
            "clip_shape": { "frames": 3, "height": 12, "width": 16 },
            "num_workers": 2,
        },
        "training": {
            "epochs": epochs,
            "batch_size": 4,
            "optimizer": {},
            "lr_schedule": { "type": "Constant", "lr": 1e-3 },
            "weight_decay": 1e-4,
            "checkpoint_interval": 1,
            "load_checkpoint": { "type": "Disabled" },
            "device": "cpu",
        },
        "logging": { "dir": logging_dir },
        "experiments": [
            {
                "name": "tiny",
                "model": { "kind": "Resnet", "base_channels": 4, "blocks": [1], "dropout": 0.0 },
            },
        ],
    }))?;
    config.validate()?;
    Ok(config)
}

#[test]
fn completed_run_writes_report_and_checkpoints() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let datasets = dir.path().join("datasets");
    let logging_dir = dir.path().join("runs");
    write_dataset(&datasets)?;

    let config = tiny_config(&datasets, &logging_dir, 2)?;
    let runtime = Runtime::new()?;
    let report = train::start(&config, runtime.handle(), &ShutdownFlag::new())?;

    let entry = &report["tiny_Resnet"];
    assert_eq!(entry.history.train.loss.len(), 2);
    assert_eq!(entry.history.test.f1.len(), 2);
    assert_eq!(entry.history.validation.accuracy.len(), 2);
    assert!(entry.training_time > 0.0);
    entry
        .history
        .test
        .accuracy
        .iter()
        .for_each(|&accuracy| assert!((0.0..=100.0).contains(&accuracy)));

    let run_dir = logging_dir.join("tiny");
    assert!(run_dir.join("resnet_checkpoint_epoch1.ckpt").is_file());
    assert!(run_dir.join("resnet_checkpoint_epoch2.ckpt").is_file());
    let saved_config: Config =
        serde_json::from_str(&fs::read_to_string(logging_dir.join("config.json"))?)?;
    assert_eq!(saved_config.experiments[0].run_key(), "tiny_Resnet");

    let text = fs::read_to_string(logging_dir.join("losses.json"))?;
    let saved: serde_json::Value = serde_json::from_str(&text)?;
    let run = &saved["tiny_Resnet"];
    assert_eq!(run["Train"]["Loss"].as_array().map(|losses| losses.len()), Some(2));
    assert!(run["Validation"]["F1-Score"].is_array());
    assert!(run["Training Time"].is_number());
    Ok(())
}

fn file_names(dir: &Path) -> Result<Vec<String>> {
    let mut names: Vec<_> = fs::read_dir(dir)?
        .map(|entry| -> Result<_> { Ok(entry?.file_name().to_string_lossy().into_owned()) })
        .collect::<Result<_>>()?;
    names.sort();
    Ok(names)
}

#[test]
fn same_seed_gives_same_partition_and_history() -> Result<()> {
    tch::set_num_threads(1);
    let dir = tempfile::tempdir()?;
    let learning = dir.path().join("raw").join("learning");
    write_clips(&learning.join("slip"), 10, 200)?;
    write_clips(&learning.join("wriggle"), 10, 20)?;
    let runtime = Runtime::new()?;

    let runs: Vec<_> = ["first", "second"]
        .iter()
        .map(|name| -> Result<_> {
            let run_dir = dir.path().join(name);
            let datasets = run_dir.join("datasets");
            let mut config = tiny_config(&datasets, &run_dir.join("runs"), 2)?;
            config.partition = serde_json::from_value(json!({
                "dest_dir": datasets.join("tiny"),
                "classes": ["slip", "wriggle"],
                "extensions": ["gif"],
                "groups": [{
                    "source_dir": learning,
                    "splits": [
                        { "name": "train", "ratio": 0.6 },
                        { "name": "test", "ratio": 0.2 },
                        { "name": "validation", "ratio": 0.2 },
                    ],
                }],
                "strict": true,
            }))?;
            config.validate()?;

            let report = train::start(&config, runtime.handle(), &ShutdownFlag::new())?;
            let tiny = datasets.join("tiny");
            let tiny = &tiny;
            let assignments: Vec<_> = SPLITS
                .iter()
                .flat_map(|&(split, _)| {
                    ["slip", "wriggle"]
                        .into_iter()
                        .map(move |class| tiny.join(split).join(class))
                })
                .map(|class_dir| file_names(&class_dir))
                .collect::<Result<_>>()?;
            Ok((assignments, report["tiny_Resnet"].history.clone()))
        })
        .collect::<Result<_>>()?;

    let (first_assignments, first_history) = &runs[0];
    let (second_assignments, second_history) = &runs[1];
    assert_eq!(
        first_assignments.iter().map(|names| names.len()).collect::<Vec<_>>(),
        vec![6, 6, 2, 2, 2, 2]
    );
    assert_eq!(first_assignments, second_assignments);
    assert_eq!(first_history.num_epochs(), 2);
    assert_eq!(first_history, second_history);
    Ok(())
}

#[test]
fn corrupt_video_aborts_without_report_entry() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let datasets = dir.path().join("datasets");
    let logging_dir = dir.path().join("runs");
    write_dataset(&datasets)?;
    let runtime = Runtime::new()?;

    let mut first = tiny_config(&datasets, &logging_dir, 1)?;
    first.logging.report_file = "first.json".into();
    train::start(&first, runtime.handle(), &ShutdownFlag::new())?;
    let checkpoint = logging_dir.join("tiny").join("resnet_checkpoint_epoch1.ckpt");
    let saved = fs::read(&checkpoint)?;

    fs::write(
        datasets.join("tiny").join("test").join("slip").join("zz_broken.gif"),
        b"not a video",
    )?;
    let mut config = tiny_config(&datasets, &logging_dir, 2)?;
    config.training.load_checkpoint = LoadCheckpoint::FromRecent;
    assert!(train::start(&config, runtime.handle(), &ShutdownFlag::new()).is_err());

    let report_path = logging_dir.join("losses.json");
    if report_path.exists() {
        let report: serde_json::Value = serde_json::from_str(&fs::read_to_string(&report_path)?)?;
        assert!(report.get("tiny_Resnet").is_none());
    }
    assert_eq!(fs::read(&checkpoint)?, saved);
    assert!(!logging_dir.join("tiny").join("resnet_checkpoint_epoch2.ckpt").exists());
    Ok(())
}

#[test]
fn resumed_run_continues_history() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let datasets = dir.path().join("datasets");
    let logging_dir = dir.path().join("runs");
    write_dataset(&datasets)?;
    let runtime = Runtime::new()?;

    let first = train::start(
        &tiny_config(&datasets, &logging_dir, 1)?,
        runtime.handle(),
        &ShutdownFlag::new(),
    )?;
    let first_loss = first["tiny_Resnet"].history.train.loss[0];

    let mut config = tiny_config(&datasets, &logging_dir, 2)?;
    config.training.load_checkpoint = LoadCheckpoint::FromRecent;
    let resumed = train::start(&config, runtime.handle(), &ShutdownFlag::new())?;

    let history = &resumed["tiny_Resnet"].history;
    assert_eq!(history.train.loss.len(), 2);
    assert_abs_diff_eq!(history.train.loss[0], first_loss);
    assert!(logging_dir.join("tiny").join("resnet_checkpoint_epoch2.ckpt").is_file());
    Ok(())
}

#[test]
fn interrupt_stops_after_checkpoint() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let datasets = dir.path().join("datasets");
    let logging_dir = dir.path().join("runs");
    write_dataset(&datasets)?;

    let mut config = tiny_config(&datasets, &logging_dir, 3)?;
    config.training.checkpoint_interval = None;
    let shutdown = ShutdownFlag::new();
    shutdown.request();

    let runtime = Runtime::new()?;
    let report = train::start(&config, runtime.handle(), &shutdown)?;

    assert!(report.get("tiny_Resnet").is_none());
    assert!(logging_dir.join("tiny").join("resnet_checkpoint_epoch1.ckpt").is_file());
    assert!(!logging_dir.join("tiny").join("resnet_checkpoint_epoch2.ckpt").exists());
    Ok(())
}
