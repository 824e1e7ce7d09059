use anyhow::Result;
use grip_dl::{
    codec::{FrameCodec, GifCodec},
    dataset::{partition, ClipShape, PartitionGroup, PartitionPlan, SplitRatio, VideoDatasetInit},
    loader::{BatchLoader, LoaderConfig},
};
use rand::{rngs::StdRng, SeedableRng};
use std::{fs, num::NonZeroUsize, path::Path, sync::Arc};
use tch::{Device, Kind, Tensor};
use tokio::runtime::Runtime;

fn write_clips(dir: &Path, count: usize) -> Result<()> {
    fs::create_dir_all(dir)?;
    (0..count).try_for_each(|index| {
        let frames: Vec<_> = (0..3i64)
            .map(|step| {
                Tensor::full(
                    &[12, 16, 3],
                    (index as i64 * 20 + step * 5) % 256,
                    (Kind::Uint8, Device::Cpu),
                )
            })
            .collect();
        GifCodec.encode(&dir.join(format!("clip_{:02}.gif", index)), &frames, 15.0)
    })
}

#[test]
fn raw_tree_to_batches() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let learning = dir.path().join("learning");
    let unseen = dir.path().join("unseen_data");
    write_clips(&learning.join("slip"), 10)?;
    write_clips(&learning.join("wriggle"), 6)?;
    write_clips(&unseen.join("slip"), 2)?;

    let plan = PartitionPlan {
        classes: vec!["slip".into(), "wriggle".into()],
        extensions: vec!["gif".into()],
        groups: vec![
            PartitionGroup {
                source_dir: learning,
                splits: vec![SplitRatio::new("train", 0.8), SplitRatio::new("test", 0.2)],
            },
            PartitionGroup {
                source_dir: unseen,
                splits: vec![SplitRatio::new("validation", 1.0)],
            },
        ],
        strict: true,
    };
    let datasets = dir.path().join("datasets");
    let summary = partition(&plan, &datasets, &mut StdRng::seed_from_u64(5))?;
    assert_eq!(summary.num_skipped(), 1);
    assert_eq!(summary.count("train", "slip"), 8);
    assert_eq!(summary.count("train", "wriggle"), 5);

    let init = VideoDatasetInit {
        clip_shape: Some(ClipShape::new(3, 12, 16)),
        ..VideoDatasetInit::new(Arc::new(GifCodec))
    };
    let train = init.clone().open(datasets.join("train"))?;
    assert_eq!(train.len(), 13);
    let validation = init.open(datasets.join("validation"))?;
    assert_eq!(validation.len(), 2);

    let runtime = Runtime::new()?;
    let loader = BatchLoader::new(
        Arc::new(train),
        LoaderConfig {
            batch_size: NonZeroUsize::new(4).unwrap(),
            num_workers: NonZeroUsize::new(2).unwrap(),
            shuffle: true,
        },
        runtime.handle().clone(),
    );

    let mut rng = StdRng::seed_from_u64(5);
    let mut total = 0;
    for batch in loader.epoch(&mut rng) {
        let batch = batch?;
        let (_, channels, frames, height, width) = batch.clips.size5()?;
        assert_eq!((channels, frames, height, width), (3, 3, 12, 16));
        total += batch.len();
    }
    assert_eq!(total, 13);
    Ok(())
}
