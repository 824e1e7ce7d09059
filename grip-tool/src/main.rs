use anyhow::{ensure, Context, Result};
use clap::Parser;
use grip_dl::{
    augment::{self, BorderCrop, FilterChain, GaussianNoise, HorizontalFlip, SwapRedBlue},
    codec::CodecKind,
    dataset::{self, ClipShape, PartitionPlan, VideoIssue},
};
use noisy_float::prelude::*;
use prettytable::{cell, row, Table};
use rand::{rngs::StdRng, SeedableRng};
use std::{env, fs, path::PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
/// Dataset preparation commands for slip detection
enum Opts {
    /// Copy raw videos into train/test/validation trees
    Partition {
        /// partition plan file in JSON5
        plan_file: PathBuf,
        /// destination root
        dest_dir: PathBuf,
        #[clap(long, default_value = "10000000")]
        seed: u64,
    },
    /// Write an augmented copy next to every video
    Augment {
        /// directory scanned recursively
        dir: PathBuf,
        #[clap(long, arg_enum, default_value = "gif")]
        codec: Codec,
        #[clap(long, default_value = "25")]
        fps: f64,
        /// standard deviation of the added Gaussian noise
        #[clap(long)]
        noise_std: Option<f64>,
        #[clap(long)]
        swap_red_blue: bool,
        #[clap(long)]
        flip: bool,
        /// gray level below which border pixels are cropped
        #[clap(long)]
        border_crop: Option<u8>,
        #[clap(long, default_value = "10000000")]
        seed: u64,
    },
    /// Report videos whose shape differs from the expected one
    Check {
        dir: PathBuf,
        #[clap(long, arg_enum, default_value = "gif")]
        codec: Codec,
        #[clap(long)]
        frames: usize,
        #[clap(long)]
        height: usize,
        #[clap(long)]
        width: usize,
    },
    /// Count videos per split and class
    Summary {
        dir: PathBuf,
        #[clap(long, default_value = "gif")]
        extensions: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, clap::ArgEnum)]
enum Codec {
    Gif,
    Opencv,
}

impl From<Codec> for CodecKind {
    fn from(codec: Codec) -> Self {
        match codec {
            Codec::Gif => CodecKind::Gif,
            Codec::Opencv => CodecKind::OpenCv,
        }
    }
}

fn main() -> Result<()> {
    // setup tracing
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false).compact();
    let filter_layer = {
        let filter = EnvFilter::from_default_env();
        if env::var("RUST_LOG").is_err() {
            filter.add_directive(LevelFilter::INFO.into())
        } else {
            filter
        }
    };
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    match Opts::parse() {
        Opts::Partition {
            plan_file,
            dest_dir,
            seed,
        } => {
            partition(plan_file, dest_dir, seed)?;
        }
        Opts::Augment {
            dir,
            codec,
            fps,
            noise_std,
            swap_red_blue,
            flip,
            border_crop,
            seed,
        } => {
            let mut chain = FilterChain::new();
            if let Some(threshold) = border_crop {
                chain = chain.push(BorderCrop { threshold });
            }
            if flip {
                chain = chain.push(HorizontalFlip);
            }
            if swap_red_blue {
                chain = chain.push(SwapRedBlue);
            }
            if let Some(std) = noise_std {
                chain = chain.push(GaussianNoise { std: r64(std) });
            }
            augment(dir, codec.into(), &chain, fps, seed)?;
        }
        Opts::Check {
            dir,
            codec,
            frames,
            height,
            width,
        } => {
            check(dir, codec.into(), ClipShape::new(frames, height, width))?;
        }
        Opts::Summary { dir, extensions } => {
            summary(dir, &extensions)?;
        }
    }

    Ok(())
}

fn partition(plan_file: PathBuf, dest_dir: PathBuf, seed: u64) -> Result<()> {
    let text = fs::read_to_string(&plan_file)
        .with_context(|| format!("unable to read '{}'", plan_file.display()))?;
    let plan: PartitionPlan = json5::from_str(&text)
        .with_context(|| format!("malformed plan '{}'", plan_file.display()))?;
    let mut rng = StdRng::seed_from_u64(seed);
    let summary = dataset::partition(&plan, &dest_dir, &mut rng)?;

    let mut table = Table::new();
    table.add_row(row!["split", "class", "videos"]);
    summary.assignments.iter().for_each(|(split, classes)| {
        classes.iter().for_each(|(class, files)| {
            table.add_row(row![split, class, files.len()]);
        });
    });
    table.printstd();

    summary
        .skipped
        .iter()
        .for_each(|dir| warn!("skipped missing class directory '{}'", dir.display()));
    Ok(())
}

fn augment(dir: PathBuf, codec: CodecKind, chain: &FilterChain, fps: f64, seed: u64) -> Result<()> {
    ensure!(!chain.is_empty(), "no filter is selected");
    let codec = codec.build()?;
    let mut rng = StdRng::seed_from_u64(seed);
    let written = augment::augment_videos(&dir, &*codec, chain, fps, &mut rng)?;
    info!("wrote {} augmented videos under '{}'", written.len(), dir.display());
    Ok(())
}

fn check(dir: PathBuf, codec: CodecKind, expect: ClipShape) -> Result<()> {
    let codec = codec.build()?;
    let issues = dataset::check_videos(&dir, &*codec, expect)?;

    if issues.is_empty() {
        info!("every video under '{}' has {}", dir.display(), expect);
        return Ok(());
    }

    let mut table = Table::new();
    table.add_row(row!["path", "issue"]);
    issues.iter().for_each(|issue| {
        let description = match issue {
            VideoIssue::ShapeMismatch { actual, .. } => format!("{}", actual),
            VideoIssue::Unreadable { reason, .. } => reason.clone(),
        };
        table.add_row(row![issue.path().display(), description]);
    });
    table.printstd();
    warn!("{} videos differ from {}", issues.len(), expect);

    Ok(())
}

fn summary(dir: PathBuf, extensions: &[String]) -> Result<()> {
    let summary = dataset::summarize(&dir, extensions)?;

    let mut table = Table::new();
    table.add_row(row!["split", "class", "videos"]);
    summary.splits.iter().for_each(|(split, classes)| {
        classes.iter().for_each(|(class, count)| {
            table.add_row(row![split, class, count]);
        });
    });
    table.add_row(row!["total", "", summary.total()]);
    table.printstd();

    Ok(())
}
