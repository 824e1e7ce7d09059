use crate::{codec::has_extension, common::*, utils::find_files};

const RATIO_EPSILON: f64 = 1e-6;

/// A named split and the fraction of each class it receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitRatio {
    pub name: String,
    pub ratio: R64,
}

impl SplitRatio {
    pub fn new(name: impl Into<String>, ratio: f64) -> Self {
        Self {
            name: name.into(),
            ratio: r64(ratio),
        }
    }
}

/// A source tree and the splits carved out of it.
///
/// Splits of one group draw disjoint files from the same shuffled list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionGroup {
    pub source_dir: PathBuf,
    pub splits: Vec<SplitRatio>,
}

/// Describes how raw class folders are distributed into split trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionPlan {
    /// Class directory names looked up in every group's source directory.
    pub classes: Vec<String>,
    /// Accepted video file extensions.
    pub extensions: Vec<String>,
    pub groups: Vec<PartitionGroup>,
    /// Require the ratios of every group to sum to exactly 1.0.
    #[serde(default)]
    pub strict: bool,
}

impl PartitionPlan {
    /// Check the ratios of every group.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.classes.is_empty(), "no class is given");
        ensure!(
            self.classes.iter().unique().count() == self.classes.len(),
            "duplicated class names in {:?}",
            self.classes
        );

        self.groups.iter().try_for_each(|group| {
            let PartitionGroup { source_dir, splits } = group;
            ensure!(
                !splits.is_empty(),
                "no split is given for '{}'",
                source_dir.display()
            );
            ensure!(
                splits.iter().map(|split| &split.name).unique().count() == splits.len(),
                "duplicated split names for '{}'",
                source_dir.display()
            );
            splits.iter().try_for_each(|split| {
                ensure!(
                    (0.0..=1.0).contains(&split.ratio.raw()),
                    "ratio of split '{}' must be in [0, 1], but get {}",
                    split.name,
                    split.ratio
                );
                Ok(())
            })?;

            let sum: f64 = splits.iter().map(|split| split.ratio.raw()).sum();
            ensure!(
                sum <= 1.0 + RATIO_EPSILON,
                "split ratios for '{}' sum to {}, which exceeds 1.0",
                source_dir.display(),
                sum
            );
            if self.strict {
                ensure!(
                    (sum - 1.0).abs() <= RATIO_EPSILON,
                    "split ratios for '{}' sum to {}, but strict mode requires 1.0",
                    source_dir.display(),
                    sum
                );
            }
            Ok(())
        })
    }
}

/// The outcome of a partitioning run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionSummary {
    /// Copied destination files keyed by split name, then class name.
    pub assignments: IndexMap<String, IndexMap<String, Vec<PathBuf>>>,
    /// Class source directories that did not exist.
    pub skipped: Vec<PathBuf>,
}

impl PartitionSummary {
    pub fn num_skipped(&self) -> usize {
        self.skipped.len()
    }

    /// Number of files copied into the class directory of a split.
    pub fn count(&self, split: &str, class: &str) -> usize {
        self.assignments
            .get(split)
            .and_then(|classes| classes.get(class))
            .map(|files| files.len())
            .unwrap_or(0)
    }
}

/// Copy a random disjoint sample of each class into
/// `dest_root/{split}/{class}/`.
///
/// Within a group every class is listed, sorted, and shuffled once with
/// `rng`. Each split then takes the next `round(ratio × N)` files of that
/// list. Files are copied, never moved. Missing class directories are
/// skipped and reported in the summary, leaving empty class directories in
/// the splits of that group.
pub fn partition(
    plan: &PartitionPlan,
    dest_root: impl AsRef<Path>,
    rng: &mut StdRng,
) -> Result<PartitionSummary> {
    plan.validate()?;
    let dest_root = dest_root.as_ref();
    let mut summary = PartitionSummary::default();

    for group in &plan.groups {
        for class in &plan.classes {
            let class_dir = group.source_dir.join(class);
            if !class_dir.is_dir() {
                warn!("skip missing class directory '{}'", class_dir.display());
                // keep the class layout of every split uniform
                group.splits.iter().try_for_each(|split| {
                    let target_dir = dest_root.join(&split.name).join(class);
                    fs::create_dir_all(&target_dir).with_context(|| {
                        format!("unable to create directory '{}'", target_dir.display())
                    })
                })?;
                summary.skipped.push(class_dir);
                continue;
            }

            let mut files: Vec<_> = find_files(&class_dir, false)?
                .into_iter()
                .filter(|path| has_extension(path, &plan.extensions))
                .collect();
            files.shuffle(rng);
            let num_files = files.len();

            let mut offset = 0;
            for split in &group.splits {
                let wanted = (split.ratio.raw() * num_files as f64).round() as usize;
                let take = wanted.min(num_files - offset);
                if take < wanted {
                    warn!(
                        "split '{}' of class '{}' gets {} files instead of {} due to rounding",
                        split.name, class, take, wanted
                    );
                }

                let target_dir = dest_root.join(&split.name).join(class);
                fs::create_dir_all(&target_dir).with_context(|| {
                    format!("unable to create directory '{}'", target_dir.display())
                })?;

                let copied: Vec<_> = files[offset..offset + take]
                    .iter()
                    .map(|source| -> Result<_> {
                        let file_name = source.file_name().ok_or_else(|| {
                            format_err!("invalid file name '{}'", source.display())
                        })?;
                        let target = target_dir.join(file_name);
                        fs::copy(source, &target).with_context(|| {
                            format!(
                                "unable to copy '{}' to '{}'",
                                source.display(),
                                target.display()
                            )
                        })?;
                        Ok(target)
                    })
                    .try_collect()?;
                offset += take;

                debug!(
                    "copied {} files of class '{}' into split '{}'",
                    copied.len(),
                    class,
                    split.name
                );
                summary
                    .assignments
                    .entry(split.name.clone())
                    .or_default()
                    .entry(class.clone())
                    .or_default()
                    .extend(copied);
            }
        }
    }

    info!(
        "partitioned {} groups into '{}', {} class directories skipped",
        plan.groups.len(),
        dest_root.display(),
        summary.num_skipped()
    );
    Ok(summary)
}
