use super::*;
use crate::{
    codec::{has_extension, FrameCodec},
    common::*,
    utils::{find_files, list_subdirs},
};

/// A video whose decoded shape differs from the expectation, or that fails
/// to decode at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoIssue {
    ShapeMismatch { path: PathBuf, actual: ClipShape },
    Unreadable { path: PathBuf, reason: String },
}

impl VideoIssue {
    pub fn path(&self) -> &Path {
        match self {
            Self::ShapeMismatch { path, .. } => path,
            Self::Unreadable { path, .. } => path,
        }
    }
}

impl fmt::Display for VideoIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShapeMismatch { path, actual } => {
                write!(f, "'{}' has {}", path.display(), actual)
            }
            Self::Unreadable { path, reason } => {
                write!(f, "'{}' is unreadable: {}", path.display(), reason)
            }
        }
    }
}

/// Decode every video under `root` and collect those not matching `expect`.
pub fn check_videos(
    root: impl AsRef<Path>,
    codec: &dyn FrameCodec,
    expect: ClipShape,
) -> Result<Vec<VideoIssue>> {
    let root = root.as_ref();
    let paths: Vec<_> = find_files(root, true)?
        .into_iter()
        .filter(|path| has_extension(path, codec.extensions()))
        .collect();

    let issues: Vec<_> = paths
        .into_iter()
        .filter_map(|path| {
            let frames = match codec.decode(&path) {
                Ok(frames) => frames,
                Err(err) => {
                    return Some(VideoIssue::Unreadable {
                        path,
                        reason: format!("{:#}", err),
                    })
                }
            };
            let (height, width, _) = match frames.first().map(|frame| frame.size3()) {
                Some(Ok(shape)) => shape,
                Some(Err(err)) => {
                    return Some(VideoIssue::Unreadable {
                        path,
                        reason: format!("unexpected frame shape: {}", err),
                    })
                }
                None => {
                    return Some(VideoIssue::Unreadable {
                        path,
                        reason: "no frame is decoded".into(),
                    })
                }
            };
            let actual = ClipShape::new(frames.len(), height as usize, width as usize);
            (actual != expect).then(|| VideoIssue::ShapeMismatch { path, actual })
        })
        .collect();

    issues.iter().for_each(|issue| warn!("{}", issue));
    Ok(issues)
}

/// Video counts of a partitioned tree, keyed by split name, then class name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetSummary {
    pub splits: IndexMap<String, IndexMap<String, usize>>,
}

impl DatasetSummary {
    pub fn total(&self) -> usize {
        self.splits.values().flat_map(|classes| classes.values()).sum()
    }
}

/// Count the videos of a `root/{split}/{class}/` tree.
pub fn summarize<S>(root: impl AsRef<Path>, extensions: &[S]) -> Result<DatasetSummary>
where
    S: AsRef<str>,
{
    let splits = list_subdirs(root)?
        .into_iter()
        .map(|(split, split_dir)| -> Result<_> {
            let classes = list_subdirs(&split_dir)?
                .into_iter()
                .map(|(class, class_dir)| -> Result<_> {
                    let count = find_files(&class_dir, false)?
                        .iter()
                        .filter(|path| has_extension(path, extensions))
                        .count();
                    Ok((class, count))
                })
                .try_collect()?;
            Ok((split, classes))
        })
        .try_collect()?;

    Ok(DatasetSummary { splits })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::GifCodec;

    fn write_clip(path: &Path, frames: usize, height: i64, width: i64) -> Result<()> {
        let frames: Vec<_> = (0..frames)
            .map(|_| Tensor::zeros(&[height, width, 3], (Kind::Uint8, Device::Cpu)))
            .collect();
        GifCodec.encode(path, &frames, 10.0)
    }

    #[test]
    fn mismatched_and_broken_videos_are_reported() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let class_dir = dir.path().join("train").join("slip");
        fs::create_dir_all(&class_dir)?;
        write_clip(&class_dir.join("good.gif"), 3, 6, 8)?;
        write_clip(&class_dir.join("short.gif"), 2, 6, 8)?;
        fs::write(class_dir.join("broken.gif"), b"oops")?;

        let issues = check_videos(dir.path(), &GifCodec, ClipShape::new(3, 6, 8))?;
        assert_eq!(issues.len(), 2);
        assert!(matches!(&issues[0], VideoIssue::Unreadable { .. }));
        assert_eq!(
            issues[1],
            VideoIssue::ShapeMismatch {
                path: class_dir.join("short.gif"),
                actual: ClipShape::new(2, 6, 8),
            }
        );
        Ok(())
    }

    /// Decodes every file into flat grayscale frames.
    #[derive(Debug)]
    struct GrayCodec;

    impl FrameCodec for GrayCodec {
        fn decode(&self, _path: &Path) -> Result<Vec<Tensor>> {
            Ok((0..3)
                .map(|_| Tensor::zeros(&[6, 8], (Kind::Uint8, Device::Cpu)))
                .collect())
        }

        fn encode(&self, _path: &Path, _frames: &[Tensor], _fps: f64) -> Result<()> {
            bail!("read only")
        }

        fn extensions(&self) -> &[&'static str] {
            &["gif"]
        }
    }

    #[test]
    fn malformed_frames_are_reported_unreadable() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("gray.gif");
        fs::write(&path, b"")?;

        let issues = check_videos(dir.path(), &GrayCodec, ClipShape::new(3, 6, 8))?;
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path(), path.as_path());
        assert!(matches!(&issues[0], VideoIssue::Unreadable { .. }));
        Ok(())
    }

    #[test]
    fn summary_counts_per_split_and_class() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for (split, class, count) in [("test", "slip", 1), ("train", "slip", 3), ("train", "wriggle", 2)] {
            let class_dir = dir.path().join(split).join(class);
            fs::create_dir_all(&class_dir)?;
            (0..count).try_for_each(|index| fs::write(class_dir.join(format!("{}.avi", index)), b""))?;
        }

        let summary = summarize(dir.path(), &["avi"])?;
        assert_eq!(summary.total(), 6);
        assert_eq!(summary.splits["train"]["wriggle"], 2);
        assert_eq!(summary.splits.keys().collect::<Vec<_>>(), vec!["test", "train"]);
        Ok(())
    }
}
