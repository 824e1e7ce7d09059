use super::*;
use crate::{
    codec::{has_extension, FrameCodec, FRAME_CHANNELS},
    common::*,
    utils::{find_files, list_subdirs},
};

/// Options to open a [VideoDataset].
#[derive(Debug, Clone)]
pub struct VideoDatasetInit {
    pub codec: Arc<dyn FrameCodec>,
    pub transform: Arc<dyn FrameTransform>,
    /// Accepted extensions. The codec's extensions are used when empty.
    pub extensions: Vec<String>,
    /// The shape every clip must have. Unchecked when absent.
    pub clip_shape: Option<ClipShape>,
}

impl VideoDatasetInit {
    pub fn new(codec: Arc<dyn FrameCodec>) -> Self {
        Self {
            codec,
            transform: Arc::new(ToFloatTensor),
            extensions: vec![],
            clip_shape: None,
        }
    }

    pub fn open(self, root: impl AsRef<Path>) -> Result<VideoDataset> {
        VideoDataset::open(root, self)
    }
}

/// A labeled clip dataset over a `root/{class}/*.{ext}` tree.
///
/// Labels are the positions of the class directory names in sorted order.
/// The index is built eagerly when the dataset is opened.
#[derive(Debug, Clone)]
pub struct VideoDataset {
    root: PathBuf,
    classes: IndexSet<String>,
    paths: Vec<PathBuf>,
    labels: Vec<u16>,
    codec: Arc<dyn FrameCodec>,
    transform: Arc<dyn FrameTransform>,
    clip_shape: Option<ClipShape>,
}

impl VideoDataset {
    pub fn open(root: impl AsRef<Path>, init: VideoDatasetInit) -> Result<Self> {
        let root = root.as_ref();
        let VideoDatasetInit {
            codec,
            transform,
            extensions,
            clip_shape,
        } = init;
        ensure!(
            root.is_dir(),
            "dataset directory '{}' does not exist",
            root.display()
        );

        let extensions: Vec<String> = if extensions.is_empty() {
            codec.extensions().iter().map(|ext| ext.to_string()).collect()
        } else {
            extensions
        };

        let subdirs = list_subdirs(root)?;
        ensure!(
            subdirs.len() <= u16::MAX as usize,
            "too many class directories in '{}'",
            root.display()
        );

        let mut classes = IndexSet::new();
        let mut paths = vec![];
        let mut labels = vec![];

        for (label, (name, dir)) in subdirs.into_iter().enumerate() {
            let files: Vec<_> = find_files(&dir, false)?
                .into_iter()
                .filter(|path| has_extension(path, &extensions))
                .collect();
            if files.is_empty() {
                warn!("class directory '{}' contains no video", dir.display());
            }
            labels.extend(iter::repeat(label as u16).take(files.len()));
            paths.extend(files);
            classes.insert(name);
        }

        info!(
            "indexed {} videos of {} classes under '{}'",
            paths.len(),
            classes.len(),
            root.display()
        );

        Ok(Self {
            root: root.to_owned(),
            classes,
            paths,
            labels,
            codec,
            transform,
            clip_shape,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn clip_shape(&self) -> Option<ClipShape> {
        self.clip_shape
    }

    /// The indexed record at `index`.
    pub fn record(&self, index: usize) -> Option<VideoRecord> {
        Some(VideoRecord {
            path: self.paths.get(index)?.clone(),
            label: self.labels[index] as usize,
        })
    }

    pub fn records(&self) -> impl Iterator<Item = VideoRecord> + '_ {
        izip!(&self.paths, &self.labels).map(|(path, &label)| VideoRecord {
            path: path.clone(),
            label: label as usize,
        })
    }

    /// Decode the video at `index` into a `[3, frames, height, width]` clip.
    pub fn get(&self, index: usize) -> Result<DataRecord> {
        let path = self.paths.get(index).ok_or_else(|| {
            format_err!(
                "index {} is out of range of {} records",
                index,
                self.paths.len()
            )
        })?;
        let label = self.labels[index] as usize;

        let frames: Vec<_> = self
            .codec
            .decode(path)
            .with_context(|| format!("unable to decode '{}'", path.display()))?
            .iter()
            .map(|frame| self.transform.forward(frame))
            .try_collect()?;

        // [frames, channels, height, width] -> [channels, frames, height, width]
        let clip = Tensor::stack(&frames, 0).permute(&[1, 0, 2, 3]).contiguous();
        let (channels, num_frames, height, width) = clip.size4()?;
        ensure!(
            channels == FRAME_CHANNELS,
            "'{}' decodes to {} channels",
            path.display(),
            channels
        );

        if let Some(expect) = self.clip_shape {
            let actual = ClipShape::new(num_frames as usize, height as usize, width as usize);
            ensure!(
                actual == expect,
                "'{}' has {}, but the dataset expects {}",
                path.display(),
                actual,
                expect
            );
        }

        Ok(DataRecord { clip, label })
    }
}

impl GenericDataset for VideoDataset {
    fn classes(&self) -> &IndexSet<String> {
        &self.classes
    }
}

impl RandomAccessDataset for VideoDataset {
    fn num_records(&self) -> usize {
        self.len()
    }

    fn nth(&self, index: usize) -> Result<DataRecord> {
        self.get(index)
    }
}
