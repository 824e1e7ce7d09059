use crate::common::*;

/// An indexed video file and the label of its class directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VideoRecord {
    pub path: PathBuf,
    pub label: usize,
}

/// A decoded clip with its label.
///
/// The clip is a `[channels, frames, height, width]` float tensor.
#[derive(Debug, TensorLike)]
pub struct DataRecord {
    pub clip: Tensor,
    #[tensor_like(clone)]
    pub label: usize,
}

/// The fixed frame count and frame size every clip of a dataset must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClipShape {
    pub frames: usize,
    pub height: usize,
    pub width: usize,
}

impl ClipShape {
    pub fn new(frames: usize, height: usize, width: usize) -> Self {
        Self {
            frames,
            height,
            width,
        }
    }
}

impl fmt::Display for ClipShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} frames of {}x{}", self.frames, self.height, self.width)
    }
}
