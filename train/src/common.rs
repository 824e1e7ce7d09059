//! Common imports from external crates.

pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use grip_dl::{
    codec::CodecKind,
    dataset::{ClipShape, GenericDataset, PartitionPlan, RandomAccessDataset, VideoDataset},
    loader::{Batch, BatchLoader, LoaderConfig},
};
pub use indexmap::{IndexMap, IndexSet};
pub use itertools::{izip, Itertools as _};
pub use noisy_float::prelude::*;
pub use rand::{prelude::*, rngs::StdRng};
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Borrow,
    collections::HashMap,
    fmt::{self, Debug},
    fs, iter,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
pub use tch::{
    nn::{self, Module as _, ModuleT as _},
    Device, Kind, Reduction, Tensor,
};
pub use tch_tensor_like::TensorLike;
pub use tokio::runtime::Handle;
pub use tracing::{debug, info, warn};
