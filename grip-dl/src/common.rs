pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use futures::stream::{self, Stream, StreamExt as _, TryStreamExt as _};
pub use indexmap::{IndexMap, IndexSet};
pub use itertools::{izip, Itertools as _};
pub use noisy_float::prelude::*;
pub use rand::{prelude::*, rngs::StdRng};
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Borrow,
    cmp,
    collections::HashMap,
    fmt::{self, Debug},
    fs,
    iter,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
};
pub use tch::{vision, Device, IndexOp, Kind, Tensor};
pub use tch_tensor_like::TensorLike;
pub use tracing::{debug, info, warn};
