//! Shuffled, prefetched clip batches over a random access dataset.

use crate::{
    common::*,
    dataset::{DataRecord, RandomAccessDataset},
};
use tokio::runtime::Handle;

/// Batching options of a [BatchLoader].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub batch_size: NonZeroUsize,
    /// Number of clips decoded concurrently.
    pub num_workers: NonZeroUsize,
    /// Randomize the record order of every pass.
    pub shuffle: bool,
}

/// A batch of clips in record order.
#[derive(Debug, TensorLike)]
pub struct Batch {
    /// `[batch, channels, frames, height, width]` float clips.
    pub clips: Tensor,
    /// `[batch]` int64 labels.
    pub labels: Tensor,
    /// Dataset indexes of the clips.
    #[tensor_like(clone)]
    pub indexes: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    fn from_records(records: Vec<(usize, DataRecord)>) -> Result<Self> {
        ensure!(!records.is_empty(), "cannot assemble an empty batch");
        let (indexes, clips, labels) = records.into_iter().fold(
            (vec![], vec![], vec![]),
            |(mut indexes, mut clips, mut labels), (index, record)| {
                indexes.push(index);
                clips.push(record.clip);
                labels.push(record.label as i64);
                (indexes, clips, labels)
            },
        );

        let shape = clips[0].size();
        izip!(&indexes, &clips).try_for_each(|(index, clip)| {
            ensure!(
                clip.size() == shape,
                "clip {} has shape {:?}, which differs from {:?} in the same batch",
                index,
                clip.size(),
                shape
            );
            Ok(())
        })?;

        Ok(Self {
            clips: Tensor::stack(&clips, 0),
            labels: Tensor::of_slice(&labels),
            indexes,
        })
    }
}

/// Feeds batches of a dataset, one pass per [BatchLoader::epoch] call.
///
/// Clips are decoded on the blocking pool of the runtime behind `handle`.
/// A pass keeps at most `num_workers` decodes in flight and hands over
/// complete batches only.
#[derive(Debug)]
pub struct BatchLoader<D>
where
    D: 'static + RandomAccessDataset,
{
    dataset: Arc<D>,
    config: LoaderConfig,
    handle: Handle,
}

impl<D> BatchLoader<D>
where
    D: 'static + RandomAccessDataset,
{
    pub fn new(dataset: Arc<D>, config: LoaderConfig, handle: Handle) -> Self {
        Self {
            dataset,
            config,
            handle,
        }
    }

    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn num_records(&self) -> usize {
        self.dataset.num_records()
    }

    /// Number of batches of every pass, the last one possibly smaller.
    pub fn num_batches(&self) -> usize {
        let batch_size = self.config.batch_size.get();
        (self.num_records() + batch_size - 1) / batch_size
    }

    /// Start a pass over the dataset.
    ///
    /// The record order is drawn from `rng` when shuffling is enabled. The
    /// pass stops at the first failed decode after yielding its error.
    pub fn epoch(&self, rng: &mut StdRng) -> Batches {
        let LoaderConfig {
            batch_size,
            num_workers,
            shuffle,
        } = self.config;

        let mut indexes: Vec<_> = (0..self.num_records()).collect();
        if shuffle {
            indexes.shuffle(rng);
        }

        let (tx, rx) = flume::bounded(0);
        let dataset = self.dataset.clone();

        let task = self.handle.spawn(async move {
            let stream = stream::iter(indexes)
                .map(move |index| {
                    let dataset = dataset.clone();
                    async move {
                        let record = tokio::task::spawn_blocking(move || dataset.nth(index))
                            .await
                            .map_err(Error::from)
                            .and_then(|result| result)
                            .with_context(|| format!("unable to load record {}", index))?;
                        Ok((index, record))
                    }
                })
                .buffered(num_workers.get())
                .chunks(batch_size.get())
                .map(|records: Vec<Result<(usize, DataRecord)>>| -> Result<_> {
                    let records: Vec<_> = records.into_iter().try_collect()?;
                    Batch::from_records(records)
                });
            futures::pin_mut!(stream);

            while let Some(result) = stream.next().await {
                let is_err = result.is_err();
                if tx.send_async(result).await.is_err() || is_err {
                    break;
                }
            }
        });

        Batches {
            rx,
            task,
            num_batches: self.num_batches(),
        }
    }
}

/// The batches of one pass.
///
/// Dropping it cancels the pending decodes of the pass.
#[derive(Debug)]
pub struct Batches {
    rx: flume::Receiver<Result<Batch>>,
    task: tokio::task::JoinHandle<()>,
    num_batches: usize,
}

impl Batches {
    /// Number of batches this pass yields when no error occurs.
    pub fn num_batches(&self) -> usize {
        self.num_batches
    }

    /// Wait for the next batch from async code.
    pub async fn next_async(&mut self) -> Option<Result<Batch>> {
        self.rx.recv_async().await.ok()
    }
}

impl Iterator for Batches {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}

impl Drop for Batches {
    fn drop(&mut self) {
        self.task.abort();
    }
}
