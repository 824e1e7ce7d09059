use super::*;
use crate::common::*;

/// The generic dataset trait.
pub trait GenericDataset
where
    Self: Debug + Send + Sync,
{
    /// The class names, where the position of a name is its label.
    fn classes(&self) -> &IndexSet<String>;
}

/// The dataset that can be random accessed.
pub trait RandomAccessDataset
where
    Self: GenericDataset,
{
    /// Get number of records in the dataset.
    fn num_records(&self) -> usize;

    /// Load the nth record in the dataset.
    fn nth(&self, index: usize) -> Result<DataRecord>;
}
