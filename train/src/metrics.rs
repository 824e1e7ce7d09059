//! Per-epoch loss and classification metrics.

use crate::common::*;

/// The label counted as the positive class by precision and recall.
pub const POSITIVE_LABEL: i64 = 1;

/// Metrics of a training pass.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrainMetrics {
    pub loss: f64,
    /// Percentage of correct predictions.
    pub accuracy: f64,
}

/// Metrics of an evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub loss: f64,
    /// Percentage of correct predictions.
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Accumulates batch losses and predictions over one pass.
///
/// The pass loss is the mean of the batch losses. Undefined ratios are
/// reported as zero.
#[derive(Debug, Clone, Default)]
pub struct MetricAccumulator {
    loss_sum: f64,
    num_batches: usize,
    correct: usize,
    total: usize,
    true_positives: usize,
    false_positives: usize,
    false_negatives: usize,
}

impl MetricAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, loss: f64, predicted: &[i64], labels: &[i64]) -> Result<()> {
        ensure!(
            predicted.len() == labels.len(),
            "{} predictions for {} labels",
            predicted.len(),
            labels.len()
        );
        self.loss_sum += loss;
        self.num_batches += 1;
        self.total += labels.len();

        izip!(predicted, labels).for_each(|(&predicted, &label)| {
            if predicted == label {
                self.correct += 1;
            }
            match (predicted == POSITIVE_LABEL, label == POSITIVE_LABEL) {
                (true, true) => self.true_positives += 1,
                (true, false) => self.false_positives += 1,
                (false, true) => self.false_negatives += 1,
                (false, false) => {}
            }
        });
        Ok(())
    }

    pub fn num_batches(&self) -> usize {
        self.num_batches
    }

    pub fn loss(&self) -> f64 {
        ratio(self.loss_sum, self.num_batches as f64)
    }

    pub fn accuracy(&self) -> f64 {
        100.0 * ratio(self.correct as f64, self.total as f64)
    }

    pub fn precision(&self) -> f64 {
        ratio(
            self.true_positives as f64,
            (self.true_positives + self.false_positives) as f64,
        )
    }

    pub fn recall(&self) -> f64 {
        ratio(
            self.true_positives as f64,
            (self.true_positives + self.false_negatives) as f64,
        )
    }

    pub fn f1(&self) -> f64 {
        let precision = self.precision();
        let recall = self.recall();
        ratio(2.0 * precision * recall, precision + recall)
    }

    pub fn train_metrics(&self) -> TrainMetrics {
        TrainMetrics {
            loss: self.loss(),
            accuracy: self.accuracy(),
        }
    }

    pub fn eval_metrics(&self) -> EvalMetrics {
        EvalMetrics {
            loss: self.loss(),
            accuracy: self.accuracy(),
            precision: self.precision(),
            recall: self.recall(),
            f1: self.f1(),
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn all_negative_predictions_score_zero() -> Result<()> {
        let mut acc = MetricAccumulator::new();
        acc.update(0.7, &[0, 0, 0, 0], &[0, 1, 0, 1])?;
        acc.update(0.5, &[0, 0], &[1, 0])?;

        let metrics = acc.eval_metrics();
        assert_abs_diff_eq!(metrics.precision, 0.0);
        assert_abs_diff_eq!(metrics.recall, 0.0);
        assert_abs_diff_eq!(metrics.f1, 0.0);
        assert_abs_diff_eq!(metrics.accuracy, 50.0);
        assert_abs_diff_eq!(metrics.loss, 0.6);
        Ok(())
    }

    #[test]
    fn binary_scores() -> Result<()> {
        let mut acc = MetricAccumulator::new();
        // tp = 2, fp = 1, fn = 1, tn = 1
        acc.update(1.0, &[1, 1, 1, 0, 0], &[1, 1, 0, 1, 0])?;

        let metrics = acc.eval_metrics();
        assert_abs_diff_eq!(metrics.precision, 2.0 / 3.0);
        assert_abs_diff_eq!(metrics.recall, 2.0 / 3.0);
        assert_abs_diff_eq!(metrics.f1, 2.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(metrics.accuracy, 60.0);
        Ok(())
    }

    #[test]
    fn empty_pass_is_all_zero() {
        let acc = MetricAccumulator::new();
        assert_eq!(acc.eval_metrics(), EvalMetrics::default());
        assert_eq!(acc.train_metrics(), TrainMetrics::default());
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let mut acc = MetricAccumulator::new();
        assert!(acc.update(0.0, &[1], &[1, 0]).is_err());
    }
}
