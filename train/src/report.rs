//! The metrics report shared by all runs.
//!
//! The report is a JSON object mapping run keys to per-epoch metric lists.
//! Each finished run is merged into the file on disk, which is replaced
//! atomically.

use crate::{
    common::*,
    metrics::{EvalMetrics, TrainMetrics},
};

/// Per-epoch training metrics.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrainHistory {
    #[serde(rename = "Loss", with = "serde_metric_list")]
    pub loss: Vec<f64>,
    #[serde(rename = "Accuracy", with = "serde_metric_list")]
    pub accuracy: Vec<f64>,
}

/// Per-epoch evaluation metrics.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvalHistory {
    #[serde(rename = "Loss", with = "serde_metric_list")]
    pub loss: Vec<f64>,
    #[serde(rename = "Accuracy", with = "serde_metric_list")]
    pub accuracy: Vec<f64>,
    #[serde(rename = "Precision", with = "serde_metric_list")]
    pub precision: Vec<f64>,
    #[serde(rename = "Recall", with = "serde_metric_list")]
    pub recall: Vec<f64>,
    #[serde(rename = "F1-Score", with = "serde_metric_list")]
    pub f1: Vec<f64>,
}

impl EvalHistory {
    fn push(&mut self, metrics: &EvalMetrics) {
        self.loss.push(metrics.loss);
        self.accuracy.push(metrics.accuracy);
        self.precision.push(metrics.precision);
        self.recall.push(metrics.recall);
        self.f1.push(metrics.f1);
    }
}

/// Metrics of all finished epochs of a run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsHistory {
    #[serde(rename = "Train")]
    pub train: TrainHistory,
    #[serde(rename = "Test")]
    pub test: EvalHistory,
    #[serde(rename = "Validation")]
    pub validation: EvalHistory,
}

impl MetricsHistory {
    pub fn push(&mut self, train: &TrainMetrics, test: &EvalMetrics, validation: &EvalMetrics) {
        self.train.loss.push(train.loss);
        self.train.accuracy.push(train.accuracy);
        self.test.push(test);
        self.validation.push(validation);
    }

    pub fn num_epochs(&self) -> usize {
        self.train.loss.len()
    }
}

/// The report entry of a finished run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(flatten)]
    pub history: MetricsHistory,
    /// Wall-clock seconds spent in training.
    #[serde(rename = "Training Time")]
    pub training_time: f64,
}

/// Run key to report entry, in insertion order.
pub type TrainingReport = IndexMap<String, RunReport>;

/// Metric lists that keep non-finite values.
///
/// JSON has no NaN or infinity, so they are written as the strings `"NaN"`,
/// `"Infinity"` and `"-Infinity"`. A `null` entry reads back as NaN.
mod serde_metric_list {
    use super::*;
    use serde::{Deserializer, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum JsonFloat {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let values: Vec<_> = values
            .iter()
            .map(|&value| {
                if value.is_finite() {
                    JsonFloat::Number(value)
                } else if value.is_nan() {
                    JsonFloat::Text("NaN".into())
                } else if value > 0.0 {
                    JsonFloat::Text("Infinity".into())
                } else {
                    JsonFloat::Text("-Infinity".into())
                }
            })
            .collect();
        values.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let values = Vec::<Option<JsonFloat>>::deserialize(deserializer)?;
        values
            .into_iter()
            .map(|value| match value {
                Some(JsonFloat::Number(value)) => Ok(value),
                None => Ok(f64::NAN),
                Some(JsonFloat::Text(text)) => match text.as_str() {
                    "NaN" => Ok(f64::NAN),
                    "Infinity" => Ok(f64::INFINITY),
                    "-Infinity" => Ok(f64::NEG_INFINITY),
                    _ => Err(<D::Error as serde::de::Error>::custom(format!(
                        "invalid metric value '{}'",
                        text
                    ))),
                },
            })
            .collect()
    }
}

/// The report file on disk.
#[derive(Debug, Clone)]
pub struct ReportStore {
    path: PathBuf,
}

impl ReportStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the report, or an empty one if the file does not exist.
    pub fn load(&self) -> Result<TrainingReport> {
        if !self.path.exists() {
            return Ok(TrainingReport::new());
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("unable to read report '{}'", self.path.display()))?;
        let report = serde_json::from_str(&text)
            .with_context(|| format!("malformed report '{}'", self.path.display()))?;
        Ok(report)
    }

    /// Insert or replace the entry of a run and rewrite the file.
    pub fn merge(&self, key: &str, entry: RunReport) -> Result<TrainingReport> {
        let mut report = self.load()?;
        report.insert(key.to_owned(), entry);
        self.save(&report)?;
        info!("saved report entry '{}' to '{}'", key, self.path.display());
        Ok(report)
    }

    pub fn save(&self, report: &TrainingReport) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let text = serde_json::to_string_pretty(report)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, text)
            .with_context(|| format!("unable to write '{}'", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!(
                "unable to move '{}' to '{}'",
                tmp_path.display(),
                self.path.display()
            )
        })?;
        Ok(())
    }
}
