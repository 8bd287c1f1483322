use std::collections::BTreeMap;

use linfa::prelude::*;
use linfa::Dataset as LinfaDataset;
use log::{debug, error, info};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Serialize, Serializer};

use crate::data::{round_to, Dataset, StudentRecord, Subject, FEATURE_COUNT};
use crate::error::{AnalyzerError, Result};
use crate::forest::{std_dev, ForestSettings, RandomForestRegressor};

/// Display labels for the model inputs, in feature order.
pub const FACTOR_LABELS: [&str; FEATURE_COUNT] = ["PAT T1", "SAT T1", "PAT T2", "SAT T2", "Attendance"];

pub const MIN_CONFIDENCE: f64 = 60.0;
pub const MAX_CONFIDENCE: f64 = 95.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
}

impl Trend {
    pub fn from_change(change: f64) -> Self {
        if change > 0.0 {
            Trend::Improving
        } else if change < 0.0 {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContributingFactor {
    pub factor: &'static str,
    pub importance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub predicted_score: f64,
    pub confidence: f64,
    pub trend: Trend,
    pub contributing_factors: Vec<ContributingFactor>,
}

/// Per-subject prediction; a failed subject serializes as `null`.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionOutcome {
    Ready(PredictionResult),
    Failed(String),
}

impl PredictionOutcome {
    pub fn ready(&self) -> Option<&PredictionResult> {
        match self {
            PredictionOutcome::Ready(result) => Some(result),
            PredictionOutcome::Failed(_) => None,
        }
    }
}

impl Serialize for PredictionOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            PredictionOutcome::Ready(result) => result.serialize(serializer),
            PredictionOutcome::Failed(_) => serializer.serialize_none(),
        }
    }
}

pub type Predictions = BTreeMap<Subject, PredictionOutcome>;

/// Zero-mean, unit-variance feature standardization.
#[derive(Debug, Clone)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(x: &Array2<f64>) -> Result<Self> {
        let mean = x.mean_axis(Axis(0)).ok_or_else(|| {
            AnalyzerError::MalformedInput("cannot fit a scaler on zero rows".to_string())
        })?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });
        Ok(StandardScaler { mean, scale })
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }
}

impl<'a> Transformer<ArrayView2<'a, f64>, Array2<f64>> for StandardScaler {
    fn transform(&self, x: ArrayView2<'a, f64>) -> Array2<f64> {
        (&x - &self.mean) / &self.scale
    }
}

#[derive(Debug, Clone)]
struct SubjectModel {
    scaler: StandardScaler,
    forest: RandomForestRegressor,
}

/// One scaler and forest per subject, trained from a full dataset.
#[derive(Debug, Clone)]
pub struct ModelBank {
    settings: ForestSettings,
    models: BTreeMap<Subject, std::result::Result<SubjectModel, String>>,
    trained: bool,
}

impl Default for ModelBank {
    fn default() -> Self {
        Self::new(ForestSettings::default())
    }
}

impl ModelBank {
    pub fn new(settings: ForestSettings) -> Self {
        ModelBank {
            settings,
            models: BTreeMap::new(),
            trained: false,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn trained_subjects(&self) -> Vec<Subject> {
        self.models
            .iter()
            .filter(|(_, model)| model.is_ok())
            .map(|(&subject, _)| subject)
            .collect()
    }

    /// Retrains every subject from scratch. A failing subject is logged and
    /// left without a model; returns whether all subjects trained.
    pub fn train(&mut self, dataset: &Dataset) -> bool {
        info!(
            "Training {} subject models on {} students",
            Subject::ALL.len(),
            dataset.len()
        );
        self.models.clear();

        for subject in Subject::ALL {
            let model = match self.train_subject(dataset, subject) {
                Ok(model) => {
                    debug!("Trained model for {}", subject);
                    Ok(model)
                }
                Err(e) => {
                    error!("{}", e);
                    match e {
                        AnalyzerError::TrainingFailure { reason, .. } => Err(reason),
                        other => Err(other.to_string()),
                    }
                }
            };
            self.models.insert(subject, model);
        }

        self.trained = true;
        self.models.values().all(|m| m.is_ok())
    }

    fn train_subject(&self, dataset: &Dataset, subject: Subject) -> Result<SubjectModel> {
        let (x, y) = dataset.training_data(subject)?;
        let scaler = StandardScaler::fit(&x).map_err(|e| AnalyzerError::TrainingFailure {
            subject,
            reason: e.to_string(),
        })?;
        let scaled = scaler.transform(x.view());
        let forest = self
            .settings
            .fit(&LinfaDataset::new(scaled, y))
            .map_err(|e| AnalyzerError::TrainingFailure {
                subject,
                reason: e.to_string(),
            })?;
        Ok(SubjectModel { scaler, forest })
    }

    /// Predicts every subject for one student. Fails only if the bank was never
    /// trained; individual subjects degrade to [`PredictionOutcome::Failed`].
    pub fn predict(&self, record: &StudentRecord) -> Result<Predictions> {
        if !self.trained {
            return Err(AnalyzerError::ModelNotTrained);
        }

        let mut predictions = BTreeMap::new();
        for subject in Subject::ALL {
            let outcome = record
                .features(subject)
                .ok_or_else(|| AnalyzerError::PredictionFailure {
                    subject,
                    reason: format!("student '{}' has malformed scores", record.student_id),
                })
                .and_then(|features| self.predict_subject(subject, &features));

            let outcome = match outcome {
                Ok(result) => PredictionOutcome::Ready(result),
                Err(e) => {
                    error!("{}", e);
                    PredictionOutcome::Failed(e.to_string())
                }
            };
            predictions.insert(subject, outcome);
        }
        Ok(predictions)
    }

    pub fn predict_subject(
        &self,
        subject: Subject,
        features: &[f64; FEATURE_COUNT],
    ) -> Result<PredictionResult> {
        if !self.trained {
            return Err(AnalyzerError::ModelNotTrained);
        }
        let model = match self.models.get(&subject) {
            Some(Ok(model)) => model,
            Some(Err(reason)) => {
                return Err(AnalyzerError::TrainingFailure {
                    subject,
                    reason: reason.clone(),
                })
            }
            None => {
                return Err(AnalyzerError::PredictionFailure {
                    subject,
                    reason: "no model trained".to_string(),
                })
            }
        };

        let input = Array2::from_shape_vec((1, FEATURE_COUNT), features.to_vec()).map_err(|e| {
            AnalyzerError::PredictionFailure {
                subject,
                reason: e.to_string(),
            }
        })?;
        let scaled = model.scaler.transform(input.view());
        let tree_predictions = model.forest.tree_predictions(scaled.row(0));
        let predicted: Array1<f64> = model.forest.predict(&scaled);
        let predicted_score = predicted[0];
        if !predicted_score.is_finite() {
            return Err(AnalyzerError::PredictionFailure {
                subject,
                reason: "prediction is not a finite number".to_string(),
            });
        }

        let confidence = confidence_from_spread(std_dev(&tree_predictions));

        let contributing_factors = FACTOR_LABELS
            .iter()
            .zip(model.forest.feature_importances())
            .map(|(&factor, importance)| ContributingFactor {
                factor,
                importance: round_to(importance * 100.0, 1),
            })
            .collect();

        let recent = (features[2] + features[3]) / 2.0;
        let previous = (features[0] + features[1]) / 2.0;

        Ok(PredictionResult {
            predicted_score: round_to(predicted_score, 1),
            confidence: round_to(confidence, 1),
            trend: Trend::from_change(recent - previous),
            contributing_factors,
        })
    }

    /// One message per subject with a usable prediction, in subject order.
    pub fn get_recommendations(predictions: &Predictions) -> Vec<String> {
        let mut recommendations = Vec::new();

        for (subject, outcome) in predictions {
            let Some(prediction) = outcome.ready() else {
                continue;
            };

            let mut factors = prediction.contributing_factors.clone();
            factors.sort_by(|a, b| b.importance.total_cmp(&a.importance));
            let [first, second, ..] = factors.as_slice() else {
                continue;
            };

            let title = subject.title();
            let score = prediction.predicted_score;
            let message = if score >= 85.0 {
                if prediction.trend == Trend::Improving {
                    format!("Excellent work in {}! Keep focusing on {}", title, first.factor)
                } else {
                    format!(
                        "Strong performance in {}. To maintain, focus on {}",
                        title, first.factor
                    )
                }
            } else if score >= 70.0 {
                format!(
                    "Good progress in {}. Strengthen {} to improve further",
                    title, first.factor
                )
            } else if score >= 60.0 {
                format!("In {}, focus on {} and {}", title, first.factor, second.factor)
            } else {
                format!(
                    "Priority attention needed in {}. Focus on improving {} and {}",
                    title, first.factor, second.factor
                )
            };
            recommendations.push(message);
        }

        recommendations
    }
}

/// Tree disagreement lowers confidence: 100 - 5 * spread, kept within [60, 95].
pub fn confidence_from_spread(spread: f64) -> f64 {
    (100.0 - spread * 5.0).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}
