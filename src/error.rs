use thiserror::Error;

use crate::data::Subject;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("No data loaded")]
    DataNotLoaded,

    #[error("No {kind} found with id '{id}'")]
    RecordNotFound { kind: &'static str, id: String },

    #[error("Error training model for {subject}: {reason}")]
    TrainingFailure { subject: Subject, reason: String },

    #[error("Error predicting for {subject}: {reason}")]
    PredictionFailure { subject: Subject, reason: String },

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Model bank has not been trained")]
    ModelNotTrained,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Model error: {0}")]
    Linfa(#[from] linfa::error::Error),
}

impl AnalyzerError {
    pub fn student_not_found(id: &str) -> Self {
        AnalyzerError::RecordNotFound {
            kind: "student",
            id: id.to_string(),
        }
    }

    pub fn class_not_found(id: &str) -> Self {
        AnalyzerError::RecordNotFound {
            kind: "class",
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;
