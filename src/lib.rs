pub mod analytics;
pub mod attendance;
pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod forest;
pub mod insights;
pub mod model;

pub use context::{Analyzer, AnalyzerContext, LoadSummary};
pub use data::{Dataset, StudentRecord, Subject, TermScores};
pub use error::{AnalyzerError, Result};
pub use forest::ForestSettings;
pub use model::{ModelBank, PredictionOutcome, PredictionResult, Trend};
