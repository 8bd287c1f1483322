use serde::Serialize;

use crate::analytics::{rank_subjects, student_performance, StudentPerformance, SubjectAnalysis};
use crate::attendance::{AttendanceForecast, RiskLevel};
use crate::context::AnalyzerContext;
use crate::error::Result;
use crate::model::{ModelBank, Predictions};

pub const HIGH_RISK_ADVICE: &str =
    "Attendance requires immediate attention. Regular attendance is crucial for improvement.";
pub const MEDIUM_RISK_ADVICE: &str = "Consider improving attendance to maintain academic performance.";

#[derive(Serialize, Clone, Debug)]
pub struct StudentReport {
    pub performance: StudentPerformance,
    pub analysis: SubjectAnalysis,
    pub suggestions: Vec<String>,
}

/// Model recommendations followed by attendance advice when the forecast carries risk.
pub fn compose_suggestions(final_marks: &Predictions, attendance: &AttendanceForecast) -> Vec<String> {
    let mut suggestions = ModelBank::get_recommendations(final_marks);
    match attendance.risk_level {
        RiskLevel::High => suggestions.push(HIGH_RISK_ADVICE.to_string()),
        RiskLevel::Medium => suggestions.push(MEDIUM_RISK_ADVICE.to_string()),
        RiskLevel::Low => {}
    }
    suggestions
}

pub fn student_recommendations(ctx: &AnalyzerContext, student_id: &str) -> Result<Vec<String>> {
    let performance = student_performance(ctx, student_id)?;
    Ok(compose_suggestions(
        &performance.predictions.final_marks,
        &performance.predictions.attendance,
    ))
}

/// Everything shown for one student, computed from a single performance pass.
pub fn student_report(ctx: &AnalyzerContext, student_id: &str) -> Result<StudentReport> {
    let performance = student_performance(ctx, student_id)?;
    let analysis = rank_subjects(&performance.subjects);
    let suggestions = compose_suggestions(
        &performance.predictions.final_marks,
        &performance.predictions.attendance,
    );

    Ok(StudentReport {
        performance,
        analysis,
        suggestions,
    })
}
