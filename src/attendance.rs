use serde::Serialize;

use crate::data::{round_to, StudentRecord};
use crate::model::Trend;

/// Share of the average score trend carried over into attendance.
const TREND_WEIGHT: f64 = 0.15;
const MIN_ATTENDANCE: f64 = 70.0;
const MAX_ATTENDANCE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

impl RiskLevel {
    pub fn from_attendance(attendance: f64) -> Self {
        if attendance < 75.0 {
            RiskLevel::High
        } else if attendance < 85.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceForecast {
    pub current_attendance: f64,
    pub predicted_attendance: f64,
    pub risk_level: RiskLevel,
    pub performance_correlation: f64,
    pub trend: Trend,
}

/// Projects attendance from the average T1 to T2 score change across subjects.
pub fn forecast_attendance(record: &StudentRecord) -> AttendanceForecast {
    let changes: Vec<f64> = record
        .scores
        .values()
        .map(|s| s.term2_average() - s.term1_average())
        .collect();
    let avg_trend = if changes.is_empty() {
        0.0
    } else {
        changes.iter().sum::<f64>() / changes.len() as f64
    };

    forecast_from_trend(record.attendance_percentage, avg_trend)
}

pub fn forecast_from_trend(current_attendance: f64, avg_trend: f64) -> AttendanceForecast {
    let predicted = (current_attendance + avg_trend * TREND_WEIGHT).clamp(MIN_ATTENDANCE, MAX_ATTENDANCE);
    let predicted_attendance = round_to(predicted, 1);

    AttendanceForecast {
        current_attendance,
        predicted_attendance,
        risk_level: RiskLevel::from_attendance(predicted_attendance),
        performance_correlation: round_to(avg_trend.abs(), 2),
        trend: Trend::from_change(avg_trend),
    }
}
