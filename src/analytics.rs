use std::collections::BTreeMap;

use serde::Serialize;

use crate::attendance::{forecast_attendance, AttendanceForecast};
use crate::context::AnalyzerContext;
use crate::data::{round_to, StudentRecord, StudentSummary, Subject, TermScores};
use crate::error::{AnalyzerError, Result};
use crate::model::Predictions;

pub const WEAK_THRESHOLD: f64 = 60.0;
pub const STRONG_THRESHOLD: f64 = 85.0;

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct SubjectPerformance {
    pub pat_t1: f64,
    pub sat_t1: f64,
    pub pat_t2: f64,
    pub sat_t2: f64,
    pub term1_average: f64,
    pub term2_average: f64,
    pub average_score: f64,
    pub improvement: f64,
}

impl SubjectPerformance {
    pub fn from_scores(scores: &TermScores) -> Self {
        let term1 = scores.term1_average();
        let term2 = scores.term2_average();
        SubjectPerformance {
            pat_t1: scores.pat_t1,
            sat_t1: scores.sat_t1,
            pat_t2: scores.pat_t2,
            sat_t2: scores.sat_t2,
            term1_average: round_to(term1, 2),
            term2_average: round_to(term2, 2),
            average_score: round_to((term1 + term2) / 2.0, 2),
            improvement: round_to(term2 - term1, 2),
        }
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct StudentPredictions {
    pub final_marks: Predictions,
    pub attendance: AttendanceForecast,
}

#[derive(Serialize, Clone, Debug)]
pub struct StudentPerformance {
    pub name: String,
    pub class: String,
    pub attendance: f64,
    pub subjects: BTreeMap<Subject, SubjectPerformance>,
    pub predictions: StudentPredictions,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct WeakStudent {
    pub name: String,
    pub score: f64,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct SubjectInsight {
    pub average_score: f64,
    pub weak_students: Vec<WeakStudent>,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct PerformanceDistribution {
    pub excellent: usize,
    pub good: usize,
    pub average: usize,
    pub needs_improvement: usize,
}

impl PerformanceDistribution {
    fn record(&mut self, overall: f64) {
        if overall >= 85.0 {
            self.excellent += 1;
        } else if overall >= 70.0 {
            self.good += 1;
        } else if overall >= 60.0 {
            self.average += 1;
        } else {
            self.needs_improvement += 1;
        }
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct ClassInsights {
    pub total_students: usize,
    pub average_attendance: f64,
    pub subject_performance: BTreeMap<Subject, SubjectInsight>,
    pub performance_distribution: PerformanceDistribution,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct SubjectStanding {
    pub subject: Subject,
    pub score: f64,
    pub improvement: f64,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct SubjectAnalysis {
    pub weak_subjects: Vec<SubjectStanding>,
    pub strong_subjects: Vec<SubjectStanding>,
}

fn find_student<'a>(ctx: &'a AnalyzerContext, student_id: &str) -> Result<&'a StudentRecord> {
    ctx.dataset()
        .find_student(student_id)
        .ok_or_else(|| AnalyzerError::student_not_found(student_id))
}

/// Term averages and improvement for every subject with usable scores.
pub fn subject_performance(record: &StudentRecord) -> BTreeMap<Subject, SubjectPerformance> {
    record
        .scores
        .iter()
        .map(|(&subject, scores)| (subject, SubjectPerformance::from_scores(scores)))
        .collect()
}

pub fn student_performance(ctx: &AnalyzerContext, student_id: &str) -> Result<StudentPerformance> {
    let record = find_student(ctx, student_id)?;
    let final_marks = ctx.model_bank().predict(record)?;

    Ok(StudentPerformance {
        name: record.student_name.clone(),
        class: record.class_id.clone(),
        attendance: record.attendance_percentage,
        subjects: subject_performance(record),
        predictions: StudentPredictions {
            final_marks,
            attendance: forecast_attendance(record),
        },
    })
}

pub fn class_insights(ctx: &AnalyzerContext, class_id: &str) -> Result<ClassInsights> {
    let students = ctx.dataset().class_records(class_id);
    if students.is_empty() {
        return Err(AnalyzerError::class_not_found(class_id));
    }

    let total_students = students.len();
    let average_attendance =
        students.iter().map(|s| s.attendance_percentage).sum::<f64>() / total_students as f64;

    // Pass one: per-subject class average and students below the weak threshold.
    let mut subject_performance = BTreeMap::new();
    for subject in Subject::ALL {
        let mut weak_students = Vec::new();
        let mut all_scores = Vec::new();

        for student in &students {
            let Some(scores) = student.subject_scores(subject) else {
                continue;
            };
            let avg_score = scores.mean();
            if avg_score < WEAK_THRESHOLD {
                weak_students.push(WeakStudent {
                    name: student.student_name.clone(),
                    score: round_to(avg_score, 2),
                });
            }
            all_scores.push(avg_score);
        }

        let average_score = if all_scores.is_empty() {
            0.0
        } else {
            all_scores.iter().sum::<f64>() / all_scores.len() as f64
        };

        subject_performance.insert(
            subject,
            SubjectInsight {
                average_score: round_to(average_score, 2),
                weak_students,
            },
        );
    }

    // Pass two: each student's mean over subject averages, bucketed.
    let mut performance_distribution = PerformanceDistribution::default();
    for student in &students {
        let subject_averages: Vec<f64> = Subject::ALL
            .iter()
            .filter_map(|&subject| student.subject_scores(subject))
            .map(TermScores::mean)
            .collect();
        if subject_averages.is_empty() {
            continue;
        }
        let overall = subject_averages.iter().sum::<f64>() / subject_averages.len() as f64;
        performance_distribution.record(overall);
    }

    Ok(ClassInsights {
        total_students,
        average_attendance,
        subject_performance,
        performance_distribution,
    })
}

pub fn identify_weak_subjects(ctx: &AnalyzerContext, student_id: &str) -> Result<SubjectAnalysis> {
    let record = find_student(ctx, student_id)?;
    Ok(rank_subjects(&subject_performance(record)))
}

/// Weak subjects ascending by score, strong subjects descending; the middle band is omitted.
pub fn rank_subjects(subjects: &BTreeMap<Subject, SubjectPerformance>) -> SubjectAnalysis {
    let mut analysis = SubjectAnalysis::default();

    for (&subject, performance) in subjects {
        let standing = SubjectStanding {
            subject,
            score: round_to(performance.average_score, 2),
            improvement: round_to(performance.improvement, 2),
        };
        if performance.average_score < WEAK_THRESHOLD {
            analysis.weak_subjects.push(standing);
        } else if performance.average_score >= STRONG_THRESHOLD {
            analysis.strong_subjects.push(standing);
        }
    }

    analysis
        .weak_subjects
        .sort_by(|a, b| a.score.total_cmp(&b.score));
    analysis
        .strong_subjects
        .sort_by(|a, b| b.score.total_cmp(&a.score));
    analysis
}

pub fn class_list(ctx: &AnalyzerContext) -> Vec<String> {
    ctx.dataset().class_ids()
}

pub fn student_directory(ctx: &AnalyzerContext) -> Vec<StudentSummary> {
    ctx.dataset().summaries()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(pat_t1: f64, sat_t1: f64, pat_t2: f64, sat_t2: f64) -> TermScores {
        TermScores {
            pat_t1,
            sat_t1,
            pat_t2,
            sat_t2,
        }
    }

    #[test]
    fn test_subject_performance_example() {
        let performance = SubjectPerformance::from_scores(&scores(50.0, 50.0, 70.0, 70.0));
        assert_eq!(performance.term1_average, 50.0);
        assert_eq!(performance.term2_average, 70.0);
        assert_eq!(performance.average_score, 60.0);
        assert_eq!(performance.improvement, 20.0);
    }

    #[test]
    fn test_subject_performance_rounds_to_two_places() {
        let performance = SubjectPerformance::from_scores(&scores(66.0, 67.0, 71.5, 72.0));
        assert_eq!(performance.term1_average, 66.5);
        assert_eq!(performance.term2_average, 71.75);
        assert_eq!(performance.average_score, 69.13);
        assert_eq!(performance.improvement, 5.25);
    }

    #[test]
    fn test_rank_subjects_partitions_bands() {
        let mut subjects = BTreeMap::new();
        subjects.insert(Subject::English, SubjectPerformance::from_scores(&scores(55.0, 55.0, 55.0, 55.0)));
        subjects.insert(Subject::Maths, SubjectPerformance::from_scores(&scores(40.0, 40.0, 42.0, 42.0)));
        subjects.insert(Subject::Science, SubjectPerformance::from_scores(&scores(85.0, 85.0, 85.0, 85.0)));
        subjects.insert(Subject::Social, SubjectPerformance::from_scores(&scores(90.0, 92.0, 94.0, 96.0)));
        subjects.insert(Subject::Computer, SubjectPerformance::from_scores(&scores(60.0, 60.0, 84.0, 84.0)));

        let analysis = rank_subjects(&subjects);
        let weak: Vec<_> = analysis.weak_subjects.iter().map(|s| s.subject).collect();
        let strong: Vec<_> = analysis.strong_subjects.iter().map(|s| s.subject).collect();

        assert_eq!(weak, vec![Subject::Maths, Subject::English]);
        assert_eq!(strong, vec![Subject::Social, Subject::Science]);
        assert_eq!(analysis.weak_subjects[0].improvement, 2.0);
    }

    #[test]
    fn test_distribution_buckets() {
        let mut distribution = PerformanceDistribution::default();
        for overall in [90.0, 85.0, 84.99, 70.0, 69.0, 60.0, 59.99] {
            distribution.record(overall);
        }
        assert_eq!(
            distribution,
            PerformanceDistribution {
                excellent: 2,
                good: 2,
                average: 2,
                needs_improvement: 1,
            }
        );
    }
}
