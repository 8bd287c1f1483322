use std::fs;

use student_insights::analytics::PerformanceDistribution;
use student_insights::attendance::RiskLevel;
use student_insights::{Analyzer, AnalyzerError, ForestSettings, Subject, Trend};
use tempfile::TempDir;

fn header() -> String {
    let mut columns = vec![
        "student_id".to_string(),
        "student_name".to_string(),
        "class".to_string(),
        "attendance_percentage".to_string(),
    ];
    for subject in Subject::ALL {
        columns.extend(subject.columns().iter().map(|c| c.to_string()));
    }
    columns.join(",")
}

/// One row with the same four scores repeated for every subject, except maths.
fn row(id: &str, class: &str, attendance: f64, scores: [f64; 4], maths: [f64; 4]) -> String {
    let mut cells = vec![
        id.to_string(),
        format!("Student {}", id),
        class.to_string(),
        attendance.to_string(),
    ];
    for subject in Subject::ALL {
        let values = if subject == Subject::Maths { maths } else { scores };
        cells.extend(values.iter().map(|v| v.to_string()));
    }
    cells.join(",")
}

fn school_csv() -> String {
    let mut lines = vec![header()];
    for i in 0..24 {
        let base = 40.0 + (i as f64) * 2.5;
        let drift = (i % 5) as f64 - 2.0;
        let class = ["7A", "7B", "7C"][i % 3];
        lines.push(row(
            &format!("S{:02}", i),
            class,
            68.0 + i as f64,
            [base, base + 1.0, base + drift, base + 1.0 + drift],
            [base - 5.0, base - 3.0, base + drift * 2.0, base + drift],
        ));
    }
    lines.push(row("EX", "8A", 88.0, [62.0, 64.0, 66.0, 68.0], [50.0, 50.0, 70.0, 70.0]));
    lines.join("\n") + "\n"
}

fn small_settings() -> ForestSettings {
    ForestSettings {
        n_trees: 20,
        ..ForestSettings::default()
    }
}

fn loaded(csv: &str) -> (TempDir, Analyzer) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("students.csv");
    fs::write(&path, csv).unwrap();
    let analyzer = Analyzer::new(&path, small_settings());
    assert!(analyzer.load_data());
    (dir, analyzer)
}

#[test]
fn test_missing_file_reports_failure() {
    let dir = tempfile::tempdir().unwrap();
    let analyzer = Analyzer::new(dir.path().join("absent.csv"), small_settings());
    assert!(!analyzer.load_data());
    assert!(!analyzer.is_loaded());
    assert!(matches!(
        analyzer.student_performance("S01"),
        Err(AnalyzerError::DataNotLoaded)
    ));
}

#[test]
fn test_term_averages_hold_for_every_student() {
    let (_dir, analyzer) = loaded(&school_csv());
    for summary in analyzer.students().unwrap() {
        let performance = analyzer.student_performance(&summary.student_id).unwrap();
        assert_eq!(performance.subjects.len(), 5);
        for subject in performance.subjects.values() {
            let round = |v: f64| (v * 100.0).round() / 100.0;
            assert_eq!(subject.term1_average, round((subject.pat_t1 + subject.sat_t1) / 2.0));
            assert_eq!(subject.term2_average, round((subject.pat_t2 + subject.sat_t2) / 2.0));
            assert!(
                (subject.average_score - (subject.term1_average + subject.term2_average) / 2.0).abs()
                    <= 0.005 + 1e-9
            );
            assert!(
                (subject.improvement - (subject.term2_average - subject.term1_average)).abs()
                    <= 0.005 + 1e-9
            );
        }
    }
}

#[test]
fn test_worked_example_student() {
    let (_dir, analyzer) = loaded(&school_csv());
    let performance = analyzer.student_performance("EX").unwrap();

    let maths = &performance.subjects[&Subject::Maths];
    assert_eq!(maths.term1_average, 50.0);
    assert_eq!(maths.term2_average, 70.0);
    assert_eq!(maths.average_score, 60.0);
    assert_eq!(maths.improvement, 20.0);

    let prediction = performance.predictions.final_marks[&Subject::Maths]
        .ready()
        .unwrap();
    assert_eq!(prediction.trend, Trend::Improving);
    assert!(prediction.confidence >= 60.0 && prediction.confidence <= 95.0);

    // maths +20, four other subjects +4 each: average trend 7.2
    let attendance = &performance.predictions.attendance;
    assert_eq!(attendance.current_attendance, 88.0);
    assert_eq!(attendance.predicted_attendance, 89.1);
    assert_eq!(attendance.performance_correlation, 7.2);
    assert_eq!(attendance.risk_level, RiskLevel::Low);
}

#[test]
fn test_predictions_stay_in_bounds() {
    let (_dir, analyzer) = loaded(&school_csv());
    for summary in analyzer.students().unwrap() {
        let performance = analyzer.student_performance(&summary.student_id).unwrap();
        for outcome in performance.predictions.final_marks.values() {
            let prediction = outcome.ready().unwrap();
            assert!(prediction.confidence >= 60.0 && prediction.confidence <= 95.0);
            assert_eq!(prediction.contributing_factors.len(), 5);
        }
        let attendance = &performance.predictions.attendance;
        assert!(attendance.predicted_attendance >= 70.0 && attendance.predicted_attendance <= 100.0);
        let expected = if attendance.predicted_attendance < 75.0 {
            RiskLevel::High
        } else if attendance.predicted_attendance < 85.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };
        assert_eq!(attendance.risk_level, expected);
    }
}

#[test]
fn test_weak_and_strong_lists_are_disjoint_and_ordered() {
    let (_dir, analyzer) = loaded(&school_csv());
    for summary in analyzer.students().unwrap() {
        let analysis = analyzer.identify_weak_subjects(&summary.student_id).unwrap();
        assert!(analysis.weak_subjects.iter().all(|s| s.score < 60.0));
        assert!(analysis.strong_subjects.iter().all(|s| s.score >= 85.0));
        assert!(analysis.weak_subjects.windows(2).all(|w| w[0].score <= w[1].score));
        assert!(analysis.strong_subjects.windows(2).all(|w| w[0].score >= w[1].score));

        let performance = analyzer.student_performance(&summary.student_id).unwrap();
        let outside = performance
            .subjects
            .values()
            .filter(|s| s.average_score < 60.0 || s.average_score >= 85.0)
            .count();
        assert_eq!(outside, analysis.weak_subjects.len() + analysis.strong_subjects.len());
    }
}

#[test]
fn test_reloading_same_data_is_idempotent() {
    let (_dir, analyzer) = loaded(&school_csv());
    let before = serde_json::to_value(analyzer.student_report("S07").unwrap()).unwrap();
    let class_before = serde_json::to_value(analyzer.class_insights("7B").unwrap()).unwrap();

    analyzer.reload().unwrap();

    let after = serde_json::to_value(analyzer.student_report("S07").unwrap()).unwrap();
    let class_after = serde_json::to_value(analyzer.class_insights("7B").unwrap()).unwrap();
    assert_eq!(before, after);
    assert_eq!(class_before, class_after);
}

#[test]
fn test_class_distribution_example() {
    let csv = [
        header(),
        row("A", "9Z", 90.0, [90.0; 4], [90.0; 4]),
        row("B", "9Z", 80.0, [55.0; 4], [55.0; 4]),
    ]
    .join("\n");
    let (_dir, analyzer) = loaded(&csv);

    let insights = analyzer.class_insights("9Z").unwrap();
    assert_eq!(insights.total_students, 2);
    assert_eq!(insights.average_attendance, 85.0);
    assert_eq!(
        insights.performance_distribution,
        PerformanceDistribution {
            excellent: 1,
            good: 0,
            average: 0,
            needs_improvement: 1,
        }
    );

    let maths = &insights.subject_performance[&Subject::Maths];
    assert_eq!(maths.average_score, 72.5);
    assert_eq!(maths.weak_students.len(), 1);
    assert_eq!(maths.weak_students[0].name, "Student B");
    assert_eq!(maths.weak_students[0].score, 55.0);
}

#[test]
fn test_unknown_ids_are_not_found() {
    let (_dir, analyzer) = loaded(&school_csv());
    assert!(matches!(
        analyzer.class_insights("12Q"),
        Err(AnalyzerError::RecordNotFound { kind: "class", .. })
    ));
    assert!(matches!(
        analyzer.recommendations("nobody"),
        Err(AnalyzerError::RecordNotFound { kind: "student", .. })
    ));
}

#[test]
fn test_class_list_sorted() {
    let (_dir, analyzer) = loaded(&school_csv());
    assert_eq!(analyzer.class_list().unwrap(), vec!["7A", "7B", "7C", "8A"]);
}

#[test]
fn test_recommendations_cover_each_subject() {
    let (_dir, analyzer) = loaded(&school_csv());
    let suggestions = analyzer.recommendations("S20").unwrap();
    for subject in Subject::ALL {
        assert!(suggestions.iter().any(|s| s.contains(subject.title())));
    }
}

#[test]
fn test_upload_replaces_dataset_and_old_snapshot_survives() {
    let (dir, analyzer) = loaded(&school_csv());
    let old = analyzer.snapshot().unwrap();

    let replacement = [header(), row("N1", "1A", 95.0, [80.0; 4], [81.0, 82.0, 83.0, 84.0])].join("\n");
    let summary = analyzer.upload_and_replace(replacement.as_bytes()).unwrap();
    assert_eq!(summary.students, 1);
    assert_eq!(summary.classes, 1);

    assert_eq!(analyzer.class_list().unwrap(), vec!["1A"]);
    assert!(analyzer.student_performance("S01").is_err());
    assert_eq!(old.dataset().len(), 25);
    assert_eq!(
        fs::read_to_string(dir.path().join("students.csv")).unwrap(),
        replacement
    );
}

#[test]
fn test_malformed_subject_is_isolated() {
    let csv = school_csv();
    let mut lines: Vec<String> = csv.lines().map(str::to_string).collect();
    // science pat_t1 of the first student
    let mut cells: Vec<String> = lines[1].split(',').map(str::to_string).collect();
    cells[12] = "n/a".to_string();
    lines[1] = cells.join(",");
    let (_dir, analyzer) = loaded(&(lines.join("\n") + "\n"));

    let summary = analyzer.snapshot().unwrap().summary();
    assert!(!summary.all_subjects_trained);
    assert!(!summary.trained_subjects.contains(&Subject::Science));

    let performance = analyzer.student_performance("S05").unwrap();
    assert!(performance.predictions.final_marks[&Subject::Science].ready().is_none());
    assert!(performance.predictions.final_marks[&Subject::English].ready().is_some());

    let report = serde_json::to_value(analyzer.student_report("S05").unwrap()).unwrap();
    assert!(report["performance"]["predictions"]["final_marks"]["science"].is_null());
    assert!(!report["suggestions"]
        .as_array()
        .unwrap()
        .iter()
        .any(|s| s.as_str().unwrap().contains("Science")));
}

#[test]
fn test_concurrent_uploads_and_reloads_serve_file_on_disk() {
    let (dir, analyzer) = loaded(&school_csv());
    let path = dir.path().join("students.csv");

    std::thread::scope(|scope| {
        for n in 1..=4usize {
            let analyzer = &analyzer;
            scope.spawn(move || {
                let mut lines = vec![header()];
                for i in 0..n {
                    lines.push(row(&format!("U{}", i), "2B", 90.0, [70.0; 4], [60.0 + i as f64; 4]));
                }
                analyzer.upload_and_replace((lines.join("\n") + "\n").as_bytes()).unwrap();
            });
            scope.spawn(|| {
                analyzer.reload().unwrap();
            });
        }
    });

    analyzer.reload().unwrap();
    let on_disk = fs::read_to_string(&path).unwrap().lines().count() - 1;
    assert_eq!(analyzer.snapshot().unwrap().dataset().len(), on_disk);
}

#[test]
fn test_non_finite_score_is_isolated() {
    let csv = school_csv();
    let mut lines: Vec<String> = csv.lines().map(str::to_string).collect();
    let mut cells: Vec<String> = lines[1].split(',').map(str::to_string).collect();
    cells[12] = "NaN".to_string();
    lines[1] = cells.join(",");
    let (_dir, analyzer) = loaded(&(lines.join("\n") + "\n"));

    let summary = analyzer.snapshot().unwrap().summary();
    assert!(!summary.trained_subjects.contains(&Subject::Science));
    assert!(summary.trained_subjects.contains(&Subject::English));

    let performance = analyzer.student_performance("S03").unwrap();
    assert!(performance.predictions.final_marks[&Subject::Science].ready().is_none());

    let insights = analyzer.class_insights("7A").unwrap();
    assert!(insights.subject_performance[&Subject::Science].average_score.is_finite());
}
