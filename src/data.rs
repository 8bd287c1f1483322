use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;

use csv::{ByteRecord, Reader, StringRecord};
use log::{info, warn};
use ndarray::{Array1, Array2};
use serde::Serialize;

use crate::error::{AnalyzerError, Result};

pub const STUDENT_ID_COLUMN: &str = "student_id";
pub const STUDENT_NAME_COLUMN: &str = "student_name";
pub const CLASS_COLUMN: &str = "class";
pub const ATTENDANCE_COLUMN: &str = "attendance_percentage";

/// Number of model inputs per subject: four test scores plus attendance.
pub const FEATURE_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    English,
    Maths,
    Science,
    Social,
    Computer,
}

impl Subject {
    pub const ALL: [Subject; 5] = [
        Subject::English,
        Subject::Maths,
        Subject::Science,
        Subject::Social,
        Subject::Computer,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Subject::English => "english",
            Subject::Maths => "maths",
            Subject::Science => "science",
            Subject::Social => "social",
            Subject::Computer => "computer",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Subject::English => "English",
            Subject::Maths => "Maths",
            Subject::Science => "Science",
            Subject::Social => "Social",
            Subject::Computer => "Computer",
        }
    }

    /// Score columns in feature order: PAT T1, SAT T1, PAT T2, SAT T2.
    pub fn columns(&self) -> [&'static str; 4] {
        match self {
            Subject::English => [
                "pat_english_t1",
                "sat_english_t1",
                "pat_english_t2",
                "sat_english_t2",
            ],
            Subject::Maths => ["pat_maths_t1", "sat_maths_t1", "pat_maths_t2", "sat_maths_t2"],
            Subject::Science => [
                "pat_science_t1",
                "sat_science_t1",
                "pat_science_t2",
                "sat_science_t2",
            ],
            Subject::Social => [
                "pat_social_t1",
                "sat_social_t1",
                "pat_social_t2",
                "sat_social_t2",
            ],
            Subject::Computer => [
                "pat_computer_t1",
                "sat_computer_t1",
                "pat_computer_t2",
                "sat_computer_t2",
            ],
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TermScores {
    pub pat_t1: f64,
    pub sat_t1: f64,
    pub pat_t2: f64,
    pub sat_t2: f64,
}

impl TermScores {
    pub fn term1_average(&self) -> f64 {
        (self.pat_t1 + self.sat_t1) / 2.0
    }

    pub fn term2_average(&self) -> f64 {
        (self.pat_t2 + self.sat_t2) / 2.0
    }

    /// Mean of all four scores; the regression target.
    pub fn mean(&self) -> f64 {
        (self.pat_t1 + self.sat_t1 + self.pat_t2 + self.sat_t2) / 4.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentRecord {
    pub student_id: String,
    pub student_name: String,
    pub class_id: String,
    pub attendance_percentage: f64,
    /// Subjects whose four score cells were missing or non-numeric are absent.
    pub scores: BTreeMap<Subject, TermScores>,
}

impl StudentRecord {
    pub fn subject_scores(&self, subject: Subject) -> Option<&TermScores> {
        self.scores.get(&subject)
    }

    /// Model input row: [pat_t1, sat_t1, pat_t2, sat_t2, attendance].
    pub fn features(&self, subject: Subject) -> Option<[f64; FEATURE_COUNT]> {
        self.scores.get(&subject).map(|s| {
            [
                s.pat_t1,
                s.sat_t1,
                s.pat_t2,
                s.sat_t2,
                self.attendance_percentage,
            ]
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentSummary {
    pub student_id: String,
    pub student_name: String,
    pub class: String,
}

/// Immutable snapshot of every student record from one load.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    records: Vec<StudentRecord>,
}

struct ColumnIndex {
    student_id: usize,
    student_name: usize,
    class: usize,
    attendance: usize,
    subjects: BTreeMap<Subject, Option<[usize; 4]>>,
}

impl ColumnIndex {
    fn from_headers(headers: &StringRecord) -> Result<Self> {
        let position = |name: &str| headers.iter().position(|h| h.trim() == name);
        let required = |name: &str| {
            position(name).ok_or_else(|| {
                AnalyzerError::MalformedInput(format!("missing required column '{}'", name))
            })
        };

        let mut subjects = BTreeMap::new();
        for subject in Subject::ALL {
            let [a, b, c, d] = subject.columns();
            let idx = match (position(a), position(b), position(c), position(d)) {
                (Some(a), Some(b), Some(c), Some(d)) => Some([a, b, c, d]),
                _ => {
                    warn!("Score columns for {} are incomplete", subject);
                    None
                }
            };
            subjects.insert(subject, idx);
        }

        Ok(ColumnIndex {
            student_id: required(STUDENT_ID_COLUMN)?,
            student_name: required(STUDENT_NAME_COLUMN)?,
            class: required(CLASS_COLUMN)?,
            attendance: required(ATTENDANCE_COLUMN)?,
            subjects,
        })
    }
}

fn utf8_cell(record: &ByteRecord, idx: usize) -> Option<&str> {
    std::str::from_utf8(record.get(idx)?).ok().map(str::trim)
}

/// Finite number or nothing; "NaN" and "inf" count as malformed.
fn parse_score(record: &ByteRecord, idx: usize) -> Option<f64> {
    utf8_cell(record, idx)?
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

fn text_cell(record: &ByteRecord, idx: usize, column: &str, row: usize) -> Result<String> {
    let bytes = record.get(idx).unwrap_or_default();
    std::str::from_utf8(bytes)
        .map(|s| s.trim().to_string())
        .map_err(|_| {
            AnalyzerError::MalformedInput(format!("row {}: '{}' is not valid UTF-8", row, column))
        })
}

impl Dataset {
    pub fn new(records: Vec<StudentRecord>) -> Self {
        Dataset { records }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let dataset = Self::from_reader(fs::File::open(path)?)?;
        info!("Loaded {} student records from {}", dataset.len(), path.display());
        Ok(dataset)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = Reader::from_reader(reader);
        let columns = ColumnIndex::from_headers(rdr.headers()?)?;
        let mut records = Vec::new();

        let mut record = ByteRecord::new();
        let mut row = 0;
        while rdr.read_byte_record(&mut record)? {
            row += 1;
            let attendance_percentage = parse_score(&record, columns.attendance).ok_or_else(|| {
                AnalyzerError::MalformedInput(format!(
                    "row {}: '{}' is not numeric",
                    row,
                    ATTENDANCE_COLUMN
                ))
            })?;

            let mut scores = BTreeMap::new();
            for (&subject, idx) in &columns.subjects {
                let Some([a, b, c, d]) = *idx else { continue };
                match (
                    parse_score(&record, a),
                    parse_score(&record, b),
                    parse_score(&record, c),
                    parse_score(&record, d),
                ) {
                    (Some(pat_t1), Some(sat_t1), Some(pat_t2), Some(sat_t2)) => {
                        scores.insert(subject, TermScores { pat_t1, sat_t1, pat_t2, sat_t2 });
                    }
                    _ => warn!("row {}: non-numeric {} scores, subject skipped", row, subject),
                }
            }

            records.push(StudentRecord {
                student_id: text_cell(&record, columns.student_id, STUDENT_ID_COLUMN, row)?,
                student_name: text_cell(&record, columns.student_name, STUDENT_NAME_COLUMN, row)?,
                class_id: text_cell(&record, columns.class, CLASS_COLUMN, row)?,
                attendance_percentage,
                scores,
            });
        }

        Ok(Dataset { records })
    }

    /// Validates `bytes` as a dataset, then overwrites `path` with them. Returns the row count.
    pub fn replace_file<P: AsRef<Path>>(bytes: &[u8], path: P) -> Result<usize> {
        let dataset = Self::from_reader(bytes)?;
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        info!("Wrote {} student records to {}", dataset.len(), path.display());
        Ok(dataset.len())
    }

    pub fn records(&self) -> &[StudentRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// First record with a matching id. Duplicate ids are ambiguous; the first wins.
    pub fn find_student(&self, student_id: &str) -> Option<&StudentRecord> {
        let mut matches = self.records.iter().filter(|r| r.student_id == student_id);
        let first = matches.next()?;
        if matches.next().is_some() {
            warn!("Student id '{}' is not unique, using first match", student_id);
        }
        Some(first)
    }

    pub fn class_records(&self, class_id: &str) -> Vec<&StudentRecord> {
        self.records.iter().filter(|r| r.class_id == class_id).collect()
    }

    pub fn class_ids(&self) -> Vec<String> {
        self.records
            .iter()
            .map(|r| r.class_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn summaries(&self) -> Vec<StudentSummary> {
        self.records
            .iter()
            .map(|r| StudentSummary {
                student_id: r.student_id.clone(),
                student_name: r.student_name.clone(),
                class: r.class_id.clone(),
            })
            .collect()
    }

    /// Training matrix for one subject: one row per student, target is the mean of the four scores.
    pub fn training_data(&self, subject: Subject) -> Result<(Array2<f64>, Array1<f64>)> {
        let mut rows = Vec::with_capacity(self.records.len() * FEATURE_COUNT);
        let mut targets = Vec::with_capacity(self.records.len());

        for record in &self.records {
            let (features, scores) = record
                .features(subject)
                .zip(record.subject_scores(subject))
                .ok_or_else(|| AnalyzerError::TrainingFailure {
                    subject,
                    reason: format!("student '{}' has malformed scores", record.student_id),
                })?;
            rows.extend_from_slice(&features);
            targets.push(scores.mean());
        }

        if targets.is_empty() {
            return Err(AnalyzerError::TrainingFailure {
                subject,
                reason: "dataset is empty".to_string(),
            });
        }

        let x = Array2::from_shape_vec((targets.len(), FEATURE_COUNT), rows).map_err(|e| {
            AnalyzerError::TrainingFailure {
                subject,
                reason: e.to_string(),
            }
        })?;
        Ok((x, Array1::from_vec(targets)))
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
