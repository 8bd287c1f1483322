use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use log::{error, info, warn};
use serde::Serialize;

use crate::analytics::{self, ClassInsights, StudentPerformance, SubjectAnalysis};
use crate::data::{Dataset, StudentSummary, Subject};
use crate::error::{AnalyzerError, Result};
use crate::forest::ForestSettings;
use crate::insights::{self, StudentReport};
use crate::model::ModelBank;

/// A dataset together with the model bank trained on it. Never mutated after construction.
#[derive(Debug)]
pub struct AnalyzerContext {
    dataset: Dataset,
    model_bank: ModelBank,
}

impl AnalyzerContext {
    pub fn build(dataset: Dataset, settings: ForestSettings) -> Self {
        let mut model_bank = ModelBank::new(settings);
        if !model_bank.train(&dataset) {
            warn!(
                "Only {} of {} subject models trained",
                model_bank.trained_subjects().len(),
                Subject::ALL.len()
            );
        }
        AnalyzerContext {
            dataset,
            model_bank,
        }
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn model_bank(&self) -> &ModelBank {
        &self.model_bank
    }

    pub fn summary(&self) -> LoadSummary {
        let trained_subjects = self.model_bank.trained_subjects();
        LoadSummary {
            students: self.dataset.len(),
            classes: self.dataset.class_ids().len(),
            all_subjects_trained: trained_subjects.len() == Subject::ALL.len(),
            trained_subjects,
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct LoadSummary {
    pub students: usize,
    pub classes: usize,
    pub trained_subjects: Vec<Subject>,
    pub all_subjects_trained: bool,
}

/// Shared handle over the current context. Reloads build a complete new
/// context before swapping it in, so readers holding the previous `Arc`
/// are unaffected. Reloads and uploads are serialized by `reload_lock`,
/// held from reading the file until the swap.
#[derive(Debug)]
pub struct Analyzer {
    data_path: PathBuf,
    settings: ForestSettings,
    current: RwLock<Option<Arc<AnalyzerContext>>>,
    reload_lock: Mutex<()>,
}

impl Analyzer {
    pub fn new<P: Into<PathBuf>>(data_path: P, settings: ForestSettings) -> Self {
        Analyzer {
            data_path: data_path.into(),
            settings,
            current: RwLock::new(None),
            reload_lock: Mutex::new(()),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Loads the canonical dataset; failures are logged and reported as `false`.
    pub fn load_data(&self) -> bool {
        match self.reload() {
            Ok(_) => true,
            Err(e) => {
                error!("Error loading data: {}", e);
                false
            }
        }
    }

    pub fn reload(&self) -> Result<LoadSummary> {
        let path = self.data_path.clone();
        self.load_from(path)
    }

    /// Replaces the current context with one built from `path`. On error the
    /// previous context stays in place.
    pub fn load_from<P: AsRef<Path>>(&self, path: P) -> Result<LoadSummary> {
        let _guard = self.reload_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.load_locked(path.as_ref())
    }

    /// Validates an uploaded CSV, overwrites the canonical file and reloads it.
    pub fn upload_and_replace(&self, bytes: &[u8]) -> Result<LoadSummary> {
        let _guard = self.reload_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let rows = Dataset::replace_file(bytes, &self.data_path)?;
        info!("Uploaded dataset with {} rows", rows);
        self.load_locked(&self.data_path)
    }

    // Caller holds `reload_lock`.
    fn load_locked(&self, path: &Path) -> Result<LoadSummary> {
        let dataset = Dataset::from_path(path)?;
        let context = AnalyzerContext::build(dataset, self.settings);
        let summary = context.summary();
        self.install(context);
        Ok(summary)
    }

    fn install(&self, context: AnalyzerContext) {
        let context = Arc::new(context);
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = Some(context);
    }

    pub fn snapshot(&self) -> Result<Arc<AnalyzerContext>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(AnalyzerError::DataNotLoaded)
    }

    pub fn class_list(&self) -> Result<Vec<String>> {
        Ok(analytics::class_list(&*self.snapshot()?))
    }

    pub fn students(&self) -> Result<Vec<StudentSummary>> {
        Ok(analytics::student_directory(&*self.snapshot()?))
    }

    pub fn student_performance(&self, student_id: &str) -> Result<StudentPerformance> {
        analytics::student_performance(&*self.snapshot()?, student_id)
    }

    pub fn class_insights(&self, class_id: &str) -> Result<ClassInsights> {
        analytics::class_insights(&*self.snapshot()?, class_id)
    }

    pub fn identify_weak_subjects(&self, student_id: &str) -> Result<SubjectAnalysis> {
        analytics::identify_weak_subjects(&*self.snapshot()?, student_id)
    }

    pub fn recommendations(&self, student_id: &str) -> Result<Vec<String>> {
        insights::student_recommendations(&*self.snapshot()?, student_id)
    }

    pub fn student_report(&self, student_id: &str) -> Result<StudentReport> {
        insights::student_report(&*self.snapshot()?, student_id)
    }
}
