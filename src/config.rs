use std::path::PathBuf;

use clap::Parser;

use crate::forest::ForestSettings;

#[derive(Parser, Debug, Clone)]
#[command(name = "student_insights", about = "Student performance analyzer API")]
pub struct Config {
    /// Canonical dataset location; uploads overwrite this file
    #[arg(long, env = "STUDENT_DATA_PATH", default_value = "data/detailed_student_data.csv")]
    pub data_path: PathBuf,

    #[arg(long, env = "STUDENT_INSIGHTS_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "STUDENT_INSIGHTS_PORT", default_value_t = 8080)]
    pub port: u16,

    /// env_logger filter used when RUST_LOG is unset
    #[arg(long, env = "STUDENT_INSIGHTS_LOG", default_value = "info")]
    pub log_level: String,

    /// Trees per subject forest
    #[arg(long, default_value_t = 100)]
    pub trees: usize,

    #[arg(long, default_value_t = 5)]
    pub max_depth: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

impl Config {
    pub fn forest_settings(&self) -> ForestSettings {
        ForestSettings {
            n_trees: self.trees,
            max_depth: self.max_depth,
            seed: self.seed,
            ..ForestSettings::default()
        }
    }
}
