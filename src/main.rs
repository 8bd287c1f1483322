use std::fmt;
use std::io;

use actix_web::http::StatusCode;
use actix_web::{web, App, HttpResponse, HttpServer, ResponseError};
use clap::Parser;
use log::{error, info, warn};
use serde_json::json;

use student_insights::config::Config;
use student_insights::{Analyzer, AnalyzerError};

const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug)]
enum ApiError {
    Analyzer(AnalyzerError),
    Internal(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Analyzer(e) => write!(f, "{}", e),
            ApiError::Internal(message) => write!(f, "{}", message),
        }
    }
}

impl From<AnalyzerError> for ApiError {
    fn from(e: AnalyzerError) -> Self {
        ApiError::Analyzer(e)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Analyzer(AnalyzerError::RecordNotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Analyzer(AnalyzerError::DataNotLoaded) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Analyzer(AnalyzerError::MalformedInput(_))
            | ApiError::Analyzer(AnalyzerError::Csv(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "error": self.to_string(),
        }))
    }
}

fn required_id(raw: String, what: &str) -> Result<String, ApiError> {
    let id = raw.trim().to_string();
    if id.is_empty() {
        return Err(AnalyzerError::MalformedInput(format!("{} ID is required", what)).into());
    }
    Ok(id)
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().body("Student Insights API is running!")
}

async fn list_classes(analyzer: web::Data<Analyzer>) -> Result<HttpResponse, ApiError> {
    let classes = analyzer.class_list()?;
    Ok(HttpResponse::Ok().json(json!({ "success": true, "classes": classes })))
}

async fn list_students(analyzer: web::Data<Analyzer>) -> Result<HttpResponse, ApiError> {
    let students = analyzer.students()?;
    Ok(HttpResponse::Ok().json(json!({ "success": true, "students": students })))
}

async fn student_analysis(
    path: web::Path<String>,
    analyzer: web::Data<Analyzer>,
) -> Result<HttpResponse, ApiError> {
    let student_id = required_id(path.into_inner(), "Student")?;
    let report = analyzer.student_report(&student_id).map_err(|e| {
        error!("Error in student analysis: {}", e);
        e
    })?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "performance": report.performance,
        "analysis": report.analysis,
        "suggestions": report.suggestions,
    })))
}

async fn class_analysis(
    path: web::Path<String>,
    analyzer: web::Data<Analyzer>,
) -> Result<HttpResponse, ApiError> {
    let class_id = required_id(path.into_inner(), "Class")?;
    let insights = analyzer.class_insights(&class_id).map_err(|e| {
        error!("Error in class analysis: {}", e);
        e
    })?;

    Ok(HttpResponse::Ok().json(json!({ "success": true, "insights": insights })))
}

// Training is CPU-bound, keep it off the async workers.
async fn upload_data(
    body: web::Bytes,
    analyzer: web::Data<Analyzer>,
) -> Result<HttpResponse, ApiError> {
    if body.is_empty() {
        return Err(AnalyzerError::MalformedInput("No file provided".to_string()).into());
    }

    let summary = tokio::task::spawn_blocking(move || analyzer.upload_and_replace(&body))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Data uploaded successfully",
        "summary": summary,
    })))
}

async fn reload_data(analyzer: web::Data<Analyzer>) -> Result<HttpResponse, ApiError> {
    let summary = tokio::task::spawn_blocking(move || analyzer.reload())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(json!({ "success": true, "summary": summary })))
}

fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(MAX_UPLOAD_BYTES))
        .route("/health", web::get().to(health_check))
        .route("/classes", web::get().to(list_classes))
        .route("/students", web::get().to(list_students))
        .route("/student/{student_id}", web::get().to(student_analysis))
        .route("/class/{class_id}", web::get().to(class_analysis))
        .route("/upload", web::post().to(upload_data))
        .route("/reload", web::post().to(reload_data));
}

async fn start_api(analyzer: web::Data<Analyzer>, host: String, port: u16) -> io::Result<()> {
    HttpServer::new(move || App::new().app_data(analyzer.clone()).configure(configure))
        .bind((host.as_str(), port))?
        .run()
        .await
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    let config = Config::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    info!("Loading student data from {}", config.data_path.display());
    let analyzer = web::Data::new(Analyzer::new(
        config.data_path.clone(),
        config.forest_settings(),
    ));

    let loader = analyzer.clone();
    let loaded = tokio::task::spawn_blocking(move || loader.load_data())
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    if !loaded {
        warn!("Starting without data; POST a CSV to /upload to load one");
    }

    info!(
        "Starting Student Insights API on http://{}:{}",
        config.host, config.port
    );
    start_api(analyzer, config.host, config.port).await
}
