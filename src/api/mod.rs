//! HTTP surface.
//!
//! - `POST /upload/{video_type}`: multipart form (field `file`) or raw body
//! - `GET /download/{video_name}`: stored result video as `video/mp4`
//! - `GET /health`
//!
//! Jobs run on actix's blocking pool; the async workers only move bytes.

use std::path::PathBuf;
use std::sync::Arc;

use actix_cors::Cors;
use actix_files::NamedFile;
use actix_multipart::Multipart;
use actix_web::http::header::{
    self, ContentDisposition, DispositionParam, DispositionType, HeaderValue,
};
use actix_web::http::StatusCode;
use actix_web::{get, post, web, App, HttpRequest, HttpResponse, HttpServer, ResponseError};
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use serde_json::json;

use crate::job::{JobError, JobManager};

const UPLOAD_FIELD: &str = "file";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub static_dir: Option<PathBuf>,
    pub max_upload_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8000".to_string(),
            static_dir: None,
            max_upload_bytes: 1024 * 1024 * 1024,
        }
    }
}

pub struct ApiState {
    pub manager: Arc<JobManager>,
    pub max_upload_bytes: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Job(#[from] JobError),
    #[error("upload exceeds {0} bytes")]
    TooLarge(usize),
    #[error("malformed upload: {0}")]
    BadUpload(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Job(JobError::InvalidSiteType(_)) => StatusCode::BAD_REQUEST,
            ApiError::Job(JobError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Job(JobError::ResultNotGenerated(_) | JobError::Io(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::BadUpload(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            ApiError::Job(JobError::InvalidSiteType(_)) => "Invalid video type".to_string(),
            ApiError::Job(JobError::NotFound(_)) => "Video not found.".to_string(),
            ApiError::Job(JobError::ResultNotGenerated(_)) => {
                "Result video not generated correctly.".to_string()
            }
            ApiError::Job(JobError::Io(_)) => "Video processing failed.".to_string(),
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(json!({ "error": message }))
    }
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    count: u64,
    logs: Vec<String>,
    image: Option<String>,
    video_url: Option<String>,
    video_filename: String,
}

struct Upload {
    filename: Option<String>,
    bytes: Vec<u8>,
}

/// Register routes on an app or test service.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(upload).service(download).service(health);
}

pub async fn serve(config: ApiConfig, manager: Arc<JobManager>) -> std::io::Result<()> {
    let state = web::Data::new(ApiState {
        manager,
        max_upload_bytes: config.max_upload_bytes,
    });
    let static_dir = config.static_dir.clone();
    log::info!("listening on {}", config.addr);

    HttpServer::new(move || {
        let mut app = App::new()
            .wrap(Cors::permissive())
            .app_data(state.clone())
            .configure(configure);
        if let Some(dir) = &static_dir {
            app = app.service(actix_files::Files::new("/static", dir));
        }
        app
    })
    .bind(&config.addr)?
    .run()
    .await
}

#[post("/upload/{video_type}")]
async fn upload(
    req: HttpRequest,
    payload: web::Payload,
    video_type: web::Path<String>,
    state: web::Data<ApiState>,
) -> Result<HttpResponse, ApiError> {
    let limit = state.max_upload_bytes;
    let upload = if is_multipart(&req) {
        read_multipart(Multipart::new(req.headers(), payload), limit).await?
    } else {
        Upload {
            filename: None,
            bytes: read_body(payload, limit).await?,
        }
    };

    let manager = Arc::clone(&state.manager);
    let site_type = video_type.into_inner();
    let result = web::block(move || {
        manager.submit(&site_type, upload.filename.as_deref(), &upload.bytes)
    })
    .await
    .map_err(|e| JobError::Io(anyhow::anyhow!("job worker failed: {}", e)))??;

    Ok(HttpResponse::Ok().json(UploadResponse {
        image: result.image_data_uri(),
        video_url: result.video_url(),
        count: result.count,
        logs: result.logs,
        video_filename: result.video_filename,
    }))
}

#[get("/download/{video_name}")]
async fn download(
    req: HttpRequest,
    video_name: web::Path<String>,
    state: web::Data<ApiState>,
) -> Result<HttpResponse, ApiError> {
    let name = video_name.into_inner();
    let path = state.manager.fetch(&name)?;
    let file = NamedFile::open_async(&path)
        .await
        .map_err(|_| JobError::NotFound(name.clone()))?;
    let disposition = ContentDisposition {
        disposition: DispositionType::Attachment,
        parameters: vec![DispositionParam::Filename(name)],
    };
    let mut response = file.set_content_disposition(disposition).into_response(&req);
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    Ok(response)
}

#[get("/health")]
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

fn is_multipart(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false)
}

async fn read_multipart(mut payload: Multipart, limit: usize) -> Result<Upload, ApiError> {
    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ApiError::BadUpload(e.to_string()))?
    {
        let (name, filename) = match field.content_disposition() {
            Some(cd) => (
                cd.get_name().map(str::to_string),
                cd.get_filename().map(str::to_string),
            ),
            None => (None, None),
        };
        if name.as_deref() != Some(UPLOAD_FIELD) {
            // Drain fields we do not use.
            while let Some(chunk) = field.next().await {
                chunk.map_err(|e| ApiError::BadUpload(e.to_string()))?;
            }
            continue;
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| ApiError::BadUpload(e.to_string()))?;
            if bytes.len() + chunk.len() > limit {
                return Err(ApiError::TooLarge(limit));
            }
            bytes.extend_from_slice(&chunk);
        }
        return Ok(Upload { filename, bytes });
    }
    Err(ApiError::BadUpload(format!(
        "missing '{}' field",
        UPLOAD_FIELD
    )))
}

async fn read_body(mut payload: web::Payload, limit: usize) -> Result<Vec<u8>, ApiError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| ApiError::BadUpload(e.to_string()))?;
        if bytes.len() + chunk.len() > limit {
            return Err(ApiError::TooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}
