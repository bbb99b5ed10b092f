//! zoned - zone occupancy HTTP service
//!
//! Accepts video uploads for a site layout, counts people per zone on every
//! frame, and serves the annotated result videos back for download.

use std::sync::Arc;

use anyhow::{Context, Result};

use zone_occupancy::api::{self, ApiConfig};
use zone_occupancy::config::ServiceConfig;
use zone_occupancy::job::JobManager;

#[actix_web::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = ServiceConfig::load()?;
    let video = cfg.video()?;
    let detector = cfg.detector()?;
    let annotator = cfg.annotator()?;
    log::info!(
        "zoned {}: video backend {}, detector {}, work dir {}",
        env!("CARGO_PKG_VERSION"),
        video.name(),
        cfg.detector.backend,
        cfg.work_dir.display()
    );

    let manager = Arc::new(JobManager::new(
        cfg.job_settings(),
        video,
        detector,
        annotator,
    )?);

    let api_config = ApiConfig {
        addr: cfg.api_addr.clone(),
        static_dir: cfg.static_dir.clone(),
        max_upload_bytes: cfg.max_upload_bytes,
    };
    api::serve(api_config, manager)
        .await
        .context("http server failed")?;
    Ok(())
}
