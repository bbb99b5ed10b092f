//! Upload lifecycle.
//!
//! Every submission gets an 8 hex character id. The uploaded bytes are written
//! to `temp_<id><ext>` inside a scoped `job_<id>_*` directory that is removed
//! on every exit path; the annotated video lands in `result_<id><ext>` and its
//! snapshot in `result_<id>_inference.jpg`, both directly in the work directory
//! so they can be downloaded later.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::RngCore;
use regex::Regex;

use crate::annotate::Annotator;
use crate::detect::SharedDetector;
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::video::{VideoBackend, VideoStreamAdapter};
use crate::zone::{SiteType, ZoneLayout};

const ARTIFACT_PATTERN: &str = r"^(temp|result)_.*\..*$";
const JOB_DIR_PATTERN: &str = r"^job_([0-9a-f]{8})_";
const EXTENSION_PATTERN: &str = r"^\.[A-Za-z0-9]{1,8}$";
const RESULT_PREFIX: &str = "result_";

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("invalid video type '{0}'")]
    InvalidSiteType(String),
    #[error("video processing failed: {0:#}")]
    Io(#[from] anyhow::Error),
    #[error("result video {} was not generated", .0.display())]
    ResultNotGenerated(PathBuf),
    #[error("video '{0}' not found")]
    NotFound(String),
}

#[derive(Clone, Debug)]
pub struct JobSettings {
    /// Directory holding temp, result and snapshot artifacts.
    pub work_dir: PathBuf,
    /// Used when the upload name carries no usable extension.
    pub default_extension: String,
    pub poll_attempts: u32,
    pub poll_delay: Duration,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            default_extension: ".mp4".to_string(),
            poll_attempts: 10,
            poll_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug)]
pub struct JobResult {
    pub id: String,
    pub site: SiteType,
    pub count: u64,
    pub logs: Vec<String>,
    pub frames_written: u64,
    pub snapshot_jpeg: Option<Vec<u8>>,
    pub snapshot_path: Option<PathBuf>,
    pub result_path: PathBuf,
    pub video_filename: String,
}

impl JobResult {
    /// `data:image/jpeg;base64,...` for the snapshot, if one was produced.
    pub fn image_data_uri(&self) -> Option<String> {
        self.snapshot_jpeg
            .as_ref()
            .map(|jpeg| format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg)))
    }

    pub fn video_url(&self) -> Option<String> {
        self.result_path
            .exists()
            .then(|| format!("/download/{}", self.video_filename))
    }
}

/// Removes the id from the in-flight set when the job ends.
struct ActiveJob<'a> {
    id: String,
    active: &'a Mutex<HashSet<String>>,
}

impl Drop for ActiveJob<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.id);
        }
    }
}

pub struct JobManager {
    settings: JobSettings,
    video: Arc<dyn VideoBackend>,
    detector: SharedDetector,
    annotator: Arc<dyn Annotator>,
    active: Mutex<HashSet<String>>,
    artifact_pattern: Regex,
    job_dir_pattern: Regex,
    extension_pattern: Regex,
}

impl JobManager {
    pub fn new(
        settings: JobSettings,
        video: Arc<dyn VideoBackend>,
        detector: SharedDetector,
        annotator: Arc<dyn Annotator>,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&settings.work_dir).with_context(|| {
            format!("failed to create work dir {}", settings.work_dir.display())
        })?;
        Ok(Self {
            settings,
            video,
            detector,
            annotator,
            active: Mutex::new(HashSet::new()),
            artifact_pattern: Regex::new(ARTIFACT_PATTERN)?,
            job_dir_pattern: Regex::new(JOB_DIR_PATTERN)?,
            extension_pattern: Regex::new(EXTENSION_PATTERN)?,
        })
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    pub fn work_dir(&self) -> &Path {
        &self.settings.work_dir
    }

    /// Process one uploaded video for `site_type`.
    pub fn submit(
        &self,
        site_type: &str,
        upload_name: Option<&str>,
        bytes: &[u8],
    ) -> Result<JobResult, JobError> {
        self.purge_stale();

        let job = self.register()?;
        let ext = self.extension_for(upload_name);
        let job_dir = tempfile::Builder::new()
            .prefix(&format!("job_{}_", job.id))
            .tempdir_in(&self.settings.work_dir)
            .context("failed to create job directory")?;
        let temp_path = job_dir.path().join(format!("temp_{}{}", job.id, ext));
        let result_path = self
            .settings
            .work_dir
            .join(format!("result_{}{}", job.id, ext));

        std::fs::write(&temp_path, bytes)
            .with_context(|| format!("failed to persist upload to {}", temp_path.display()))?;
        log::info!(
            "job {}: received {} bytes for '{}'",
            job.id,
            bytes.len(),
            site_type
        );

        let site: SiteType = match site_type.parse() {
            Ok(site) => site,
            Err(e) => {
                log::warn!("job {}: {}", job.id, e);
                close_job_dir(job_dir);
                return Err(JobError::InvalidSiteType(site_type.to_string()));
            }
        };

        let processed = self.process(site, &temp_path, &result_path);
        close_job_dir(job_dir);
        let outcome = processed?;

        self.await_result(&result_path)?;

        log::info!(
            "job {}: {} frames, total count {}",
            job.id,
            outcome.frames_processed,
            outcome.total_count
        );
        Ok(JobResult {
            video_filename: format!("result_{}{}", job.id, ext),
            id: job.id.clone(),
            site,
            count: outcome.total_count,
            logs: outcome.logs,
            frames_written: outcome.frames_written,
            snapshot_jpeg: outcome.snapshot_jpeg,
            snapshot_path: outcome.snapshot_path,
            result_path,
        })
    }

    /// Resolve a stored result file by name. Only `result_*` files are served.
    pub fn fetch(&self, name: &str) -> Result<PathBuf, JobError> {
        let not_found = || JobError::NotFound(name.to_string());
        let sanitized = sanitize_filename::sanitize(name);
        if sanitized != name || !name.starts_with(RESULT_PREFIX) {
            return Err(not_found());
        }
        let path = self.settings.work_dir.join(name);
        if !path.is_file() {
            return Err(not_found());
        }
        Ok(path)
    }

    fn process(
        &self,
        site: SiteType,
        temp_path: &Path,
        result_path: &Path,
    ) -> anyhow::Result<PipelineOutcome> {
        let layout = ZoneLayout::for_site(site)?;
        let mut adapter = VideoStreamAdapter::open(self.video.as_ref(), temp_path)?;
        adapter.open_writer(self.video.as_ref(), result_path)?;
        let pipeline = Pipeline::new(Arc::clone(&self.detector), Arc::clone(&self.annotator));
        pipeline.run(&layout, &mut adapter, layout.confidence_threshold())
    }

    fn await_result(&self, result_path: &Path) -> Result<(), JobError> {
        for _ in 0..self.settings.poll_attempts {
            if non_empty(result_path) {
                return Ok(());
            }
            std::thread::sleep(self.settings.poll_delay);
        }
        if non_empty(result_path) {
            Ok(())
        } else {
            Err(JobError::ResultNotGenerated(result_path.to_path_buf()))
        }
    }

    fn register(&self) -> Result<ActiveJob<'_>, JobError> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| anyhow!("job registry lock poisoned"))?;
        let id = loop {
            let id = generate_id();
            if !active.contains(&id) {
                break id;
            }
        };
        active.insert(id.clone());
        Ok(ActiveJob {
            id,
            active: &self.active,
        })
    }

    fn extension_for(&self, upload_name: Option<&str>) -> String {
        upload_name
            .and_then(|name| Path::new(name).extension())
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .filter(|ext| self.extension_pattern.is_match(ext))
            .unwrap_or_else(|| self.settings.default_extension.clone())
    }

    /// Best-effort removal of artifacts left by earlier jobs. Files belonging
    /// to jobs still running in this process are kept; every other error is
    /// logged and ignored.
    ///
    /// The registry lock is held for the whole pass: a job registers its id
    /// before creating any file, so it cannot appear mid-scan unprotected.
    pub fn purge_stale(&self) -> usize {
        let active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entries = match std::fs::read_dir(&self.settings.work_dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!(
                    "cannot scan {} for stale artifacts: {}",
                    self.settings.work_dir.display(),
                    e
                );
                return 0;
            }
        };
        let is_active = |name: &str| {
            active.iter().any(|id| {
                name.starts_with(&format!("temp_{id}"))
                    || name.starts_with(&format!("result_{id}"))
                    || name.starts_with(&format!("job_{id}_"))
            })
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_active(&name) {
                continue;
            }
            let path = entry.path();
            let result = if self.artifact_pattern.is_match(&name) && path.is_file() {
                std::fs::remove_file(&path)
            } else if self.job_dir_pattern.is_match(&name) && path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                continue;
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => log::debug!("skipping stale artifact {}: {}", path.display(), e),
            }
        }
        if removed > 0 {
            log::info!("purged {} stale artifacts", removed);
        }
        removed
    }
}

fn generate_id() -> String {
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn non_empty(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

fn close_job_dir(dir: tempfile::TempDir) {
    let path = dir.path().to_path_buf();
    if let Err(e) = dir.close() {
        log::warn!("failed to remove job directory {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::OverlayAnnotator;
    use crate::detect::StubBackend;
    use crate::video::SyntheticBackend;

    fn manager(work_dir: &Path) -> JobManager {
        JobManager::new(
            JobSettings {
                work_dir: work_dir.to_path_buf(),
                poll_attempts: 2,
                poll_delay: Duration::from_millis(1),
                ..JobSettings::default()
            },
            Arc::new(SyntheticBackend),
            Arc::new(Mutex::new(StubBackend::new())),
            Arc::new(OverlayAnnotator::default()),
        )
        .unwrap()
    }

    #[test]
    fn ids_are_eight_hex_chars() {
        let id = generate_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn extension_defaults_when_missing_or_odd() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        assert_eq!(manager.extension_for(Some("clip.mov")), ".mov");
        assert_eq!(manager.extension_for(Some("clip")), ".mp4");
        assert_eq!(manager.extension_for(None), ".mp4");
        assert_eq!(manager.extension_for(Some("clip.m p4")), ".mp4");
    }

    #[test]
    fn purge_removes_only_stale_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        for name in [
            "temp_aaaa1111.mp4",
            "result_aaaa1111.mp4",
            "result_aaaa1111_inference.jpg",
            "notes.txt",
            "result_noext",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("job_aaaa1111_x1")).unwrap();

        let job = manager.register().unwrap();
        let live = format!("result_{}.mp4", job.id);
        std::fs::write(dir.path().join(&live), b"x").unwrap();

        assert_eq!(manager.purge_stale(), 4);
        assert!(dir.path().join("notes.txt").exists());
        assert!(dir.path().join("result_noext").exists());
        assert!(dir.path().join(&live).exists());

        drop(job);
        assert_eq!(manager.purge_stale(), 1);
    }

    #[test]
    fn fetch_rejects_traversal_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        std::fs::write(dir.path().join("result_abc12345.mp4"), b"data").unwrap();
        std::fs::write(dir.path().join("zoned.toml"), b"secret").unwrap();

        assert!(manager.fetch("result_abc12345.mp4").is_ok());
        for name in [
            "../etc/passwd",
            "sub/result.mp4",
            "",
            ".hidden",
            "result_gone.mp4",
            "zoned.toml",
        ] {
            assert!(matches!(manager.fetch(name), Err(JobError::NotFound(_))));
        }
    }
}
