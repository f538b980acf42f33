//! Failure artifact writer - business capability layer
//!
//! Only knows how to put a failed job's screenshot and DOM snapshot on disk
//! and append a line to `failures.log`. Does not decide when to capture.

use crate::error::{AppResult, StorageError};
use crate::infrastructure::ErrorArtifact;
use crate::models::job::{ArtifactRefs, ErrorRecord, JobId};
use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

const FAILURE_LOG: &str = "failures.log";

/// Failure artifact writer
///
/// Layout:
/// ```text
/// <artifact_dir>/<job_id>/screenshot.png
/// <artifact_dir>/<job_id>/dom.html
/// <artifact_dir>/failures.log
/// ```
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    artifact_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new() -> Self {
        Self::with_dir("data/artifacts")
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            artifact_dir: dir.into(),
        }
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Write whatever the session managed to capture. Missing parts are
    /// left out of the returned refs.
    pub async fn write(&self, job_id: &JobId, artifact: &ErrorArtifact) -> AppResult<ArtifactRefs> {
        let job_dir = self.artifact_dir.join(job_id.to_string());
        create_dir(&job_dir).await?;

        let mut refs = ArtifactRefs {
            screenshot: None,
            dom_snapshot: None,
        };

        if let Some(png) = &artifact.screenshot {
            let path = job_dir.join("screenshot.png");
            write_file(&path, png).await?;
            refs.screenshot = Some(path.to_string_lossy().to_string());
        }
        if let Some(html) = &artifact.dom_snapshot {
            let path = job_dir.join("dom.html");
            write_file(&path, html.as_bytes()).await?;
            refs.dom_snapshot = Some(path.to_string_lossy().to_string());
        }

        debug!(
            "artifacts for job {}: screenshot={} dom={}",
            job_id,
            refs.screenshot.is_some(),
            refs.dom_snapshot.is_some()
        );
        Ok(refs)
    }

    /// Append one line per failed job
    pub async fn append_failure(
        &self,
        job_id: &JobId,
        visit_id: &str,
        record: &ErrorRecord,
    ) -> AppResult<()> {
        create_dir(&self.artifact_dir).await?;
        let path = self.artifact_dir.join(FAILURE_LOG);

        let line = format!(
            "{} | visit {} | job {} | {} (attempt {}) | {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            visit_id,
            job_id,
            record.kind,
            record.attempt,
            record.message.replace('\n', " ")
        );

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| write_failed(&path, source))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|source| write_failed(&path, source))?;
        // tokio hands the write to a blocking task; wait for it to land
        file.flush()
            .await
            .map_err(|source| write_failed(&path, source))?;

        Ok(())
    }
}

impl Default for ArtifactWriter {
    fn default() -> Self {
        Self::new()
    }
}

async fn create_dir(dir: &Path) -> AppResult<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(|source| write_failed(dir, source))?;
    Ok(())
}

async fn write_file(path: &Path, bytes: &[u8]) -> AppResult<()> {
    fs::write(path, bytes)
        .await
        .map_err(|source| write_failed(path, source))?;
    Ok(())
}

fn write_failed(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::WriteFailed {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn writes_screenshot_and_dom() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::with_dir(dir.path());
        let job_id = JobId::new();

        let refs = writer
            .write(
                &job_id,
                &ErrorArtifact {
                    screenshot: Some(vec![0x89, b'P', b'N', b'G']),
                    dom_snapshot: Some("<html></html>".into()),
                },
            )
            .await
            .unwrap();

        let png = std::fs::read(refs.screenshot.unwrap()).unwrap();
        assert_eq!(&png[1..4], b"PNG");
        let html = std::fs::read_to_string(refs.dom_snapshot.unwrap()).unwrap();
        assert_eq!(html, "<html></html>");
    }

    #[tokio::test]
    async fn partial_capture_keeps_what_exists() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::with_dir(dir.path());
        let refs = writer
            .write(
                &JobId::new(),
                &ErrorArtifact {
                    screenshot: None,
                    dom_snapshot: Some("<body/>".into()),
                },
            )
            .await
            .unwrap();
        assert!(refs.screenshot.is_none());
        assert!(refs.dom_snapshot.is_some());
    }

    #[tokio::test]
    async fn failure_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::with_dir(dir.path());
        let record = ErrorRecord {
            kind: ErrorKind::Form,
            message: "element missing:\n#save".into(),
            attempt: 2,
            recoverable: false,
            artifact_refs: None,
        };
        writer.append_failure(&JobId::new(), "v1", &record).await.unwrap();
        // on disk as soon as the call returns
        let first = std::fs::read_to_string(dir.path().join(FAILURE_LOG)).unwrap();
        assert!(first.ends_with('\n') && first.contains("visit v1"));

        writer.append_failure(&JobId::new(), "v2", &record).await.unwrap();

        let log = std::fs::read_to_string(dir.path().join(FAILURE_LOG)).unwrap();
        let lines: Vec<_> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("visit v1"));
        assert!(lines[1].contains("form (attempt 2)"));
    }
}
