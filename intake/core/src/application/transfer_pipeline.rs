// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Transfer Pipeline Application Service
//!
//! Receives one resume upload for an authenticated identity: stages the
//! untrusted stream in a temporary file under a byte budget, checks the
//! content type from its magic bytes, and only then replaces the
//! applicant's canonical local copy and uploads it to the object store.
//!
//! A rejected upload never touches the canonical file or the object store,
//! and its error carries the applicant's last known valid upload status so
//! the session can tell them their previous resume is intact.
//!
//! ```text
//! stream ─▶ BoundedContentReader ─▶ .<id>-resume.<uuid>.part
//!                                     │ sniff == pdf?
//!                                     ▼
//!                          <id>-resume.pdf ─▶ ObjectStore::put(<prefix>/<id>-resume.pdf)
//! ```

use chrono::{DateTime, Utc};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::resume_status::ResumeStatusCache;
use crate::domain::identity::Identity;
use crate::domain::object_store::{resume_object_key, ObjectStore, ObjectStoreError};
use crate::infrastructure::bounded_reader::{is_size_exceeded, BoundedContentReader, RESUME_UPLOAD_LIMIT};
use crate::infrastructure::content_sniffer::{is_accepted_resume_type, sniff_mime_type};

/// Longest directory name accepted from the wire.
const MAX_DIRECTORY_NAME_LEN: usize = 255;

/// Requested modification / access times, seconds since the epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTimes {
    pub mtime: i64,
    pub atime: i64,
}

impl FileTimes {
    /// Times are applied only when both are set.
    pub fn is_applicable(&self) -> bool {
        self.mtime != 0 && self.atime != 0
    }
}

/// One file offered by the client
pub struct IncomingFile<R> {
    /// Name as sent by the client; informational only
    pub name: String,
    /// Declared size
    pub size: u64,
    pub mode: u32,
    pub times: Option<FileTimes>,
    pub reader: R,
}

/// Last known valid upload of an applicant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    OnFile { last_modified: Option<DateTime<Utc>> },
    NotOnFile,
    /// The object store could not be queried
    Unknown,
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadStatus::OnFile { last_modified: Some(ts) } => {
                write!(f, "your previous resume (uploaded {}) is still on file", ts.format("%Y-%m-%d %H:%M UTC"))
            }
            UploadStatus::OnFile { last_modified: None } => f.write_str("your previous resume is still on file"),
            UploadStatus::NotOnFile => f.write_str("no resume is on file yet"),
            UploadStatus::Unknown => f.write_str("resume status is currently unavailable"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Initial,
    Replacement,
}

/// A committed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub identity: Identity,
    pub object_key: String,
    pub local_path: PathBuf,
    pub bytes: u64,
    pub mime_type: String,
    pub kind: UploadKind,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Uploaded file too large (limit {limit} bytes); {status}")]
    SizeExceeded { limit: u64, status: UploadStatus },

    #[error("Uploaded file is not a PDF (detected {}); {status}", .detected.as_deref().unwrap_or("unknown type"))]
    ContentTypeRejected {
        detected: Option<String>,
        status: UploadStatus,
    },

    #[error("Upload interrupted: {source}; {status}")]
    Stream {
        #[source]
        source: io::Error,
        status: UploadStatus,
    },

    #[error("Local staging failed: {0}")]
    Staging(#[from] io::Error),

    #[error("Object store upload failed: {0}")]
    Storage(#[from] ObjectStoreError),

    /// The file was committed but its timestamps could not be set
    #[error("Resume saved but timestamps were not applied: {source}")]
    TimestampsNotApplied {
        receipt: Box<UploadReceipt>,
        #[source]
        source: io::Error,
    },

    #[error("Invalid directory name: {0}")]
    InvalidDirectory(String),
}

impl TransferError {
    /// Partial success: the resume itself was stored
    pub fn committed_receipt(&self) -> Option<&UploadReceipt> {
        match self {
            TransferError::TimestampsNotApplied { receipt, .. } => Some(receipt.as_ref()),
            _ => None,
        }
    }
}

pub struct TransferPipeline {
    object_store: Arc<dyn ObjectStore>,
    staging_dir: PathBuf,
    resume_prefix: String,
    upload_limit: u64,
    status_cache: Option<Arc<ResumeStatusCache>>,
}

impl TransferPipeline {
    /// # Arguments
    /// * `object_store` - Destination of committed resumes
    /// * `staging_dir` - Local directory for temporary and canonical copies
    /// * `resume_prefix` - Object key prefix
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        staging_dir: impl Into<PathBuf>,
        resume_prefix: impl Into<String>,
    ) -> Self {
        Self {
            object_store,
            staging_dir: staging_dir.into(),
            resume_prefix: resume_prefix.into(),
            upload_limit: RESUME_UPLOAD_LIMIT,
            status_cache: None,
        }
    }

    pub fn with_upload_limit(mut self, limit: u64) -> Self {
        self.upload_limit = limit;
        self
    }

    /// Mark successful uploads in the form's resume status cache
    pub fn with_status_cache(mut self, cache: Arc<ResumeStatusCache>) -> Self {
        self.status_cache = Some(cache);
        self
    }

    pub fn upload_limit(&self) -> u64 {
        self.upload_limit
    }

    pub fn object_key(&self, identity: &Identity) -> String {
        resume_object_key(&self.resume_prefix, identity)
    }

    pub fn canonical_path(&self, identity: &Identity) -> PathBuf {
        self.staging_dir.join(identity.resume_file_name())
    }

    /// Current upload status as seen by the object store
    pub async fn upload_status(&self, identity: &Identity) -> UploadStatus {
        let key = self.object_key(identity);
        match self.object_store.exists(&key).await {
            Ok(true) => {
                let last_modified = self.object_store.last_modified(&key).await.unwrap_or_else(|e| {
                    warn!(identity = %identity, error = %e, "Could not read resume modification time");
                    None
                });
                UploadStatus::OnFile { last_modified }
            }
            Ok(false) => UploadStatus::NotOnFile,
            Err(e) => {
                warn!(identity = %identity, error = %e, "Could not query resume status");
                UploadStatus::Unknown
            }
        }
    }

    /// Receive, validate and commit one resume
    ///
    /// # Returns
    /// * `Ok(UploadReceipt)` once the object store holds the new resume
    /// * `Err(TransferError::TimestampsNotApplied)` when the resume was
    ///   committed but the requested times could not be set
    /// * any other error leaves the previous resume untouched
    pub async fn receive<R>(&self, identity: &Identity, incoming: IncomingFile<R>) -> Result<UploadReceipt, TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let key = self.object_key(identity);
        let canonical = self.canonical_path(identity);
        let temp = self
            .staging_dir
            .join(format!(".{}-resume.{}.part", identity, Uuid::new_v4()));

        tokio::fs::create_dir_all(&self.staging_dir).await?;

        let kind = match self.object_store.exists(&key).await {
            Ok(true) => UploadKind::Replacement,
            Ok(false) => UploadKind::Initial,
            Err(e) => {
                warn!(identity = %identity, error = %e, "Existence check failed, treating as initial upload");
                UploadKind::Initial
            }
        };
        info!(
            identity = %identity,
            client_name = %incoming.name,
            declared_size = incoming.size,
            kind = ?kind,
            "Receiving resume upload"
        );

        let bytes = match self.stage(&temp, incoming.reader).await {
            Ok(bytes) => bytes,
            Err(e) => {
                remove_best_effort(&temp).await;
                let status = self.upload_status(identity).await;
                let err = if is_size_exceeded(&e) {
                    TransferError::SizeExceeded {
                        limit: self.upload_limit,
                        status,
                    }
                } else {
                    TransferError::Stream { source: e, status }
                };
                return Err(self.rejected(identity, "rejected", err));
            }
        };

        let detected = match sniff_mime_type(&temp).await {
            Ok(detected) => detected,
            Err(e) => {
                remove_best_effort(&temp).await;
                return Err(e.into());
            }
        };
        let mime_type = match detected {
            Some(mime) if is_accepted_resume_type(mime) => mime.to_string(),
            other => {
                remove_best_effort(&temp).await;
                let status = self.upload_status(identity).await;
                let err = TransferError::ContentTypeRejected {
                    detected: other.map(str::to_string),
                    status,
                };
                return Err(self.rejected(identity, "rejected", err));
            }
        };

        let copied = tokio::fs::copy(&temp, &canonical).await;
        remove_best_effort(&temp).await;
        copied?;

        if let Err(e) = self.object_store.put(&key, &canonical).await {
            return Err(self.rejected(identity, "failed", e.into()));
        }
        if let Some(cache) = &self.status_cache {
            cache.record_upload(identity);
        }

        let receipt = UploadReceipt {
            identity: identity.clone(),
            object_key: key,
            local_path: canonical.clone(),
            bytes,
            mime_type,
            kind,
        };
        metrics::counter!("term_apply_uploads_total", "result" => "committed").increment(1);
        info!(identity = %identity, bytes, key = %receipt.object_key, "Resume committed");

        if let Some(times) = incoming.times.filter(FileTimes::is_applicable) {
            if let Err(source) = apply_times(&canonical, times).await {
                warn!(identity = %identity, error = %source, "Could not apply file times");
                return Err(TransferError::TimestampsNotApplied {
                    receipt: Box::new(receipt),
                    source,
                });
            }
        }

        Ok(receipt)
    }

    /// Create the per-applicant staging subdirectory `<staging>/<identity>/<name>`
    ///
    /// Only a single plain path component is accepted; nothing is created
    /// remotely.
    pub async fn make_directory(
        &self,
        identity: &Identity,
        name: &str,
        times: Option<FileTimes>,
    ) -> Result<PathBuf, TransferError> {
        validate_directory_name(name)?;

        let path = self.staging_dir.join(identity.as_str()).join(name);
        tokio::fs::create_dir_all(&path).await?;
        debug!(identity = %identity, path = ?path, "Staging directory created");

        if let Some(times) = times.filter(FileTimes::is_applicable) {
            if let Err(e) = apply_times(&path, times).await {
                warn!(identity = %identity, error = %e, "Could not apply directory times");
            }
        }
        Ok(path)
    }

    async fn stage<R>(&self, temp: &Path, reader: R) -> io::Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut bounded = BoundedContentReader::new(reader, self.upload_limit);
        let mut file = tokio::fs::File::create(temp).await?;
        let bytes = tokio::io::copy(&mut bounded, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(bytes)
    }

    fn rejected(&self, identity: &Identity, result: &'static str, err: TransferError) -> TransferError {
        metrics::counter!("term_apply_uploads_total", "result" => result).increment(1);
        warn!(identity = %identity, error = %err, "Resume upload not committed");
        err
    }
}

fn validate_directory_name(name: &str) -> Result<(), TransferError> {
    let plain = !name.is_empty()
        && name.len() <= MAX_DIRECTORY_NAME_LEN
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);
    if plain {
        Ok(())
    } else {
        Err(TransferError::InvalidDirectory(name.to_string()))
    }
}

async fn remove_best_effort(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = ?path, error = %e, "Failed to remove temporary upload file");
        }
    }
}

fn epoch_seconds(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs.unsigned_abs())
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

async fn apply_times(path: &Path, times: FileTimes) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::options().write(true).open(&path).or_else(|_| std::fs::File::open(&path))?;
        let file_times = std::fs::FileTimes::new()
            .set_modified(epoch_seconds(times.mtime))
            .set_accessed(epoch_seconds(times.atime));
        file.set_times(file_times)
    })
    .await
    .map_err(io::Error::other)?
}
