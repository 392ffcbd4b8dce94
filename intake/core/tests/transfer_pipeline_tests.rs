// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Resume transfer pipeline and SCP sink, end to end over in-process stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use term_apply_core::application::{
    FileTimes, IncomingFile, IntakeConsistencyEngine, ResumeStatusCache, TransferError, TransferPipeline, UploadKind,
    UploadStatus,
};
use term_apply_core::domain::identity::Identity;
use term_apply_core::domain::object_store::{ObjectStore, ObjectStoreError};
use term_apply_core::infrastructure::object_store::OpendalObjectStore;
use term_apply_core::infrastructure::repositories::InMemoryApplicationRepository;
use term_apply_core::presentation::{FormSettings, IntakeServices};

const PREFIX: &str = "/term-apply/test/resumes";

/// Object store that counts writes
struct CountingStore {
    inner: OpendalObjectStore,
    puts: AtomicUsize,
}

impl CountingStore {
    fn new() -> Self {
        Self {
            inner: OpendalObjectStore::in_memory().unwrap(),
            puts: AtomicUsize::new(0),
        }
    }

    fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for CountingStore {
    async fn put(&self, key: &str, local_path: &Path) -> Result<(), ObjectStoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, local_path).await
    }

    async fn get(&self, key: &str, local_path: &Path) -> Result<(), ObjectStoreError> {
        self.inner.get(key, local_path).await
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        self.inner.exists(key).await
    }

    async fn last_modified(&self, key: &str) -> Result<Option<DateTime<Utc>>, ObjectStoreError> {
        self.inner.last_modified(key).await
    }
}

fn pdf(body: &str) -> Vec<u8> {
    format!("%PDF-1.7\n%\u{e2}\u{e3}\n1 0 obj\n({})\nendobj\n%%EOF\n", body).into_bytes()
}

fn incoming(bytes: &[u8], times: Option<FileTimes>) -> IncomingFile<&[u8]> {
    IncomingFile {
        name: "resume.pdf".to_string(),
        size: bytes.len() as u64,
        mode: 0o644,
        times,
        reader: bytes,
    }
}

fn alice() -> Identity {
    Identity::parse("alice").unwrap()
}

fn pipeline(store: &Arc<CountingStore>, staging: &TempDir) -> TransferPipeline {
    TransferPipeline::new(store.clone(), staging.path(), PREFIX)
}

#[tokio::test]
async fn test_valid_pdf_is_committed() {
    let store = Arc::new(CountingStore::new());
    let staging = TempDir::new().unwrap();
    let pipeline = pipeline(&store, &staging);
    let body = pdf("Alice A");

    let receipt = pipeline.receive(&alice(), incoming(&body, None)).await.unwrap();

    assert_eq!(receipt.kind, UploadKind::Initial);
    assert_eq!(receipt.bytes, body.len() as u64);
    assert_eq!(receipt.mime_type, "application/pdf");
    assert_eq!(receipt.local_path, staging.path().join("alice-resume.pdf"));
    assert_eq!(std::fs::read(&receipt.local_path).unwrap(), body);
    assert_eq!(store.puts(), 1);
    assert!(store.exists(&receipt.object_key).await.unwrap());

    // No temporary files are left behind.
    let leftovers: Vec<_> = std::fs::read_dir(staging.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_oversized_upload_is_rejected_without_store_write() {
    let store = Arc::new(CountingStore::new());
    let staging = TempDir::new().unwrap();
    let pipeline = pipeline(&store, &staging).with_upload_limit(1024);

    let mut body = pdf("big");
    body.resize(4096, b' ');
    let err = pipeline.receive(&alice(), incoming(&body, None)).await.unwrap_err();

    assert!(matches!(
        err,
        TransferError::SizeExceeded {
            limit: 1024,
            status: UploadStatus::NotOnFile
        }
    ));
    assert_eq!(store.puts(), 0);
    assert!(!staging.path().join("alice-resume.pdf").exists());
}

#[tokio::test]
async fn test_renamed_text_file_is_rejected() {
    let store = Arc::new(CountingStore::new());
    let staging = TempDir::new().unwrap();
    let pipeline = pipeline(&store, &staging);

    let text = b"Alice A\nSoftware Engineer\nI like Rust.\n";
    let err = pipeline.receive(&alice(), incoming(text, None)).await.unwrap_err();

    assert!(matches!(
        err,
        TransferError::ContentTypeRejected { detected: None, .. }
    ));
    assert!(err.to_string().contains("not a PDF"));
    assert_eq!(store.puts(), 0);
}

#[tokio::test]
async fn test_failed_staging_copy_removes_temporary_file() {
    let store = Arc::new(CountingStore::new());
    let staging = TempDir::new().unwrap();
    let pipeline = pipeline(&store, &staging);
    // A directory in the way of the canonical file makes the copy fail.
    std::fs::create_dir_all(pipeline.canonical_path(&alice())).unwrap();

    let body = pdf("Alice A");
    let err = pipeline.receive(&alice(), incoming(&body, None)).await.unwrap_err();

    assert!(matches!(err, TransferError::Staging(_)));
    assert_eq!(store.puts(), 0);
    let leftovers: Vec<_> = std::fs::read_dir(staging.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_rejected_replacement_keeps_previous_resume() {
    let store = Arc::new(CountingStore::new());
    let staging = TempDir::new().unwrap();
    let pipeline = pipeline(&store, &staging);
    let original = pdf("version one");

    pipeline.receive(&alice(), incoming(&original, None)).await.unwrap();

    let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    let err = pipeline.receive(&alice(), incoming(png, None)).await.unwrap_err();

    match &err {
        TransferError::ContentTypeRejected { detected, status } => {
            assert_eq!(detected.as_deref(), Some("image/png"));
            assert!(matches!(status, UploadStatus::OnFile { .. }));
        }
        other => panic!("expected content rejection, got {other:?}"),
    }
    assert!(err.to_string().contains("still on file"));
    assert_eq!(store.puts(), 1);
    assert_eq!(std::fs::read(pipeline.canonical_path(&alice())).unwrap(), original);

    let replacement = pdf("version two");
    let receipt = pipeline.receive(&alice(), incoming(&replacement, None)).await.unwrap();
    assert_eq!(receipt.kind, UploadKind::Replacement);
    assert_eq!(store.puts(), 2);
}

#[tokio::test]
async fn test_requested_times_are_applied() {
    let store = Arc::new(CountingStore::new());
    let staging = TempDir::new().unwrap();
    let pipeline = pipeline(&store, &staging);
    let body = pdf("timed");
    let times = FileTimes {
        mtime: 1_600_000_000,
        atime: 1_600_000_100,
    };

    let receipt = pipeline.receive(&alice(), incoming(&body, Some(times))).await.unwrap();

    let modified = std::fs::metadata(&receipt.local_path).unwrap().modified().unwrap();
    assert_eq!(modified, UNIX_EPOCH + Duration::from_secs(1_600_000_000));
}

#[tokio::test]
async fn test_status_cache_learns_of_uploads() {
    let store = Arc::new(CountingStore::new());
    let staging = TempDir::new().unwrap();
    let cache = Arc::new(ResumeStatusCache::new(store.clone(), PREFIX));
    let pipeline = pipeline(&store, &staging).with_status_cache(cache.clone());

    assert!(!cache.has_uploaded(&alice()).await);
    pipeline.receive(&alice(), incoming(&pdf("cached"), None)).await.unwrap();
    assert!(cache.has_uploaded(&alice()).await);
}

fn services(store: Arc<CountingStore>, staging: &TempDir, limit: u64) -> IntakeServices {
    let cache = Arc::new(ResumeStatusCache::new(store.clone(), PREFIX));
    let pipeline = TransferPipeline::new(store, staging.path(), PREFIX)
        .with_upload_limit(limit)
        .with_status_cache(cache.clone());
    IntakeServices {
        engine: Arc::new(IntakeConsistencyEngine::new(Arc::new(InMemoryApplicationRepository::new()))),
        resume_status: cache,
        pipeline: Arc::new(pipeline),
        form: FormSettings {
            roles: vec!["Software Engineer".to_string()],
            upload_host: "localhost".to_string(),
            upload_port: 23234,
        },
    }
}

/// Run one exec channel against `services`, feeding `input` and collecting the reply
async fn exec(services: &IntakeServices, command: &str, input: Vec<u8>) -> (u32, Vec<u8>) {
    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server);

    let client_side = async move {
        client.write_all(&input).await.unwrap();
        client.shutdown().await.unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        reply
    };
    let identity = alice();
    let (status, reply) = tokio::join!(
        services.serve(&identity, Some(command), server_read, server_write),
        client_side
    );
    (status, reply)
}

fn scp_file(body: &[u8]) -> Vec<u8> {
    let mut wire = format!("C0644 {} anything.pdf\n", body.len()).into_bytes();
    wire.extend_from_slice(body);
    wire.push(0);
    wire
}

#[tokio::test]
async fn test_scp_upload_commits_resume() {
    let store = Arc::new(CountingStore::new());
    let staging = TempDir::new().unwrap();
    let services = services(store.clone(), &staging, 1024 * 1024);
    let body = pdf("over scp");

    let mut wire = b"T1600000000 0 1600000100 0\n".to_vec();
    wire.extend(scp_file(&body));
    let (status, reply) = exec(&services, "scp -p -t .", wire).await;

    assert_eq!(status, 0);
    assert_eq!(reply, vec![0, 0, 0, 0]);
    assert_eq!(store.puts(), 1);
    assert_eq!(std::fs::read(staging.path().join("alice-resume.pdf")).unwrap(), body);
    assert!(services.resume_status.has_uploaded(&alice()).await);
    services.engine.shutdown().await;
}

#[tokio::test]
async fn test_scp_oversized_upload_gets_fatal_reply() {
    let store = Arc::new(CountingStore::new());
    let staging = TempDir::new().unwrap();
    let services = services(store.clone(), &staging, 64);

    let mut body = pdf("too big");
    body.resize(256, b' ');
    let (status, reply) = exec(&services, "scp -t resume.pdf", scp_file(&body)).await;

    assert_eq!(status, 1);
    assert_eq!(&reply[..2], &[0, 0]);
    assert_eq!(reply[2], 0x02);
    let message = String::from_utf8_lossy(&reply[3..]);
    assert!(message.contains("too large"), "unexpected reply {message:?}");
    assert!(message.contains("no resume is on file yet"));
    assert_eq!(store.puts(), 0);
    services.engine.shutdown().await;
}

#[tokio::test]
async fn test_scp_directory_requires_recursive_flag() {
    let store = Arc::new(CountingStore::new());
    let staging = TempDir::new().unwrap();
    let services = services(store.clone(), &staging, 1024);

    let (status, reply) = exec(&services, "scp -t .", b"D0755 0 drafts\n".to_vec()).await;

    assert_eq!(status, 1);
    assert_eq!(reply[0], 0);
    assert_eq!(reply[1], 0x02);
    assert!(!staging.path().join("alice").exists());
    services.engine.shutdown().await;
}

#[tokio::test]
async fn test_scp_download_is_refused() {
    let store = Arc::new(CountingStore::new());
    let staging = TempDir::new().unwrap();
    let services = services(store, &staging, 1024);

    let (status, reply) = exec(&services, "scp -f resume.pdf", Vec::new()).await;

    assert_eq!(status, 1);
    assert_eq!(reply[0], 0x02);
    services.engine.shutdown().await;
}

#[tokio::test]
async fn test_shell_form_submits_application() {
    let store = Arc::new(CountingStore::new());
    let staging = TempDir::new().unwrap();
    let services = services(store, &staging, 1024);

    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server);
    let client_side = async move {
        client.write_all(b"Alice A\r\na@x.com\r\n1\r\n").await.unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        reply
    };
    let identity = alice();
    let (status, reply) = tokio::join!(services.serve(&identity, None, server_read, server_write), client_side);

    assert_eq!(status, 0);
    let transcript = String::from_utf8_lossy(&reply);
    assert!(transcript.contains("Resume: not found"));
    assert!(transcript.contains("scp -P 23234 resume.pdf alice@localhost:"));
    assert!(transcript.contains("1) Software Engineer"));
    assert!(transcript.contains("Your application has been received"));

    services.engine.shutdown().await;
    let current = services.engine.current(&alice()).await.unwrap().unwrap();
    assert_eq!(current.email, "a@x.com");
    assert_eq!(current.role_applied, "Software Engineer");
}

#[tokio::test]
async fn test_form_reprompts_for_role_outside_menu() {
    let store = Arc::new(CountingStore::new());
    let staging = TempDir::new().unwrap();
    let services = services(store, &staging, 1024);

    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server);
    let client_side = async move {
        client.write_all(b"Alice A\r\na@x.com\r\n0\r\n2\r\n1\r\n").await.unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        reply
    };
    let identity = alice();
    let (status, reply) = tokio::join!(services.serve(&identity, None, server_read, server_write), client_side);

    assert_eq!(status, 0);
    let transcript = String::from_utf8_lossy(&reply);
    assert_eq!(transcript.matches("Pick a number from 1 to 1.").count(), 2);

    services.engine.shutdown().await;
    let current = services.engine.current(&alice()).await.unwrap().unwrap();
    assert_eq!(current.role_applied, "Software Engineer");
}

#[tokio::test]
async fn test_unsupported_command_is_reported() {
    let store = Arc::new(CountingStore::new());
    let staging = TempDir::new().unwrap();
    let services = services(store, &staging, 1024);

    let (status, reply) = exec(&services, "ls -la", Vec::new()).await;
    assert_eq!(status, 127);
    assert_eq!(String::from_utf8_lossy(&reply), "unsupported command: ls -la\r\n");

    // A client that is already gone still gets the same status.
    let (client, server) = tokio::io::duplex(64);
    drop(client);
    let (server_read, server_write) = tokio::io::split(server);
    let status = services.serve(&alice(), Some("ls -la"), server_read, server_write).await;
    assert_eq!(status, 127);

    services.engine.shutdown().await;
}
