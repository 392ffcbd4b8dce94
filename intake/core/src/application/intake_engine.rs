// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Intake Consistency Engine
//!
//! Reconciles form submissions into a single open [`ApplicationRecord`] per
//! identity. Each submission is classified against the current record and
//! the resulting write is handed to one background writer task, so every
//! write this process makes to the keyed store is totally ordered.
//!
//! ```text
//! submit ─▶ validate ─▶ [decision lock] current record ─▶ New | NoOp | Update | Recreate
//!                                                             │ (enqueue unless NoOp)
//!                                                             ▼
//!                                         writer task ─▶ save / save / recreate
//! ```
//!
//! Decisions read the store under a reader/writer lock. Writes that have
//! been decided but not yet applied are kept in a per-identity overlay, so a
//! second submission for the same identity decides against the state the
//! first one will produce rather than a stale store read. A channel slot is
//! reserved before the decision lock is released, which keeps channel order
//! equal to decision order. The overlay is only touched once the slot is
//! held, so a caller dropped while waiting leaves no trace.
//!
//! The caller gets `Ok` once the write is enqueued. A write that later
//! fails is logged and counted, never retried; a crash between enqueue and
//! write loses it.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::application::{ApplicationRecord, SubmissionOutcome};
use crate::domain::identity::Identity;
use crate::domain::repository::{ApplicationRepository, RepositoryError};
use crate::domain::validation::{validate_submission, ValidationError};

/// Source of `applied_at` values (seconds since the epoch)
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Could not read current application: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Intake writer has shut down")]
    QueueClosed,
}

/// A classified write waiting for the writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeWrite {
    Insert(ApplicationRecord),
    Update(ApplicationRecord),
    Recreate {
        record: ApplicationRecord,
        previous_email: String,
    },
}

impl IntakeWrite {
    pub fn record(&self) -> &ApplicationRecord {
        match self {
            IntakeWrite::Insert(record) | IntakeWrite::Update(record) => record,
            IntakeWrite::Recreate { record, .. } => record,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            IntakeWrite::Insert(_) => "insert",
            IntakeWrite::Update(_) => "update",
            IntakeWrite::Recreate { .. } => "recreate",
        }
    }
}

struct QueuedWrite {
    seq: u64,
    write: IntakeWrite,
}

/// Decided-but-unwritten state per identity, tagged with the write's sequence number
type PendingOverlay = Arc<Mutex<HashMap<Identity, (u64, ApplicationRecord)>>>;

pub struct IntakeConsistencyEngine {
    repository: Arc<dyn ApplicationRepository>,
    decision_lock: RwLock<()>,
    pending: PendingOverlay,
    next_seq: AtomicU64,
    sender: Mutex<Option<mpsc::Sender<QueuedWrite>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    clock: Clock,
}

impl IntakeConsistencyEngine {
    /// Create the engine and spawn its writer task
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(repository: Arc<dyn ApplicationRepository>) -> Self {
        Self::with_clock(repository, Arc::new(|| Utc::now().timestamp()))
    }

    pub fn with_clock(repository: Arc<dyn ApplicationRepository>, clock: Clock) -> Self {
        // Capacity 1: an enqueue waits until the writer is ready for it.
        let (sender, receiver) = mpsc::channel(1);
        let pending: PendingOverlay = Arc::new(Mutex::new(HashMap::new()));
        let writer = tokio::spawn(run_writer(repository.clone(), pending.clone(), receiver));

        Self {
            repository,
            decision_lock: RwLock::new(()),
            pending,
            next_seq: AtomicU64::new(0),
            sender: Mutex::new(Some(sender)),
            writer: Mutex::new(Some(writer)),
            clock,
        }
    }

    /// Submit the form fields for an identity
    ///
    /// # Returns
    /// * `Ok(SubmissionOutcome)` once the resulting write (if any) is enqueued
    /// * `Err(IntakeError::Validation)` before any store access on malformed input
    pub async fn submit(
        &self,
        identity: &Identity,
        name: &str,
        email: &str,
        role_applied: &str,
    ) -> Result<SubmissionOutcome, IntakeError> {
        validate_submission(name, email, role_applied)?;

        let decision_guard = self.decision_lock.write().await;
        let current = self.current_locked(identity).await?;
        let decision = self.classify(identity, current, name, email, role_applied);

        let (outcome, write) = match decision {
            (outcome, None) => {
                drop(decision_guard);
                self.count(outcome);
                debug!(identity = %identity, "Submission identical to open application");
                return Ok(outcome);
            }
            (outcome, Some(write)) => (outcome, write),
        };

        let sender = self.sender.lock().clone().ok_or(IntakeError::QueueClosed)?;
        // Nothing below this await may be cancelled halfway.
        let permit = sender.reserve().await.map_err(|_| IntakeError::QueueClosed)?;

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.pending
            .lock()
            .insert(identity.clone(), (seq, write.record().clone()));
        drop(decision_guard);

        info!(
            identity = %identity,
            outcome = %outcome,
            applied_at = write.record().applied_at,
            "Application submission accepted"
        );
        permit.send(QueuedWrite { seq, write });

        self.count(outcome);
        Ok(outcome)
    }

    /// The application a new submission would be compared against
    pub async fn current(&self, identity: &Identity) -> Result<Option<ApplicationRecord>, IntakeError> {
        let _guard = self.decision_lock.read().await;
        self.current_locked(identity).await
    }

    /// Stop accepting submissions and wait for queued writes to finish
    pub async fn shutdown(&self) {
        self.sender.lock().take();
        let writer = self.writer.lock().take();
        if let Some(handle) = writer {
            if let Err(e) = handle.await {
                error!(error = %e, "Intake writer task ended abnormally");
            }
        }
    }

    async fn current_locked(&self, identity: &Identity) -> Result<Option<ApplicationRecord>, IntakeError> {
        let pending = self.pending.lock().get(identity).map(|(_, record)| record.clone());
        match pending {
            Some(record) => Ok(Some(record)),
            None => Ok(self.repository.find_latest(identity).await?),
        }
    }

    fn classify(
        &self,
        identity: &Identity,
        current: Option<ApplicationRecord>,
        name: &str,
        email: &str,
        role_applied: &str,
    ) -> (SubmissionOutcome, Option<IntakeWrite>) {
        let now = (self.clock)();
        let mut candidate = ApplicationRecord::new(identity.clone(), now, name, email, role_applied);

        match current {
            None => (SubmissionOutcome::Created, Some(IntakeWrite::Insert(candidate))),
            Some(closed) if closed.is_closed() => {
                // A fresh key must not collide with the closed record.
                candidate.applied_at = now.max(closed.applied_at + 1);
                (SubmissionOutcome::Created, Some(IntakeWrite::Insert(candidate)))
            }
            Some(open) => {
                candidate.applied_at = open.applied_at;
                if open.same_submission_as(&candidate) {
                    (SubmissionOutcome::Unchanged, None)
                } else if open.email == candidate.email {
                    (SubmissionOutcome::Updated, Some(IntakeWrite::Update(candidate)))
                } else {
                    (
                        SubmissionOutcome::Recreated,
                        Some(IntakeWrite::Recreate {
                            record: candidate,
                            previous_email: open.email,
                        }),
                    )
                }
            }
        }
    }

    fn count(&self, outcome: SubmissionOutcome) {
        metrics::counter!("term_apply_submissions_total", "outcome" => outcome.as_str()).increment(1);
    }
}

fn clear_pending(pending: &PendingOverlay, identity: &Identity, seq: u64) {
    let mut pending = pending.lock();
    if pending.get(identity).is_some_and(|(current, _)| *current == seq) {
        pending.remove(identity);
    }
}

async fn run_writer(
    repository: Arc<dyn ApplicationRepository>,
    pending: PendingOverlay,
    mut receiver: mpsc::Receiver<QueuedWrite>,
) {
    info!("Starting intake writer task");
    let mut written = 0u64;
    let mut failed = 0u64;

    while let Some(QueuedWrite { seq, write }) = receiver.recv().await {
        let record = write.record();
        let result = match &write {
            IntakeWrite::Insert(record) | IntakeWrite::Update(record) => repository.save(record).await,
            IntakeWrite::Recreate { record, previous_email } => repository.recreate(record, previous_email).await,
        };

        match result {
            Ok(()) => {
                written += 1;
                debug!(
                    identity = %record.identity,
                    write = write.kind(),
                    key = %record.key(),
                    "Application written"
                );
            }
            Err(e) => {
                failed += 1;
                metrics::counter!("term_apply_store_write_failures_total").increment(1);
                error!(
                    identity = %record.identity,
                    write = write.kind(),
                    error = %e,
                    "Failed to write application; the submission is lost"
                );
                if failed % 10 == 0 {
                    warn!("Application writes have failed {} times", failed);
                }
            }
        }

        clear_pending(&pending, &record.identity, seq);
    }

    info!(
        "Intake writer shut down gracefully (written {} applications, {} failures)",
        written, failed
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::InMemoryApplicationRepository;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicI64;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// In-memory store whose saves wait until the test lets them through
    struct HeldRepository {
        inner: InMemoryApplicationRepository,
        hold: Arc<tokio::sync::Mutex<()>>,
        entered: Notify,
    }

    #[async_trait]
    impl ApplicationRepository for HeldRepository {
        async fn find_latest(&self, identity: &Identity) -> Result<Option<ApplicationRecord>, RepositoryError> {
            self.inner.find_latest(identity).await
        }

        async fn find_all(&self, identity: &Identity) -> Result<Vec<ApplicationRecord>, RepositoryError> {
            self.inner.find_all(identity).await
        }

        async fn save(&self, record: &ApplicationRecord) -> Result<(), RepositoryError> {
            self.entered.notify_one();
            let _held = self.hold.lock().await;
            self.inner.save(record).await
        }

        async fn recreate(&self, record: &ApplicationRecord, previous_email: &str) -> Result<(), RepositoryError> {
            self.inner.recreate(record, previous_email).await
        }
    }

    fn fixed_clock(start: i64) -> (Clock, Arc<AtomicI64>) {
        let now = Arc::new(AtomicI64::new(start));
        let handle = now.clone();
        (Arc::new(move || handle.load(Ordering::SeqCst)), now)
    }

    #[tokio::test]
    async fn test_invalid_fields_rejected_before_store_access() {
        let repo = Arc::new(InMemoryApplicationRepository::new());
        let engine = IntakeConsistencyEngine::new(repo.clone());
        let alice = Identity::parse("alice").unwrap();

        let err = engine.submit(&alice, "Alice", "not-an-email", "SWE").await.unwrap_err();
        assert!(matches!(err, IntakeError::Validation(_)));

        engine.shutdown().await;
        assert!(repo.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_overlay_sees_unwritten_submission() {
        let repo = Arc::new(InMemoryApplicationRepository::new());
        let (clock, _) = fixed_clock(1_000);
        let engine = IntakeConsistencyEngine::with_clock(repo.clone(), clock);
        let alice = Identity::parse("alice").unwrap();

        assert_eq!(
            engine.submit(&alice, "Alice A", "a@x.com", "SWE").await.unwrap(),
            SubmissionOutcome::Created
        );
        // Whether or not the insert has landed, the resubmission is a no-op.
        assert_eq!(
            engine.submit(&alice, "Alice A", "a@x.com", "SWE").await.unwrap(),
            SubmissionOutcome::Unchanged
        );

        let current = engine.current(&alice).await.unwrap().unwrap();
        assert_eq!(current.applied_at, 1_000);

        engine.shutdown().await;
        assert_eq!(repo.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let repo = Arc::new(InMemoryApplicationRepository::new());
        let engine = IntakeConsistencyEngine::new(repo);
        engine.shutdown().await;

        let alice = Identity::parse("alice").unwrap();
        let err = engine.submit(&alice, "Alice A", "a@x.com", "SWE").await.unwrap_err();
        assert!(matches!(err, IntakeError::QueueClosed));
    }

    #[tokio::test]
    async fn test_closed_application_gets_later_applied_at() {
        let repo = Arc::new(InMemoryApplicationRepository::new());
        let alice = Identity::parse("alice").unwrap();
        let mut closed = ApplicationRecord::new(alice.clone(), 5_000, "Alice A", "a@x.com", "SWE");
        closed.rejected = true;
        repo.insert_raw(closed.clone());

        // Clock behind the closed record's timestamp.
        let (clock, _) = fixed_clock(4_000);
        let engine = IntakeConsistencyEngine::with_clock(repo.clone(), clock);

        assert_eq!(
            engine.submit(&alice, "Alice A", "a@x.com", "SWE").await.unwrap(),
            SubmissionOutcome::Created
        );
        engine.shutdown().await;

        let history = repo.find_all(&alice).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], closed);
        assert_eq!(history[1].applied_at, 5_001);
        assert!(history[1].is_open());
    }

    #[tokio::test]
    async fn test_cancelled_submit_leaves_no_pending_state() {
        let hold = Arc::new(tokio::sync::Mutex::new(()));
        let repo = Arc::new(HeldRepository {
            inner: InMemoryApplicationRepository::new(),
            hold: hold.clone(),
            entered: Notify::new(),
        });
        let engine = IntakeConsistencyEngine::new(repo.clone());
        let alice = Identity::parse("alice").unwrap();
        let bob = Identity::parse("bob").unwrap();
        let carol = Identity::parse("carol").unwrap();

        // Writer stuck inside alice's save, bob's write fills the channel.
        let held = hold.clone().lock_owned().await;
        engine.submit(&alice, "Alice A", "a@x.com", "SWE").await.unwrap();
        repo.entered.notified().await;
        engine.submit(&bob, "Bob B", "b@x.com", "SWE").await.unwrap();

        let blocked = tokio::time::timeout(
            Duration::from_millis(100),
            engine.submit(&carol, "Carol C", "c@x.com", "SWE"),
        )
        .await;
        assert!(blocked.is_err());
        assert!(engine.current(&carol).await.unwrap().is_none());

        drop(held);
        assert_eq!(
            engine.submit(&carol, "Carol C", "c@x.com", "SWE").await.unwrap(),
            SubmissionOutcome::Created
        );

        engine.shutdown().await;
        assert_eq!(repo.inner.find_all(&carol).await.unwrap().len(), 1);
        assert_eq!(repo.inner.snapshot().len(), 3);
    }
}
