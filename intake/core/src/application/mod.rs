// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod intake_engine;
pub mod resume_status;
pub mod transfer_pipeline;

// Re-export services for convenience
pub use intake_engine::{IntakeConsistencyEngine, IntakeError, IntakeWrite};
pub use resume_status::ResumeStatusCache;
pub use transfer_pipeline::{
    FileTimes, IncomingFile, TransferError, TransferPipeline, UploadKind, UploadReceipt, UploadStatus,
};
