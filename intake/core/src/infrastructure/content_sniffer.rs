// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Content Sniffer
//!
//! Determines a staged file's MIME type from its leading bytes using
//! `infer`. The file name and extension are never consulted.

use std::path::Path;
use tokio::io::AsyncReadExt;

/// MIME types accepted as a resume.
pub const ACCEPTED_RESUME_TYPES: &[&str] = &["application/pdf", "application/x-pdf"];

/// Leading bytes inspected; enough for every matcher `infer` ships.
const SNIFF_LEN: usize = 8192;

/// Sniff the MIME type of a file, `None` when no signature matches
pub async fn sniff_mime_type(path: &Path) -> std::io::Result<Option<&'static str>> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    (&mut file).take(SNIFF_LEN as u64).read_to_end(&mut head).await?;
    Ok(sniff_bytes(&head))
}

pub fn sniff_bytes(head: &[u8]) -> Option<&'static str> {
    infer::get(head).map(|kind| kind.mime_type())
}

pub fn is_accepted_resume_type(mime: &str) -> bool {
    ACCEPTED_RESUME_TYPES.contains(&mime)
}
