// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Bounded Content Reader
//!
//! `AsyncRead` wrapper that enforces a hard byte ceiling on an untrusted
//! upload stream. Each read draws down a byte budget; once the budget is
//! exhausted every further read fails with [`SizeExceeded`], even if the
//! underlying stream has nothing left. A file exactly as large as the
//! budget is therefore rejected as well.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Size enforcement for resume uploads

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use thiserror::Error;
use tokio::io::{AsyncRead, ReadBuf};

/// Resume upload budget (10 MiB).
pub const RESUME_UPLOAD_LIMIT: u64 = 10 * 1024 * 1024;

/// Carried inside the `io::Error` returned once the budget is spent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Uploaded file too large (limit {limit} bytes)")]
pub struct SizeExceeded {
    pub limit: u64,
}

/// Whether an I/O error was raised by a [`BoundedContentReader`]
pub fn is_size_exceeded(err: &io::Error) -> bool {
    err.get_ref()
        .is_some_and(|inner| inner.downcast_ref::<SizeExceeded>().is_some())
}

pub struct BoundedContentReader<R> {
    inner: R,
    limit: u64,
    remaining: u64,
}

impl<R> BoundedContentReader<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            limit,
            remaining: limit,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for BoundedContentReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.remaining == 0 {
            return Poll::Ready(Err(io::Error::other(SizeExceeded { limit: this.limit })));
        }
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let max = this.remaining.min(buf.remaining() as u64) as usize;
        let n = {
            let dst = buf.initialize_unfilled_to(max);
            let mut limited = ReadBuf::new(dst);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut limited))?;
            limited.filled().len()
        };
        buf.advance(n);
        this.remaining -= n as u64;

        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_small_stream_passes_through() {
        let data = b"%PDF-1.7 small".to_vec();
        let mut reader = BoundedContentReader::new(&data[..], 1024);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_oversize_stream_fails() {
        let data = vec![0u8; 64];
        let mut reader = BoundedContentReader::new(&data[..], 16);

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();

        assert!(is_size_exceeded(&err));
    }

    #[tokio::test]
    async fn test_exact_budget_is_rejected() {
        let data = vec![7u8; 16];
        let mut reader = BoundedContentReader::new(&data[..], 16);

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert!(is_size_exceeded(&err));
    }

    #[tokio::test]
    async fn test_other_errors_are_not_size_errors() {
        let err = io::Error::new(io::ErrorKind::BrokenPipe, "gone");
        assert!(!is_size_exceeded(&err));
    }
}
