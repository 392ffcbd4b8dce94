// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! SCP Upload Session
//!
//! Drives the sink side of an `scp -t` exchange and hands every file to the
//! [`TransferPipeline`]. Whatever the client names the file, it lands as the
//! applicant's resume.
//!
//! A rejected file ends the exchange with a fatal reply carrying the
//! pipeline's message (including the previous upload status). A committed
//! file whose times could not be applied gets a warning reply and the
//! exchange continues.

use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, warn};

use crate::application::{FileTimes, IncomingFile, TransferPipeline, UploadReceipt};
use crate::domain::identity::Identity;
use crate::infrastructure::scp::{self, ScpError, ScpMessage};

/// Directory depth accepted from `scp -r`: the staging subdirectory only.
const MAX_DIRECTORY_DEPTH: usize = 1;

#[derive(Debug, Default)]
pub struct UploadSummary {
    pub committed: Vec<UploadReceipt>,
    pub warnings: usize,
    /// Message sent to the client when a file was rejected
    pub rejected: Option<String>,
}

pub struct UploadSession<'a> {
    pipeline: &'a TransferPipeline,
    identity: &'a Identity,
    recursive: bool,
    preserve_times: bool,
}

impl<'a> UploadSession<'a> {
    pub fn new(pipeline: &'a TransferPipeline, identity: &'a Identity, recursive: bool, preserve_times: bool) -> Self {
        Self {
            pipeline,
            identity,
            recursive,
            preserve_times,
        }
    }

    pub async fn run<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<UploadSummary, ScpError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut summary = UploadSummary::default();
        let mut pending_times: Option<FileTimes> = None;
        let mut depth = 0usize;

        scp::send_ack(writer).await?;

        while let Some(message) = scp::read_message(reader).await? {
            match message {
                ScpMessage::Times { mtime, atime } => {
                    if self.preserve_times {
                        pending_times = Some(FileTimes { mtime, atime });
                    }
                    scp::send_ack(writer).await?;
                }
                ScpMessage::Directory { name, .. } => {
                    if !self.recursive {
                        return Err(self.abort(writer, "directory upload requires -r").await);
                    }
                    if depth >= MAX_DIRECTORY_DEPTH {
                        return Err(self.abort(writer, "nested directories are not supported").await);
                    }
                    match self
                        .pipeline
                        .make_directory(self.identity, &name, pending_times.take())
                        .await
                    {
                        Ok(_) => {
                            depth += 1;
                            scp::send_ack(writer).await?;
                        }
                        Err(e) => return Err(self.abort(writer, &e.to_string()).await),
                    }
                }
                ScpMessage::EndDirectory => {
                    if depth == 0 {
                        return Err(self.abort(writer, "unbalanced end of directory").await);
                    }
                    depth -= 1;
                    scp::send_ack(writer).await?;
                }
                ScpMessage::File { mode, size, name } => {
                    debug!(identity = %self.identity, name = %name, size, "Client offered file");
                    scp::send_ack(writer).await?;

                    let incoming = IncomingFile {
                        name,
                        size,
                        mode,
                        times: pending_times.take(),
                        reader: (&mut *reader).take(size),
                    };
                    match self.pipeline.receive(self.identity, incoming).await {
                        Ok(receipt) => {
                            scp::read_status(reader).await?;
                            scp::send_ack(writer).await?;
                            summary.committed.push(receipt);
                        }
                        Err(e) => match e.committed_receipt().cloned() {
                            Some(receipt) => {
                                scp::read_status(reader).await?;
                                scp::send_warning(writer, &e.to_string()).await?;
                                summary.warnings += 1;
                                summary.committed.push(receipt);
                            }
                            None => {
                                let message = e.to_string();
                                scp::send_fatal(writer, &message).await?;
                                summary.rejected = Some(message);
                                return Ok(summary);
                            }
                        },
                    }
                }
                ScpMessage::Warning(message) => {
                    warn!(identity = %self.identity, message = %message, "Client reported a warning");
                }
                ScpMessage::Fatal(message) => return Err(ScpError::Remote(message)),
            }
        }

        Ok(summary)
    }

    async fn abort<W>(&self, writer: &mut W, message: &str) -> ScpError
    where
        W: AsyncWrite + Unpin,
    {
        if let Err(e) = scp::send_fatal(writer, message).await {
            warn!(identity = %self.identity, error = %e, "Could not send fatal reply");
        }
        ScpError::Protocol(message.to_string())
    }
}
