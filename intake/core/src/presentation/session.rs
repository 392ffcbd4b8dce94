// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Session Routing
//!
//! Decides what an authenticated SSH channel is for and runs it: an
//! interactive shell gets the application form, `scp -t` gets the upload
//! sink, anything else is refused.
//!
//! # Architecture
//!
//! - **Layer:** Presentation Layer
//! - **Purpose:** Protocol multiplexer between the form and the transfer pipeline

use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use crate::application::{IntakeConsistencyEngine, ResumeStatusCache, TransferPipeline};
use crate::domain::identity::Identity;
use crate::infrastructure::scp;
use crate::presentation::form::{FormOutcome, FormSettings, SessionForm};
use crate::presentation::upload::UploadSession;

/// What a channel is used for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionKind {
    /// Interactive shell: the application form
    Form,
    /// `scp -t`: the client is uploading to us
    Upload { recursive: bool, preserve_times: bool },
    /// `scp -f`: the client wants to download from us
    DownloadRefused,
    Unsupported(String),
}

pub struct SessionRouter;

impl SessionRouter {
    /// Classify a channel by its exec command (`None` for a shell request)
    pub fn route(command: Option<&str>) -> SessionKind {
        let Some(command) = command else {
            return SessionKind::Form;
        };

        let mut tokens = command.split_whitespace();
        let is_scp = tokens
            .next()
            .is_some_and(|program| program == "scp" || program.ends_with("/scp"));
        if !is_scp {
            return SessionKind::Unsupported(command.to_string());
        }

        let (mut sink, mut source, mut recursive, mut preserve_times) = (false, false, false, false);
        for token in tokens {
            if token == "--" || !token.starts_with('-') {
                break;
            }
            for flag in token.chars().skip(1) {
                match flag {
                    't' => sink = true,
                    'f' => source = true,
                    'r' => recursive = true,
                    'p' => preserve_times = true,
                    _ => {}
                }
            }
        }

        match (sink, source) {
            (true, false) => SessionKind::Upload {
                recursive,
                preserve_times,
            },
            (false, true) => SessionKind::DownloadRefused,
            _ => SessionKind::Unsupported(command.to_string()),
        }
    }
}

/// Everything a session needs, shared by all connections
#[derive(Clone)]
pub struct IntakeServices {
    pub engine: Arc<IntakeConsistencyEngine>,
    pub resume_status: Arc<ResumeStatusCache>,
    pub pipeline: Arc<TransferPipeline>,
    pub form: FormSettings,
}

impl IntakeServices {
    /// Run one channel to completion and return its exit status
    pub async fn serve<R, W>(&self, identity: &Identity, command: Option<&str>, reader: R, mut writer: W) -> u32
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let kind = SessionRouter::route(command);
        info!(identity = %identity, kind = ?kind, "Session started");

        match kind {
            SessionKind::Form => {
                let form = SessionForm::new(
                    self.engine.clone(),
                    self.resume_status.clone(),
                    self.form.clone(),
                );
                match form.run(identity, &mut reader, &mut writer).await {
                    Ok(FormOutcome::Submitted(_)) => 0,
                    Ok(FormOutcome::Cancelled) => 130,
                    Err(e) => {
                        warn!(identity = %identity, error = %e, "Form session ended with an error");
                        1
                    }
                }
            }
            SessionKind::Upload {
                recursive,
                preserve_times,
            } => {
                let upload = UploadSession::new(&self.pipeline, identity, recursive, preserve_times);
                match upload.run(&mut reader, &mut writer).await {
                    Ok(summary) if summary.rejected.is_none() => 0,
                    Ok(_) => 1,
                    Err(e) => {
                        warn!(identity = %identity, error = %e, "Upload session failed");
                        1
                    }
                }
            }
            SessionKind::DownloadRefused => {
                warn!(identity = %identity, "Refusing download request");
                if let Err(e) = scp::send_fatal(&mut writer, "downloads are not supported; upload your resume with scp").await {
                    warn!(identity = %identity, error = %e, "Could not send download refusal");
                }
                1
            }
            SessionKind::Unsupported(command) => {
                warn!(identity = %identity, command = %command, "Unsupported command");
                let message = format!("unsupported command: {}\r\n", command);
                let reported = async {
                    writer.write_all(message.as_bytes()).await?;
                    writer.flush().await
                };
                if let Err(e) = reported.await {
                    warn!(identity = %identity, error = %e, "Could not report unsupported command");
                }
                127
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_routes_to_form() {
        assert_eq!(SessionRouter::route(None), SessionKind::Form);
    }

    #[test]
    fn test_scp_sink_variants() {
        assert_eq!(
            SessionRouter::route(Some("scp -t .")),
            SessionKind::Upload {
                recursive: false,
                preserve_times: false
            }
        );
        assert_eq!(
            SessionRouter::route(Some("scp -r -p -t -- uploads")),
            SessionKind::Upload {
                recursive: true,
                preserve_times: true
            }
        );
        assert_eq!(
            SessionRouter::route(Some("/usr/bin/scp -pt resume.pdf")),
            SessionKind::Upload {
                recursive: false,
                preserve_times: true
            }
        );
    }

    #[test]
    fn test_scp_source_is_refused() {
        assert_eq!(SessionRouter::route(Some("scp -f resume.pdf")), SessionKind::DownloadRefused);
    }

    #[test]
    fn test_other_commands_unsupported() {
        for command in ["ls -la", "scp resume.pdf", "scp -t -f x", "sftp"] {
            assert!(
                matches!(SessionRouter::route(Some(command)), SessionKind::Unsupported(_)),
                "{command} should be unsupported"
            );
        }
    }
}
