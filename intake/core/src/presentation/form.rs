// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Session Form
//!
//! Line-oriented application form shown on an interactive SSH shell. It
//! prompts for name, e-mail and role, shows whether a resume is on file and
//! how to upload one, and submits through the [`IntakeConsistencyEngine`].
//!
//! Input arrives as raw terminal bytes: the form echoes printable ASCII,
//! handles backspace, ignores escape sequences and treats Ctrl-C / Ctrl-D
//! as cancel. Output lines end in `\r\n`.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::application::{IntakeConsistencyEngine, IntakeError, ResumeStatusCache};
use crate::domain::application::{role_by_menu_index, SubmissionOutcome};
use crate::domain::identity::Identity;

const MAX_LINE_LEN: usize = 256;
const CTRL_C: u8 = 0x03;
const CTRL_D: u8 = 0x04;
const BACKSPACE: u8 = 0x08;
const ESC: u8 = 0x1b;
const DELETE: u8 = 0x7f;

/// Presentation settings shared by every form session
#[derive(Debug, Clone)]
pub struct FormSettings {
    /// Roles in menu order
    pub roles: Vec<String>,
    /// Host applicants should `scp` their resume to
    pub upload_host: String,
    pub upload_port: u16,
}

impl FormSettings {
    fn upload_command(&self, identity: &Identity) -> String {
        format!("scp -P {} resume.pdf {}@{}:", self.upload_port, identity, self.upload_host)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormOutcome {
    Submitted(SubmissionOutcome),
    Cancelled,
}

pub struct SessionForm {
    engine: Arc<IntakeConsistencyEngine>,
    resume_status: Arc<ResumeStatusCache>,
    settings: FormSettings,
}

impl SessionForm {
    pub fn new(
        engine: Arc<IntakeConsistencyEngine>,
        resume_status: Arc<ResumeStatusCache>,
        settings: FormSettings,
    ) -> Self {
        Self {
            engine,
            resume_status,
            settings,
        }
    }

    pub async fn run<R, W>(&self, identity: &Identity, reader: &mut R, writer: &mut W) -> io::Result<FormOutcome>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut input = LineEditor::new(reader);

        write_line(writer, &format!("Welcome, {}!", identity)).await?;
        if self.resume_status.has_uploaded(identity).await {
            write_line(writer, "Resume: on file. Upload again to replace it:").await?;
        } else {
            write_line(writer, "Resume: not found. Upload a PDF with:").await?;
        }
        write_line(writer, &format!("  {}", self.settings.upload_command(identity))).await?;
        write_line(writer, "").await?;

        let current = match self.engine.current(identity).await {
            Ok(current) => current,
            Err(e) => {
                warn!(identity = %identity, error = %e, "Could not load current application");
                None
            }
        };
        let (mut name, mut email, mut role) = match &current {
            Some(record) if record.is_open() => {
                write_line(
                    writer,
                    &format!("Current application: {} <{}>, {}", record.name, record.email, record.role_applied),
                )
                .await?;
                (record.name.clone(), record.email.clone(), record.role_applied.clone())
            }
            _ => (String::new(), String::new(), String::new()),
        };

        loop {
            let Some(value) = prompt(&mut input, writer, "Name", &name).await? else {
                return self.cancelled(identity, writer).await;
            };
            name = value;

            let Some(value) = prompt(&mut input, writer, "E-mail", &email).await? else {
                return self.cancelled(identity, writer).await;
            };
            email = value;

            let Some(value) = self.prompt_role(&mut input, writer, &role).await? else {
                return self.cancelled(identity, writer).await;
            };
            role = value;

            match self.engine.submit(identity, &name, &email, &role).await {
                Ok(outcome) => {
                    write_line(writer, outcome_message(outcome)).await?;
                    info!(identity = %identity, outcome = %outcome, "Form submitted");
                    return Ok(FormOutcome::Submitted(outcome));
                }
                Err(IntakeError::Validation(e)) => {
                    write_line(writer, &format!("{}. Please try again.", e)).await?;
                }
                Err(e) => {
                    warn!(identity = %identity, error = %e, "Submission failed");
                    write_line(writer, "Sorry, your application could not be saved right now. Please try again later.")
                        .await?;
                    return Err(io::Error::other(e));
                }
            }
        }
    }

    async fn prompt_role<R, W>(&self, input: &mut LineEditor<'_, R>, writer: &mut W, current: &str) -> io::Result<Option<String>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        for (i, role) in self.settings.roles.iter().enumerate() {
            write_line(writer, &format!("  {}) {}", i + 1, role)).await?;
        }
        let default = self
            .settings
            .roles
            .iter()
            .position(|r| r == current)
            .map(|i| (i + 1).to_string())
            .unwrap_or_default();

        loop {
            let Some(choice) = prompt(input, writer, "Role", &default).await? else {
                return Ok(None);
            };
            let picked = choice
                .parse::<usize>()
                .ok()
                .and_then(|n| role_by_menu_index(&self.settings.roles, n));
            match picked {
                Some(role) => return Ok(Some(role.clone())),
                None => {
                    write_line(writer, &format!("Pick a number from 1 to {}.", self.settings.roles.len())).await?;
                }
            }
        }
    }

    async fn cancelled<W>(&self, identity: &Identity, writer: &mut W) -> io::Result<FormOutcome>
    where
        W: AsyncWrite + Unpin,
    {
        write_line(writer, "").await?;
        write_line(writer, "Cancelled. Nothing was submitted.").await?;
        info!(identity = %identity, "Form cancelled");
        Ok(FormOutcome::Cancelled)
    }
}

fn outcome_message(outcome: SubmissionOutcome) -> &'static str {
    match outcome {
        SubmissionOutcome::Created => "Thanks! Your application has been received.",
        SubmissionOutcome::Unchanged => "No changes: your application is already up to date.",
        SubmissionOutcome::Updated => "Your application has been updated.",
        SubmissionOutcome::Recreated => "Your application has been updated with your new e-mail.",
    }
}

async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await
}

/// Prompt with an optional default; an empty answer keeps the default
async fn prompt<R, W>(input: &mut LineEditor<'_, R>, writer: &mut W, label: &str, default: &str) -> io::Result<Option<String>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let text = if default.is_empty() {
        format!("{}: ", label)
    } else {
        format!("{} [{}]: ", label, default)
    };
    writer.write_all(text.as_bytes()).await?;
    writer.flush().await?;

    Ok(input.read_line(writer).await?.map(|line| {
        let line = line.trim().to_string();
        if line.is_empty() {
            default.to_string()
        } else {
            line
        }
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscapeState {
    None,
    Escape,
    Csi,
}

/// Minimal terminal line editor over a raw byte stream
struct LineEditor<'a, R> {
    reader: &'a mut R,
    pending: VecDeque<u8>,
    escape: EscapeState,
    skip_lf: bool,
}

impl<'a, R: AsyncRead + Unpin> LineEditor<'a, R> {
    fn new(reader: &'a mut R) -> Self {
        Self {
            reader,
            pending: VecDeque::new(),
            escape: EscapeState::None,
            skip_lf: false,
        }
    }

    async fn next_byte(&mut self) -> io::Result<Option<u8>> {
        if let Some(b) = self.pending.pop_front() {
            return Ok(Some(b));
        }
        let mut chunk = [0u8; 256];
        let n = self.reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        self.pending.extend(&chunk[1..n]);
        Ok(Some(chunk[0]))
    }

    /// `None` on cancel or end of input
    async fn read_line<W>(&mut self, writer: &mut W) -> io::Result<Option<String>>
    where
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();
        loop {
            let Some(byte) = self.next_byte().await? else {
                return Ok(None);
            };

            match self.escape {
                EscapeState::Escape => {
                    self.escape = if byte == b'[' { EscapeState::Csi } else { EscapeState::None };
                    continue;
                }
                EscapeState::Csi => {
                    if (0x40..=0x7e).contains(&byte) {
                        self.escape = EscapeState::None;
                    }
                    continue;
                }
                EscapeState::None => {}
            }

            let skip_lf = std::mem::take(&mut self.skip_lf);
            match byte {
                b'\n' if skip_lf => {}
                b'\r' | b'\n' => {
                    self.skip_lf = byte == b'\r';
                    writer.write_all(b"\r\n").await?;
                    writer.flush().await?;
                    return Ok(Some(line));
                }
                CTRL_C | CTRL_D => return Ok(None),
                BACKSPACE | DELETE => {
                    if line.pop().is_some() {
                        writer.write_all(b"\x08 \x08").await?;
                        writer.flush().await?;
                    }
                }
                ESC => self.escape = EscapeState::Escape,
                0x20..=0x7e if line.len() < MAX_LINE_LEN => {
                    line.push(byte as char);
                    writer.write_all(&[byte]).await?;
                    writer.flush().await?;
                }
                _ => {}
            }
        }
    }
}
