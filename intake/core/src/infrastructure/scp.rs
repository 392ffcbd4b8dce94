// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! SCP Wire Codec
//!
//! Control records of the classic `scp -t` (sink) protocol as spoken by
//! OpenSSH clients:
//!
//! | Record | Meaning |
//! |--------|---------|
//! | `C<mode> <size> <name>\n` | file follows, `size` bytes then a status byte |
//! | `D<mode> 0 <name>\n` | enter directory |
//! | `E\n` | leave directory |
//! | `T<mtime> 0 <atime> 0\n` | times for the next `C`/`D` |
//! | `\x01<msg>\n` / `\x02<msg>\n` | warning / fatal error |
//!
//! Replies are a single `\0` (ok), or `\x01`/`\x02` followed by a message line.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const ACK: u8 = 0x00;
pub const WARNING: u8 = 0x01;
pub const FATAL: u8 = 0x02;

/// Longest control line accepted, newline included.
pub const MAX_HEADER_LEN: usize = 4096;

#[derive(Debug, Error)]
pub enum ScpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Control record exceeds {MAX_HEADER_LEN} bytes")]
    HeaderTooLong,

    #[error("Client reported error: {0}")]
    Remote(String),
}

/// One message from the sending side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScpMessage {
    File { mode: u32, size: u64, name: String },
    Directory { mode: u32, name: String },
    EndDirectory,
    Times { mtime: i64, atime: i64 },
    Warning(String),
    Fatal(String),
}

/// Parse a control line (without its trailing newline)
pub fn parse_message(line: &str) -> Result<ScpMessage, ScpError> {
    let mut chars = line.chars();
    let tag = chars
        .next()
        .ok_or_else(|| ScpError::Protocol("empty control record".to_string()))?;
    let body = chars.as_str();

    match tag {
        'C' | 'D' => {
            let mut parts = body.splitn(3, ' ');
            let mode = parts
                .next()
                .and_then(|m| u32::from_str_radix(m, 8).ok())
                .ok_or_else(|| ScpError::Protocol(format!("bad mode in '{}'", line)))?;
            let size = parts
                .next()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| ScpError::Protocol(format!("bad size in '{}'", line)))?;
            let name = parts
                .next()
                .filter(|n| !n.is_empty())
                .ok_or_else(|| ScpError::Protocol(format!("missing name in '{}'", line)))?
                .to_string();

            if tag == 'C' {
                Ok(ScpMessage::File { mode, size, name })
            } else {
                Ok(ScpMessage::Directory { mode, name })
            }
        }
        'E' if body.is_empty() => Ok(ScpMessage::EndDirectory),
        'T' => {
            let fields: Vec<i64> = body
                .split(' ')
                .map(|f| f.parse::<i64>())
                .collect::<Result<_, _>>()
                .map_err(|_| ScpError::Protocol(format!("bad times in '{}'", line)))?;
            match fields.as_slice() {
                [mtime, _, atime, _] => Ok(ScpMessage::Times {
                    mtime: *mtime,
                    atime: *atime,
                }),
                _ => Err(ScpError::Protocol(format!("bad times in '{}'", line))),
            }
        }
        '\u{1}' => Ok(ScpMessage::Warning(body.to_string())),
        '\u{2}' => Ok(ScpMessage::Fatal(body.to_string())),
        _ => Err(ScpError::Protocol(format!("unknown control record '{}'", line.escape_debug()))),
    }
}

/// Read one line, at most [`MAX_HEADER_LEN`] bytes; `None` at a clean end of stream
async fn read_line<R>(reader: &mut R) -> Result<Option<String>, ScpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_HEADER_LEN as u64)
        .read_until(b'\n', &mut buf)
        .await?;

    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        return Err(if n >= MAX_HEADER_LEN {
            ScpError::HeaderTooLong
        } else {
            ScpError::Protocol("control record truncated".to_string())
        });
    }
    buf.pop();

    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| ScpError::Protocol("control record is not UTF-8".to_string()))
}

/// Read the next message; `None` once the client closes the stream
pub async fn read_message<R>(reader: &mut R) -> Result<Option<ScpMessage>, ScpError>
where
    R: AsyncBufRead + Unpin,
{
    match read_line(reader).await? {
        Some(line) => parse_message(&line).map(Some),
        None => Ok(None),
    }
}

/// Read the status byte a client sends after file data
pub async fn read_status<R>(reader: &mut R) -> Result<(), ScpError>
where
    R: AsyncBufRead + Unpin,
{
    match reader.read_u8().await? {
        ACK => Ok(()),
        WARNING | FATAL => {
            let message = read_line(reader).await?.unwrap_or_default();
            Err(ScpError::Remote(message))
        }
        other => Err(ScpError::Protocol(format!("unexpected status byte {:#04x}", other))),
    }
}

pub async fn send_ack<W>(writer: &mut W) -> Result<(), ScpError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&[ACK]).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn send_warning<W>(writer: &mut W, message: &str) -> Result<(), ScpError>
where
    W: AsyncWrite + Unpin,
{
    send_reply(writer, WARNING, message).await
}

pub async fn send_fatal<W>(writer: &mut W, message: &str) -> Result<(), ScpError>
where
    W: AsyncWrite + Unpin,
{
    send_reply(writer, FATAL, message).await
}

async fn send_reply<W>(writer: &mut W, code: u8, message: &str) -> Result<(), ScpError>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = Vec::with_capacity(message.len() + 2);
    frame.push(code);
    frame.extend(message.bytes().map(|b| if b == b'\n' || b == b'\r' { b' ' } else { b }));
    frame.push(b'\n');
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn test_parse_records() {
        assert_eq!(
            parse_message("C0644 1234 my resume.pdf").unwrap(),
            ScpMessage::File {
                mode: 0o644,
                size: 1234,
                name: "my resume.pdf".to_string()
            }
        );
        assert_eq!(
            parse_message("D0755 0 drafts").unwrap(),
            ScpMessage::Directory {
                mode: 0o755,
                name: "drafts".to_string()
            }
        );
        assert_eq!(parse_message("E").unwrap(), ScpMessage::EndDirectory);
        assert_eq!(
            parse_message("T1700000000 0 1700000100 0").unwrap(),
            ScpMessage::Times {
                mtime: 1_700_000_000,
                atime: 1_700_000_100
            }
        );
        assert_eq!(
            parse_message("\u{2}scp: no such file").unwrap(),
            ScpMessage::Fatal("scp: no such file".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "C0999 12 x", "C0644 -1 x", "C0644 12", "T1 2 3", "Efoo", "Xwhatever"] {
            assert!(parse_message(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_read_messages_until_eof() {
        let wire: &[u8] = b"T1 0 2 0\nC0644 3 a.pdf\n";
        let mut reader = BufReader::new(wire);

        assert!(matches!(read_message(&mut reader).await.unwrap(), Some(ScpMessage::Times { .. })));
        assert!(matches!(read_message(&mut reader).await.unwrap(), Some(ScpMessage::File { size: 3, .. })));
        assert!(read_message(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_header_rejected() {
        let mut wire = b"C0644 1 ".to_vec();
        wire.extend(std::iter::repeat(b'a').take(MAX_HEADER_LEN));
        wire.push(b'\n');
        let mut reader = BufReader::new(&wire[..]);

        assert!(matches!(read_message(&mut reader).await, Err(ScpError::HeaderTooLong)));
    }

    #[tokio::test]
    async fn test_status_and_replies() {
        let mut ok = BufReader::new(&[ACK][..]);
        assert!(read_status(&mut ok).await.is_ok());

        let mut failed = BufReader::new(&b"\x01disk full\n"[..]);
        assert!(matches!(read_status(&mut failed).await, Err(ScpError::Remote(m)) if m == "disk full"));

        let mut out = Vec::new();
        send_fatal(&mut out, "too large\nretry").await.unwrap();
        assert_eq!(out, b"\x02too large retry\n");
    }
}
