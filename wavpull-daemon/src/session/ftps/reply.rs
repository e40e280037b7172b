//! FTP control channel replies
//!
//! A reply is a three digit code followed by text. Multi-line replies start
//! with `<code>-` and end at the first line that starts with `<code> `:
//!
//! ```text
//! 211-Features:
//!  PBSZ
//!  PROT
//! 211 End
//! ```

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::session::SessionError;

/// Longest control line accepted (including CRLF)
pub const MAX_REPLY_LINE_LENGTH: u64 = 8 * 1024;

/// Most lines accepted in one multi-line reply
const MAX_REPLY_LINES: usize = 256;

/// A complete server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    /// Text of each line with the code prefix removed
    pub lines: Vec<String>,
}

impl Reply {
    /// 1xx: the command was accepted, another reply follows
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// 3xx: the server waits for a follow-up command
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// Text of the last line (the one that carries the final code)
    pub fn message(&self) -> &str {
        self.lines.last().map(String::as_str).unwrap_or_default()
    }

    /// `code message` for diagnostics
    pub fn summary(&self) -> String {
        format!("{} {}", self.code, self.message())
    }
}

/// Read one line, without the trailing CR LF
///
/// Returns `Ok(None)` on a clean end of stream.
async fn read_line<R>(reader: &mut R) -> Result<Option<String>, SessionError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(MAX_REPLY_LINE_LENGTH)
        .read_until(b'\n', &mut buf)
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))?;

    if read == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        if read as u64 >= MAX_REPLY_LINE_LENGTH {
            return Err(SessionError::Protocol("reply line too long".to_string()));
        }
        // Peer closed in the middle of a line
        return Err(SessionError::Closed);
    }

    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Split `"230 Login successful"` into its code and separator
fn split_code(line: &str) -> Option<(u16, Option<char>)> {
    let digits = line.get(..3)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let code = digits.parse().ok()?;
    Some((code, line[3..].chars().next()))
}

/// Read a complete (possibly multi-line) reply
///
/// # Errors
///
/// - [`SessionError::Closed`] if the stream ends before a reply completes
/// - [`SessionError::Protocol`] if the first line has no reply code, a line
///   is too long, or a multi-line reply never terminates
pub async fn read_reply<R>(reader: &mut R) -> Result<Reply, SessionError>
where
    R: AsyncBufRead + Unpin,
{
    let first = read_line(reader).await?.ok_or(SessionError::Closed)?;
    let (code, separator) = split_code(&first)
        .ok_or_else(|| SessionError::Protocol(format!("malformed reply: {:?}", first)))?;

    let text = |line: &str| line.get(4..).unwrap_or_default().to_string();
    let mut lines = vec![text(&first)];

    match separator {
        None | Some(' ') => return Ok(Reply { code, lines }),
        Some('-') => {}
        Some(_) => {
            return Err(SessionError::Protocol(format!(
                "malformed reply: {:?}",
                first
            )));
        }
    }

    loop {
        if lines.len() >= MAX_REPLY_LINES {
            return Err(SessionError::Protocol(
                "multi-line reply too long".to_string(),
            ));
        }
        let line = read_line(reader).await?.ok_or(SessionError::Closed)?;
        match split_code(&line) {
            Some((end_code, Some(' ') | None)) if end_code == code => {
                lines.push(text(&line));
                return Ok(Reply { code, lines });
            }
            _ => lines.push(line),
        }
    }
}

/// Send one command line
pub async fn write_command<W>(writer: &mut W, command: &str) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    let line = format!("{}\r\n", command);
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))
}

/// Command text safe to write to diagnostics
pub fn loggable(command: &str) -> &str {
    if command.starts_with("PASS ") {
        "PASS ****"
    } else {
        command
    }
}
