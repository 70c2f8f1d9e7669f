//! Raw console: a hex-level tester for the server.
//!
//! Every line typed is sent to the server exactly as entered, so malformed
//! and out-of-order messages can be tried on purpose.  Every line the server
//! sends is decoded and printed.  When a CHALLENGE arrives and a login was
//! given, the console also prints the hex line of a valid RESPONSE, ready to
//! paste back.

use std::io::Write;

use iotp_core::auth::build_user_response;
use iotp_core::dfa::Credentials;
use iotp_core::protocol::{Frame, LineReader, MAX_LINE_LEN};
use iotp_core::{decode_line, encode_line, Keycode, Message};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

use crate::infrastructure::network::SessionError;

/// Why the raw console stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEnd {
    /// Local input ended.
    InputClosed,
    /// The server closed the connection.
    ServerClosed,
}

/// Shuttles lines between `input` and the server until either side ends.
///
/// # Errors
///
/// Returns [`SessionError::Io`] if the socket or `out` fails.
pub async fn run_raw_console<S, W>(
    stream: S,
    mut input: mpsc::UnboundedReceiver<String>,
    out: &mut W,
    login: Option<&Credentials>,
) -> Result<RawEnd, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    W: Write,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = LineReader::new(BufReader::new(reader));
    writeln!(out, "raw mode: type hex messages, e.g. 00 for PING or 09 for TERMINATE")?;

    loop {
        tokio::select! {
            typed = input.recv() => {
                let Some(typed) = typed else {
                    return Ok(RawEnd::InputClosed);
                };
                let typed = typed.trim();
                if typed.is_empty() {
                    continue;
                }
                writer.write_all(format!("{typed}\n").as_bytes()).await?;
                writer.flush().await?;
                debug!(line = typed, "sent raw");
            }
            received = lines.next_frame() => match received? {
                Some(Frame::Line(line)) => print_server_line(out, &line, login)?,
                Some(Frame::TooLong) => {
                    writeln!(out, "<- (line over {MAX_LINE_LEN} bytes skipped)")?;
                }
                None => {
                    writeln!(out, "server closed the connection")?;
                    return Ok(RawEnd::ServerClosed);
                }
            },
        }
    }
}

/// Prints one server line, plus a ready-made RESPONSE after a CHALLENGE.
fn print_server_line<W: Write>(
    out: &mut W,
    line: &[u8],
    login: Option<&Credentials>,
) -> Result<(), SessionError> {
    let msg = match decode_line(line) {
        Ok(msg) => msg,
        Err(e) => {
            let text = String::from_utf8_lossy(line);
            writeln!(out, "<- {} (undecodable: {e})", text.trim_end())?;
            return Ok(());
        }
    };
    writeln!(out, "<- {msg}")?;
    if let Some(login) = login.filter(|_| msg.is(Keycode::Challenge)) {
        let body = build_user_response(&login.username, &login.password, msg.payload());
        let response = encode_line(&Message::response(body))?;
        writeln!(out, "   RESPONSE for {}: {}", login.username, response.trim_end())?;
    }
    Ok(())
}
