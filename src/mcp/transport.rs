//! Line-delimited stdio transport.
//!
//! Reads one request per line and writes exactly one response per
//! non-blank line, in order. Requests are handled one at a time; a start
//! request's bounded wait finishes before the next line is read. Lines
//! longer than [`MAX_LINE_BYTES`] get a parse error and are skipped.

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::handler::PerouterServer;
use super::protocol::{parse_error, JsonRpcResponse};
use crate::{AppError, Result};

/// Longest accepted request line, excluding the newline.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Read limit per line: the cap plus its terminating newline.
const LINE_READ_LIMIT: u64 = 1024 * 1024 + 1;

const INTERNAL_ERROR_LINE: &str =
    "{\"jsonrpc\":\"2.0\",\"error\":{\"code\":-32603,\"message\":\"Internal error\"}}\n";

/// Serve the dispatcher over stdin/stdout until EOF or cancellation.
///
/// # Errors
///
/// Returns `AppError::Io` if stdin or stdout fails.
pub async fn serve_stdio(server: PerouterServer, ct: CancellationToken) -> Result<()> {
    info!("starting stdio transport");
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    serve(&server, stdin, stdout, ct).await?;
    info!("stdio transport shut down");
    Ok(())
}

/// Serve the dispatcher over an arbitrary reader/writer pair.
///
/// # Errors
///
/// Returns `AppError::Io` if reading a line or writing a response fails.
pub async fn serve<R, W>(
    server: &PerouterServer,
    mut reader: R,
    mut writer: W,
    ct: CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = {
            let mut limited = (&mut reader).take(LINE_READ_LIMIT);
            tokio::select! {
                () = ct.cancelled() => {
                    debug!("transport cancelled");
                    break;
                }
                read = limited.read_until(b'\n', &mut buf) => read,
            }
        };

        match read {
            Ok(0) => {
                debug!("transport reached EOF");
                break;
            }
            Ok(_) => {}
            Err(err) => return Err(AppError::Io(format!("failed to read request: {err}"))),
        }

        let response = if buf.len() > MAX_LINE_BYTES && buf.last() != Some(&b'\n') {
            warn!(limit = MAX_LINE_BYTES, "request line too long, discarding");
            discard_line(&mut reader)
                .await
                .map_err(|err| AppError::Io(format!("failed to read request: {err}")))?;
            Some(JsonRpcResponse::failure(None, parse_error()))
        } else {
            match std::str::from_utf8(&buf) {
                Ok(line) => server.handle_line(line).await,
                Err(err) => {
                    warn!(%err, "request is not valid UTF-8");
                    Some(JsonRpcResponse::failure(None, parse_error()))
                }
            }
        };
        let Some(response) = response else {
            continue;
        };

        let encoded = response.to_line().unwrap_or_else(|err| {
            warn!(%err, "response could not be serialized");
            JsonRpcResponse::failure(
                response.id.clone(),
                rmcp::ErrorData::internal_error(err.to_string(), None),
            )
            .to_line()
            .unwrap_or_else(|_| INTERNAL_ERROR_LINE.to_owned())
        });

        writer
            .write_all(encoded.as_bytes())
            .await
            .map_err(|err| AppError::Io(format!("failed to write response: {err}")))?;
        writer
            .flush()
            .await
            .map_err(|err| AppError::Io(format!("failed to flush response: {err}")))?;
    }

    Ok(())
}

/// Skip the rest of the current line without buffering it.
async fn discard_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        if let Some(end) = available.iter().position(|byte| *byte == b'\n') {
            reader.consume(end + 1);
            return Ok(());
        }
        let len = available.len();
        reader.consume(len);
    }
}
