//! Engine wire codec
//!
//! Messages are framed HTTP-style:
//! ```text
//! Content-Length: <byte-length>\r\n
//! \r\n
//! <JSON body>
//! ```

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::Error;

/// Upper bound on a single frame; anything larger is a protocol error
const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Read one framed message, returning the JSON body
pub async fn read_message<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, Error> {
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await.map_err(map_eof)?;
        if bytes_read == 0 {
            return Err(Error::EngineCrashed);
        }

        // Blank line terminates the header block
        if line == "\r\n" || line == "\n" {
            break;
        }

        if let Some(value) = line.trim().strip_prefix("Content-Length:") {
            content_length = Some(value.trim().parse().map_err(|_| {
                Error::EngineProtocol(format!("Invalid Content-Length: {}", value.trim()))
            })?);
        }
        // Other headers are ignored
    }

    let len = content_length
        .ok_or_else(|| Error::EngineProtocol("Missing Content-Length header".to_string()))?;
    if len > MAX_FRAME_SIZE {
        return Err(Error::EngineProtocol(format!(
            "Frame too large: {} bytes",
            len
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(map_eof)?;

    String::from_utf8(body).map_err(|e| Error::EngineProtocol(format!("Invalid UTF-8: {}", e)))
}

/// Write one framed message
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, json: &str) -> Result<(), Error> {
    let header = format!("Content-Length: {}\r\n\r\n", json.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

fn map_eof(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::EngineCrashed
    } else {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn reads_framed_body() {
        let data = b"Content-Length: 13\r\n\r\n{\"test\":true}";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));
        assert_eq!(read_message(&mut reader).await.unwrap(), "{\"test\":true}");
    }

    #[tokio::test]
    async fn eof_maps_to_crashed() {
        let mut reader = BufReader::new(Cursor::new(Vec::new()));
        assert!(matches!(
            read_message(&mut reader).await,
            Err(Error::EngineCrashed)
        ));
    }

    #[tokio::test]
    async fn writes_round_trippable_frame() {
        let mut output = Vec::new();
        write_message(&mut output, "{\"seq\":1}").await.unwrap();

        let mut reader = BufReader::new(Cursor::new(output));
        assert_eq!(read_message(&mut reader).await.unwrap(), "{\"seq\":1}");
    }
}
