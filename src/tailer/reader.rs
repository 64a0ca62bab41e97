use crate::config::Encoding;
use crate::error::{IngestError, IngestResult};
use crate::parser::LinePosition;
use std::path::Path;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Read at most `max_bytes` starting at `offset`
pub async fn read_chunk(path: &Path, offset: u64, max_bytes: usize) -> IngestResult<Vec<u8>> {
    let mut file = fs::File::open(path)
        .await
        .map_err(|e| IngestError::path_unavailable(path, e))?;
    file.seek(std::io::SeekFrom::Start(offset)).await?;
    if max_bytes == 0 {
        return Ok(Vec::new());
    }

    let mut buffer = vec![0u8; max_bytes];
    let mut total_read = 0usize;
    while total_read < max_bytes {
        let bytes_read = file.read(&mut buffer[total_read..]).await?;
        if bytes_read == 0 {
            break;
        }
        total_read += bytes_read;
    }
    buffer.truncate(total_read);
    Ok(buffer)
}

/// Decode one line's bytes. Invalid UTF-8 is replaced rather than rejected.
pub fn decode(bytes: &[u8], encoding: Encoding) -> String {
    match encoding {
        Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// A complete physical line cut from the byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub text: String,
    pub position: LinePosition,
}

/// Splits appended bytes into lines, carrying a trailing partial line over
/// to the next chunk.
#[derive(Debug)]
pub struct LineSplitter {
    encoding: Encoding,
    pending: Vec<u8>,
    /// Offset of the first pending byte, equal to the end of the last full line
    consumed: u64,
    last_line: u64,
}

impl LineSplitter {
    pub fn new(encoding: Encoding, offset: u64, line_number: u64) -> Self {
        Self {
            encoding,
            pending: Vec::new(),
            consumed: offset,
            last_line: line_number,
        }
    }

    /// End offset of the last complete line handed out
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn last_line(&self) -> u64 {
        self.last_line
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<RawLine> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0usize;
        while let Some(idx) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + idx;
            let line_offset = self.consumed + start as u64;
            let mut bytes = &self.pending[start..end];
            if line_offset == 0 && self.encoding == Encoding::Utf8 {
                bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
            }

            self.last_line += 1;
            lines.push(RawLine {
                text: decode(bytes, self.encoding),
                position: LinePosition {
                    line_number: self.last_line,
                    offset: line_offset,
                },
            });
            start = end + 1;
        }

        self.pending.drain(..start);
        self.consumed += start as u64;
        lines
    }

    /// Forget buffered bytes and restart at the beginning of a new stream
    pub fn reset(&mut self) {
        self.pending.clear();
        self.consumed = 0;
        self.last_line = 0;
    }
}
