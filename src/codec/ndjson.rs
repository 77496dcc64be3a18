use bytes::{Bytes, BytesMut};

use crate::jsonrpc::Frame;

#[derive(Debug, thiserror::Error)]
#[error("invalid JSON on NDJSON line: {0}")]
pub struct NdjsonDecodeError(pub String);

pub fn encode(frame: &Frame) -> Result<Bytes, serde_json::Error> {
    let mut json = serde_json::to_vec(frame)?;
    json.push(b'\n');
    Ok(Bytes::from(json))
}

/// Incrementally decodes newline-delimited JSON, splitting on `\n` and
/// discarding empty segments so that a trailing newline after the last frame
/// yields exactly N frames, never N+1.
pub struct NdjsonDecoder {
    buf: BytesMut,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<Frame, NdjsonDecodeError>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line = self.buf.split_to(pos);
            let _ = self.buf.split_to(1); // drop the newline itself
            if let Some(parsed) = parse_line(&line) {
                out.push(parsed);
            }
        }

        out
    }

    /// Parses whatever remains in the buffer as a final frame, for streams
    /// that end without a trailing newline. Call once after the last `feed`.
    pub fn flush(&mut self) -> Option<Result<Frame, NdjsonDecodeError>> {
        if self.buf.is_empty() {
            return None;
        }
        let remaining = self.buf.split();
        parse_line(&remaining)
    }
}

impl Default for NdjsonDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_line(line: &[u8]) -> Option<Result<Frame, NdjsonDecodeError>> {
    let line = strip_trailing_cr(line);
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_slice::<Frame>(line).map_err(|e| NdjsonDecodeError(e.to_string())))
}

fn strip_trailing_cr(line: &[u8]) -> &[u8] {
    if line.last() == Some(&b'\r') {
        &line[..line.len() - 1]
    } else {
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_newline_yields_exactly_n_frames() {
        let mut d = NdjsonDecoder::new();
        let out = d.feed(b"{\"jsonrpc\":\"2.0\",\"method\":\"a\"}\n{\"jsonrpc\":\"2.0\",\"method\":\"b\"}\n");
        assert_eq!(out.len(), 2);
        assert!(d.flush().is_none());
    }

    #[test]
    fn chunk_split_mid_line_is_reassembled() {
        let mut d = NdjsonDecoder::new();
        let whole = b"{\"jsonrpc\":\"2.0\",\"method\":\"ping\"}\n".to_vec();
        let (a, b) = whole.split_at(12);
        let mut out = d.feed(a);
        assert!(out.is_empty());
        out.extend(d.feed(b));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap().method.as_deref(), Some("ping"));
    }

    #[test]
    fn missing_trailing_newline_requires_flush() {
        let mut d = NdjsonDecoder::new();
        let out = d.feed(b"{\"jsonrpc\":\"2.0\",\"method\":\"ping\"}");
        assert!(out.is_empty());
        let last = d.flush().unwrap().unwrap();
        assert_eq!(last.method.as_deref(), Some("ping"));
    }

    #[test]
    fn malformed_line_reports_error_without_aborting_stream() {
        let mut d = NdjsonDecoder::new();
        let out = d.feed(b"not json\n{\"jsonrpc\":\"2.0\",\"method\":\"ok\"}\n");
        assert_eq!(out.len(), 2);
        assert!(out[0].is_err());
        assert!(out[1].is_ok());
    }
}
